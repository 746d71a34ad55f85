#![allow(missing_docs)]
#![allow(clippy::arc_with_non_send_sync)]

use std::sync::Arc;

use areafile::{
    primitives::pager::{FixMode, MemPager, PageStore},
    storage::{AreaFile, AreaFileOptions, CounterMetrics},
    types::{AreaError, AreaId, PageId, Result},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create(page_size: u32, options: AreaFileOptions) -> Result<(Arc<MemPager>, AreaFile)> {
    init_tracing();
    let pager = Arc::new(MemPager::new(page_size));
    let file = AreaFile::create(pager.clone(), options)?;
    Ok((pager, file))
}

#[test]
fn freed_area_is_compacted_and_its_id_reused() -> Result<()> {
    let (_pager, mut file) = create(1008, AreaFileOptions::new().alignment(2))?;
    let first = file.allocate_area(100)?;
    let second = file.allocate_area(50)?;
    assert_eq!(first.id(), AreaId::new(PageId(3), 0));
    assert_eq!((first.offset()?, second.offset()?), (0, 100));
    second.write_at(0, b"second")?;

    file.free_area(first.id(), None)?;
    assert_eq!(second.offset()?, 0);
    assert_eq!(&second.read()?[..6], b"second");
    assert_eq!(file.page_free_size(PageId(3))?, 1000 - 50 - 8 - 8);

    let reused = file.allocate_area(100)?;
    assert_eq!(reused.id(), first.id());
    assert_eq!(reused.size()?, 100);
    assert_eq!(second.offset()? + second.size()?, 150);
    assert_eq!(&second.read()?[..6], b"second");
    assert!(reused.read()?.iter().all(|b| *b == 0));
    assert_eq!(file.page_free_size(PageId(3))?, 1000 - 150 - 2 * 8 - 8);
    Ok(())
}

#[test]
fn full_first_leaf_is_summarised_when_the_second_is_created() -> Result<()> {
    let (pager, mut file) = create(1008, AreaFileOptions::new())?;
    let max = file.max_storable_area_size();
    let full = file.allocate_area(max)?;
    assert_eq!(file.page_free_size(PageId(3))?, 0);
    assert_eq!(file.parent_free_size(PageId(3))?, None);

    let next = file.allocate_area(8)?;
    assert_eq!(next.id().page, PageId(4));
    assert_eq!(file.last_page_id()?, PageId(4));
    assert_eq!(file.parent_free_size(PageId(3))?, Some(0));
    assert_eq!(file.used_size()?, 5 * 1008);
    assert_eq!(pager.page_count()?, 5);

    file.free_area(full.id(), None)?;
    assert_eq!(file.parent_free_size(PageId(3))?, Some(max));
    let placed = file.allocate_area(500)?;
    assert_eq!(placed.id().page, PageId(4));
    let searched = file.allocate_area(500)?;
    assert_eq!(searched.id().page, PageId(3));
    assert_eq!(file.parent_free_size(PageId(3))?, Some(1000 - 500 - 8 - 8));
    Ok(())
}

#[test]
fn batch_insert_always_appends() -> Result<()> {
    let (_pager, mut file) = create(1008, AreaFileOptions::new().batch_insert(true))?;
    let first = file.allocate_area(992)?;
    file.allocate_area(992)?;
    file.free_area(first.id(), None)?;
    let appended = file.allocate_area(992)?;
    assert_eq!(appended.id().page, PageId(5));
    Ok(())
}

#[test]
fn detach_keeps_and_recover_drops() -> Result<()> {
    let (pager, mut file) = create(1008, AreaFileOptions::new())?;
    let kept = file.allocate_area(16)?;
    kept.write_at(0, b"kept")?;
    file.detach_all_areas()?;
    assert_eq!(pager.pinned_pages(), 0);

    let dropped = file.allocate_area(16)?;
    dropped.write_at(0, b"gone")?;
    let kept_again = file.attach_area(kept.id(), FixMode::DiscardableWrite)?;
    kept_again.write_at(0, b"KEPT")?;
    file.recover_all_areas()?;

    let kept = file.attach_area(kept.id(), FixMode::ReadOnly)?;
    assert_eq!(&kept.read()?[..4], b"kept");
    assert!(!kept.is_writable());
    assert!(matches!(
        file.attach_area(dropped.id(), FixMode::ReadOnly),
        Err(AreaError::BadArgument(_))
    ));
    Ok(())
}

#[test]
fn reopened_file_sees_detached_areas() -> Result<()> {
    let (pager, mut file) = create(512, AreaFileOptions::new())?;
    let mut ids = Vec::new();
    for n in 0..20u8 {
        let area = file.allocate_area(100)?;
        area.write_at(0, &[n; 4])?;
        ids.push(area.id());
    }
    let last = file.last_page_id()?;
    file.detach_all_areas()?;
    drop(file);

    let mut file = AreaFile::open(pager.clone(), AreaFileOptions::new())?;
    assert_eq!(file.last_page_id()?, last);
    for (n, id) in ids.iter().enumerate() {
        let area = file.attach_area(*id, FixMode::ReadOnly)?;
        assert_eq!(&area.read()?[..4], &[n as u8; 4]);
    }
    assert!(pager.pinned_pages() <= 1 + 3);
    Ok(())
}

#[test]
fn reopening_under_another_layout_is_refused() -> Result<()> {
    let (pager, mut file) = create(256, AreaFileOptions::new().page_size(128))?;
    let id = file.allocate_area(40)?.id();
    assert_eq!(file.max_storable_area_size(), 112);
    file.detach_all_areas()?;
    drop(file);

    assert!(matches!(
        AreaFile::open(pager.clone(), AreaFileOptions::new()),
        Err(AreaError::BadArgument(_))
    ));
    assert!(matches!(
        AreaFile::open(pager.clone(), AreaFileOptions::new().page_size(128).alignment(8)),
        Err(AreaError::BadArgument(_))
    ));

    let mut file = AreaFile::open(pager, AreaFileOptions::new().page_size(128))?;
    assert_eq!(file.max_storable_area_size(), 112);
    assert_eq!(file.attach_area(id, FixMode::ReadOnly)?.size()?, 40);
    Ok(())
}

#[test]
fn dropped_file_rolls_back_pending_changes() -> Result<()> {
    let (pager, mut file) = create(1008, AreaFileOptions::new())?;
    file.allocate_area(64)?;
    drop(file);
    let mut file = AreaFile::open(pager, AreaFileOptions::new())?;
    assert_eq!(file.page_free_size(PageId(3))?, 992);
    Ok(())
}

#[test]
fn change_area_size_moves_neighbours_or_refuses() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let options = AreaFileOptions::new().metrics(metrics.clone());
    let (_pager, mut file) = create(1008, options)?;
    let grown = file.allocate_area(100)?;
    let neighbour = file.allocate_area(100)?;
    grown.write_at(0, &[7; 100])?;
    neighbour.write_at(0, b"tail")?;

    assert!(file.change_area_size(grown.id(), 300, None)?);
    assert_eq!(grown.size()?, 300);
    assert_eq!(neighbour.offset()?, 300);
    assert_eq!(&neighbour.read()?[..4], b"tail");
    let bytes = grown.read()?;
    assert!(bytes[..100].iter().all(|b| *b == 7));
    assert!(bytes[100..].iter().all(|b| *b == 0));

    assert!(file.change_area_size(grown.id(), 10, None)?);
    assert_eq!(grown.size()?, 12);
    assert_eq!(&grown.read()?[..], &[7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 0, 0]);
    assert_eq!(neighbour.offset()?, 12);

    assert!(!file.change_area_size(grown.id(), 992, None)?);
    assert_eq!(grown.size()?, 12);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.resizes_in_place, 2);
    assert_eq!(snapshot.resizes_refused, 1);
    assert_eq!(snapshot.areas_allocated, 2);
    Ok(())
}

#[test]
fn unknown_areas_and_pages_are_rejected() -> Result<()> {
    let (_pager, mut file) = create(1008, AreaFileOptions::new())?;
    let area = file.allocate_area(8)?;
    let missing = AreaId::new(PageId(3), 5);
    assert!(matches!(file.free_area(missing, None), Err(AreaError::BadArgument(_))));
    assert!(matches!(
        file.attach_area(AreaId::new(PageId(2), 0), FixMode::ReadOnly),
        Err(AreaError::BadArgument(_))
    ));
    assert!(matches!(
        file.attach_area(AreaId::new(PageId(9), 0), FixMode::ReadOnly),
        Err(AreaError::BadArgument(_))
    ));
    file.free_area(area.id(), None)?;
    assert!(matches!(area.read(), Err(AreaError::BadArgument(_))));
    assert!(matches!(file.free_area(area.id(), None), Err(AreaError::BadArgument(_))));
    Ok(())
}

#[test]
fn trailing_empty_leaves_are_truncated() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let (pager, mut file) = create(1008, AreaFileOptions::new().metrics(metrics.clone()))?;
    let kept = file.allocate_area(992)?;
    let middle = file.allocate_area(992)?;
    let tail = file.allocate_area(992)?;
    assert_eq!(tail.id().page, PageId(5));
    assert!(!file.truncate()?);

    file.free_area(tail.id(), None)?;
    file.free_area(middle.id(), None)?;
    assert!(file.truncate()?);
    assert_eq!(file.last_page_id()?, PageId(3));
    assert_eq!(pager.page_count()?, 4);
    assert_eq!(file.used_size()?, 4 * 1008);
    assert_eq!(metrics.snapshot().pages_truncated, 2);
    assert!(!file.truncate()?);

    let kept = file.attach_area(kept.id(), FixMode::ReadOnly)?;
    assert_eq!(kept.size()?, 992);
    let regrown = file.allocate_area(8)?;
    assert_eq!(regrown.id().page, PageId(4));
    assert_eq!(file.parent_free_size(PageId(3))?, Some(0));
    Ok(())
}

#[test]
fn seeded_workload_keeps_area_contents() -> Result<()> {
    let (_pager, mut file) = create(512, AreaFileOptions::new().max_cached_read_only(2))?;
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut live: Vec<(AreaId, u8)> = Vec::new();
    for round in 0..600u32 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..=200);
            let area = file.allocate_area(size)?;
            let tag = (round % 251) as u8;
            area.with_bytes_mut(|bytes| bytes.fill(tag))?;
            live.push((area.id(), tag));
        } else {
            let (id, _) = live.swap_remove(rng.gen_range(0..live.len()));
            file.free_area(id, None)?;
        }
        if round % 97 == 0 {
            file.detach_all_areas()?;
        }
    }
    for (id, tag) in &live {
        let area = file.attach_area(*id, FixMode::ReadOnly)?;
        assert!(area.with_bytes(|bytes| bytes.iter().all(|b| b == tag))?);
    }
    let last = file.last_page_id()?;
    for page in 3..last.0 {
        let page = PageId(page);
        if let Some(summary) = file.parent_free_size(page)? {
            assert_eq!(summary, file.page_free_size(page)?, "summary of leaf {page}");
        }
    }
    Ok(())
}
