#![allow(missing_docs)]
#![allow(clippy::arc_with_non_send_sync)]

use std::sync::Arc;

use areafile::{
    admin::Treatment,
    primitives::pager::{FixMode, MemPager},
    storage::{AreaFile, AreaFileOptions},
    types::{AreaId, PageId, Result},
};
use proptest::prelude::*;

const PAGE: u32 = 256;
const ALIGN: u32 = 4;

#[derive(Debug, Clone)]
enum Op {
    Allocate { size: u32, fill: u8 },
    Free { pick: usize },
    Resize { pick: usize, size: u32 },
    Write { pick: usize, fill: u8 },
    Detach,
    Recover,
    Truncate,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u32..=240, any::<u8>()).prop_map(|(size, fill)| Op::Allocate { size, fill }),
        3 => any::<usize>().prop_map(|pick| Op::Free { pick }),
        2 => (any::<usize>(), 1u32..=240).prop_map(|(pick, size)| Op::Resize { pick, size }),
        1 => (any::<usize>(), any::<u8>()).prop_map(|(pick, fill)| Op::Write { pick, fill }),
        1 => Just(Op::Detach),
        1 => Just(Op::Recover),
        1 => Just(Op::Truncate),
    ]
}

fn rounded(size: u32) -> usize {
    ((size + ALIGN - 1) & !(ALIGN - 1)) as usize
}

/// Expected contents after a resize that fit in place.
fn resized(old: &[u8], size: u32) -> Vec<u8> {
    let keep = old.len().min(size as usize);
    let mut bytes = vec![0u8; rounded(size)];
    bytes[..keep].copy_from_slice(&old[..keep]);
    bytes
}

fn check_against_model(file: &mut AreaFile, live: &[(AreaId, Vec<u8>)]) -> Result<()> {
    for (id, expected) in live {
        let area = file.attach_area(*id, FixMode::ReadOnly)?;
        assert_eq!(&area.read()?, expected, "contents of area {id}");
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

fn run(ops: &[Op]) -> Result<()> {
    let pager = Arc::new(MemPager::new(PAGE));
    let options = AreaFileOptions::new().alignment(ALIGN).max_cached_read_only(2);
    let mut file = AreaFile::create(pager, options)?;
    let mut live: Vec<(AreaId, Vec<u8>)> = Vec::new();
    let mut committed = live.clone();

    for op in ops {
        match *op {
            Op::Allocate { size, fill } => {
                let area = file.allocate_area(size)?;
                assert!(area.read()?.iter().all(|b| *b == 0));
                area.with_bytes_mut(|bytes| bytes.fill(fill))?;
                assert!(live.iter().all(|(id, _)| *id != area.id()));
                live.push((area.id(), vec![fill; rounded(size)]));
            }
            Op::Free { pick } if !live.is_empty() => {
                let (id, _) = live.remove(pick % live.len());
                file.free_area(id, None)?;
            }
            Op::Resize { pick, size } if !live.is_empty() => {
                let slot = pick % live.len();
                let id = live[slot].0;
                if file.change_area_size(id, size, None)? {
                    live[slot].1 = resized(&live[slot].1, size);
                }
            }
            Op::Write { pick, fill } if !live.is_empty() => {
                let slot = pick % live.len();
                let area = file.attach_area(live[slot].0, FixMode::DiscardableWrite)?;
                area.with_bytes_mut(|bytes| bytes.fill(fill))?;
                live[slot].1.fill(fill);
            }
            Op::Detach => {
                file.detach_all_areas()?;
                committed = live.clone();
            }
            Op::Recover => {
                file.recover_all_areas()?;
                live = committed.clone();
            }
            Op::Truncate => {
                if file.truncate()? {
                    committed = live.clone();
                }
            }
            _ => {}
        }
        check_against_model(&mut file, &live)?;
    }

    let mut progress = file.begin_verification(Treatment::Check);
    for (id, _) in &live {
        file.verify_area(*id, FixMode::ReadOnly, &mut progress)?;
    }
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert!(progress.is_good(), "{:?}", progress.findings());
    assert!(progress.findings().is_empty());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operations_match_the_model(ops in prop::collection::vec(arb_op(), 1..160)) {
        run(&ops).unwrap();
    }
}
