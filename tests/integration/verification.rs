#![allow(missing_docs)]
#![allow(clippy::arc_with_non_send_sync)]

use std::sync::Arc;

use areafile::{
    admin::{Discrepancy, Treatment, VerifySeverity},
    primitives::pager::{FixMode, MemPager, PageStore, ReplacementPriority},
    storage::{AreaFile, AreaFileOptions},
    types::{AreaError, AreaId, PageId, Result},
};

fn create(page_size: u32) -> Result<(Arc<MemPager>, AreaFile)> {
    let pager = Arc::new(MemPager::new(page_size));
    let file = AreaFile::create(pager.clone(), AreaFileOptions::new())?;
    Ok((pager, file))
}

fn two_areas(file: &mut AreaFile) -> Result<(AreaId, AreaId)> {
    let kept = file.allocate_area(100)?.id();
    let stray = file.allocate_area(40)?.id();
    file.detach_all_areas()?;
    Ok((kept, stray))
}

#[test]
fn claimed_areas_verify_cleanly() -> Result<()> {
    let (_pager, mut file) = create(1008)?;
    let (kept, stray) = two_areas(&mut file)?;
    let mut progress = file.begin_verification(Treatment::Strict);
    file.verify_area(kept, FixMode::ReadOnly, &mut progress)?;
    let area = file.verify_area(stray, FixMode::ReadOnly, &mut progress)?;
    assert_eq!(area.size()?, 40);
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;

    let report = progress.into_report();
    assert!(report.success);
    assert!(report.findings.is_empty());
    assert_eq!(report.counts.areas_verified, 2);
    assert_eq!(report.counts.leaves_verified, 1);
    Ok(())
}

#[test]
fn unclaimed_area_is_reported_under_check() -> Result<()> {
    let (_pager, mut file) = create(1008)?;
    let (kept, stray) = two_areas(&mut file)?;
    let mut progress = file.begin_verification(Treatment::Check);
    file.verify_area(kept, FixMode::ReadOnly, &mut progress)?;
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;

    assert!(file.attach_area(stray, FixMode::ReadOnly).is_ok());
    let report = progress.into_report();
    assert!(!report.success);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].severity, VerifySeverity::Inconsistent);
    assert_eq!(
        report.findings[0].discrepancy,
        Discrepancy::UnusedArea { page: 3, area: stray.key }
    );

    let json = serde_json::to_value(&report).map_err(|_| AreaError::Unexpected("report json"))?;
    assert_eq!(json["treatment"], "check");
    assert_eq!(json["findings"][0]["severity"], "inconsistent");
    assert_eq!(json["findings"][0]["discrepancy"]["kind"], "unused_area");
    assert_eq!(json["counts"]["inconsistent"], 1);
    Ok(())
}

#[test]
fn unclaimed_area_is_freed_under_correct() -> Result<()> {
    let (_pager, mut file) = create(1008)?;
    let (kept, stray) = two_areas(&mut file)?;
    let mut progress = file.begin_verification(Treatment::Correct);
    file.verify_area(kept, FixMode::ReadOnly, &mut progress)?;
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;

    assert!(progress.is_good());
    assert_eq!(progress.counts().corrected, 1);
    assert!(matches!(
        file.attach_area(stray, FixMode::ReadOnly),
        Err(AreaError::BadArgument(_))
    ));
    assert_eq!(file.attach_area(kept, FixMode::ReadOnly)?.size()?, 100);
    assert_eq!(file.page_free_size(PageId(3))?, 1000 - 100 - 8 - 8);
    Ok(())
}

#[test]
fn strict_pass_fails_on_first_finding() -> Result<()> {
    let (_pager, mut file) = create(1008)?;
    let (kept, _stray) = two_areas(&mut file)?;
    let mut progress = file.begin_verification(Treatment::Strict);
    file.verify_area(kept, FixMode::ReadOnly, &mut progress)?;
    let err = file.verify_all_pages(&mut progress).unwrap_err();
    assert!(matches!(err, AreaError::Inconsistent(ref msg) if msg.contains("3:1")));
    file.end_verification()?;
    Ok(())
}

#[test]
fn changes_made_during_the_pass_are_tracked() -> Result<()> {
    let (_pager, mut file) = create(1008)?;
    let (kept, stray) = two_areas(&mut file)?;
    let mut progress = file.begin_verification(Treatment::Check);
    file.verify_area(kept, FixMode::ReadOnly, &mut progress)?;
    file.verify_area(stray, FixMode::ReadOnly, &mut progress)?;
    file.free_area(stray, Some(&mut progress))?;
    assert!(file.change_area_size(kept, 200, Some(&mut progress))?);
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;

    assert!(progress.is_good(), "{:?}", progress.findings());
    assert!(matches!(
        file.attach_area(stray, FixMode::ReadOnly),
        Err(AreaError::BadArgument(_))
    ));
    assert_eq!(file.attach_area(kept, FixMode::ReadOnly)?.size()?, 200);
    Ok(())
}

#[test]
fn wrong_summary_entry_is_reported_then_corrected() -> Result<()> {
    let (pager, mut file) = create(1008)?;
    let first = file.allocate_area(992)?.id();
    let second = file.allocate_area(992)?.id();
    assert_eq!(second.page, PageId(4));
    file.detach_all_areas()?;
    pager.with_page_mut(PageId(0), |root| root[16..20].copy_from_slice(&500u32.to_le_bytes()))?;

    let mut progress = file.begin_verification(Treatment::Check);
    file.verify_area(first, FixMode::ReadOnly, &mut progress)?;
    file.verify_area(second, FixMode::ReadOnly, &mut progress)?;
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert_eq!(
        progress.findings()[0].discrepancy,
        Discrepancy::NodeFreeSize {
            node: 0,
            index: 0,
            stored: 500,
            child: 3,
            actual: 0,
        }
    );
    assert_eq!(file.parent_free_size(PageId(3))?, Some(500));
    file.recover_all_areas()?;

    let mut progress = file.begin_verification(Treatment::Correct);
    file.verify_area(first, FixMode::ReadOnly, &mut progress)?;
    file.verify_area(second, FixMode::ReadOnly, &mut progress)?;
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert!(progress.is_good());
    assert_eq!(progress.findings()[0].severity, VerifySeverity::Corrected);
    assert_eq!(&pager.page_image(PageId(0))?[16..20], &[0, 0, 0, 0]);
    assert_eq!(file.parent_free_size(PageId(3))?, Some(0));
    Ok(())
}

#[test]
fn stale_header_of_empty_leaf_is_reset() -> Result<()> {
    let (pager, mut file) = create(1008)?;
    pager.with_page_mut(PageId(3), |leaf| leaf[4..8].copy_from_slice(&40i32.to_le_bytes()))?;
    assert_eq!(file.page_free_size(PageId(3))?, 1000 - 40 - 8);
    file.recover_all_areas()?;

    let mut progress = file.begin_verification(Treatment::Check);
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert_eq!(
        progress.findings()[0].discrepancy,
        Discrepancy::LeafHeaderOffset { page: 3, space_offset: 40 }
    );
    assert!(!progress.is_good());

    let mut progress = file.begin_verification(Treatment::Correct);
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert!(progress.is_good());
    assert_eq!(progress.counts().corrected, 1);
    assert_eq!(file.page_free_size(PageId(3))?, 992);
    Ok(())
}

#[test]
fn stale_header_is_corrected_on_a_leaf_attached_read_only() -> Result<()> {
    let (pager, mut file) = create(1008)?;
    pager.with_page_mut(PageId(3), |leaf| leaf[4..8].copy_from_slice(&40i32.to_le_bytes()))?;

    let mut progress = file.begin_verification(Treatment::Correct);
    file.verify_area(AreaId::new(PageId(3), 0), FixMode::ReadOnly, &mut progress)?;
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;

    let found: Vec<(VerifySeverity, &Discrepancy)> = progress
        .findings()
        .iter()
        .map(|f| (f.severity, &f.discrepancy))
        .collect();
    assert_eq!(
        found,
        [
            (
                VerifySeverity::Corrected,
                &Discrepancy::LeafHeaderOffset { page: 3, space_offset: 40 }
            ),
            (VerifySeverity::Inconsistent, &Discrepancy::UnknownArea { page: 3, area: 0 }),
        ]
    );
    assert_eq!(progress.counts().corrected, 1);
    assert_eq!(&pager.page_image(PageId(3))?[4..8], &[0, 0, 0, 0]);
    assert_eq!(file.page_free_size(PageId(3))?, 992);
    Ok(())
}

#[test]
fn pages_past_the_last_leaf_are_reported() -> Result<()> {
    let (pager, mut file) = create(1008)?;
    let stray = pager.fix(PageId(5), FixMode::Allocate, ReplacementPriority::Low)?;
    pager.unfix(stray, true)?;

    let mut progress = file.begin_verification(Treatment::Check);
    file.verify_area(AreaId::new(PageId(5), 0), FixMode::ReadOnly, &mut progress)?;
    file.end_verification()?;
    let found: Vec<&Discrepancy> = progress.findings().iter().map(|f| &f.discrepancy).collect();
    assert_eq!(
        found,
        [
            &Discrepancy::PageBeyondLast { page: 5, last: 3 },
            &Discrepancy::UnknownArea { page: 5, area: 0 },
        ]
    );
    Ok(())
}

#[test]
fn node_that_cannot_be_fixed_aborts_the_pass() -> Result<()> {
    // 64-byte pages: 14 leaves put the root in place of node 1.
    let (pager, mut file) = create(64)?;
    let ids: Vec<AreaId> = (0..14)
        .map(|_| file.allocate_area(48).map(|area| area.id()))
        .collect::<Result<_>>()?;
    assert_eq!(file.last_page_id()?, PageId(17));
    file.detach_all_areas()?;

    let mut progress = file.begin_verification(Treatment::Check);
    for id in &ids {
        file.verify_area(*id, FixMode::ReadOnly, &mut progress)?;
    }
    pager.set_reclaimable(false);
    pager.fail_next_fixes(1);
    let err = file.verify_all_pages(&mut progress).unwrap_err();
    file.end_verification()?;
    match err {
        AreaError::Aborted(inner) => assert!(matches!(*inner, AreaError::MemoryExhausted)),
        other => panic!("unexpected error {other:?}"),
    }
    let last = progress.findings().last().cloned();
    assert!(matches!(
        last,
        Some(finding) if finding.severity == VerifySeverity::Aborted
            && finding.discrepancy == Discrepancy::CannotFixNode { page: 2 }
    ));
    assert!(!progress.is_good());

    pager.set_reclaimable(true);
    let mut progress = file.begin_verification(Treatment::Check);
    for id in &ids {
        file.verify_area(*id, FixMode::ReadOnly, &mut progress)?;
    }
    file.verify_all_pages(&mut progress)?;
    file.end_verification()?;
    assert!(progress.is_good());
    Ok(())
}
