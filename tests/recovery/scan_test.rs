use std::fs;

use pdbforensics::{
    corruptor::Corruptor,
    recovery::{
        EngineState, RecoveryEngine,
        scan::{RegionFinding, Verdict, check_region, scan_image, unreadable_pages},
    },
    storage::image::DatabaseImage,
    types::scenario::Scenario,
    utils::mock::TempDatabase,
};

fn damaged(findings: &[RegionFinding]) -> Vec<Scenario> {
    findings
        .iter()
        .filter(|finding| finding.verdict != Verdict::Intact)
        .map(|finding| finding.scenario)
        .collect()
}

#[test]
fn test_pristine_fixture_scans_intact() {
    let db = TempDatabase::new().unwrap();
    let mut engine = RecoveryEngine::inspect(&db.source, None).unwrap();
    assert_eq!(engine.state(), EngineState::Loaded);

    let findings = engine.scan_database();
    assert_eq!(findings.len(), 10);
    for (finding, scenario) in findings.iter().zip(Scenario::ALL) {
        assert_eq!(finding.scenario, scenario);
        assert_eq!(finding.region, scenario.region());
        assert_eq!(finding.verdict, Verdict::Intact, "{}", finding.detail);
    }
    assert_eq!(engine.state(), EngineState::Scanned);
    assert!(unreadable_pages(engine.image()).is_empty());
}

#[test]
fn test_single_scenario_damages_only_its_region() {
    for scenario in Scenario::ALL {
        for seed in 0..3u64 {
            let db = TempDatabase::new().unwrap();
            Corruptor::new(&db.source, &db.corrupt)
                .unwrap()
                .with_seed(seed)
                .corrupt(scenario)
                .unwrap();

            let mut engine = RecoveryEngine::inspect(&db.corrupt, Some(db.source.as_path())).unwrap();
            let findings = engine.scan_database();
            assert_eq!(
                damaged(&findings),
                vec![scenario],
                "seed {} findings {:#?}",
                seed,
                findings
            );
            let finding = &findings[scenario.number() as usize - 1];
            assert_eq!(finding.verdict, Verdict::Damaged);
            assert_ne!(finding.detail, "no damage detected");
        }
    }
}

#[test]
fn test_magic_and_bitmap_damage_reported_together() {
    let db = TempDatabase::new().unwrap();
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(21)
        .apply(&[Scenario::MagicHeader, Scenario::RowPresenceBitmap])
        .unwrap();

    let mut engine = RecoveryEngine::inspect(&db.corrupt, None).unwrap();
    assert_eq!(
        damaged(&engine.scan_database()),
        vec![Scenario::MagicHeader, Scenario::RowPresenceBitmap]
    );
}

#[test]
fn test_version_damage_needs_a_reference() {
    let db = TempDatabase::new().unwrap();
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(2)
        .corrupt_version_info()
        .unwrap();
    let image = DatabaseImage::load(&db.corrupt).unwrap();

    let without = scan_image(&image, false);
    assert_eq!(without[9].verdict, Verdict::UnrecoverableWithoutReference);
    let with = scan_image(&image, true);
    assert_eq!(with[9].verdict, Verdict::Damaged);
}

#[test]
fn test_scanning_leaves_the_file_alone() {
    let db = TempDatabase::new().unwrap();
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(8)
        .apply(&Scenario::ALL)
        .unwrap();
    let before = fs::read(&db.corrupt).unwrap();

    let mut engine = RecoveryEngine::inspect(&db.corrupt, Some(db.source.as_path())).unwrap();
    let findings = engine.scan_database();
    assert!(findings.iter().any(|finding| finding.verdict == Verdict::Damaged));
    assert_eq!(engine.scan_database(), findings);
    assert_eq!(fs::read(&db.corrupt).unwrap(), before);
}

#[test]
fn test_row_offset_damage_makes_pages_unreadable() {
    let db = TempDatabase::new().unwrap();
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(4)
        .corrupt_row_structure()
        .unwrap();
    let image = DatabaseImage::load(&db.corrupt).unwrap();

    let unreadable = unreadable_pages(&image);
    assert!(!unreadable.is_empty());
    assert!(image.broken_pages().is_empty());
    let playlists = check_region(&image, Scenario::PlaylistStructure);
    assert!(!playlists.is_damaged());
}
