use std::fs;

use pdbforensics::{
    corruptor::Corruptor,
    recovery::{EngineState, RecoveryEngine, RepairOutcome, RepairSource, scan::Verdict},
    types::{error::DatabaseError, scenario::Scenario},
    utils::mock::{FixtureSpec, TempDatabase},
};

fn corrupt(db: &TempDatabase, scenarios: &[Scenario], seed: u64) {
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(seed)
        .apply(scenarios)
        .unwrap();
}

#[test]
fn test_reference_restores_each_region_exactly() {
    for scenario in Scenario::ALL {
        for seed in 0..3u64 {
            let db = TempDatabase::new().unwrap();
            corrupt(&db, &[scenario], seed);

            let mut engine =
                RecoveryEngine::open(&db.corrupt, &db.recovered, Some(db.source.as_path())).unwrap();
            engine.scan_database();
            assert!(engine.recover(scenario).unwrap(), "{} seed {}", scenario, seed);

            let log = engine.recovery_log();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].scenario, scenario);
            assert_eq!(log[0].outcome, RepairOutcome::Repaired);
            assert_eq!(log[0].source, RepairSource::Reference, "{}", log[0].action);
            assert_eq!(
                fs::read(&db.recovered).unwrap(),
                fs::read(&db.source).unwrap(),
                "{} seed {}",
                scenario,
                seed
            );
        }
    }
}

#[test]
fn test_recover_all_undoes_every_scenario() {
    for seed in [1u64, 7, 30] {
        let db = TempDatabase::new().unwrap();
        corrupt(&db, &Scenario::ALL, seed);
        let damaged = fs::read(&db.corrupt).unwrap();

        let mut engine =
            RecoveryEngine::open(&db.corrupt, &db.recovered, Some(db.source.as_path())).unwrap();
        assert!(engine.recover_all().unwrap(), "seed {}: {:#?}", seed, engine.recovery_log());
        assert_eq!(engine.state(), EngineState::Finalized);

        assert_eq!(fs::read(&db.recovered).unwrap(), fs::read(&db.source).unwrap());
        assert_eq!(fs::read(&db.corrupt).unwrap(), damaged);

        let stats = engine.stats();
        assert_eq!(stats.attempted, 10);
        assert_eq!(stats.succeeded, 10);
        assert!(stats.reference_used);
        assert!(stats.bytes_rewritten > 0);
        assert_eq!(engine.recovery_log().len(), 10);

        let report = engine.report();
        assert!(report.findings.iter().all(|finding| finding.verdict == Verdict::Intact));
        assert_eq!(report.output_path.as_deref(), Some(db.recovered.as_path()));
    }
}

#[test]
fn test_recovering_a_clean_file_changes_nothing() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::PageHeaders, Scenario::CrossTableRelationships], 12);

    let mut first = RecoveryEngine::open(&db.corrupt, &db.recovered, Some(db.source.as_path())).unwrap();
    assert!(first.recover_all().unwrap());

    let again = db.path("again.pdb");
    let mut second = RecoveryEngine::open(&db.recovered, &again, None).unwrap();
    assert!(second.recover_all().unwrap());
    assert!(second
        .recovery_log()
        .iter()
        .all(|entry| entry.outcome == RepairOutcome::Intact && entry.source == RepairSource::None));
    let stats = second.stats();
    assert_eq!(stats.bytes_rewritten, 0);
    assert!(!stats.reference_used);
    assert_eq!(fs::read(&again).unwrap(), fs::read(&db.recovered).unwrap());
}

#[test]
fn test_stats_count_latest_outcome_per_region() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 3);

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(engine.recover_magic_header().unwrap());
    assert!(engine.recover_magic_header().unwrap());
    assert!(engine.recover_version_info().unwrap());

    let stats = engine.stats();
    assert_eq!(engine.recovery_log().len(), 3);
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.attempted, stats.succeeded + stats.partial + stats.failed);
    assert_eq!(engine.recovery_log()[1].outcome, RepairOutcome::Intact);
}

#[test]
fn test_conflicting_paths_are_refused() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 0);

    assert!(matches!(
        RecoveryEngine::open(&db.corrupt, &db.corrupt, None),
        Err(DatabaseError::PathConflict { .. })
    ));
    assert!(matches!(
        RecoveryEngine::open(&db.corrupt, &db.source, Some(db.source.as_path())),
        Err(DatabaseError::PathConflict { .. })
    ));
    assert!(matches!(
        RecoveryEngine::open(db.path("missing.pdb"), &db.recovered, None),
        Err(DatabaseError::FileNotFound { .. })
    ));
}

#[test]
fn test_inspection_engine_cannot_write() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 0);

    let mut engine = RecoveryEngine::inspect(&db.corrupt, None).unwrap();
    assert!(matches!(
        engine.recover_magic_header(),
        Err(DatabaseError::InvalidRequest { .. })
    ));
    assert!(!db.recovered.exists());
}

#[test]
fn test_damaged_reference_region_falls_back_to_heuristics() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 0);
    let bad_reference = db.path("bad_reference.pdb");
    Corruptor::new(&db.source, &bad_reference)
        .unwrap()
        .with_seed(1)
        .corrupt_magic_header()
        .unwrap();

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, Some(bad_reference.as_path())).unwrap();
    assert!(engine.recover_magic_header().unwrap());
    let entry = &engine.recovery_log()[0];
    assert_eq!(entry.source, RepairSource::Heuristic);
    assert!(entry.action.contains("itself damaged"), "{}", entry.action);
    assert_eq!(fs::read(&db.recovered).unwrap(), fs::read(&db.source).unwrap());
}

#[test]
fn test_reference_with_other_geometry_is_ignored() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 0);
    let small = TempDatabase::with_spec("pdb_small", &FixtureSpec::with_page_size(1024)).unwrap();

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, Some(small.source.as_path())).unwrap();
    assert!(engine.recover_magic_header().unwrap());
    let entry = &engine.recovery_log()[0];
    assert_eq!(entry.source, RepairSource::Heuristic);
    assert!(entry.action.contains("differs"), "{}", entry.action);
    assert!(!engine.stats().reference_used);
}

#[test]
fn test_missing_reference_file_is_not_fatal() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::MagicHeader], 0);
    let missing = db.path("gone.pdb");

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, Some(missing.as_path())).unwrap();
    assert!(engine.recover_all().unwrap());
    assert!(engine.recovery_log()[0].action.contains("could not be loaded"));
}

#[test]
fn test_report_serializes() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::TableIndex], 6);
    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, Some(db.source.as_path())).unwrap();
    engine.recover_table_index().unwrap();

    let json = serde_json::to_value(engine.report()).unwrap();
    assert_eq!(json["log"][0]["region"], "table_index");
    assert_eq!(json["log"][0]["source"], "reference");
    assert_eq!(json["log"][0]["outcome"], "repaired");
    assert_eq!(json["stats"]["succeeded"], 1);
    assert_eq!(json["findings"].as_array().unwrap().len(), 10);
}
