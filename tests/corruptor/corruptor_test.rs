use std::fs;

use pdbforensics::{
    corruptor::{ByteRange, Corruptor},
    storage::{MAGIC_REGION, METADATA_REGIONS, VERSION_REGION, image::DatabaseImage},
    types::{error::DatabaseError, scenario::Scenario},
    utils::{
        hash::{checksum, region_checksum},
        mock::TempDatabase,
    },
};

fn outside(ranges: &[ByteRange], offset: usize) -> bool {
    !ranges.iter().any(|range| range.as_range().contains(&offset))
}

#[test]
fn test_source_is_never_modified() {
    let db = TempDatabase::new().unwrap();
    let before = fs::read(&db.source).unwrap();

    let mut corruptor = Corruptor::new(&db.source, &db.corrupt).unwrap().with_seed(3);
    corruptor.apply(&Scenario::ALL).unwrap();

    assert_eq!(fs::read(&db.source).unwrap(), before);
    assert_ne!(fs::read(&db.corrupt).unwrap(), before);
}

#[test]
fn test_each_scenario_touches_only_what_it_reports() {
    for scenario in Scenario::ALL {
        for seed in 0..4u64 {
            let db = TempDatabase::new().unwrap();
            let source = fs::read(&db.source).unwrap();
            let mut corruptor = Corruptor::new(&db.source, &db.corrupt)
                .unwrap()
                .with_seed(seed);
            let report = corruptor.corrupt(scenario).unwrap();
            let output = fs::read(&db.corrupt).unwrap();

            assert_eq!(report.scenario, scenario);
            assert!(!report.is_empty(), "{} seed {}: {}", scenario, seed, report.summary);
            assert_eq!(output.len(), source.len());
            assert_ne!(output, source, "{} seed {}", scenario, seed);
            for (offset, (old, new)) in source.iter().zip(&output).enumerate() {
                if old != new {
                    assert!(
                        !outside(&report.touched, offset),
                        "{} seed {} changed byte {:#x} outside its report",
                        scenario,
                        seed,
                        offset
                    );
                }
            }
        }
    }
}

#[test]
fn test_header_scenarios_keep_to_their_words() {
    let db = TempDatabase::new().unwrap();
    let source = DatabaseImage::load(&db.source).unwrap();
    let mut corruptor = Corruptor::new(&db.source, &db.corrupt).unwrap().with_seed(6);

    corruptor.corrupt_version_info().unwrap();
    let damaged = DatabaseImage::load(&db.corrupt).unwrap();
    let same = |range: std::ops::Range<usize>| {
        region_checksum(&source, range.clone()) == region_checksum(&damaged, range)
    };
    assert!(!same(VERSION_REGION));
    assert!(same(MAGIC_REGION));
    for range in METADATA_REGIONS {
        assert!(same(range));
    }
}

#[test]
fn test_scenarios_stack_in_one_output() {
    let db = TempDatabase::new().unwrap();
    let mut corruptor = Corruptor::new(&db.source, &db.corrupt).unwrap().with_seed(11);

    let magic = corruptor.corrupt_magic_header().unwrap();
    let bitmap = corruptor.corrupt_row_presence_bitmap().unwrap();
    let output = fs::read(&db.corrupt).unwrap();
    let source = fs::read(&db.source).unwrap();

    // The second pass works on the first pass's output, so both survive.
    for range in magic.touched.iter().chain(&bitmap.touched) {
        assert_ne!(
            &output[range.as_range()],
            &source[range.as_range()],
            "range {:?}",
            range
        );
    }
}

#[test]
fn test_seed_makes_damage_reproducible() {
    let db = TempDatabase::new().unwrap();
    let first = db.path("first.pdb");
    let second = db.path("second.pdb");

    let reports_a = Corruptor::new(&db.source, &first)
        .unwrap()
        .with_seed(99)
        .apply(&[Scenario::PageHeaders, Scenario::FieldData, Scenario::VersionInfo])
        .unwrap();
    let reports_b = Corruptor::new(&db.source, &second)
        .unwrap()
        .with_seed(99)
        .apply(&[Scenario::PageHeaders, Scenario::FieldData, Scenario::VersionInfo])
        .unwrap();

    assert_eq!(reports_a, reports_b);
    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn test_info_describes_the_output() {
    let db = TempDatabase::new().unwrap();
    let mut corruptor = Corruptor::new(&db.source, &db.corrupt).unwrap().with_seed(5);
    assert!(matches!(
        corruptor.info(),
        Err(DatabaseError::FileNotFound { .. })
    ));

    corruptor.corrupt_magic_header().unwrap();
    let info = corruptor.info().unwrap();
    let source = fs::read(&db.source).unwrap();
    let output = fs::read(&db.corrupt).unwrap();

    assert!(!info.signature_ok);
    assert_eq!(info.page_size, 4096);
    assert_eq!(info.table_count, 20);
    assert_eq!(info.file_size, output.len() as u64);
    assert_eq!(info.source_crc32, checksum(&source));
    assert_eq!(info.output_crc32, checksum(&output));
    assert_ne!(info.source_crc32, info.output_crc32);
}

#[test]
fn test_bad_paths_are_rejected() {
    let db = TempDatabase::new().unwrap();
    assert!(matches!(
        Corruptor::new(&db.source, &db.source),
        Err(DatabaseError::PathConflict { .. })
    ));
    let roundabout = db.dir.path().join(".").join("export.pdb");
    assert!(matches!(
        Corruptor::new(&db.source, &roundabout),
        Err(DatabaseError::PathConflict { .. })
    ));
    assert!(matches!(
        Corruptor::new(db.path("absent.pdb"), &db.corrupt),
        Err(DatabaseError::FileNotFound { .. })
    ));
}

#[test]
fn test_corruptor_paths_are_kept() {
    let db = TempDatabase::new().unwrap();
    let corruptor = Corruptor::new(&db.source, &db.corrupt).unwrap();
    assert_eq!(corruptor.source(), db.source.as_path());
    assert_eq!(corruptor.output(), db.corrupt.as_path());
}
