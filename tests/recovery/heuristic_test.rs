use std::{collections::HashSet, fs};

use pdbforensics::{
    corruptor::Corruptor,
    records::RecordSource,
    recovery::{
        RecoveryEngine, RepairOutcome, RepairSource,
        scan::{Verdict, check_region, scan_image},
    },
    storage::{FORMAT_WORD_OFFSET, image::DatabaseImage},
    types::{
        page,
        scenario::Scenario,
        table::{TableDescriptor, TableType},
    },
    utils::mock::TempDatabase,
};

fn corrupt(db: &TempDatabase, scenarios: &[Scenario], seed: u64) {
    Corruptor::new(&db.source, &db.corrupt)
        .unwrap()
        .with_seed(seed)
        .apply(scenarios)
        .unwrap();
}

#[test]
fn test_layout_regions_rebuilt_exactly_without_reference() {
    let exact = [
        Scenario::MagicHeader,
        Scenario::MetadataHeader,
        Scenario::PageHeaders,
        Scenario::TableIndex,
        Scenario::RowStructure,
        Scenario::FieldData,
    ];
    for scenario in exact {
        for seed in 0..3u64 {
            let db = TempDatabase::new().unwrap();
            corrupt(&db, &[scenario], seed);

            let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
            assert!(engine.recover(scenario).unwrap(), "{} seed {}", scenario, seed);
            let entry = &engine.recovery_log()[0];
            assert_eq!(entry.source, RepairSource::Heuristic);
            assert_eq!(entry.outcome, RepairOutcome::Repaired);
            assert_eq!(
                fs::read(&db.recovered).unwrap(),
                fs::read(&db.source).unwrap(),
                "{} seed {}: {}",
                scenario,
                seed,
                entry.action
            );
        }
    }
}

#[test]
fn test_bitmap_repaired_from_row_counts() {
    for seed in 0..4u64 {
        let db = TempDatabase::new().unwrap();
        corrupt(&db, &[Scenario::RowPresenceBitmap], seed);

        let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
        assert!(engine.recover_row_presence_bitmap().unwrap());
        assert_eq!(engine.recovery_log()[0].source, RepairSource::Heuristic);

        let recovered = DatabaseImage::load(&db.recovered).unwrap();
        assert!(check_region(&recovered, Scenario::RowPresenceBitmap).passes());
    }
}

#[test]
fn test_playlist_cycle_broken_and_orphan_moved_to_root() {
    for seed in 0..4u64 {
        let db = TempDatabase::new().unwrap();
        corrupt(&db, &[Scenario::PlaylistStructure], seed);

        let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
        assert!(engine.recover_playlist_structure().unwrap(), "seed {}", seed);

        let recovered = DatabaseImage::load(&db.recovered).unwrap();
        let playlists = recovered.read_playlists().unwrap();
        assert_eq!(playlists.len(), 6);
        let ids: HashSet<u32> = playlists.iter().map(|playlist| playlist.id).collect();
        for playlist in &playlists {
            if let Some(parent) = playlist.parent_id {
                assert!(ids.contains(&parent), "seed {}: {:?}", seed, playlist);
            }
        }
        assert!(playlists.iter().any(|playlist| playlist.parent_id.is_none()));
        // Entries are untouched by this damage.
        let warmup = playlists.iter().find(|playlist| playlist.id == 2).unwrap();
        assert_eq!(warmup.track_ids.len(), 10);
    }
}

#[test]
fn test_dangling_references_become_unresolved() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::CrossTableRelationships], 9);

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(engine.recover_cross_table_relationships().unwrap());
    assert!(engine.recovery_log()[0].action.contains("unresolved"));

    let recovered = DatabaseImage::load(&db.recovered).unwrap();
    let tracks = recovered.read_tracks().unwrap();
    assert_eq!(tracks.len(), 40);
    assert_eq!(tracks.iter().filter(|track| track.artist_id.is_none()).count(), 1);
    let entries: usize = recovered
        .read_playlists()
        .unwrap()
        .iter()
        .map(|playlist| playlist.track_ids.len())
        .sum();
    assert_eq!(entries, 4 * 10 - 1);
}

#[test]
fn test_version_sequence_recovered_but_format_word_is_not() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::VersionInfo], 4);

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert_eq!(engine.scan_database()[9].verdict, Verdict::UnrecoverableWithoutReference);
    assert!(!engine.recover_version_info().unwrap());
    let entry = &engine.recovery_log()[0];
    assert_eq!(entry.outcome, RepairOutcome::Partial);
    assert!(entry.action.contains("cannot be inferred"), "{}", entry.action);

    let recovered = DatabaseImage::load(&db.recovered).unwrap();
    assert_eq!(recovered.header().sequence, 42);
}

#[test]
fn test_format_word_alone_cannot_be_repaired() {
    let db = TempDatabase::new().unwrap();
    let mut image = DatabaseImage::load(&db.source).unwrap();
    image.write_bytes(FORMAT_WORD_OFFSET, &0x0002_0000u32.to_le_bytes());
    image.save(&db.corrupt).unwrap();

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(!engine.recover_version_info().unwrap());
    assert_eq!(engine.recovery_log()[0].outcome, RepairOutcome::Failed);
    assert_eq!(engine.stats().failed, 1);
    assert_eq!(fs::read(&db.recovered).unwrap(), fs::read(&db.corrupt).unwrap());
}

#[test]
fn test_row_structure_waits_for_page_headers() {
    let db = TempDatabase::new().unwrap();
    corrupt(&db, &[Scenario::PageHeaders], 5);

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(!engine.recover_row_structure().unwrap());
    assert_eq!(engine.recovery_log()[0].outcome, RepairOutcome::Partial);
    assert!(engine.recovery_log()[0].action.contains("skipped behind broken headers"));

    assert!(engine.recover_page_headers().unwrap());
    assert!(engine.recover_row_structure().unwrap());
    assert_eq!(engine.recovery_log()[2].outcome, RepairOutcome::Intact);
    let stats = engine.stats();
    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.partial, 0);
}

#[test]
fn test_records_survive_heuristic_recovery() {
    let db = TempDatabase::new().unwrap();
    corrupt(
        &db,
        &[Scenario::MagicHeader, Scenario::FieldData, Scenario::RowPresenceBitmap],
        13,
    );

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(engine.recover_all().unwrap(), "{:#?}", engine.recovery_log());

    let recovered = DatabaseImage::load(&db.recovered).unwrap();
    let original = DatabaseImage::load(&db.source).unwrap();
    let titles = |image: &DatabaseImage| -> Vec<Option<String>> {
        image
            .read_tracks()
            .unwrap()
            .into_iter()
            .map(|track| track.title)
            .collect()
    };
    assert!(!titles(&recovered).is_empty());
    for title in titles(&recovered) {
        assert!(titles(&original).contains(&title));
    }
}

fn tracks(image: &DatabaseImage) -> TableDescriptor {
    image
        .descriptors(image.directory_len())
        .into_iter()
        .find(|descriptor| descriptor.kind() == Some(TableType::Tracks))
        .unwrap()
}

/// Run every routine without a reference. When they all report success, the
/// output must scan clean and keep every page chain of the source.
fn recover_all_and_verify(db: &TempDatabase, label: &str) -> bool {
    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    if !engine.recover_all().unwrap() {
        return false;
    }

    let recovered = DatabaseImage::load(&db.recovered).unwrap();
    for finding in scan_image(&recovered, false) {
        assert_eq!(
            finding.verdict,
            Verdict::Intact,
            "{}: {} still damaged: {}",
            label,
            finding.region,
            finding.detail
        );
    }
    let source = DatabaseImage::load(&db.source).unwrap();
    assert_eq!(recovered.page_count(), source.page_count());
    for index in 1..source.page_count() as u32 {
        assert_eq!(
            recovered.page_header(index).map(|header| header.next_page),
            source.page_header(index).map(|header| header.next_page),
            "{}: page {} links elsewhere",
            label,
            index
        );
    }
    true
}

#[test]
fn test_bitmap_and_offset_damage_on_one_page() {
    let db = TempDatabase::new().unwrap();
    let mut image = DatabaseImage::load(&db.source).unwrap();
    let index = tracks(&image).first_page;
    let page_size = image.page_size();
    let flags = page::read_presence(image.page(index).unwrap(), 0) & !(1 << 2);
    image.write_page_bytes(index, page::presence_position(page_size, 0), &flags.to_le_bytes());
    image.write_page_bytes(index, page::slot_offset_position(page_size, 2), &0xFFF0u16.to_le_bytes());
    image.save(&db.corrupt).unwrap();

    assert!(recover_all_and_verify(&db, "slot 2"));
    assert_eq!(fs::read(&db.recovered).unwrap(), fs::read(&db.source).unwrap());
}

#[test]
fn test_bitmap_and_row_structure_recover_together() {
    for seed in 0..40u64 {
        let db = TempDatabase::new().unwrap();
        corrupt(&db, &[Scenario::RowPresenceBitmap, Scenario::RowStructure], seed);

        let label = format!("seed {}", seed);
        assert!(recover_all_and_verify(&db, &label), "{}", label);
    }
}

#[test]
fn test_broken_successor_header_stays_linked() {
    let db = TempDatabase::new().unwrap();
    let mut image = DatabaseImage::load(&db.source).unwrap();
    let first = tracks(&image).first_page;
    let mut head = image.page_header(first).unwrap();
    head.next_page = 2577;
    image.write_page_header(first, &head);
    let mut second = image.page_header(first + 1).unwrap();
    second.table_type = 0xF39;
    image.write_page_header(first + 1, &second);
    image.save(&db.corrupt).unwrap();

    let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
    assert!(engine.recover_page_headers().unwrap());
    assert_eq!(engine.recovery_log()[0].outcome, RepairOutcome::Repaired);
    assert_eq!(fs::read(&db.recovered).unwrap(), fs::read(&db.source).unwrap());
}

#[test]
fn test_page_headers_rebuilt_exactly_across_seeds() {
    for seed in 0..60u64 {
        let db = TempDatabase::new().unwrap();
        corrupt(&db, &[Scenario::PageHeaders], seed);

        let mut engine = RecoveryEngine::open(&db.corrupt, &db.recovered, None).unwrap();
        assert!(engine.recover_page_headers().unwrap(), "seed {}", seed);
        assert_eq!(
            fs::read(&db.recovered).unwrap(),
            fs::read(&db.source).unwrap(),
            "seed {}: {}",
            seed,
            engine.recovery_log()[0].action
        );
    }
}

#[test]
fn test_successful_recovery_always_scans_clean() {
    for scenario in Scenario::ALL {
        for seed in 0..40u64 {
            let db = TempDatabase::new().unwrap();
            corrupt(&db, &[scenario], seed);
            recover_all_and_verify(&db, &format!("{} seed {}", scenario, seed));
        }
    }

    for (position, first) in Scenario::ALL.iter().enumerate() {
        for second in &Scenario::ALL[position + 1..] {
            for seed in 0..6u64 {
                let db = TempDatabase::new().unwrap();
                corrupt(&db, &[*first, *second], seed);
                recover_all_and_verify(&db, &format!("{} + {} seed {}", first, second, seed));
            }
        }
    }
}
