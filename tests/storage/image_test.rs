use pdbforensics::{
    storage::{
        PAGE_SIZE_OFFSET,
        image::{DatabaseImage, detect_page_size},
    },
    types::{error::DatabaseError, page::PAGE_INDEX_OFFSET, table::TableType},
    utils::{
        hash::differing_pages,
        mock::{FixtureSpec, TempDatabase, build_fixture},
    },
};

#[test]
fn test_load_fixture_geometry() {
    let db = TempDatabase::new().unwrap();
    let image = DatabaseImage::load(&db.source).unwrap();

    assert_eq!(image.page_size(), 4096);
    assert_eq!(image.len() % 4096, 0);
    let header = image.header();
    assert_eq!(header.next_unused_page as usize, image.page_count());
    assert_eq!(image.directory_len(), 20);
    assert_eq!(image.populated_descriptors(), 20);
    assert_eq!(image.descriptor(0).unwrap().kind(), Some(TableType::Tracks));
    assert!(image.broken_pages().is_empty());
    assert_eq!(image.max_page_sequence(), Some(42));
}

#[test]
fn test_missing_and_tiny_files() {
    let db = TempDatabase::new().unwrap();
    let missing = db.path("nope.pdb");
    assert!(matches!(
        DatabaseImage::load(&missing),
        Err(DatabaseError::FileNotFound { .. })
    ));

    let tiny = DatabaseImage::from_bytes("tiny.pdb", vec![0u8; 100], None);
    assert!(matches!(
        tiny,
        Err(DatabaseError::FileTooSmall { actual: 100, .. })
    ));
}

#[test]
fn test_page_size_detected_when_header_lies() {
    for page_size in [1024usize, 4096] {
        let mut bytes = build_fixture(&FixtureSpec::with_page_size(page_size)).unwrap();
        assert_eq!(detect_page_size(&bytes), Some(page_size));
        bytes[PAGE_SIZE_OFFSET..PAGE_SIZE_OFFSET + 4].copy_from_slice(&4097u32.to_le_bytes());
        let image = DatabaseImage::from_bytes("lying.pdb", bytes, None).unwrap();
        assert_eq!(image.page_size(), page_size);
        assert!(!image.header().page_size_ok());
    }
}

#[test]
fn test_table_rows_include_deleted_rows() {
    let bytes = build_fixture(&FixtureSpec::default()).unwrap();
    let image = DatabaseImage::from_bytes("fixture.pdb", bytes, None).unwrap();

    assert_eq!(image.table_rows(TableType::Tracks).len(), 40);
    let artists = image.table_rows(TableType::Artists);
    assert_eq!(artists.len(), 12);
    assert_eq!(artists.iter().filter(|row| !row.slot.present).count(), 1);
    assert_eq!(image.id_set(TableType::Artists).len(), 12);
    assert!(image.id_set(TableType::Tracks).contains(&40));
    assert!(image.table_rows(TableType::History).is_empty());
}

#[test]
fn test_write_bytes_counts_changes() {
    let bytes = build_fixture(&FixtureSpec::default()).unwrap();
    let mut image = DatabaseImage::from_bytes("fixture.pdb", bytes, None).unwrap();

    assert_eq!(image.write_bytes(0, &[0, 0, 0, 0]), 0);
    assert_eq!(image.write_bytes(0, &[1, 0, 2, 0]), 2);
    assert_eq!(image.write_bytes(0, &[1, 0, 2, 0]), 0);

    let end = image.len();
    assert_eq!(image.write_bytes(end - 1, &[0xAA, 0xBB]), 1);
    assert_eq!(image.bytes()[end - 1], 0xAA);
    assert_eq!(image.write_bytes(end, &[0xCC]), 0);
}

#[test]
fn test_broken_page_drops_out_of_table_rows() {
    let bytes = build_fixture(&FixtureSpec::default()).unwrap();
    let pristine = DatabaseImage::from_bytes("fixture.pdb", bytes.clone(), None).unwrap();
    let mut image = DatabaseImage::from_bytes("fixture.pdb", bytes, None).unwrap();

    let first = image.descriptor(0).unwrap().first_page;
    let before = image.row_slots(first).unwrap().len();
    assert!(before > 0);
    assert_eq!(
        image.write_page_bytes(first, PAGE_INDEX_OFFSET, &999u32.to_le_bytes()),
        2
    );

    assert_eq!(image.broken_pages(), vec![first]);
    assert_eq!(image.table_rows(TableType::Tracks).len(), 40 - before);
    assert_eq!(differing_pages(&pristine, &image), vec![first as usize]);
}

#[test]
fn test_save_round_trips_bytes() {
    let db = TempDatabase::new().unwrap();
    let mut image = DatabaseImage::load(&db.source).unwrap();
    image.write_bytes(0x18, &[7, 0, 0, 0]);
    let copy = db.path("nested/copy.pdb");
    image.save(&copy).unwrap();

    let reloaded = DatabaseImage::load(&copy).unwrap();
    assert_eq!(reloaded.bytes(), image.bytes());
    assert_eq!(reloaded.header().gap, 7);
    assert_eq!(reloaded.path(), copy.as_path());
}
