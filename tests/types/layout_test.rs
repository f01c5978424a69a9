use pdbforensics::{
    storage::{FILE_HEADER_SIZE, header::FileHeader},
    types::{
        HEAP_START, ROW_GROUP_SIZE, max_row_slots,
        page::{self, PAGE_FLAGS_CANDIDATE, PAGE_FLAGS_DATA, PageBuilder, PageHeader},
        scenario::Scenario,
        table::{TableDescriptor, TableType},
    },
};

#[test]
fn test_file_header_fields_sit_at_fixed_offsets() {
    let header = FileHeader {
        signature: 0,
        page_size: 4096,
        table_count: 20,
        next_unused_page: 61,
        format_word: 5,
        sequence: 42,
        gap: 0,
    };
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), FILE_HEADER_SIZE);
    assert_eq!(&bytes[0x04..0x08], &4096u32.to_le_bytes());
    assert_eq!(&bytes[0x08..0x0C], &20u32.to_le_bytes());
    assert_eq!(&bytes[0x0C..0x10], &61u32.to_le_bytes());
    assert_eq!(&bytes[0x14..0x18], &42u32.to_le_bytes());
    assert!(header.metadata_problems(61 * 4096).is_empty());
    assert!(header.version_problems(Some(42)).is_empty());
}

#[test]
fn test_metadata_problems_name_each_bad_word() {
    let header = FileHeader {
        page_size: 4097,
        table_count: 500,
        gap: 7,
        ..FileHeader::default()
    };
    let problems = header.metadata_problems(4096 * 10);
    assert_eq!(problems.len(), 3, "{:?}", problems);

    let stale = FileHeader {
        sequence: 10,
        ..FileHeader::default()
    };
    assert_eq!(stale.version_problems(Some(11)).len(), 1);
    let implausible = FileHeader {
        format_word: 0x1_0000,
        sequence: 0x0100_0000,
        ..FileHeader::default()
    };
    assert_eq!(implausible.version_problems(None).len(), 2);
}

#[test]
fn test_page_builder_keeps_free_space_accounting() {
    let mut builder = PageBuilder::new(4096, 3, TableType::Genres);
    for i in 0..20u32 {
        let mut row = i.to_le_bytes().to_vec();
        row.extend_from_slice(b"\x0dGenre");
        builder.push_row(&row, i != 4).unwrap();
    }
    let page = builder.finalize(4, 9);
    let header = PageHeader::from_bytes(&page).unwrap();

    assert_eq!(header.page_index, 3);
    assert_eq!(header.next_page, 4);
    assert_eq!(header.sequence, 9);
    assert_eq!(header.page_flags, PAGE_FLAGS_DATA);
    assert_eq!(header.num_row_offsets, 20);
    assert_eq!(header.num_rows, 19);
    assert_eq!(header.row_groups(), 2);
    assert!(header.accounting_consistent(4096));
    assert_eq!(
        HEAP_START + header.used_size as usize + header.free_size as usize + 2 * ROW_GROUP_SIZE,
        4096
    );
    assert!(header.problems(3, 4096, 10).is_empty());

    assert!(!page::is_slot_present(&page, 4));
    assert!(page::is_slot_present(&page, 19));
    assert_eq!(page::presence_popcount(&page, 2), 19);
    assert_eq!(page::read_slot_offset(&page, 0), 0);
    assert_eq!(page::read_slot_offset(&page, 1), 10);
}

#[test]
fn test_row_groups_grow_backwards_from_page_end() {
    assert_eq!(page::group_base(4096, 0), 4096 - ROW_GROUP_SIZE);
    assert_eq!(page::group_base(4096, 1), 4096 - 2 * ROW_GROUP_SIZE);
    assert_eq!(page::presence_position(4096, 0), 4096 - ROW_GROUP_SIZE + 2);
    assert_eq!(page::slot_offset_position(4096, 0), 4096 - ROW_GROUP_SIZE + 4);
    assert_eq!(page::slot_offset_position(4096, 17), 4096 - 2 * ROW_GROUP_SIZE + 6);
}

#[test]
fn test_packed_row_counts() {
    let packed = page::pack_row_counts(0x1FFF, 0x7FF);
    assert_eq!(packed, [0xFF, 0xFF, 0xFF]);
    let packed = page::pack_row_counts(20, 19);
    let value = u32::from_le_bytes([packed[0], packed[1], packed[2], 0]);
    assert_eq!(value & 0x1FFF, 20);
    assert_eq!(value >> 13, 19);
}

#[test]
fn test_page_header_problems() {
    let mut header = PageHeader::new(5, TableType::Tracks, PAGE_FLAGS_CANDIDATE);
    header.free_size = (4096 - HEAP_START) as u16;
    assert!(header.problems(5, 4096, 10).is_empty());
    assert!(!header.is_data_page());

    header.page_index = 6;
    header.table_type = 0x300;
    header.next_page = 99;
    let problems = header.problems(5, 4096, 10);
    assert_eq!(problems.len(), 3, "{:?}", problems);

    let mut counts = PageHeader::new(5, TableType::Tracks, PAGE_FLAGS_DATA);
    counts.free_size = (4096 - HEAP_START) as u16;
    counts.num_row_offsets = 1;
    counts.num_rows = 2;
    let problems = counts.problems(5, 4096, 10);
    assert!(problems.iter().any(|problem| problem.contains("num_rows")));
    assert!(problems.iter().any(|problem| problem.contains("accounting")));
}

#[test]
fn test_bitmap_sizing_formula() {
    assert_eq!(max_row_slots(4096, 12), (4096 - HEAP_START) * 16 / (12 * 16 + 36));
    assert_eq!(max_row_slots(16384, 1), 8191usize.min((16384 - HEAP_START) * 16 / 52));
}

#[test]
fn test_table_descriptors() {
    let descriptor = TableDescriptor::new(TableType::Artists, 7, 8, 9);
    let bytes = descriptor.to_bytes();
    assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
    assert_eq!(&bytes[4..8], &9u32.to_le_bytes());
    assert_eq!(TableDescriptor::from_bytes(&bytes), descriptor);
    assert_eq!(descriptor.kind(), Some(TableType::Artists));
    assert_eq!(TableType::from_u32(9).unwrap(), TableType::Unknown(9));
    assert!(TableType::from_u32(0x20).is_err());
}

#[test]
fn test_scenarios_parse_by_number_and_name() {
    assert_eq!("4".parse::<Scenario>().unwrap(), Scenario::RowPresenceBitmap);
    assert_eq!(
        "Cross_Table_Relationships".parse::<Scenario>().unwrap(),
        Scenario::CrossTableRelationships
    );
    assert!("0".parse::<Scenario>().is_err());
    assert!("footer".parse::<Scenario>().is_err());
    assert_eq!(Scenario::VersionInfo.to_string(), "10 (version_info)");
}
