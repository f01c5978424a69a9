use pdbforensics::{
    storage::image::DatabaseImage,
    types::{
        row::{IdField, IdWidth, RowLayout, TRACK_STRING_TITLE},
        string::{self, LONG_HEADER_SIZE, LONG_UTF16_KIND, StringKind},
        table::TableType,
    },
    utils::mock::{FixtureSpec, build_fixture},
};

fn fixture() -> DatabaseImage {
    let bytes = build_fixture(&FixtureSpec::default()).unwrap();
    DatabaseImage::from_bytes("fixture.pdb", bytes, None).unwrap()
}

#[test]
fn test_empty_string_is_one_byte() {
    let bytes = string::encode("");
    assert_eq!(bytes, vec![0x03]);
    let decoded = string::decode(&bytes, 0, 1).unwrap();
    assert_eq!(decoded.text, "");
    assert_eq!(decoded.end(), 1);
}

#[test]
fn test_longest_short_string() {
    let text = "a".repeat(126);
    let bytes = string::encode(&text);
    assert_eq!(bytes.len(), 127);
    assert_eq!(bytes[0], 0xFF);
    assert_eq!(string::decode(&bytes, 0, bytes.len()).unwrap().text, text);

    let longer = string::encode(&"a".repeat(127));
    assert_eq!(longer.len(), 127 + LONG_HEADER_SIZE);
}

#[test]
fn test_decode_respects_limit() {
    let mut buffer = vec![0u8; 4];
    buffer.extend_from_slice(&string::encode("Moodymann"));
    assert!(string::decode(&buffer, 4, buffer.len()).is_ok());
    assert!(string::decode(&buffer, 4, buffer.len() - 1).is_err());
    assert!(string::decode(&buffer, 0, buffer.len()).is_err());
}

#[test]
fn test_long_utf16_prefix_round_trip() {
    let bytes = string::encode("Âme");
    assert_eq!(bytes[0], LONG_UTF16_KIND);
    let (kind, total) = string::peek_prefix(&bytes, 0).unwrap();
    assert_eq!(kind, StringKind::LongUtf16);
    assert_eq!(total, LONG_HEADER_SIZE + 3 * 2);
    assert_eq!(
        string::prefix_for(kind, total).unwrap(),
        bytes[..3].to_vec()
    );
}

#[test]
fn test_every_fixture_row_ends_where_its_extent_ends() {
    let image = fixture();
    for table in TableType::all() {
        let Some(layout) = RowLayout::for_table(table) else {
            continue;
        };
        let rows = image.table_rows(table);
        for row in rows {
            let page = image.page(row.page).unwrap();
            let end = layout.row_end(page, row.slot.start, row.slot.end).unwrap();
            assert_eq!(
                end,
                row.slot.end,
                "{} row at page {} slot {}",
                table.name(),
                row.page,
                row.slot.slot
            );
        }
    }
}

#[test]
fn test_track_title_sits_in_the_offset_table() {
    let image = fixture();
    let layout = RowLayout::for_table(TableType::Tracks).unwrap();
    let first = image.table_rows(TableType::Tracks)[0];
    let page = image.page(first.page).unwrap();
    let positions = layout
        .string_positions(page, first.slot.start, first.slot.end)
        .unwrap();
    assert_eq!(positions.len(), 21);
    let title = string::decode(page, positions[TRACK_STRING_TITLE], first.slot.end).unwrap();
    assert_eq!(title.text, "Track 001");
    assert_eq!(layout.read_id(page, first.slot.start), Some(1));
}

#[test]
fn test_id_fields_encode_at_their_width() {
    let narrow = IdField {
        offset: 0,
        width: IdWidth::U8,
    };
    assert_eq!(narrow.encode(7), vec![7]);
    let wide = IdField {
        offset: 0,
        width: IdWidth::U32,
    };
    assert_eq!(wide.encode(0x0102_0304), vec![4, 3, 2, 1]);

    let mut row = vec![0u8; 8];
    let middle = IdField {
        offset: 5,
        width: IdWidth::U16,
    };
    middle.write(&mut row, 0, 0x0A0B);
    assert_eq!(middle.read(&row, 0), 0x0A0B);
    assert_eq!(&row[5..7], &[0x0B, 0x0A]);
}
