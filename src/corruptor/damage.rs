//! Byte-level damage for each scenario. Every function picks its targets
//! among structures that are still intact, so each one leaves damage the
//! region checks can see.

use rand::{Rng, rngs::StdRng, seq::SliceRandom};

use crate::{
    corruptor::ByteRange,
    recovery::scan::{playlist_nodes, row_offset_problems},
    storage::{
        FORMAT_WORD_OFFSET, GAP_OFFSET, NEXT_UNUSED_PAGE_OFFSET, PAGE_SIZE_OFFSET, SEQUENCE_OFFSET,
        SIGNATURE_OFFSET, TABLE_COUNT_OFFSET,
        image::{DatabaseImage, RowRef},
    },
    types::{
        MAX_ROW_OFFSETS, PageIndex, ROWS_PER_GROUP, RowId,
        page::{self, PAGE_NEXT_PAGE_OFFSET, PAGE_ROW_COUNTS_OFFSET, PAGE_TABLE_TYPE_OFFSET, PageHeader},
        read_u16,
        row::{ENTRY_TRACK_OFFSET, PLAYLIST_PARENT_OFFSET, RowLayout},
        string::{self, StringKind},
        table::{TABLE_DESCRIPTOR_SIZE, TableType},
    },
};

type Damage = (Vec<ByteRange>, String);

/// Heap offset written over a row index entry. Past the heap of any page up
/// to 8 KiB.
const BAD_ROW_OFFSET: u16 = 0x1FFF;
const SHORT_OVERRUN_PREFIX: u8 = 0xFF;
const MISSING_ID: RowId = 0x7FFF_FFFF;
const MISSING_PARENT_BASE: RowId = 0x7FFF_0000;

const MAX_DAMAGED_PAGES: usize = 3;
const MAX_BITMAP_PAGES: usize = 4;
const MAX_OFFSET_PAGES: usize = 2;
const MAX_FIELD_ROWS: usize = 3;

fn write_u32_at(image: &mut DatabaseImage, offset: usize, value: u32) -> ByteRange {
    image.write_bytes(offset, &value.to_le_bytes());
    ByteRange::new(offset, 4)
}

fn page_base(image: &DatabaseImage, index: PageIndex) -> usize {
    index as usize * image.page_size()
}

fn nothing(reason: &str) -> Damage {
    (Vec::new(), reason.to_string())
}

/// Intact data pages that hold at least one row slot.
fn pages_with_rows(image: &DatabaseImage) -> Vec<(PageIndex, PageHeader)> {
    image
        .intact_pages()
        .into_iter()
        .filter(|(_, header)| header.is_data_page() && header.num_row_offsets > 0)
        .collect()
}

pub(super) fn magic_header(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let signature = rng.gen_range(1..=u32::MAX);
    let touched = write_u32_at(image, SIGNATURE_OFFSET, signature);
    (vec![touched], format!("signature set to {:#010x}", signature))
}

pub(super) fn metadata_header(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let page_size = rng.gen_range(0x8000..0x8000_0000u32) * 2 + 1;
    let table_count = rng.gen_range(101..10_000u32);
    let page_count = image.page_count() as u32;
    let next_unused = page_count + rng.gen_range(1..1000u32);
    let gap = rng.gen_range(1..=u32::MAX);

    let touched = vec![
        write_u32_at(image, PAGE_SIZE_OFFSET, page_size),
        write_u32_at(image, TABLE_COUNT_OFFSET, table_count),
        write_u32_at(image, NEXT_UNUSED_PAGE_OFFSET, next_unused),
        write_u32_at(image, GAP_OFFSET, gap),
    ];
    (
        touched,
        format!(
            "page_size {:#x}, table_count {}, next_unused_page {}, gap {:#x}",
            page_size, table_count, next_unused, gap
        ),
    )
}

pub(super) fn page_headers(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let candidates = pages_with_rows(image);
    if candidates.is_empty() {
        return nothing("no intact data page with rows");
    }
    let page_count = image.page_count() as u32;
    let chosen: Vec<(PageIndex, PageHeader)> = candidates
        .choose_multiple(rng, MAX_DAMAGED_PAGES)
        .cloned()
        .collect();

    let mut touched = Vec::new();
    let mut notes = Vec::new();
    for (index, original) in chosen {
        let base = page_base(image, index);
        let mut header = original.clone();
        match rng.gen_range(0..3) {
            0 => {
                let extra = rng.gen_range(16..32u16);
                header.num_row_offsets = (header.num_row_offsets + extra).min(MAX_ROW_OFFSETS as u16);
                touched.push(ByteRange::new(base + PAGE_ROW_COUNTS_OFFSET, 3));
                notes.push(format!("page {} num_row_offsets {}", index, header.num_row_offsets));
            }
            1 => {
                header.next_page = rng.gen_range(page_count + 1..page_count + 0x1000);
                touched.push(ByteRange::new(base + PAGE_NEXT_PAGE_OFFSET, 4));
                notes.push(format!("page {} next_page {}", index, header.next_page));
            }
            _ => {
                header.table_type = rng.gen_range(0x20..0x1000);
                touched.push(ByteRange::new(base + PAGE_TABLE_TYPE_OFFSET, 4));
                notes.push(format!("page {} table_type {:#x}", index, header.table_type));
            }
        }
        image.write_page_header(index, &header);
    }
    (touched, notes.join("; "))
}

pub(super) fn row_presence_bitmap(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let candidates = pages_with_rows(image);
    if candidates.is_empty() {
        return nothing("no intact data page with rows");
    }
    let page_size = image.page_size();
    let chosen: Vec<(PageIndex, PageHeader)> = candidates
        .choose_multiple(rng, MAX_BITMAP_PAGES)
        .cloned()
        .collect();

    let mut touched = Vec::new();
    let mut notes = Vec::new();
    for (index, header) in chosen {
        let Some(page) = image.page(index) else {
            continue;
        };
        let slot = rng.gen_range(0..header.num_row_offsets as usize);
        let group = slot / ROWS_PER_GROUP;
        let flags = page::read_presence(page, group) ^ (1 << (slot % ROWS_PER_GROUP));
        let position = page::presence_position(page_size, group);
        image.write_page_bytes(index, position, &flags.to_le_bytes());
        touched.push(ByteRange::new(page_base(image, index) + position, 2));
        notes.push(format!("page {} slot {}", index, slot));
    }
    (touched, format!("presence flag toggled on {}", notes.join(", ")))
}

pub(super) fn table_index(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let count = image.directory_len();
    let populated: Vec<usize> = (0..count)
        .filter(|index| {
            image
                .descriptor(*index)
                .is_some_and(|descriptor| descriptor.kind().is_some())
        })
        .collect();
    if populated.len() < 2 {
        return nothing("fewer than two usable directory entries");
    }
    let picked: Vec<usize> = populated.choose_multiple(rng, 2).copied().collect();
    let (range_victim, type_victim) = (picked[0], picked[1]);
    let page_count = image.page_count() as u32;

    let mut touched = Vec::new();
    if let Some(mut descriptor) = image.descriptor(range_victim) {
        descriptor.first_page = page_count + rng.gen_range(1..1000u32);
        image.write_descriptor(range_victim, &descriptor);
        touched.push(ByteRange::new(
            DatabaseImage::descriptor_offset(range_victim),
            TABLE_DESCRIPTOR_SIZE,
        ));
    }
    let bogus_type = rng.gen_range(0x20..0x1000u32);
    if let Some(mut descriptor) = image.descriptor(type_victim) {
        descriptor.table_type = bogus_type;
        image.write_descriptor(type_victim, &descriptor);
        touched.push(ByteRange::new(
            DatabaseImage::descriptor_offset(type_victim),
            TABLE_DESCRIPTOR_SIZE,
        ));
    }
    (
        touched,
        format!(
            "entry {} first_page out of range, entry {} table type {:#x}",
            range_victim, type_victim, bogus_type
        ),
    )
}

pub(super) fn row_structure(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let page_size = image.page_size();
    // Only slots where the bad offset is visible: past the heap, or in the
    // first slot which must always be zero.
    let candidates: Vec<(PageIndex, Vec<usize>)> = pages_with_rows(image)
        .into_iter()
        .filter(|(index, header)| row_offset_problems(image, *index, header).is_empty())
        .map(|(index, header)| {
            let slots: Vec<usize> = (0..header.num_row_offsets as usize)
                .filter(|slot| BAD_ROW_OFFSET >= header.used_size || *slot == 0)
                .collect();
            (index, slots)
        })
        .filter(|(_, slots)| !slots.is_empty())
        .collect();
    if candidates.is_empty() {
        return nothing("no row index entry where a bad offset would be visible");
    }

    let mut touched = Vec::new();
    let mut notes = Vec::new();
    for (index, slots) in candidates.choose_multiple(rng, MAX_OFFSET_PAGES) {
        let Some(slot) = slots.choose(rng).copied() else {
            continue;
        };
        let position = page::slot_offset_position(page_size, slot);
        image.write_page_bytes(*index, position, &BAD_ROW_OFFSET.to_le_bytes());
        touched.push(ByteRange::new(page_base(image, *index) + position, 2));
        notes.push(format!("page {} slot {}", index, slot));
    }
    (
        touched,
        format!("row offset set to {:#x} on {}", BAD_ROW_OFFSET, notes.join(", ")),
    )
}

/// A string prefix that, once rewritten, claims more bytes than its row has.
fn overrun_patch(page: &[u8], row: &RowRef, layout: &RowLayout) -> Option<(usize, Vec<u8>)> {
    let positions = layout.string_positions(page, row.slot.start, row.slot.end).ok()?;
    positions.into_iter().find_map(|position| {
        string::decode(page, position, row.slot.end).ok()?;
        let (kind, total) = string::peek_prefix(page, position).ok()?;
        match kind {
            StringKind::ShortAscii => {
                let claimed = (SHORT_OVERRUN_PREFIX >> 1) as usize;
                (total != claimed && position + claimed > row.slot.end)
                    .then(|| (position, vec![SHORT_OVERRUN_PREFIX]))
            }
            StringKind::LongAscii | StringKind::LongUtf16 => {
                (read_u16(page, position + 1) != u16::MAX).then(|| (position + 1, u16::MAX.to_le_bytes().to_vec()))
            }
        }
    })
}

pub(super) fn field_data(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let mut candidates: Vec<(TableType, RowRef, usize, Vec<u8>)> = Vec::new();
    for table in TableType::all() {
        let Some(layout) = RowLayout::for_table(table) else {
            continue;
        };
        for row in image.table_rows(table) {
            let Some(page) = image.page(row.page) else {
                continue;
            };
            if layout.row_end(page, row.slot.start, row.slot.end).is_err() {
                continue;
            }
            if let Some((at, bytes)) = overrun_patch(page, &row, layout) {
                candidates.push((table, row, at, bytes));
            }
        }
    }
    if candidates.is_empty() {
        return nothing("no intact string to damage");
    }

    let mut touched = Vec::new();
    let mut notes = Vec::new();
    for (table, row, at, bytes) in candidates.choose_multiple(rng, MAX_FIELD_ROWS) {
        image.write_page_bytes(row.page, *at, bytes);
        touched.push(ByteRange::new(page_base(image, row.page) + at, bytes.len()));
        notes.push(format!("{} row at page {} slot {}", table.name(), row.page, row.slot.slot));
    }
    (touched, format!("string length overruns row in {}", notes.join(", ")))
}

pub(super) fn playlist_structure(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let nodes = playlist_nodes(image);
    // (parent node, child node) pairs; pointing a parent at its child closes a loop.
    let pairs: Vec<(usize, usize)> = nodes
        .iter()
        .enumerate()
        .flat_map(|(p, parent)| {
            nodes
                .iter()
                .enumerate()
                .filter(move |(c, child)| *c != p && child.parent == parent.id && child.id != parent.id)
                .map(move |(c, _)| (p, c))
        })
        .collect();
    let Some((p, c)) = pairs.choose(rng).copied() else {
        return nothing("playlist tree has no parent and child pair");
    };

    let page_size = image.page_size();
    let (parent, child) = (nodes[p], nodes[c]);
    let mut touched = vec![write_u32_at(
        image,
        parent.row.file_offset(page_size) + PLAYLIST_PARENT_OFFSET,
        child.id,
    )];
    let mut summary = format!("playlist {} re-parented under its child {}", parent.id, child.id);

    let others: Vec<usize> = (0..nodes.len()).filter(|i| *i != p && *i != c).collect();
    if let Some(other) = others.choose(rng).map(|i| nodes[*i]) {
        let missing = MISSING_PARENT_BASE + rng.gen_range(0..0xFFFFu32);
        touched.push(write_u32_at(
            image,
            other.row.file_offset(page_size) + PLAYLIST_PARENT_OFFSET,
            missing,
        ));
        summary.push_str(&format!("; playlist {} parent set to missing {}", other.id, missing));
    }
    (touched, summary)
}

pub(super) fn cross_table_relationships(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let page_size = image.page_size();
    let mut touched = Vec::new();
    let mut notes = Vec::new();

    let artist_key = RowLayout::for_table(TableType::Tracks)
        .and_then(|layout| layout.foreign_keys.iter().find(|key| key.field == "artist_id"));
    let tracks = image.table_rows(TableType::Tracks);
    if let (Some(key), Some(track)) = (artist_key, tracks.choose(rng)) {
        touched.push(write_u32_at(
            image,
            track.file_offset(page_size) + key.column.offset,
            MISSING_ID,
        ));
        notes.push(format!(
            "track at page {} slot {} artist_id",
            track.page, track.slot.slot
        ));
    }

    let entries = image.table_rows(TableType::PlaylistEntries);
    if let Some(entry) = entries.choose(rng) {
        touched.push(write_u32_at(
            image,
            entry.file_offset(page_size) + ENTRY_TRACK_OFFSET,
            MISSING_ID,
        ));
        notes.push(format!(
            "playlist entry at page {} slot {} track_id",
            entry.page, entry.slot.slot
        ));
    }

    if touched.is_empty() {
        return nothing("no track or playlist entry rows");
    }
    (
        touched,
        format!("{} set to {:#x}", notes.join(", "), MISSING_ID),
    )
}

pub(super) fn version_info(image: &mut DatabaseImage, rng: &mut StdRng) -> Damage {
    let format_word = rng.gen_range(0x1_0000..=u32::MAX);
    let sequence = rng.gen_range(0x0100_0000..=u32::MAX);
    let touched = vec![
        write_u32_at(image, FORMAT_WORD_OFFSET, format_word),
        write_u32_at(image, SEQUENCE_OFFSET, sequence),
    ];
    (
        touched,
        format!("format word {:#x}, sequence {:#x}", format_word, sequence),
    )
}
