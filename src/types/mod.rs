pub mod error;
pub mod page;
pub mod row;
pub mod scenario;
pub mod string;
pub mod table;

// Common type aliases
pub type PageIndex = u32;
pub type RowId = u32;
pub type SlotIndex = usize;

// Page geometry accepted by the export format
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 16384;
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_TABLE_COUNT: u32 = 20;
pub const MAX_SANE_TABLE_COUNT: u32 = 100;

// Per-page header, heap starts right after it
pub const PAGE_HEADER_SIZE: usize = 0x28;
pub const HEAP_START: usize = PAGE_HEADER_SIZE;

// Row index: groups of 16 slots growing backwards from the page end
pub const ROWS_PER_GROUP: usize = 16;
pub const ROW_GROUP_SIZE: usize = 2 + 2 + ROWS_PER_GROUP * 2; // padding + presence + offsets
pub const ROW_GROUP_PRESENCE_OFFSET: usize = 2;
pub const ROW_GROUP_OFFSETS_OFFSET: usize = 4;
pub const MAX_ROW_OFFSETS: usize = 0x1FFF; // 13-bit counter in the page header
pub const MAX_PRESENT_ROWS: usize = 0x7FF; // 11-bit counter in the page header

/// Sentinel written in place of a foreign key whose target cannot be resolved.
/// Consumers already treat 0 as "no link", so an unresolved reference never
/// reads as a plausible id.
pub const UNRESOLVED_ID: RowId = 0;

/// Upper bound for the header sequence counter before it is considered bogus.
pub const MAX_PLAUSIBLE_SEQUENCE: u32 = 0x00FF_FFFF;
/// The format word is opaque, but real exports never use the upper half.
pub const MAX_PLAUSIBLE_FORMAT_WORD: u32 = 0xFFFF;

/// Every page size the format allows, smallest first.
pub const LEGAL_PAGE_SIZES: [usize; 6] = [512, 1024, 2048, 4096, 8192, 16384];

pub fn is_legal_page_size(page_size: usize) -> bool {
    LEGAL_PAGE_SIZES.contains(&page_size)
}

/// Number of 36-byte row groups needed for `row_offsets` slots.
pub fn row_groups_for(row_offsets: usize) -> usize {
    row_offsets.div_ceil(ROWS_PER_GROUP)
}

/// Upper bound on row slots a page can hold when rows average `avg_row_size`
/// bytes. Each row costs its heap bytes plus 1/16 of a row group.
pub fn max_row_slots(page_size: usize, avg_row_size: usize) -> usize {
    if page_size <= HEAP_START {
        return 0;
    }
    let usable = page_size - HEAP_START;
    let per_row_x16 = avg_row_size.max(1) * ROWS_PER_GROUP + ROW_GROUP_SIZE;
    ((usable * ROWS_PER_GROUP) / per_row_x16).min(MAX_ROW_OFFSETS)
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
