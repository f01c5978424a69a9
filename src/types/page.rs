use serde::{Deserialize, Serialize};

use crate::types::{
    HEAP_START, MAX_PRESENT_ROWS, MAX_ROW_OFFSETS, PAGE_HEADER_SIZE, PageIndex,
    ROW_GROUP_OFFSETS_OFFSET, ROW_GROUP_PRESENCE_OFFSET, ROW_GROUP_SIZE, ROWS_PER_GROUP,
    SlotIndex, error::DatabaseError, read_u16, read_u32, row_groups_for, table::TableType,
    write_u16, write_u32,
};

/*
 * Page Layout on Disk
 * ┌─────────────────────────────────────────────────────────────────┐
 * │                    PAGE HEADER (40 bytes)                       │
 * │  zero(4) | page_index(4) | table_type(4) | next_page(4) |       │
 * │  sequence(4) | opaque(4) | row_counts(3) | flags(1) |           │
 * │  free_size(2) | used_size(2) | opaque(8)                        │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                  HEAP (rows, grows forward)                     │
 * │  [row 0][row 1][row 2] ...                                      │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                    FREE SPACE                                   │
 * ├─────────────────────────────────────────────────────────────────┤
 * │            ROW INDEX (grows backward from page end)             │
 * │  ... [group 1] [group 0: pad(2)|presence(2)|ofs0..ofs15(32)]    │
 * └─────────────────────────────────────────────────────────────────┘
 */

pub const PAGE_FLAGS_DATA: u8 = 0x34;
pub const PAGE_FLAGS_DATA_ALT: u8 = 0x24;
pub const PAGE_FLAGS_CANDIDATE: u8 = 0x64;
pub const PAGE_FLAGS_CANDIDATE_ALT: u8 = 0x44;
const PAGE_FLAGS_NON_DATA_BIT: u8 = 0x40;

pub const PAGE_INDEX_OFFSET: usize = 0x04;
pub const PAGE_TABLE_TYPE_OFFSET: usize = 0x08;
pub const PAGE_NEXT_PAGE_OFFSET: usize = 0x0C;
pub const PAGE_SEQUENCE_OFFSET: usize = 0x10;
pub const PAGE_ROW_COUNTS_OFFSET: usize = 0x18;
pub const PAGE_FLAGS_OFFSET: usize = 0x1B;
pub const PAGE_FREE_SIZE_OFFSET: usize = 0x1C;
pub const PAGE_USED_SIZE_OFFSET: usize = 0x1E;

pub fn is_known_page_flags(flags: u8) -> bool {
    matches!(
        flags,
        PAGE_FLAGS_DATA | PAGE_FLAGS_DATA_ALT | PAGE_FLAGS_CANDIDATE | PAGE_FLAGS_CANDIDATE_ALT
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHeader {
    pub zero: u32,
    pub page_index: PageIndex,
    pub table_type: u32,
    pub next_page: PageIndex,
    pub sequence: u32,
    pub opaque1: u32,
    pub num_row_offsets: u16,
    pub num_rows: u16,
    pub page_flags: u8,
    pub free_size: u16,
    pub used_size: u16,
    pub opaque2: [u8; 8],
}

impl PageHeader {
    pub fn new(page_index: PageIndex, table_type: TableType, page_flags: u8) -> Self {
        Self {
            zero: 0,
            page_index,
            table_type: table_type.as_u32(),
            next_page: 0,
            sequence: 1,
            opaque1: 0,
            num_row_offsets: 0,
            num_rows: 0,
            page_flags,
            free_size: 0,
            used_size: 0,
            opaque2: [0; 8],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < PAGE_HEADER_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_index: 0,
                reason: format!("page header needs {} bytes, got {}", PAGE_HEADER_SIZE, bytes.len()),
            });
        }

        let packed = u32::from_le_bytes([bytes[0x18], bytes[0x19], bytes[0x1A], 0]);
        let mut opaque2 = [0u8; 8];
        opaque2.copy_from_slice(&bytes[0x20..0x28]);

        Ok(Self {
            zero: read_u32(bytes, 0x00),
            page_index: read_u32(bytes, PAGE_INDEX_OFFSET),
            table_type: read_u32(bytes, PAGE_TABLE_TYPE_OFFSET),
            next_page: read_u32(bytes, PAGE_NEXT_PAGE_OFFSET),
            sequence: read_u32(bytes, PAGE_SEQUENCE_OFFSET),
            opaque1: read_u32(bytes, 0x14),
            num_row_offsets: (packed & 0x1FFF) as u16,
            num_rows: ((packed >> 13) & 0x7FF) as u16,
            page_flags: bytes[PAGE_FLAGS_OFFSET],
            free_size: read_u16(bytes, PAGE_FREE_SIZE_OFFSET),
            used_size: read_u16(bytes, PAGE_USED_SIZE_OFFSET),
            opaque2,
        })
    }

    pub fn write_into(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0x00, self.zero);
        write_u32(bytes, PAGE_INDEX_OFFSET, self.page_index);
        write_u32(bytes, PAGE_TABLE_TYPE_OFFSET, self.table_type);
        write_u32(bytes, PAGE_NEXT_PAGE_OFFSET, self.next_page);
        write_u32(bytes, PAGE_SEQUENCE_OFFSET, self.sequence);
        write_u32(bytes, 0x14, self.opaque1);
        let packed = pack_row_counts(self.num_row_offsets, self.num_rows);
        bytes[PAGE_ROW_COUNTS_OFFSET..PAGE_ROW_COUNTS_OFFSET + 3].copy_from_slice(&packed);
        bytes[PAGE_FLAGS_OFFSET] = self.page_flags;
        write_u16(bytes, PAGE_FREE_SIZE_OFFSET, self.free_size);
        write_u16(bytes, PAGE_USED_SIZE_OFFSET, self.used_size);
        bytes[0x20..0x28].copy_from_slice(&self.opaque2);
    }

    pub fn to_bytes(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut bytes = [0u8; PAGE_HEADER_SIZE];
        self.write_into(&mut bytes);
        bytes
    }

    pub fn is_data_page(&self) -> bool {
        self.page_flags & PAGE_FLAGS_NON_DATA_BIT == 0
    }

    pub fn kind(&self) -> Option<TableType> {
        TableType::from_u32(self.table_type).ok()
    }

    pub fn row_groups(&self) -> usize {
        row_groups_for(self.num_row_offsets as usize)
    }

    pub fn index_size(&self) -> usize {
        self.row_groups() * ROW_GROUP_SIZE
    }

    /// Heap + free space + row index must add up to the page.
    pub fn accounting_consistent(&self, page_size: usize) -> bool {
        HEAP_START + self.used_size as usize + self.free_size as usize + self.index_size()
            == page_size
    }

    /// Row groups implied by free-space accounting alone, independent of the
    /// row counters.
    pub fn groups_from_accounting(&self, page_size: usize) -> Option<usize> {
        let claimed = HEAP_START + self.used_size as usize + self.free_size as usize;
        if claimed > page_size || (page_size - claimed) % ROW_GROUP_SIZE != 0 {
            return None;
        }
        Some((page_size - claimed) / ROW_GROUP_SIZE)
    }

    /// Structural problems of this header for a page at `position`.
    pub fn problems(&self, position: PageIndex, page_size: usize, page_count: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if self.zero != 0 {
            problems.push(format!("leading word is {:#x}, expected 0", self.zero));
        }
        if self.page_index != position {
            problems.push(format!("page_index {} at position {}", self.page_index, position));
        }
        if self.kind().is_none() {
            problems.push(format!("unknown table type tag {}", self.table_type));
        }
        if !is_known_page_flags(self.page_flags) {
            problems.push(format!("unknown page flags {:#04x}", self.page_flags));
        }
        if self.next_page as usize >= page_count {
            problems.push(format!("next_page {} beyond page count {}", self.next_page, page_count));
        }
        if self.num_rows > self.num_row_offsets {
            problems.push(format!(
                "num_rows {} exceeds num_row_offsets {}",
                self.num_rows, self.num_row_offsets
            ));
        }
        if !self.accounting_consistent(page_size) {
            problems.push(format!(
                "free-space accounting broken: used={} free={} groups={}",
                self.used_size,
                self.free_size,
                self.row_groups()
            ));
        }
        problems
    }
}

pub fn pack_row_counts(num_row_offsets: u16, num_rows: u16) -> [u8; 3] {
    let packed = (num_row_offsets as u32 & MAX_ROW_OFFSETS as u32)
        | ((num_rows as u32 & MAX_PRESENT_ROWS as u32) << 13);
    [
        (packed & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        ((packed >> 16) & 0xFF) as u8,
    ]
}

/// Offset of row group `group` within a page of `page_size` bytes.
pub fn group_base(page_size: usize, group: usize) -> usize {
    page_size - (group + 1) * ROW_GROUP_SIZE
}

pub fn presence_position(page_size: usize, group: usize) -> usize {
    group_base(page_size, group) + ROW_GROUP_PRESENCE_OFFSET
}

pub fn slot_offset_position(page_size: usize, slot: SlotIndex) -> usize {
    group_base(page_size, slot / ROWS_PER_GROUP)
        + ROW_GROUP_OFFSETS_OFFSET
        + (slot % ROWS_PER_GROUP) * 2
}

pub fn read_presence(page: &[u8], group: usize) -> u16 {
    read_u16(page, presence_position(page.len(), group))
}

pub fn write_presence(page: &mut [u8], group: usize, flags: u16) {
    let position = presence_position(page.len(), group);
    write_u16(page, position, flags);
}

pub fn read_slot_offset(page: &[u8], slot: SlotIndex) -> u16 {
    read_u16(page, slot_offset_position(page.len(), slot))
}

pub fn write_slot_offset(page: &mut [u8], slot: SlotIndex, offset: u16) {
    let position = slot_offset_position(page.len(), slot);
    write_u16(page, position, offset);
}

pub fn is_slot_present(page: &[u8], slot: SlotIndex) -> bool {
    read_presence(page, slot / ROWS_PER_GROUP) & (1 << (slot % ROWS_PER_GROUP)) != 0
}

/// Population count of the presence bitmap across `groups` row groups.
pub fn presence_popcount(page: &[u8], groups: usize) -> usize {
    (0..groups)
        .map(|group| read_presence(page, group).count_ones() as usize)
        .sum()
}

/// Builds one page from scratch. Rows are appended to the heap back to back
/// and recorded in the row index in insertion order.
pub struct PageBuilder {
    data: Vec<u8>,
    header: PageHeader,
    heap_pos: usize,
    row_offsets: Vec<u16>,
    present: Vec<bool>,
}

impl PageBuilder {
    pub fn new(page_size: usize, page_index: PageIndex, table_type: TableType) -> Self {
        Self {
            data: vec![0u8; page_size],
            header: PageHeader::new(page_index, table_type, PAGE_FLAGS_DATA),
            heap_pos: HEAP_START,
            row_offsets: Vec::new(),
            present: Vec::new(),
        }
    }

    pub fn candidate(page_size: usize, page_index: PageIndex, table_type: TableType) -> Self {
        let mut builder = Self::new(page_size, page_index, table_type);
        builder.header.page_flags = PAGE_FLAGS_CANDIDATE;
        builder
    }

    fn index_start_for(&self, rows: usize) -> usize {
        self.data.len() - row_groups_for(rows) * ROW_GROUP_SIZE
    }

    pub fn can_fit(&self, row_len: usize) -> bool {
        self.header.is_data_page()
            && self.row_offsets.len() < MAX_PRESENT_ROWS
            && self.heap_pos + row_len <= self.index_start_for(self.row_offsets.len() + 1)
    }

    /// Append a row, returning its heap offset.
    pub fn push_row(&mut self, row: &[u8], present: bool) -> Result<u16, DatabaseError> {
        if !self.can_fit(row.len()) {
            return Err(DatabaseError::CorruptedPage {
                page_index: self.header.page_index,
                reason: format!("row of {} bytes does not fit", row.len()),
            });
        }
        let offset = (self.heap_pos - HEAP_START) as u16;
        self.data[self.heap_pos..self.heap_pos + row.len()].copy_from_slice(row);
        self.heap_pos += row.len();
        self.row_offsets.push(offset);
        self.present.push(present);
        Ok(offset)
    }

    pub fn row_count(&self) -> usize {
        self.row_offsets.len()
    }

    pub fn finalize(mut self, next_page: PageIndex, sequence: u32) -> Vec<u8> {
        let rows = self.row_offsets.len();
        let page_size = self.data.len();
        for (slot, offset) in self.row_offsets.iter().enumerate() {
            write_slot_offset(&mut self.data, slot, *offset);
        }
        for group in 0..row_groups_for(rows) {
            let mut flags = 0u16;
            for bit in 0..ROWS_PER_GROUP {
                let slot = group * ROWS_PER_GROUP + bit;
                if slot < rows && self.present[slot] {
                    flags |= 1 << bit;
                }
            }
            write_presence(&mut self.data, group, flags);
        }

        let used = self.heap_pos - HEAP_START;
        self.header.next_page = next_page;
        self.header.sequence = sequence;
        self.header.num_row_offsets = rows as u16;
        self.header.num_rows = self.present.iter().filter(|p| **p).count() as u16;
        self.header.used_size = used as u16;
        self.header.free_size = (page_size - HEAP_START - used - self.header.index_size()) as u16;
        self.header.write_into(&mut self.data[..PAGE_HEADER_SIZE]);
        self.data
    }
}
