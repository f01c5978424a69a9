use serde::{Deserialize, Serialize};

use crate::{
    storage::{
        EXPECTED_SIGNATURE, FILE_HEADER_SIZE, FORMAT_WORD_OFFSET, GAP_OFFSET,
        NEXT_UNUSED_PAGE_OFFSET, PAGE_SIZE_OFFSET, SEQUENCE_OFFSET, SIGNATURE_OFFSET,
        TABLE_COUNT_OFFSET, TABLE_DIRECTORY_OFFSET,
    },
    types::{
        DEFAULT_PAGE_SIZE, DEFAULT_TABLE_COUNT, MAX_PLAUSIBLE_FORMAT_WORD,
        MAX_PLAUSIBLE_SEQUENCE, MAX_SANE_TABLE_COUNT, error::DatabaseError, is_legal_page_size,
        read_u32, table::TABLE_DESCRIPTOR_SIZE, write_u32,
    },
};

/// The fixed words at the start of page 0. Decoding never rejects values;
/// judging them is left to the `*_problems` methods so damaged headers can
/// still be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub signature: u32,
    pub page_size: u32,
    pub table_count: u32,
    pub next_unused_page: u32,
    pub format_word: u32,
    pub sequence: u32,
    pub gap: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            signature: EXPECTED_SIGNATURE,
            page_size: DEFAULT_PAGE_SIZE as u32,
            table_count: DEFAULT_TABLE_COUNT,
            next_unused_page: 1,
            format_word: 5,
            sequence: 1,
            gap: 0,
        }
    }
}

impl FileHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; FILE_HEADER_SIZE];
        self.write_into(&mut buffer);
        buffer
    }

    pub fn write_into(&self, buffer: &mut [u8]) {
        write_u32(buffer, SIGNATURE_OFFSET, self.signature);
        write_u32(buffer, PAGE_SIZE_OFFSET, self.page_size);
        write_u32(buffer, TABLE_COUNT_OFFSET, self.table_count);
        write_u32(buffer, NEXT_UNUSED_PAGE_OFFSET, self.next_unused_page);
        write_u32(buffer, FORMAT_WORD_OFFSET, self.format_word);
        write_u32(buffer, SEQUENCE_OFFSET, self.sequence);
        write_u32(buffer, GAP_OFFSET, self.gap);
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(DatabaseError::InvalidHeader {
                reason: "Header too short".to_string(),
            });
        }

        Ok(Self {
            signature: read_u32(bytes, SIGNATURE_OFFSET),
            page_size: read_u32(bytes, PAGE_SIZE_OFFSET),
            table_count: read_u32(bytes, TABLE_COUNT_OFFSET),
            next_unused_page: read_u32(bytes, NEXT_UNUSED_PAGE_OFFSET),
            format_word: read_u32(bytes, FORMAT_WORD_OFFSET),
            sequence: read_u32(bytes, SEQUENCE_OFFSET),
            gap: read_u32(bytes, GAP_OFFSET),
        })
    }

    pub fn signature_ok(&self) -> bool {
        self.signature == EXPECTED_SIGNATURE
    }

    pub fn page_size_ok(&self) -> bool {
        is_legal_page_size(self.page_size as usize)
    }

    /// Largest table count whose directory still fits in page 0.
    pub fn max_table_count(page_size: usize) -> u32 {
        let fits = page_size.saturating_sub(TABLE_DIRECTORY_OFFSET) / TABLE_DESCRIPTOR_SIZE;
        (fits as u32).min(MAX_SANE_TABLE_COUNT)
    }

    pub fn table_count_ok(&self, page_size: usize) -> bool {
        self.table_count >= 1 && self.table_count <= Self::max_table_count(page_size)
    }

    /// Problems in the metadata words (page size, table count, next unused
    /// page, gap) for a file of `file_len` bytes.
    pub fn metadata_problems(&self, file_len: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.page_size_ok() {
            problems.push(format!("page size {} is not a legal page size", self.page_size));
        } else {
            let page_size = self.page_size as usize;
            if file_len % page_size != 0 {
                problems.push(format!(
                    "file length {} is not a multiple of page size {}",
                    file_len, page_size
                ));
            }
            if self.next_unused_page as usize != file_len / page_size {
                problems.push(format!(
                    "next_unused_page {} but file holds {} pages",
                    self.next_unused_page,
                    file_len / page_size
                ));
            }
        }
        let page_size = if self.page_size_ok() {
            self.page_size as usize
        } else {
            DEFAULT_PAGE_SIZE
        };
        if !self.table_count_ok(page_size) {
            problems.push(format!("suspicious table count {}", self.table_count));
        }
        if self.gap != 0 {
            problems.push(format!("header gap word is {:#x}, expected 0", self.gap));
        }
        problems
    }

    /// Problems in the version words. `max_page_sequence` is the highest
    /// sequence stamp found in any intact page header.
    pub fn version_problems(&self, max_page_sequence: Option<u32>) -> Vec<String> {
        let mut problems = Vec::new();
        if self.format_word > MAX_PLAUSIBLE_FORMAT_WORD {
            problems.push(format!("implausible format word {:#x}", self.format_word));
        }
        if self.sequence == 0 || self.sequence > MAX_PLAUSIBLE_SEQUENCE {
            problems.push(format!("implausible sequence {}", self.sequence));
        } else if let Some(max_stamp) = max_page_sequence {
            if self.sequence < max_stamp {
                problems.push(format!(
                    "sequence {} older than page stamp {}",
                    self.sequence, max_stamp
                ));
            }
        }
        problems
    }
}
