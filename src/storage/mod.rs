use std::ops::Range;

pub mod header;
pub mod image;

pub const FILE_HEADER_SIZE: usize = 0x1C;
pub const EXPECTED_SIGNATURE: u32 = 0;

pub const SIGNATURE_OFFSET: usize = 0x00;
pub const PAGE_SIZE_OFFSET: usize = 0x04;
pub const TABLE_COUNT_OFFSET: usize = 0x08;
pub const NEXT_UNUSED_PAGE_OFFSET: usize = 0x0C;
pub const FORMAT_WORD_OFFSET: usize = 0x10;
pub const SEQUENCE_OFFSET: usize = 0x14;
pub const GAP_OFFSET: usize = 0x18;
pub const TABLE_DIRECTORY_OFFSET: usize = FILE_HEADER_SIZE;

/// Byte ranges of each header region. The metadata header is split around
/// the version fields.
pub const MAGIC_REGION: Range<usize> = SIGNATURE_OFFSET..PAGE_SIZE_OFFSET;
pub const METADATA_REGIONS: [Range<usize>; 2] = [PAGE_SIZE_OFFSET..FORMAT_WORD_OFFSET, GAP_OFFSET..FILE_HEADER_SIZE];
pub const VERSION_REGION: Range<usize> = FORMAT_WORD_OFFSET..GAP_OFFSET;
