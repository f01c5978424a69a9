use std::ops::Range;

use crc32fast::Hasher;

use crate::storage::image::DatabaseImage;

pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC32 over `range` of the image, clamped to the file length.
pub fn region_checksum(image: &DatabaseImage, range: Range<usize>) -> u32 {
    let end = range.end.min(image.len());
    let start = range.start.min(end);
    checksum(&image.bytes()[start..end])
}

/// Per-page CRC32s, page 0 included.
pub fn page_checksums(image: &DatabaseImage) -> Vec<u32> {
    image
        .bytes()
        .chunks(image.page_size())
        .map(checksum)
        .collect()
}

/// Indexes of pages whose contents differ between two images of the same
/// geometry.
pub fn differing_pages(left: &DatabaseImage, right: &DatabaseImage) -> Vec<usize> {
    page_checksums(left)
        .into_iter()
        .zip(page_checksums(right))
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(index, _)| index)
        .collect()
}
