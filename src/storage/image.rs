use std::{
    collections::HashSet,
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    storage::{TABLE_DIRECTORY_OFFSET, header::FileHeader},
    types::{
        HEAP_START, LEGAL_PAGE_SIZES, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PAGE_HEADER_SIZE, PageIndex,
        RowId, SlotIndex,
        error::DatabaseError,
        is_legal_page_size,
        page::{self, PageHeader},
        read_u32, row_groups_for,
        row::RowLayout,
        table::{TABLE_DESCRIPTOR_SIZE, TableDescriptor, TableType},
    },
};

/// How many pages after page 0 are sampled when guessing the page size.
const DETECTION_SAMPLE: usize = 8;

/// One allocated row slot of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot {
    pub slot: SlotIndex,
    /// Offset relative to the heap start, as stored in the row index.
    pub heap_offset: u16,
    /// Absolute position of the row inside the page.
    pub start: usize,
    /// End of the row's extent: the next row start or the heap end.
    pub end: usize,
    pub present: bool,
}

/// A row slot located on a specific page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRef {
    pub page: PageIndex,
    pub slot: RowSlot,
}

impl RowRef {
    /// Absolute file offset of the row start.
    pub fn file_offset(&self, page_size: usize) -> usize {
        self.page as usize * page_size + self.slot.start
    }
}

/// A full in-memory copy of a database file. Each corruptor or recovery
/// instance owns exactly one of these for the duration of an operation.
#[derive(Debug, Clone)]
pub struct DatabaseImage {
    path: PathBuf,
    data: Vec<u8>,
    page_size: usize,
}

impl DatabaseImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::load_with_hint(path, None)
    }

    /// Load a file, falling back to `page_size_hint` when neither the header
    /// nor the page contents establish the geometry.
    pub fn load_with_hint<P: AsRef<Path>>(
        path: P,
        page_size_hint: Option<usize>,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatabaseError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let data = fs::read(path)?;
        debug!(path = %path.display(), bytes = data.len(), "loaded database image");
        Self::from_bytes(path, data, page_size_hint)
    }

    pub fn from_bytes<P: AsRef<Path>>(
        path: P,
        data: Vec<u8>,
        page_size_hint: Option<usize>,
    ) -> Result<Self, DatabaseError> {
        if data.len() < MIN_PAGE_SIZE {
            return Err(DatabaseError::FileTooSmall {
                actual: data.len(),
                minimum: MIN_PAGE_SIZE,
            });
        }
        let page_size = resolve_page_size(&data, page_size_hint).ok_or_else(|| {
            DatabaseError::InvalidPageSize {
                actual: read_u32(&data, crate::storage::PAGE_SIZE_OFFSET) as usize,
                min: MIN_PAGE_SIZE,
                max: MAX_PAGE_SIZE,
            }
        })?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            data,
            page_size,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.data)?;
        debug!(path = %path.display(), bytes = self.data.len(), "wrote database image");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Page size this image is laid out with (not necessarily what the
    /// header claims).
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.data.len() / self.page_size
    }

    pub fn header(&self) -> FileHeader {
        // Always succeeds: the image is at least one minimal page long.
        FileHeader::from_bytes(&self.data).unwrap_or_default()
    }

    pub fn write_header(&mut self, header: &FileHeader) -> usize {
        self.write_bytes(0, &header.to_bytes())
    }

    /// Overwrite bytes at `offset`, returning how many bytes actually changed.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> usize {
        let end = (offset + bytes.len()).min(self.data.len());
        if offset >= end {
            return 0;
        }
        let target = &mut self.data[offset..end];
        let changed = target
            .iter()
            .zip(bytes)
            .filter(|(old, new)| old != new)
            .count();
        target.copy_from_slice(&bytes[..end - offset]);
        changed
    }

    pub fn descriptor_offset(index: usize) -> usize {
        TABLE_DIRECTORY_OFFSET + index * TABLE_DESCRIPTOR_SIZE
    }

    /// Number of descriptors that physically fit in page 0.
    pub fn descriptor_capacity(&self) -> usize {
        (self.page_size - TABLE_DIRECTORY_OFFSET) / TABLE_DESCRIPTOR_SIZE
    }

    pub fn descriptor(&self, index: usize) -> Option<TableDescriptor> {
        if index >= self.descriptor_capacity() {
            return None;
        }
        let offset = Self::descriptor_offset(index);
        Some(TableDescriptor::from_bytes(
            &self.data[offset..offset + TABLE_DESCRIPTOR_SIZE],
        ))
    }

    pub fn descriptors(&self, count: usize) -> Vec<TableDescriptor> {
        (0..count.min(self.descriptor_capacity()))
            .filter_map(|index| self.descriptor(index))
            .collect()
    }

    /// Number of directory entries to consider. Uses the header's table
    /// count when it is sane, otherwise the run of non-empty descriptors.
    pub fn directory_len(&self) -> usize {
        let header = self.header();
        if header.table_count_ok(self.page_size) {
            return (header.table_count as usize).min(self.descriptor_capacity());
        }
        self.populated_descriptors()
    }

    /// Leading descriptors that are not all zero.
    pub fn populated_descriptors(&self) -> usize {
        (0..self.descriptor_capacity())
            .take_while(|index| {
                let offset = Self::descriptor_offset(*index);
                self.data[offset..offset + TABLE_DESCRIPTOR_SIZE]
                    .iter()
                    .any(|byte| *byte != 0)
            })
            .count()
    }

    pub fn write_descriptor(&mut self, index: usize, descriptor: &TableDescriptor) -> usize {
        self.write_bytes(Self::descriptor_offset(index), &descriptor.to_bytes())
    }

    pub fn page_range(&self, page_index: PageIndex) -> Option<Range<usize>> {
        let start = page_index as usize * self.page_size;
        let end = start + self.page_size;
        (page_index != 0 && end <= self.data.len()).then_some(start..end)
    }

    pub fn page(&self, page_index: PageIndex) -> Option<&[u8]> {
        self.page_range(page_index).map(|range| &self.data[range])
    }

    pub fn page_header(&self, page_index: PageIndex) -> Option<PageHeader> {
        self.page(page_index)
            .and_then(|page| PageHeader::from_bytes(&page[..PAGE_HEADER_SIZE]).ok())
    }

    pub fn write_page_header(&mut self, page_index: PageIndex, header: &PageHeader) -> usize {
        match self.page_range(page_index) {
            Some(range) => self.write_bytes(range.start, &header.to_bytes()),
            None => 0,
        }
    }

    /// Overwrite bytes at a page-relative offset.
    pub fn write_page_bytes(&mut self, page_index: PageIndex, offset: usize, bytes: &[u8]) -> usize {
        match self.page_range(page_index) {
            Some(range) if offset + bytes.len() <= range.len() => {
                self.write_bytes(range.start + offset, bytes)
            }
            _ => 0,
        }
    }

    /// Does this page's header hold up on its own?
    pub fn page_header_valid(&self, page_index: PageIndex) -> bool {
        self.page_header(page_index)
            .map(|header| {
                header
                    .problems(page_index, self.page_size, self.page_count())
                    .is_empty()
            })
            .unwrap_or(false)
    }

    /// Allocated row slots of a data page, with extents derived from the
    /// ordering of heap offsets. Returns `None` when the header cannot
    /// describe a row index that fits the page.
    pub fn row_slots(&self, page_index: PageIndex) -> Option<Vec<RowSlot>> {
        let header = self.page_header(page_index)?;
        let page = self.page(page_index)?;
        row_slots_in(page, &header)
    }

    /// Pages whose headers pass their own checks, with the decoded header.
    pub fn intact_pages(&self) -> Vec<(PageIndex, PageHeader)> {
        (1..self.page_count() as PageIndex)
            .filter(|index| self.page_header_valid(*index))
            .filter_map(|index| self.page_header(index).map(|header| (index, header)))
            .collect()
    }

    /// Pages whose headers cannot be trusted.
    pub fn broken_pages(&self) -> Vec<PageIndex> {
        (1..self.page_count() as PageIndex)
            .filter(|index| !self.page_header_valid(*index))
            .collect()
    }

    /// Every allocated row of `table` on pages with intact headers, present
    /// or deleted. Slots whose offset leaves the heap, or whose extent cannot
    /// hold the fixed part of the row, are skipped.
    pub fn table_rows(&self, table: TableType) -> Vec<RowRef> {
        let fixed = RowLayout::for_table(table).map_or(0, |layout| layout.fixed_size);
        let mut rows = Vec::new();
        for (index, header) in self.intact_pages() {
            if header.kind() != Some(table) || !header.is_data_page() {
                continue;
            }
            let Some(slots) = self.row_slots(index) else {
                continue;
            };
            rows.extend(
                slots
                    .into_iter()
                    .filter(|slot| slot.start < slot.end && slot.start + fixed <= slot.end)
                    .map(|slot| RowRef { page: index, slot }),
            );
        }
        rows
    }

    /// Ids of every allocated row of `table`, deleted rows included.
    pub fn id_set(&self, table: TableType) -> HashSet<RowId> {
        let Some(layout) = RowLayout::for_table(table) else {
            return HashSet::new();
        };
        self.table_rows(table)
            .iter()
            .filter_map(|row| {
                let page = self.page(row.page)?;
                layout.read_id(page, row.slot.start)
            })
            .collect()
    }

    /// Highest sequence stamp among pages whose headers are intact.
    pub fn max_page_sequence(&self) -> Option<u32> {
        (1..self.page_count() as PageIndex)
            .filter(|index| self.page_header_valid(*index))
            .filter_map(|index| self.page_header(index))
            .map(|header| header.sequence)
            .max()
    }
}

/// Row slots of a page described by `header`. The heap offsets are not
/// validated beyond fitting the page; extents are clamped to the heap end.
pub fn row_slots_in(page: &[u8], header: &PageHeader) -> Option<Vec<RowSlot>> {
    if !header.is_data_page() {
        return Some(Vec::new());
    }
    let rows = header.num_row_offsets as usize;
    let heap_end = HEAP_START + header.used_size as usize;
    let index_start = page.len().checked_sub(row_groups_for(rows) * crate::types::ROW_GROUP_SIZE)?;
    if heap_end > index_start {
        return None;
    }

    let mut slots: Vec<RowSlot> = (0..rows)
        .map(|slot| {
            let heap_offset = page::read_slot_offset(page, slot);
            RowSlot {
                slot,
                heap_offset,
                start: HEAP_START + heap_offset as usize,
                end: heap_end,
                present: page::is_slot_present(page, slot),
            }
        })
        .collect();

    let mut starts: Vec<usize> = slots
        .iter()
        .map(|slot| slot.start)
        .filter(|start| *start < heap_end)
        .collect();
    starts.sort_unstable();
    starts.dedup();
    for slot in &mut slots {
        if slot.start >= heap_end {
            slot.end = slot.start;
            continue;
        }
        slot.end = starts
            .iter()
            .copied()
            .find(|start| *start > slot.start)
            .unwrap_or(heap_end);
    }
    Some(slots)
}

fn resolve_page_size(data: &[u8], hint: Option<usize>) -> Option<usize> {
    let claimed = read_u32(data, crate::storage::PAGE_SIZE_OFFSET) as usize;
    if is_legal_page_size(claimed) && data.len() % claimed == 0 && page_indices_match(data, claimed) > 0 {
        return Some(claimed);
    }
    if let Some(detected) = detect_page_size(data) {
        debug!(claimed, detected, "header page size rejected, using detected size");
        return Some(detected);
    }
    if let Some(hint) = hint {
        if is_legal_page_size(hint) && data.len() % hint == 0 {
            return Some(hint);
        }
    }
    // A header-only file still has a usable geometry if the claim is legal.
    (is_legal_page_size(claimed) && data.len() % claimed == 0).then_some(claimed)
}

/// Fraction of sampled pages (as a count) whose page_index matches their
/// position for a given page size.
fn page_indices_match(data: &[u8], page_size: usize) -> usize {
    let pages = data.len() / page_size;
    (1..pages.min(DETECTION_SAMPLE + 1))
        .filter(|index| read_u32(data, index * page_size + page::PAGE_INDEX_OFFSET) as usize == *index)
        .count()
}

/// Guess the page size from page headers declaring their own position.
pub fn detect_page_size(data: &[u8]) -> Option<usize> {
    LEGAL_PAGE_SIZES
        .iter()
        .copied()
        .filter(|size| data.len() % size == 0 && data.len() / size >= 2)
        .map(|size| {
            let sampled = (data.len() / size - 1).min(DETECTION_SAMPLE);
            (size, page_indices_match(data, size), sampled)
        })
        .filter(|(_, matched, sampled)| *matched * 2 > *sampled)
        .max_by_key(|(size, matched, sampled)| (*matched * 1000 / *sampled, *size))
        .map(|(size, _, _)| size)
}
