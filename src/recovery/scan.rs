use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    storage::image::{DatabaseImage, RowRef},
    types::{
        MAX_PLAUSIBLE_FORMAT_WORD, PageIndex, ROWS_PER_GROUP, RowId, UNRESOLVED_ID,
        page::{self, PageHeader},
        row::{ENTRY_PLAYLIST_OFFSET, PLAYLIST_ID_OFFSET, PLAYLIST_PARENT_OFFSET, RowLayout},
        read_u32,
        scenario::Scenario,
        table::{TableDescriptor, TableType},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Intact,
    Damaged,
    UnrecoverableWithoutReference,
}

/// Diagnosis of one structural region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFinding {
    pub scenario: Scenario,
    pub region: String,
    pub verdict: Verdict,
    pub detail: String,
}

/// Raw result of checking a region: concrete problems, plus pages that
/// could not be examined because their headers are broken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCheck {
    pub problems: Vec<String>,
    pub unassessed: Vec<PageIndex>,
}

impl RegionCheck {
    pub fn passes(&self) -> bool {
        self.problems.is_empty() && self.unassessed.is_empty()
    }

    pub fn is_damaged(&self) -> bool {
        !self.problems.is_empty()
    }

    fn with_unassessed(mut self, pages: Vec<PageIndex>) -> Self {
        self.unassessed = pages;
        self
    }

    fn detail(&self) -> String {
        let mut detail = if self.problems.is_empty() {
            "no damage detected".to_string()
        } else {
            let shown: Vec<&str> = self.problems.iter().take(5).map(String::as_str).collect();
            let mut text = shown.join("; ");
            if self.problems.len() > shown.len() {
                text.push_str(&format!(" (+{} more)", self.problems.len() - shown.len()));
            }
            text
        };
        if !self.unassessed.is_empty() {
            detail.push_str(&format!(
                "; {} page(s) not assessed behind broken headers",
                self.unassessed.len()
            ));
        }
        detail
    }
}

/// Diagnose every region in scenario order without touching the image.
pub fn scan_image(image: &DatabaseImage, reference_available: bool) -> Vec<RegionFinding> {
    Scenario::ALL
        .iter()
        .map(|scenario| {
            let check = check_region(image, *scenario);
            let verdict = if !check.is_damaged() {
                Verdict::Intact
            } else if *scenario == Scenario::VersionInfo
                && !reference_available
                && image.header().format_word > MAX_PLAUSIBLE_FORMAT_WORD
            {
                Verdict::UnrecoverableWithoutReference
            } else {
                Verdict::Damaged
            };
            RegionFinding {
                scenario: *scenario,
                region: scenario.region().to_string(),
                verdict,
                detail: check.detail(),
            }
        })
        .collect()
}

pub fn check_region(image: &DatabaseImage, scenario: Scenario) -> RegionCheck {
    match scenario {
        Scenario::MagicHeader => check_magic(image),
        Scenario::MetadataHeader => check_metadata(image),
        Scenario::PageHeaders => check_page_headers(image),
        Scenario::RowPresenceBitmap => check_presence_bitmap(image),
        Scenario::TableIndex => check_table_index(image),
        Scenario::RowStructure => check_row_structure(image),
        Scenario::FieldData => check_field_data(image),
        Scenario::PlaylistStructure => check_playlist_structure(image),
        Scenario::CrossTableRelationships => check_relationships(image),
        Scenario::VersionInfo => check_version(image),
    }
}

fn check_magic(image: &DatabaseImage) -> RegionCheck {
    let header = image.header();
    let mut check = RegionCheck::default();
    if !header.signature_ok() {
        check
            .problems
            .push(format!("signature {:#010x}, expected 0", header.signature));
    }
    check
}

fn check_metadata(image: &DatabaseImage) -> RegionCheck {
    let header = image.header();
    let mut problems = header.metadata_problems(image.len());
    if header.page_size_ok() && header.page_size as usize != image.page_size() {
        problems.push(format!(
            "header claims page size {} but pages are laid out every {} bytes",
            header.page_size,
            image.page_size()
        ));
    }
    RegionCheck {
        problems,
        unassessed: Vec::new(),
    }
}

fn check_page_headers(image: &DatabaseImage) -> RegionCheck {
    let page_size = image.page_size();
    let page_count = image.page_count();
    let mut check = RegionCheck::default();
    for index in 1..page_count as PageIndex {
        let Some(header) = image.page_header(index) else {
            continue;
        };
        for problem in header.problems(index, page_size, page_count) {
            check.problems.push(format!("page {}: {}", index, problem));
        }
    }
    check
}

/// Does the presence bitmap of a page agree with its row counters?
pub fn presence_consistent(page: &[u8], header: &PageHeader) -> bool {
    let offsets = header.num_row_offsets as usize;
    let groups = header.row_groups();
    if page::presence_popcount(page, groups) != header.num_rows as usize {
        return false;
    }
    if groups == 0 {
        return true;
    }
    let used_in_last = offsets - (groups - 1) * ROWS_PER_GROUP;
    let stray_mask = if used_in_last >= ROWS_PER_GROUP {
        0
    } else {
        !((1u16 << used_in_last) - 1)
    };
    page::read_presence(page, groups - 1) & stray_mask == 0
}

fn check_presence_bitmap(image: &DatabaseImage) -> RegionCheck {
    let mut check = RegionCheck::default();
    for (index, header) in image.intact_pages() {
        if !header.is_data_page() {
            continue;
        }
        let Some(page) = image.page(index) else {
            continue;
        };
        if !presence_consistent(page, &header) {
            check.problems.push(format!(
                "page {}: presence bitmap disagrees with {} present of {} rows",
                index, header.num_rows, header.num_row_offsets
            ));
        }
    }
    check.with_unassessed(image.broken_pages())
}

fn descriptor_problems(
    image: &DatabaseImage,
    position: usize,
    descriptor: &TableDescriptor,
    seen: &mut HashSet<u32>,
    unassessed: &mut BTreeSet<PageIndex>,
    reached: &mut HashSet<PageIndex>,
) -> Vec<String> {
    let page_count = image.page_count() as PageIndex;
    let mut problems = Vec::new();
    let Some(kind) = descriptor.kind() else {
        problems.push(format!("unknown table type tag {}", descriptor.table_type));
        return problems;
    };
    if !seen.insert(descriptor.table_type) {
        problems.push(format!("duplicate entry for {}", kind.name()));
    }
    for (name, page) in [
        ("first_page", descriptor.first_page),
        ("last_page", descriptor.last_page),
        ("empty_candidate", descriptor.empty_candidate),
    ] {
        if page == 0 || page >= page_count {
            problems.push(format!("{} {} out of range", name, page));
        }
    }
    if !problems.is_empty() {
        return problems;
    }

    if let Some(candidate) = image
        .page_header(descriptor.empty_candidate)
        .filter(|_| image.page_header_valid(descriptor.empty_candidate))
    {
        if candidate.is_data_page() || candidate.table_type != descriptor.table_type {
            problems.push(format!(
                "empty_candidate {} is not an empty {} page",
                descriptor.empty_candidate,
                kind.name()
            ));
        }
    }

    // Walk first_page -> last_page through intact headers.
    let mut current = descriptor.first_page;
    for _ in 0..page_count {
        if !image.page_header_valid(current) {
            unassessed.insert(current);
            return problems;
        }
        let Some(header) = image.page_header(current) else {
            return problems;
        };
        if header.table_type != descriptor.table_type || !header.is_data_page() {
            problems.push(format!(
                "chain of {} reaches page {} which is not one of its data pages (entry {})",
                kind.name(),
                current,
                position
            ));
            return problems;
        }
        reached.insert(current);
        if current == descriptor.last_page {
            if header.next_page != descriptor.empty_candidate {
                problems.push(format!(
                    "last page {} links to {}, not empty_candidate {}",
                    current, header.next_page, descriptor.empty_candidate
                ));
            }
            return problems;
        }
        current = header.next_page;
        if current == 0 {
            break;
        }
    }
    problems.push(format!(
        "chain of {} never reaches last_page {}",
        kind.name(),
        descriptor.last_page
    ));
    problems
}

fn check_table_index(image: &DatabaseImage) -> RegionCheck {
    let mut check = RegionCheck::default();
    let count = image.directory_len();
    if count == 0 {
        check.problems.push("table directory is empty".to_string());
        return check;
    }
    let mut seen = HashSet::new();
    let mut unassessed = BTreeSet::new();
    let mut reached = HashSet::new();
    for (position, descriptor) in image.descriptors(count).iter().enumerate() {
        for problem in descriptor_problems(image, position, descriptor, &mut seen, &mut unassessed, &mut reached) {
            check.problems.push(format!("entry {}: {}", position, problem));
        }
    }
    // Only complete walks can tell which data pages were left off every chain.
    if check.problems.is_empty() && unassessed.is_empty() {
        for (index, header) in image.intact_pages() {
            if header.is_data_page() && header.kind().is_some() && !reached.contains(&index) {
                check
                    .problems
                    .push(format!("data page {} is not on any table chain", index));
            }
        }
    }
    check.unassessed = unassessed.into_iter().collect();
    check
}

/// Problems in the row index offsets of a single page with an intact header.
pub fn row_offset_problems(image: &DatabaseImage, index: PageIndex, header: &PageHeader) -> Vec<String> {
    let Some(page) = image.page(index) else {
        return Vec::new();
    };
    let used = header.used_size;
    let mut problems = Vec::new();
    let mut previous: Option<u16> = None;
    for slot in 0..header.num_row_offsets as usize {
        let offset = page::read_slot_offset(page, slot);
        if offset >= used {
            problems.push(format!(
                "page {} slot {}: offset {:#x} beyond heap of {} bytes",
                index, slot, offset, used
            ));
            continue;
        }
        match previous {
            None if offset != 0 => problems.push(format!(
                "page {} slot {}: first row at {:#x}, expected 0",
                index, slot, offset
            )),
            Some(prev) if offset <= prev => problems.push(format!(
                "page {} slot {}: offset {:#x} not after {:#x}",
                index, slot, offset, prev
            )),
            _ => {}
        }
        previous = Some(offset);
    }
    problems
}

/// Pages whose rows cannot all be located: broken headers, or intact data
/// pages whose row index is damaged. Checks that need every row of a table
/// hold off while any of these exist.
pub fn unreadable_pages(image: &DatabaseImage) -> Vec<PageIndex> {
    let mut pages = image.broken_pages();
    pages.extend(
        image
            .intact_pages()
            .into_iter()
            .filter(|(index, header)| {
                header.is_data_page() && !row_offset_problems(image, *index, header).is_empty()
            })
            .map(|(index, _)| index),
    );
    pages.sort_unstable();
    pages
}

fn check_row_structure(image: &DatabaseImage) -> RegionCheck {
    let mut check = RegionCheck::default();
    for (index, header) in image.intact_pages() {
        if header.is_data_page() {
            check.problems.extend(row_offset_problems(image, index, &header));
        }
    }
    check.with_unassessed(image.broken_pages())
}

/// Rows of `table` whose strings do not decode within their extent.
pub fn broken_field_rows(image: &DatabaseImage, table: TableType) -> Vec<(RowRef, String)> {
    let Some(layout) = RowLayout::for_table(table) else {
        return Vec::new();
    };
    image
        .table_rows(table)
        .into_iter()
        .filter_map(|row| {
            let page = image.page(row.page)?;
            layout
                .row_end(page, row.slot.start, row.slot.end)
                .err()
                .map(|err| (row, err.to_string()))
        })
        .collect()
}

fn check_field_data(image: &DatabaseImage) -> RegionCheck {
    let mut check = RegionCheck::default();
    for table in TableType::all() {
        for (row, reason) in broken_field_rows(image, table) {
            check.problems.push(format!(
                "{} row at page {} slot {}: {}",
                table.name(),
                row.page,
                row.slot.slot,
                reason
            ));
        }
    }
    check.with_unassessed(image.broken_pages())
}

/// One playlist tree row as the structure checks see it.
#[derive(Debug, Clone, Copy)]
pub struct PlaylistNode {
    pub row: RowRef,
    pub id: RowId,
    pub parent: RowId,
}

pub fn playlist_nodes(image: &DatabaseImage) -> Vec<PlaylistNode> {
    image
        .table_rows(TableType::PlaylistTree)
        .into_iter()
        .filter_map(|row| {
            let page = image.page(row.page)?;
            Some(PlaylistNode {
                row,
                id: read_u32(page, row.slot.start + PLAYLIST_ID_OFFSET),
                parent: read_u32(page, row.slot.start + PLAYLIST_PARENT_OFFSET),
            })
        })
        .collect()
}

/// Playlist ids taking part in a parent cycle, grouped per cycle.
pub fn parent_cycles(nodes: &[PlaylistNode]) -> Vec<Vec<RowId>> {
    let parents: HashMap<RowId, RowId> = nodes.iter().map(|node| (node.id, node.parent)).collect();
    let mut cycles: Vec<Vec<RowId>> = Vec::new();
    let mut settled: HashSet<RowId> = HashSet::new();
    for node in nodes {
        let mut trail: Vec<RowId> = Vec::new();
        let mut current = node.id;
        while current != UNRESOLVED_ID && !settled.contains(&current) {
            if let Some(position) = trail.iter().position(|id| *id == current) {
                let mut cycle = trail[position..].to_vec();
                cycle.sort_unstable();
                cycles.push(cycle);
                break;
            }
            trail.push(current);
            match parents.get(&current) {
                Some(parent) => current = *parent,
                None => break,
            }
        }
        settled.extend(trail);
    }
    cycles
}

/// Entry rows whose playlist id names no playlist.
pub fn orphaned_entries(image: &DatabaseImage, playlist_ids: &HashSet<RowId>) -> Vec<(RowRef, RowId)> {
    image
        .table_rows(TableType::PlaylistEntries)
        .into_iter()
        .filter_map(|row| {
            let page = image.page(row.page)?;
            let playlist = read_u32(page, row.slot.start + ENTRY_PLAYLIST_OFFSET);
            (playlist != UNRESOLVED_ID && !playlist_ids.contains(&playlist)).then_some((row, playlist))
        })
        .collect()
}

fn check_playlist_structure(image: &DatabaseImage) -> RegionCheck {
    let mut check = RegionCheck::default();
    let nodes = playlist_nodes(image);
    for cycle in parent_cycles(&nodes) {
        check.problems.push(format!("parent cycle through playlists {:?}", cycle));
    }

    // Missing targets are only meaningful when every row could be read.
    let unreadable = unreadable_pages(image);
    if !unreadable.is_empty() {
        return check.with_unassessed(unreadable);
    }
    let ids: HashSet<RowId> = nodes.iter().map(|node| node.id).collect();
    for node in &nodes {
        if node.parent != UNRESOLVED_ID && !ids.contains(&node.parent) {
            check.problems.push(format!(
                "playlist {} has missing parent {}",
                node.id, node.parent
            ));
        }
    }
    for (row, playlist) in orphaned_entries(image, &ids) {
        check.problems.push(format!(
            "entry at page {} slot {} belongs to missing playlist {}",
            row.page, row.slot.slot, playlist
        ));
    }
    check
}

/// A foreign key value that names no row of its target table.
#[derive(Debug, Clone)]
pub struct DanglingReference {
    pub table: TableType,
    pub row: RowRef,
    pub field: &'static str,
    pub key_index: usize,
    pub value: RowId,
}

/// Unresolved foreign keys outside the playlist tree, which the playlist
/// structure checks own.
pub fn dangling_references(image: &DatabaseImage) -> Vec<DanglingReference> {
    let mut id_sets: HashMap<TableType, HashSet<RowId>> = HashMap::new();
    let mut dangling = Vec::new();
    for table in [TableType::Tracks, TableType::Albums, TableType::PlaylistEntries] {
        let Some(layout) = RowLayout::for_table(table) else {
            continue;
        };
        for row in image.table_rows(table) {
            let Some(page) = image.page(row.page) else {
                continue;
            };
            for (key_index, key) in layout.foreign_keys.iter().enumerate() {
                if key.target == TableType::PlaylistTree {
                    continue;
                }
                let value = key.column.read(page, row.slot.start);
                if value == UNRESOLVED_ID {
                    continue;
                }
                let targets = id_sets
                    .entry(key.target)
                    .or_insert_with(|| image.id_set(key.target));
                if !targets.contains(&value) {
                    dangling.push(DanglingReference {
                        table,
                        row,
                        field: key.field,
                        key_index,
                        value,
                    });
                }
            }
        }
    }
    dangling
}

fn check_relationships(image: &DatabaseImage) -> RegionCheck {
    let unreadable = unreadable_pages(image);
    if !unreadable.is_empty() {
        return RegionCheck::default().with_unassessed(unreadable);
    }
    RegionCheck {
        problems: dangling_references(image)
            .into_iter()
            .map(|dangling| {
                format!(
                    "{} row at page {} slot {}: {} {} resolves to nothing",
                    dangling.table.name(),
                    dangling.row.page,
                    dangling.row.slot.slot,
                    dangling.field,
                    dangling.value
                )
            })
            .collect(),
        unassessed: Vec::new(),
    }
}

fn check_version(image: &DatabaseImage) -> RegionCheck {
    RegionCheck {
        problems: image.header().version_problems(image.max_page_sequence()),
        unassessed: Vec::new(),
    }
}
