use std::collections::HashSet;

use crate::{
    recovery::{RepairAttempt, scan::presence_consistent},
    storage::image::DatabaseImage,
    types::{
        PageIndex, ROWS_PER_GROUP, max_row_slots, row_groups_for,
        page::{self, PAGE_FLAGS_CANDIDATE, PAGE_FLAGS_DATA, PageHeader, is_known_page_flags},
        table::{TableDescriptor, TableType},
    },
};

pub(super) fn repair_page_headers(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut copied = Vec::new();
    let mut rebuilt = Vec::new();

    for index in image.broken_pages() {
        if let Some(reference) = reference {
            if reference.page_header_valid(index) {
                if let Some(theirs) = reference.page_header(index) {
                    let saved = image.page_header(index);
                    let written = image.write_page_header(index, &theirs);
                    if image.page_header_valid(index) {
                        from_reference += written;
                        copied.push(index);
                        continue;
                    }
                    // The reference header does not describe this page's contents.
                    if let Some(saved) = saved {
                        image.write_page_header(index, &saved);
                    }
                }
            }
        }
        let header = rebuild_page_header(image, index);
        from_heuristic += image.write_page_header(index, &header);
        rebuilt.push(index);
    }

    // Successors are chosen once every rebuilt page carries its table type again.
    let page_count = image.page_count();
    let descriptors = image.descriptors(image.directory_len());
    for &index in &rebuilt {
        let Some(mut header) = image.page_header(index) else {
            continue;
        };
        if (header.next_page as usize) < page_count {
            continue;
        }
        header.next_page = infer_next_page(image, index, &header, &descriptors);
        from_heuristic += image.write_page_header(index, &header);
    }

    let mut parts = Vec::new();
    if !copied.is_empty() {
        parts.push(format!("headers of pages {:?} copied from reference", copied));
    }
    if !rebuilt.is_empty() {
        parts.push(format!("headers of pages {:?} rebuilt from chains and row index", rebuilt));
    }
    RepairAttempt::mixed(from_reference, from_heuristic, parts.join("; "))
}

fn rebuild_page_header(image: &DatabaseImage, index: PageIndex) -> PageHeader {
    let page_size = image.page_size();
    let descriptors = image.descriptors(image.directory_len());
    let Some(mut header) = image.page_header(index) else {
        return PageHeader::new(index, TableType::Tracks, PAGE_FLAGS_DATA);
    };

    header.zero = 0;
    header.page_index = index;

    if header.kind().is_none() {
        if let Some(table_type) = infer_table_type(image, index, &descriptors) {
            header.table_type = table_type;
        }
    }

    let is_candidate_slot = descriptors
        .iter()
        .any(|descriptor| descriptor.empty_candidate == index);
    if !is_known_page_flags(header.page_flags) {
        header.page_flags = if is_candidate_slot {
            PAGE_FLAGS_CANDIDATE
        } else {
            PAGE_FLAGS_DATA
        };
    }

    if !header.accounting_consistent(page_size) || header.num_rows > header.num_row_offsets {
        if let Some(page) = image.page(index) {
            rederive_row_counts(page, &mut header);
        }
    }
    header
}

/// Pages other than `index` whose position and table type can be trusted,
/// even if some other header field is still broken.
fn typed_pages(image: &DatabaseImage, index: PageIndex) -> Vec<(PageIndex, PageHeader)> {
    (1..image.page_count() as PageIndex)
        .filter(|other| *other != index)
        .filter_map(|other| image.page_header(other).map(|header| (other, header)))
        .filter(|(other, header)| header.page_index == *other && header.kind().is_some())
        .collect()
}

fn infer_table_type(image: &DatabaseImage, index: PageIndex, descriptors: &[TableDescriptor]) -> Option<u32> {
    let typed = typed_pages(image, index);
    // A page some other page links to belongs to the same table.
    if let Some((_, predecessor)) = typed.iter().find(|(_, header)| header.next_page == index) {
        return Some(predecessor.table_type);
    }
    if let Some(descriptor) = descriptors.iter().find(|descriptor| {
        descriptor.kind().is_some()
            && (descriptor.first_page == index
                || descriptor.last_page == index
                || descriptor.empty_candidate == index)
    }) {
        return Some(descriptor.table_type);
    }
    // Tables are laid out contiguously, so the nearest page before is a good guess.
    typed
        .iter()
        .rev()
        .find(|(other, _)| *other < index)
        .map(|(_, header)| header.table_type)
}

/// Chains follow page position: the successor is the nearest later data page
/// of the same table that nothing else links to yet, and the last data page
/// links to the table's empty candidate.
fn infer_next_page(
    image: &DatabaseImage,
    index: PageIndex,
    header: &PageHeader,
    descriptors: &[TableDescriptor],
) -> PageIndex {
    if !header.is_data_page() {
        return 0;
    }
    let page_count = image.page_count() as PageIndex;
    let same_table = |other: PageIndex, data: bool| {
        image.page_header(other).is_some_and(|candidate| {
            candidate.page_index == other
                && candidate.table_type == header.table_type
                && candidate.is_data_page() == data
        })
    };

    if let Some(descriptor) = descriptors
        .iter()
        .find(|descriptor| descriptor.table_type == header.table_type && descriptor.last_page == index)
    {
        if same_table(descriptor.empty_candidate, false) {
            return descriptor.empty_candidate;
        }
    }

    let linked: HashSet<PageIndex> = (1..page_count)
        .filter(|other| *other != index)
        .filter_map(|other| image.page_header(other))
        .map(|other| other.next_page)
        .filter(|next| *next < page_count)
        .collect();
    let heads: HashSet<PageIndex> = descriptors
        .iter()
        .filter(|descriptor| descriptor.table_type == header.table_type)
        .map(|descriptor| descriptor.first_page)
        .collect();
    let followers: Vec<PageIndex> = (index + 1..page_count)
        .filter(|other| !heads.contains(other) && same_table(*other, true))
        .collect();
    followers
        .iter()
        .find(|other| !linked.contains(other))
        .or(followers.first())
        .copied()
        .or_else(|| (index + 1..page_count).find(|other| same_table(*other, false)))
        .unwrap_or(0)
}

/// Recover row counters from the row index. Slot count comes from walking
/// ascending heap offsets inside the group count implied by free-space
/// accounting; the present count is the bitmap population.
fn rederive_row_counts(page: &[u8], header: &mut PageHeader) {
    let Some(groups) = header.groups_from_accounting(page.len()) else {
        return;
    };
    let capacity = groups * ROWS_PER_GROUP;

    let mut walked = 0;
    let mut previous: Option<u16> = None;
    for slot in 0..capacity {
        let offset = page::read_slot_offset(page, slot);
        let in_order = match previous {
            None => offset == 0,
            Some(prev) => offset > prev,
        };
        if offset >= header.used_size || !in_order {
            break;
        }
        walked += 1;
        previous = Some(offset);
    }

    if row_groups_for(walked) != groups {
        // Fall back to the last slot that carries anything at all.
        walked = (0..capacity)
            .rev()
            .find(|slot| page::read_slot_offset(page, *slot) != 0 || page::is_slot_present(page, *slot))
            .map_or(0, |slot| slot + 1)
            .max(capacity.saturating_sub(ROWS_PER_GROUP - 1));
    }

    let present = (0..walked).filter(|slot| page::is_slot_present(page, *slot)).count();
    header.num_row_offsets = walked as u16;
    header.num_rows = present as u16;
}

/// Presence flags for `num_rows` of the page's slots. Slots whose offset lies
/// inside the heap go first; the rest are filled in slot order, so a damaged
/// offset does not cost its row the flag.
fn heuristic_presence(page: &[u8], header: &PageHeader) -> Vec<u16> {
    let slots = slot_capacity(page.len(), header);
    let mut remaining = (header.num_rows as usize).min(slots);
    let mut words = vec![0u16; header.row_groups()];

    let in_heap = (0..slots).filter(|slot| page::read_slot_offset(page, *slot) < header.used_size);
    let elsewhere = (0..slots).filter(|slot| page::read_slot_offset(page, *slot) >= header.used_size);
    for slot in in_heap.chain(elsewhere) {
        if remaining == 0 {
            break;
        }
        words[slot / ROWS_PER_GROUP] |= 1 << (slot % ROWS_PER_GROUP);
        remaining -= 1;
    }
    words
}

/// Slots a rebuilt bitmap may flag: the row index length, capped by what the
/// free-space accounting leaves room for.
fn slot_capacity(page_size: usize, header: &PageHeader) -> usize {
    let offsets = header.num_row_offsets as usize;
    if offsets == 0 {
        return 0;
    }
    let average_row = header.used_size as usize / offsets;
    offsets.min(max_row_slots(page_size, average_row))
}

fn write_presence_words(image: &mut DatabaseImage, index: PageIndex, words: &[u16]) -> usize {
    let page_size = image.page_size();
    words
        .iter()
        .enumerate()
        .map(|(group, word)| {
            image.write_page_bytes(index, page::presence_position(page_size, group), &word.to_le_bytes())
        })
        .sum()
}

pub(super) fn repair_presence_bitmap(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut copied = Vec::new();
    let mut derived = Vec::new();

    for (index, header) in image.intact_pages() {
        if !header.is_data_page() {
            continue;
        }
        let Some(page) = image.page(index) else {
            continue;
        };
        if presence_consistent(page, &header) {
            continue;
        }

        let reference_words = reference.and_then(|reference| {
            let theirs = reference.page_header(index)?;
            let matches = reference.page_header_valid(index)
                && theirs.num_row_offsets == header.num_row_offsets
                && theirs.num_rows == header.num_rows;
            let their_page = reference.page(index)?;
            matches.then(|| {
                (0..header.row_groups())
                    .map(|group| page::read_presence(their_page, group))
                    .collect::<Vec<u16>>()
            })
        });

        match reference_words {
            Some(words) => {
                from_reference += write_presence_words(image, index, &words);
                copied.push(index);
            }
            None => {
                let words = heuristic_presence(page, &header);
                from_heuristic += write_presence_words(image, index, &words);
                derived.push(index);
            }
        }
    }

    let mut parts = Vec::new();
    if !copied.is_empty() {
        parts.push(format!("presence flags of pages {:?} copied from reference", copied));
    }
    if !derived.is_empty() {
        parts.push(format!(
            "presence flags of pages {:?} set for num_rows slots, heap offsets first",
            derived
        ));
    }
    RepairAttempt::mixed(from_reference, from_heuristic, parts.join("; "))
}
