use std::collections::{BTreeMap, HashSet};

use crate::{
    recovery::{RepairAttempt, RepairSource, scan::check_region},
    storage::image::DatabaseImage,
    types::{PageIndex, page::PageHeader, scenario::Scenario, table::TableDescriptor},
};

pub(super) fn repair_table_index(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let count = image.directory_len();

    if let Some(reference) = reference {
        let theirs = reference.descriptors(reference.directory_len());
        if reference.page_count() == image.page_count() && theirs.len() <= image.descriptor_capacity() {
            let saved: Vec<TableDescriptor> = image.descriptors(count.max(theirs.len()));
            let written = write_directory(image, &theirs, saved.len());
            if check_region(image, Scenario::TableIndex).passes() {
                return RepairAttempt::new(
                    RepairSource::Reference,
                    format!("{} descriptors copied from reference", theirs.len()),
                )
                .with_bytes(written);
            }
            write_directory(image, &saved, saved.len());
        }
    }

    let rebuilt = rebuild_descriptors(image);
    let written = write_directory(image, &rebuilt, count);
    RepairAttempt::new(
        RepairSource::Heuristic,
        format!(
            "{} descriptors rebuilt from page headers and next_page chains",
            rebuilt.len()
        ),
    )
    .with_bytes(written)
}

/// Write `descriptors` at the start of the directory and clear any entries
/// after them up to `previous_len`.
fn write_directory(image: &mut DatabaseImage, descriptors: &[TableDescriptor], previous_len: usize) -> usize {
    let mut written = 0;
    for (index, descriptor) in descriptors.iter().enumerate() {
        written += image.write_descriptor(index, descriptor);
    }
    let empty = TableDescriptor {
        table_type: 0,
        empty_candidate: 0,
        first_page: 0,
        last_page: 0,
    };
    for index in descriptors.len()..previous_len.min(image.descriptor_capacity()) {
        written += image.write_descriptor(index, &empty);
    }
    written
}

/// One descriptor per table type found in intact page headers, in tag
/// order.
fn rebuild_descriptors(image: &DatabaseImage) -> Vec<TableDescriptor> {
    let mut by_type: BTreeMap<u32, Vec<(PageIndex, PageHeader)>> = BTreeMap::new();
    for (index, header) in image.intact_pages() {
        by_type.entry(header.table_type).or_default().push((index, header));
    }

    by_type
        .into_iter()
        .filter_map(|(table_type, pages)| stitch_chain(table_type, &pages))
        .collect()
}

fn stitch_chain(table_type: u32, pages: &[(PageIndex, PageHeader)]) -> Option<TableDescriptor> {
    let data: Vec<&(PageIndex, PageHeader)> = pages.iter().filter(|(_, header)| header.is_data_page()).collect();
    let candidates: Vec<PageIndex> = pages
        .iter()
        .filter(|(_, header)| !header.is_data_page())
        .map(|(index, _)| *index)
        .collect();
    if data.is_empty() {
        return None;
    }

    let data_pages: HashSet<PageIndex> = data.iter().map(|(index, _)| *index).collect();
    let linked_to: HashSet<PageIndex> = data.iter().map(|(_, header)| header.next_page).collect();

    // Head of the chain: a data page nothing links to, else the lowest one.
    let first_page = data
        .iter()
        .map(|(index, _)| *index)
        .find(|index| !linked_to.contains(index))
        .unwrap_or(data[0].0);

    let mut last_page = first_page;
    let mut visited = HashSet::new();
    let mut current = first_page;
    while visited.insert(current) {
        last_page = current;
        let Some((_, header)) = data.iter().find(|(index, _)| *index == current) else {
            break;
        };
        if !data_pages.contains(&header.next_page) {
            break;
        }
        current = header.next_page;
    }

    // Chain broken somewhere: fall back to position order.
    if visited.len() != data.len() {
        last_page = data.iter().map(|(index, _)| *index).max().unwrap_or(first_page);
    }

    let tail_next = data
        .iter()
        .find(|(index, _)| *index == last_page)
        .map(|(_, header)| header.next_page);
    let empty_candidate = match tail_next {
        Some(next) if candidates.contains(&next) => next,
        _ => candidates
            .iter()
            .copied()
            .find(|candidate| *candidate > last_page)
            .or_else(|| candidates.first().copied())
            .unwrap_or(0),
    };

    Some(TableDescriptor {
        table_type,
        empty_candidate,
        first_page,
        last_page,
    })
}
