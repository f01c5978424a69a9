use crate::{
    recovery::{
        RepairAttempt,
        scan::{broken_field_rows, row_offset_problems},
    },
    storage::image::{DatabaseImage, RowRef},
    types::{
        HEAP_START, PageIndex,
        page::{self, PageHeader},
        row::RowLayout,
        string,
        table::TableType,
    },
};

pub(super) fn repair_row_structure(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut copied = Vec::new();
    let mut chained = Vec::new();

    for (index, header) in image.intact_pages() {
        if !header.is_data_page() || row_offset_problems(image, index, &header).is_empty() {
            continue;
        }

        if let Some(offsets) = reference.and_then(|reference| reference_offsets(reference, index, &header)) {
            from_reference += write_offsets(image, index, &offsets);
            if row_offset_problems(image, index, &header).is_empty() {
                copied.push(index);
                continue;
            }
        }

        let Some(page) = image.page(index) else {
            continue;
        };
        let offsets = chained_offsets(page, &header);
        from_heuristic += write_offsets(image, index, &offsets);
        chained.push(index);
    }

    let mut parts = Vec::new();
    if !copied.is_empty() {
        parts.push(format!("row offsets of pages {:?} copied from reference", copied));
    }
    if !chained.is_empty() {
        parts.push(format!(
            "row offsets of pages {:?} re-chained from preceding row extents",
            chained
        ));
    }
    RepairAttempt::mixed(from_reference, from_heuristic, parts.join("; "))
}

fn reference_offsets(reference: &DatabaseImage, index: PageIndex, header: &PageHeader) -> Option<Vec<u16>> {
    let theirs = reference.page_header(index)?;
    if !reference.page_header_valid(index)
        || theirs.num_row_offsets != header.num_row_offsets
        || theirs.used_size != header.used_size
        || theirs.table_type != header.table_type
    {
        return None;
    }
    let page = reference.page(index)?;
    Some(
        (0..header.num_row_offsets as usize)
            .map(|slot| page::read_slot_offset(page, slot))
            .collect(),
    )
}

fn write_offsets(image: &mut DatabaseImage, index: PageIndex, offsets: &[u16]) -> usize {
    let page_size = image.page_size();
    offsets
        .iter()
        .enumerate()
        .map(|(slot, offset)| {
            image.write_page_bytes(index, page::slot_offset_position(page_size, slot), &offset.to_le_bytes())
        })
        .sum()
}

/// Rows sit back to back in slot order, so every bad offset is the end of
/// the row before it. Offsets that already fit the sequence are kept.
fn chained_offsets(page: &[u8], header: &PageHeader) -> Vec<u16> {
    let used = header.used_size;
    let heap_end = HEAP_START + used as usize;
    let layout = header.kind().and_then(RowLayout::for_table);
    let mut offsets: Vec<u16> = (0..header.num_row_offsets as usize)
        .map(|slot| page::read_slot_offset(page, slot))
        .collect();

    for slot in 0..offsets.len() {
        let offset = offsets[slot];
        let fits = match slot {
            0 => offset == 0,
            _ => offset < used && offset > offsets[slot - 1],
        };
        if fits {
            continue;
        }
        if slot == 0 {
            offsets[0] = 0;
            continue;
        }

        let previous_start = HEAP_START + offsets[slot - 1] as usize;
        let measured = layout.and_then(|layout| layout.row_end(page, previous_start, heap_end).ok());
        // Without a layout, the next in-order offset still bounds the row.
        let fallback = offsets[slot + 1..]
            .iter()
            .copied()
            .find(|later| *later > offsets[slot - 1] && *later < used)
            .map(|later| HEAP_START + later as usize);
        if let Some(end) = measured.or(fallback) {
            if end < heap_end {
                offsets[slot] = (end - HEAP_START) as u16;
            }
        }
    }
    offsets
}

pub(super) fn repair_field_data(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut copied = 0;
    let mut rederived = 0;

    for table in TableType::all() {
        let Some(layout) = RowLayout::for_table(table) else {
            continue;
        };
        for (row, _) in broken_field_rows(image, table) {
            if let Some(bytes) = reference.and_then(|reference| reference_row(reference, &row)) {
                let written = image.write_page_bytes(row.page, row.slot.start, &bytes);
                let fixed = image
                    .page(row.page)
                    .is_some_and(|page| layout.row_end(page, row.slot.start, row.slot.end).is_ok());
                from_reference += written;
                if fixed {
                    copied += 1;
                    continue;
                }
            }
            from_heuristic += rederive_string_lengths(image, layout, &row);
            rederived += 1;
        }
    }

    let mut parts = Vec::new();
    if copied > 0 {
        parts.push(format!("{} row(s) of string data copied from reference", copied));
    }
    if rederived > 0 {
        parts.push(format!(
            "string lengths of {} row(s) re-derived from neighbouring boundaries",
            rederived
        ));
    }
    RepairAttempt::mixed(from_reference, from_heuristic, parts.join("; "))
}

/// The same row's bytes in the reference, when it sits at the same place
/// with the same extent.
fn reference_row(reference: &DatabaseImage, row: &RowRef) -> Option<Vec<u8>> {
    let slots = reference.row_slots(row.page)?;
    if !reference.page_header_valid(row.page) {
        return None;
    }
    let theirs = slots.iter().find(|slot| slot.slot == row.slot.slot)?;
    if theirs.start != row.slot.start || theirs.end != row.slot.end {
        return None;
    }
    let page = reference.page(row.page)?;
    Some(page[theirs.start..theirs.end].to_vec())
}

/// Rewrite every failing length prefix of a row so the string ends where
/// the next string, or the row, begins.
fn rederive_string_lengths(image: &mut DatabaseImage, layout: &RowLayout, row: &RowRef) -> usize {
    let Some(page) = image.page(row.page) else {
        return 0;
    };
    let Ok(mut positions) = layout.string_positions(page, row.slot.start, row.slot.end) else {
        return 0;
    };
    positions.sort_unstable();
    positions.dedup();

    let mut patches: Vec<(usize, Vec<u8>)> = Vec::new();
    for (i, position) in positions.iter().enumerate() {
        let boundary = positions.get(i + 1).copied().unwrap_or(row.slot.end);
        if string::decode(page, *position, boundary).is_ok() {
            continue;
        }
        let Ok((kind, _)) = string::peek_prefix(page, *position) else {
            continue;
        };
        let Some(prefix) = string::prefix_for(kind, boundary - position) else {
            continue;
        };
        patches.push((*position, prefix));
    }

    patches
        .into_iter()
        .map(|(at, prefix)| image.write_page_bytes(row.page, at, &prefix))
        .sum()
}
