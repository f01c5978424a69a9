use std::collections::{HashMap, HashSet};

use crate::{
    recovery::{
        RepairAttempt, RepairSource,
        scan::{
            PlaylistNode, dangling_references, orphaned_entries, parent_cycles, playlist_nodes,
            unreadable_pages,
        },
    },
    storage::image::{DatabaseImage, RowRef},
    types::{
        RowId, UNRESOLVED_ID,
        row::{ENTRY_PLAYLIST_OFFSET, PLAYLIST_PARENT_OFFSET, RowLayout},
        read_u32,
        table::TableType,
    },
};

/// Start of the row at the same page and slot in the reference, if that
/// row sits at the same place.
fn reference_row_start(reference: &DatabaseImage, row: &RowRef) -> Option<usize> {
    if !reference.page_header_valid(row.page) {
        return None;
    }
    let slots = reference.row_slots(row.page)?;
    let theirs = slots.iter().find(|slot| slot.slot == row.slot.slot)?;
    (theirs.start == row.slot.start).then_some(theirs.start)
}

fn reference_field(reference: &DatabaseImage, row: &RowRef, offset: usize) -> Option<u32> {
    let start = reference_row_start(reference, row)?;
    let page = reference.page(row.page)?;
    Some(read_u32(page, start + offset))
}

fn write_field(image: &mut DatabaseImage, row: &RowRef, offset: usize, value: u32) -> usize {
    image.write_page_bytes(row.page, row.slot.start + offset, &value.to_le_bytes())
}

pub(super) fn repair_playlist_structure(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut notes = Vec::new();

    let reference_parents: HashMap<RowId, RowId> = reference
        .map(|reference| {
            playlist_nodes(reference)
                .into_iter()
                .map(|node| (node.id, node.parent))
                .collect()
        })
        .unwrap_or_default();

    let all_pages_readable = unreadable_pages(image).is_empty();
    let nodes = playlist_nodes(image);
    let ids: HashSet<RowId> = nodes.iter().map(|node| node.id).collect();
    let resolves = |parent: RowId| parent == UNRESOLVED_ID || ids.contains(&parent);

    // Nodes whose parent link is wrong: dangling, or part of a cycle.
    let in_cycles: HashSet<RowId> = parent_cycles(&nodes).into_iter().flatten().collect();
    let suspects: Vec<PlaylistNode> = nodes
        .iter()
        .filter(|node| in_cycles.contains(&node.id) || (all_pages_readable && !resolves(node.parent)))
        .copied()
        .collect();

    let mut restored = 0;
    for node in &suspects {
        match reference_parents.get(&node.id) {
            Some(parent) if *parent != node.parent && resolves(*parent) => {
                from_reference += write_field(image, &node.row, PLAYLIST_PARENT_OFFSET, *parent);
                restored += 1;
            }
            _ => {}
        }
    }
    if restored > 0 {
        notes.push(format!("{} parent link(s) copied from reference", restored));
    }

    // Whatever is still dangling goes to the root.
    let mut reparented = Vec::new();
    if all_pages_readable {
        for node in playlist_nodes(image) {
            if !resolves(node.parent) {
                from_heuristic += write_field(image, &node.row, PLAYLIST_PARENT_OFFSET, UNRESOLVED_ID);
                reparented.push(node.id);
            }
        }
    }

    // Break each remaining cycle at its lowest id.
    let nodes = playlist_nodes(image);
    for cycle in parent_cycles(&nodes) {
        let Some(breaker) = cycle.first().copied() else {
            continue;
        };
        for node in nodes.iter().filter(|node| node.id == breaker) {
            from_heuristic += write_field(image, &node.row, PLAYLIST_PARENT_OFFSET, UNRESOLVED_ID);
        }
        reparented.push(breaker);
    }
    if !reparented.is_empty() {
        notes.push(format!("playlists {:?} re-parented to root", reparented));
    }

    if all_pages_readable {
        let mut recovered_entries = 0;
        let mut unresolved_entries = 0;
        for (row, _) in orphaned_entries(image, &ids) {
            let theirs = reference
                .and_then(|reference| reference_field(reference, &row, ENTRY_PLAYLIST_OFFSET))
                .filter(|playlist| *playlist != UNRESOLVED_ID && ids.contains(playlist));
            match theirs {
                Some(playlist) => {
                    from_reference += write_field(image, &row, ENTRY_PLAYLIST_OFFSET, playlist);
                    recovered_entries += 1;
                }
                None => {
                    from_heuristic += write_field(image, &row, ENTRY_PLAYLIST_OFFSET, UNRESOLVED_ID);
                    unresolved_entries += 1;
                }
            }
        }
        if recovered_entries > 0 {
            notes.push(format!("{} entry playlist id(s) copied from reference", recovered_entries));
        }
        if unresolved_entries > 0 {
            notes.push(format!("{} entry playlist id(s) marked unresolved", unresolved_entries));
        }
    } else {
        notes.push("missing parents left alone while some pages cannot be read".to_string());
    }

    if notes.is_empty() {
        return RepairAttempt::new(RepairSource::Heuristic, "nothing could be changed");
    }
    RepairAttempt::mixed(from_reference, from_heuristic, notes.join("; "))
}

pub(super) fn repair_relationships(
    image: &mut DatabaseImage,
    reference: Option<&DatabaseImage>,
) -> RepairAttempt {
    if !unreadable_pages(image).is_empty() {
        return RepairAttempt::new(
            RepairSource::Heuristic,
            "references left alone while some pages cannot be read",
        );
    }

    let mut from_reference = 0;
    let mut from_heuristic = 0;
    let mut restored = 0;
    let mut unresolved = 0;
    let mut id_sets: HashMap<TableType, HashSet<RowId>> = HashMap::new();

    for dangling in dangling_references(image) {
        let Some(key) = RowLayout::for_table(dangling.table)
            .and_then(|layout| layout.foreign_keys.get(dangling.key_index))
        else {
            continue;
        };
        let targets = id_sets
            .entry(key.target)
            .or_insert_with(|| image.id_set(key.target));

        let theirs = reference.and_then(|reference| {
            let start = reference_row_start(reference, &dangling.row)?;
            let page = reference.page(dangling.row.page)?;
            Some(key.column.read(page, start))
        });

        let at = dangling.row.slot.start + key.column.offset;
        match theirs {
            Some(value) if value == UNRESOLVED_ID || targets.contains(&value) => {
                from_reference += image.write_page_bytes(dangling.row.page, at, &key.column.encode(value));
                restored += 1;
            }
            _ => {
                from_heuristic +=
                    image.write_page_bytes(dangling.row.page, at, &key.column.encode(UNRESOLVED_ID));
                unresolved += 1;
            }
        }
    }

    let mut notes = Vec::new();
    if restored > 0 {
        notes.push(format!("{} reference(s) copied from reference", restored));
    }
    if unresolved > 0 {
        notes.push(format!(
            "{} reference(s) set to unresolved id {}",
            unresolved, UNRESOLVED_ID
        ));
    }
    RepairAttempt::mixed(from_reference, from_heuristic, notes.join("; "))
}
