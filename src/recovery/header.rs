use std::collections::BTreeSet;

use crate::{
    recovery::{RepairAttempt, RepairSource},
    storage::{EXPECTED_SIGNATURE, header::FileHeader, image::DatabaseImage},
    types::MAX_PLAUSIBLE_SEQUENCE,
};

pub(super) fn repair_magic(image: &mut DatabaseImage, reference: Option<&DatabaseImage>) -> RepairAttempt {
    let mut header = image.header();
    let source = match reference {
        Some(reference) if reference.header().signature_ok() => {
            header.signature = reference.header().signature;
            RepairSource::Reference
        }
        _ => {
            header.signature = EXPECTED_SIGNATURE;
            RepairSource::Heuristic
        }
    };
    let bytes = image.write_header(&header);
    RepairAttempt::new(source, format!("signature reset to {:#x}", header.signature)).with_bytes(bytes)
}

/// Metadata words inferred from the file itself.
fn inferred_metadata(image: &DatabaseImage) -> FileHeader {
    let mut header = image.header();
    let page_size = image.page_size();
    header.page_size = page_size as u32;
    header.next_unused_page = image.page_count() as u32;
    header.gap = 0;

    let max = FileHeader::max_table_count(page_size);
    let populated = image.populated_descriptors() as u32;
    header.table_count = if (1..=max).contains(&populated) {
        populated
    } else {
        let declared: BTreeSet<u32> = image
            .intact_pages()
            .iter()
            .map(|(_, page)| page.table_type)
            .collect();
        (declared.len() as u32).clamp(1, max)
    };
    header
}

pub(super) fn repair_metadata(image: &mut DatabaseImage, reference: Option<&DatabaseImage>) -> RepairAttempt {
    let current = image.header();

    if let Some(reference) = reference {
        let theirs = reference.header();
        let candidate = FileHeader {
            page_size: theirs.page_size,
            table_count: theirs.table_count,
            next_unused_page: theirs.next_unused_page,
            gap: theirs.gap,
            ..current.clone()
        };
        if candidate.metadata_problems(image.len()).is_empty()
            && candidate.page_size as usize == image.page_size()
        {
            let bytes = image.write_header(&candidate);
            return RepairAttempt::new(RepairSource::Reference, "metadata copied from reference")
                .with_bytes(bytes);
        }
    }

    let inferred = inferred_metadata(image);
    let bytes = image.write_header(&inferred);
    let action = if reference.is_some() {
        "reference metadata does not fit this file; metadata inferred from page layout"
    } else {
        "metadata inferred from page layout"
    };
    RepairAttempt::new(RepairSource::Heuristic, format!(
        "{} (page size {}, {} tables, {} pages)",
        action, inferred.page_size, inferred.table_count, inferred.next_unused_page
    ))
    .with_bytes(bytes)
}

pub(super) fn repair_version(image: &mut DatabaseImage, reference: Option<&DatabaseImage>) -> RepairAttempt {
    let mut header = image.header();
    let max_stamp = image.max_page_sequence();

    if let Some(reference) = reference {
        let theirs = reference.header();
        let candidate = FileHeader {
            format_word: theirs.format_word,
            sequence: theirs.sequence,
            ..header.clone()
        };
        if candidate.version_problems(max_stamp).is_empty() {
            let bytes = image.write_header(&candidate);
            return RepairAttempt::new(RepairSource::Reference, "version words copied from reference")
                .with_bytes(bytes);
        }
    }

    let mut notes = Vec::new();
    let sequence_plausible = header.sequence != 0 && header.sequence <= MAX_PLAUSIBLE_SEQUENCE;
    match max_stamp {
        Some(stamp) if !sequence_plausible || header.sequence < stamp => {
            header.sequence = stamp.max(1);
            notes.push(format!("sequence set to newest page stamp {}", header.sequence));
        }
        None if !sequence_plausible => {
            header.sequence = 1;
            notes.push("sequence reset to 1, no intact page stamps".to_string());
        }
        _ => {}
    }
    if !header.version_problems(max_stamp).is_empty() {
        notes.push(format!(
            "format word {:#x} cannot be inferred without a reference",
            header.format_word
        ));
    }
    let bytes = image.write_header(&header);
    RepairAttempt::new(RepairSource::Heuristic, notes.join("; ")).with_bytes(bytes)
}
