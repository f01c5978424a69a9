use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    recovery::scan::{RegionCheck, RegionFinding, check_region, scan_image},
    storage::image::DatabaseImage,
    types::{
        error::{DatabaseError, Result},
        scenario::Scenario,
    },
    utils::paths::same_file,
};

mod header;
mod pages;
mod relations;
mod rows;
pub mod scan;
mod table_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Loaded,
    Scanned,
    Repairing,
    Finalized,
}

/// Where the bytes written by a repair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairSource {
    Reference,
    Heuristic,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Intact,
    Repaired,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub scenario: Scenario,
    pub region: String,
    pub action: String,
    pub source: RepairSource,
    pub outcome: RepairOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Distinct routines invoked on this engine.
    pub attempted: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub bytes_rewritten: usize,
    pub reference_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub corrupt_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub findings: Vec<RegionFinding>,
    pub log: Vec<LogEntry>,
    pub stats: RecoveryStats,
}

/// What a repair routine did to the working image.
#[derive(Debug, Clone)]
pub(crate) struct RepairAttempt {
    pub action: String,
    pub source: RepairSource,
    pub bytes_rewritten: usize,
}

impl RepairAttempt {
    pub fn new(source: RepairSource, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            source,
            bytes_rewritten: 0,
        }
    }

    /// Reference when any reference bytes went in, heuristic otherwise.
    pub fn mixed(from_reference: usize, from_heuristic: usize, action: impl Into<String>) -> Self {
        let source = if from_reference > 0 {
            RepairSource::Reference
        } else {
            RepairSource::Heuristic
        };
        Self {
            action: action.into(),
            source,
            bytes_rewritten: from_reference + from_heuristic,
        }
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes_rewritten = bytes;
        self
    }
}

type RepairFn = fn(&mut DatabaseImage, Option<&DatabaseImage>) -> RepairAttempt;

/// Diagnoses and repairs one damaged export database.
///
/// The engine owns a working copy of the damaged file. Every repair routine
/// edits that copy and writes it to the output path; the damaged file and
/// the optional reference are never modified.
pub struct RecoveryEngine {
    corrupt_path: PathBuf,
    output_path: Option<PathBuf>,
    image: DatabaseImage,
    reference: Option<DatabaseImage>,
    /// Why the reference cannot be used at all, if it cannot.
    reference_issue: Option<String>,
    state: EngineState,
    log: Vec<LogEntry>,
    outcomes: BTreeMap<Scenario, RepairOutcome>,
    bytes_rewritten: usize,
}

impl RecoveryEngine {
    pub fn open(
        corrupt: impl AsRef<Path>,
        output: impl AsRef<Path>,
        reference: Option<&Path>,
    ) -> Result<Self> {
        let corrupt = corrupt.as_ref();
        let output = output.as_ref();
        if same_file(corrupt, output) {
            return Err(DatabaseError::PathConflict {
                first: corrupt.to_path_buf(),
                second: output.to_path_buf(),
            });
        }
        if let Some(reference) = reference {
            if same_file(reference, output) {
                return Err(DatabaseError::PathConflict {
                    first: reference.to_path_buf(),
                    second: output.to_path_buf(),
                });
            }
        }
        Self::load(corrupt, Some(output.to_path_buf()), reference)
    }

    /// Open for diagnosis only. Repair routines fail when there is nowhere
    /// to write the result.
    pub fn inspect(corrupt: impl AsRef<Path>, reference: Option<&Path>) -> Result<Self> {
        Self::load(corrupt.as_ref(), None, reference)
    }

    fn load(corrupt: &Path, output: Option<PathBuf>, reference: Option<&Path>) -> Result<Self> {
        let mut reference_issue = None;
        let reference = match reference {
            Some(path) => match DatabaseImage::load(path) {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "reference unusable, recovering heuristically");
                    reference_issue = Some(format!("reference could not be loaded: {}", err));
                    None
                }
            },
            None => None,
        };

        let image = DatabaseImage::load_with_hint(
            corrupt,
            reference.as_ref().map(DatabaseImage::page_size),
        )?;

        if let Some(reference) = &reference {
            if reference.page_size() != image.page_size() {
                warn!(
                    reference = reference.page_size(),
                    target = image.page_size(),
                    "reference page size differs, recovering heuristically"
                );
                reference_issue = Some(format!(
                    "reference page size {} differs from {}",
                    reference.page_size(),
                    image.page_size()
                ));
            }
        }

        info!(
            path = %corrupt.display(),
            page_size = image.page_size(),
            pages = image.page_count(),
            reference = reference.is_some(),
            "recovery engine loaded"
        );

        Ok(Self {
            corrupt_path: corrupt.to_path_buf(),
            output_path: output,
            image,
            reference,
            reference_issue,
            state: EngineState::Loaded,
            log: Vec::new(),
            outcomes: BTreeMap::new(),
            bytes_rewritten: 0,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn image(&self) -> &DatabaseImage {
        &self.image
    }

    fn has_usable_reference(&self) -> bool {
        self.reference.is_some() && self.reference_issue.is_none()
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "engine state");
            self.state = next;
        }
    }

    /// One finding per region, in scenario order. Does not modify anything.
    pub fn scan_database(&mut self) -> Vec<RegionFinding> {
        let findings = scan_image(&self.image, self.has_usable_reference());
        let damaged = findings
            .iter()
            .filter(|finding| finding.verdict != scan::Verdict::Intact)
            .count();
        info!(damaged, "scan complete");
        if self.state == EngineState::Loaded {
            self.transition(EngineState::Scanned);
        }
        findings
    }

    pub fn recover_magic_header(&mut self) -> Result<bool> {
        self.run_routine(Scenario::MagicHeader, header::repair_magic)
    }

    pub fn recover_metadata_header(&mut self) -> Result<bool> {
        self.run_routine(Scenario::MetadataHeader, header::repair_metadata)
    }

    pub fn recover_page_headers(&mut self) -> Result<bool> {
        self.run_routine(Scenario::PageHeaders, pages::repair_page_headers)
    }

    pub fn recover_row_presence_bitmap(&mut self) -> Result<bool> {
        self.run_routine(Scenario::RowPresenceBitmap, pages::repair_presence_bitmap)
    }

    pub fn recover_table_index(&mut self) -> Result<bool> {
        self.run_routine(Scenario::TableIndex, table_index::repair_table_index)
    }

    pub fn recover_row_structure(&mut self) -> Result<bool> {
        self.run_routine(Scenario::RowStructure, rows::repair_row_structure)
    }

    pub fn recover_field_data(&mut self) -> Result<bool> {
        self.run_routine(Scenario::FieldData, rows::repair_field_data)
    }

    pub fn recover_playlist_structure(&mut self) -> Result<bool> {
        self.run_routine(Scenario::PlaylistStructure, relations::repair_playlist_structure)
    }

    pub fn recover_cross_table_relationships(&mut self) -> Result<bool> {
        self.run_routine(
            Scenario::CrossTableRelationships,
            relations::repair_relationships,
        )
    }

    pub fn recover_version_info(&mut self) -> Result<bool> {
        self.run_routine(Scenario::VersionInfo, header::repair_version)
    }

    /// Run the routine for a single scenario.
    pub fn recover(&mut self, scenario: Scenario) -> Result<bool> {
        match scenario {
            Scenario::MagicHeader => self.recover_magic_header(),
            Scenario::MetadataHeader => self.recover_metadata_header(),
            Scenario::PageHeaders => self.recover_page_headers(),
            Scenario::RowPresenceBitmap => self.recover_row_presence_bitmap(),
            Scenario::TableIndex => self.recover_table_index(),
            Scenario::RowStructure => self.recover_row_structure(),
            Scenario::FieldData => self.recover_field_data(),
            Scenario::PlaylistStructure => self.recover_playlist_structure(),
            Scenario::CrossTableRelationships => self.recover_cross_table_relationships(),
            Scenario::VersionInfo => self.recover_version_info(),
        }
    }

    /// Every routine in scenario order. A failing routine never stops the
    /// ones after it; the result is true only if all of them succeed.
    pub fn recover_all(&mut self) -> Result<bool> {
        let mut all_ok = true;
        for scenario in Scenario::ALL {
            let ok = self.repair_region(scenario, routine_for(scenario));
            all_ok &= ok;
        }
        self.flush()?;
        info!(success = all_ok, "recover_all finished");
        Ok(all_ok)
    }

    pub fn recovery_log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn stats(&self) -> RecoveryStats {
        let mut stats = RecoveryStats {
            attempted: self.outcomes.len(),
            bytes_rewritten: self.bytes_rewritten,
            reference_used: self
                .log
                .iter()
                .any(|entry| entry.source == RepairSource::Reference),
            ..RecoveryStats::default()
        };
        for outcome in self.outcomes.values() {
            match outcome {
                RepairOutcome::Intact | RepairOutcome::Repaired => stats.succeeded += 1,
                RepairOutcome::Partial => stats.partial += 1,
                RepairOutcome::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn report(&self) -> RecoveryReport {
        RecoveryReport {
            corrupt_path: self.corrupt_path.clone(),
            output_path: self.output_path.clone(),
            findings: scan_image(&self.image, self.has_usable_reference()),
            log: self.log.clone(),
            stats: self.stats(),
        }
    }

    fn run_routine(&mut self, scenario: Scenario, repair: RepairFn) -> Result<bool> {
        let ok = self.repair_region(scenario, repair);
        self.flush()?;
        Ok(ok)
    }

    fn flush(&mut self) -> Result<()> {
        let Some(output) = &self.output_path else {
            return Err(DatabaseError::InvalidRequest {
                details: "engine was opened for inspection only".to_string(),
            });
        };
        self.image.save(output)?;
        self.transition(EngineState::Finalized);
        Ok(())
    }

    fn repair_region(&mut self, scenario: Scenario, repair: RepairFn) -> bool {
        self.transition(EngineState::Repairing);
        let before = check_region(&self.image, scenario);
        if before.passes() {
            self.record(
                scenario,
                "no damage detected".to_string(),
                RepairSource::None,
                RepairOutcome::Intact,
            );
            return true;
        }

        let (reference, downgrade) = usable_reference(
            self.reference.as_ref(),
            self.reference_issue.as_deref(),
            scenario,
        );
        if let Some(reason) = &downgrade {
            warn!(region = scenario.region(), reason = %reason, "reference downgraded to heuristic");
        }
        let attempt = repair(&mut self.image, reference);
        let after = check_region(&self.image, scenario);
        let outcome = classify(&before, &after, attempt.bytes_rewritten);

        let mut action = attempt.action;
        if let Some(reason) = downgrade {
            action = format!("{}; {}", reason, action);
        }
        if !after.passes() {
            action = format!("{}; remaining: {}", action, summarize(&after));
        }
        self.bytes_rewritten += attempt.bytes_rewritten;
        self.record(scenario, action, attempt.source, outcome);
        after.passes()
    }

    fn record(
        &mut self,
        scenario: Scenario,
        action: String,
        source: RepairSource,
        outcome: RepairOutcome,
    ) {
        debug!(region = scenario.region(), ?source, ?outcome, action = %action, "repair logged");
        self.outcomes.insert(scenario, outcome);
        self.log.push(LogEntry {
            scenario,
            region: scenario.region().to_string(),
            action,
            source,
            outcome,
            timestamp: Utc::now(),
        });
    }
}

/// The reference image for a region, or the reason it cannot be used.
fn usable_reference<'a>(
    reference: Option<&'a DatabaseImage>,
    issue: Option<&str>,
    scenario: Scenario,
) -> (Option<&'a DatabaseImage>, Option<String>) {
    match (reference, issue) {
        (_, Some(issue)) => (None, Some(issue.to_string())),
        (None, None) => (None, None),
        (Some(reference), None) => {
            if check_region(reference, scenario).passes() {
                (Some(reference), None)
            } else {
                (
                    None,
                    Some(format!(
                        "reference {} region is itself damaged",
                        scenario.region()
                    )),
                )
            }
        }
    }
}

fn routine_for(scenario: Scenario) -> RepairFn {
    match scenario {
        Scenario::MagicHeader => header::repair_magic,
        Scenario::MetadataHeader => header::repair_metadata,
        Scenario::PageHeaders => pages::repair_page_headers,
        Scenario::RowPresenceBitmap => pages::repair_presence_bitmap,
        Scenario::TableIndex => table_index::repair_table_index,
        Scenario::RowStructure => rows::repair_row_structure,
        Scenario::FieldData => rows::repair_field_data,
        Scenario::PlaylistStructure => relations::repair_playlist_structure,
        Scenario::CrossTableRelationships => relations::repair_relationships,
        Scenario::VersionInfo => header::repair_version,
    }
}

fn classify(before: &RegionCheck, after: &RegionCheck, bytes_rewritten: usize) -> RepairOutcome {
    if after.passes() {
        RepairOutcome::Repaired
    } else if bytes_rewritten > 0
        || after.problems.len() < before.problems.len()
        || !after.is_damaged()
    {
        RepairOutcome::Partial
    } else {
        RepairOutcome::Failed
    }
}

fn summarize(check: &RegionCheck) -> String {
    let mut parts = Vec::new();
    if !check.problems.is_empty() {
        parts.push(format!("{} problem(s), first: {}", check.problems.len(), check.problems[0]));
    }
    if !check.unassessed.is_empty() {
        parts.push(format!(
            "pages {:?} skipped behind broken headers",
            check.unassessed
        ));
    }
    parts.join("; ")
}
