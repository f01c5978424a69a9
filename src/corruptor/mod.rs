use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    storage::{FILE_HEADER_SIZE, header::FileHeader, image::DatabaseImage},
    types::{
        error::{DatabaseError, Result},
        scenario::Scenario,
    },
    utils::{hash::checksum, paths::same_file},
};

mod damage;

/// A span of file bytes touched by a corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionReport {
    pub scenario: Scenario,
    pub touched: Vec<ByteRange>,
    pub summary: String,
}

impl CorruptionReport {
    /// True when the scenario found nothing to damage.
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

/// What the written output looks like, read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionInfo {
    pub signature_ok: bool,
    pub page_size: u32,
    pub table_count: u32,
    pub file_size: u64,
    pub source_crc32: u32,
    pub output_crc32: u32,
}

/// Writes damaged copies of a known-good export database.
///
/// The first scenario reads the source; later ones build on the output
/// written so far, so scenarios can be combined in any order. The source
/// file is never written.
pub struct Corruptor {
    source: PathBuf,
    output: PathBuf,
    rng: StdRng,
    page_size_hint: Option<usize>,
    output_written: bool,
}

impl Corruptor {
    pub fn new(source: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let output = output.as_ref();
        if !source.exists() {
            return Err(DatabaseError::FileNotFound {
                path: source.to_path_buf(),
            });
        }
        if same_file(source, output) {
            return Err(DatabaseError::PathConflict {
                first: source.to_path_buf(),
                second: output.to_path_buf(),
            });
        }
        Ok(Self {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            rng: StdRng::from_entropy(),
            page_size_hint: None,
            output_written: false,
        })
    }

    /// Make the chosen targets and damage values reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn working_image(&mut self) -> Result<DatabaseImage> {
        let path = if self.output_written {
            &self.output
        } else {
            &self.source
        };
        let image = DatabaseImage::load_with_hint(path, self.page_size_hint)?;
        self.page_size_hint.get_or_insert(image.page_size());
        Ok(image)
    }

    fn run(
        &mut self,
        scenario: Scenario,
        apply: fn(&mut DatabaseImage, &mut StdRng) -> (Vec<ByteRange>, String),
    ) -> Result<CorruptionReport> {
        let mut image = self.working_image()?;
        let (touched, summary) = apply(&mut image, &mut self.rng);
        image.save(&self.output)?;
        self.output_written = true;

        if touched.is_empty() {
            warn!(scenario = %scenario, reason = %summary, "scenario found no target");
        } else {
            info!(scenario = %scenario, ranges = touched.len(), summary = %summary, "corruption applied");
        }
        Ok(CorruptionReport {
            scenario,
            touched,
            summary,
        })
    }

    pub fn corrupt_magic_header(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::MagicHeader, damage::magic_header)
    }

    pub fn corrupt_metadata_header(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::MetadataHeader, damage::metadata_header)
    }

    pub fn corrupt_page_headers(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::PageHeaders, damage::page_headers)
    }

    pub fn corrupt_row_presence_bitmap(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::RowPresenceBitmap, damage::row_presence_bitmap)
    }

    pub fn corrupt_table_index(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::TableIndex, damage::table_index)
    }

    pub fn corrupt_row_structure(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::RowStructure, damage::row_structure)
    }

    pub fn corrupt_field_data(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::FieldData, damage::field_data)
    }

    pub fn corrupt_playlist_structure(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::PlaylistStructure, damage::playlist_structure)
    }

    pub fn corrupt_cross_table_relationships(&mut self) -> Result<CorruptionReport> {
        self.run(
            Scenario::CrossTableRelationships,
            damage::cross_table_relationships,
        )
    }

    pub fn corrupt_version_info(&mut self) -> Result<CorruptionReport> {
        self.run(Scenario::VersionInfo, damage::version_info)
    }

    pub fn corrupt(&mut self, scenario: Scenario) -> Result<CorruptionReport> {
        match scenario {
            Scenario::MagicHeader => self.corrupt_magic_header(),
            Scenario::MetadataHeader => self.corrupt_metadata_header(),
            Scenario::PageHeaders => self.corrupt_page_headers(),
            Scenario::RowPresenceBitmap => self.corrupt_row_presence_bitmap(),
            Scenario::TableIndex => self.corrupt_table_index(),
            Scenario::RowStructure => self.corrupt_row_structure(),
            Scenario::FieldData => self.corrupt_field_data(),
            Scenario::PlaylistStructure => self.corrupt_playlist_structure(),
            Scenario::CrossTableRelationships => self.corrupt_cross_table_relationships(),
            Scenario::VersionInfo => self.corrupt_version_info(),
        }
    }

    /// Apply several scenarios in the given order.
    pub fn apply(&mut self, scenarios: &[Scenario]) -> Result<Vec<CorruptionReport>> {
        scenarios
            .iter()
            .map(|scenario| self.corrupt(*scenario))
            .collect()
    }

    pub fn info(&self) -> Result<CorruptionInfo> {
        if !self.output.exists() {
            return Err(DatabaseError::FileNotFound {
                path: self.output.clone(),
            });
        }
        let output = fs::read(&self.output)?;
        let source = fs::read(&self.source)?;
        let header = FileHeader::from_bytes(&output[..output.len().min(FILE_HEADER_SIZE)])?;
        Ok(CorruptionInfo {
            signature_ok: header.signature_ok(),
            page_size: header.page_size,
            table_count: header.table_count,
            file_size: output.len() as u64,
            source_crc32: checksum(&source),
            output_crc32: checksum(&output),
        })
    }
}
