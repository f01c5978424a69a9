use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::types::error::DatabaseError;

/// The ten structural regions that can be damaged and repaired independently.
///
/// Declaration order is the repair order: header-level regions first, then
/// pages, rows, and finally relationships. `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scenario {
    MagicHeader,
    MetadataHeader,
    PageHeaders,
    RowPresenceBitmap,
    TableIndex,
    RowStructure,
    FieldData,
    PlaylistStructure,
    CrossTableRelationships,
    VersionInfo,
}

impl Scenario {
    pub const ALL: [Scenario; 10] = [
        Scenario::MagicHeader,
        Scenario::MetadataHeader,
        Scenario::PageHeaders,
        Scenario::RowPresenceBitmap,
        Scenario::TableIndex,
        Scenario::RowStructure,
        Scenario::FieldData,
        Scenario::PlaylistStructure,
        Scenario::CrossTableRelationships,
        Scenario::VersionInfo,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Scenario::MagicHeader => 1,
            Scenario::MetadataHeader => 2,
            Scenario::PageHeaders => 3,
            Scenario::RowPresenceBitmap => 4,
            Scenario::TableIndex => 5,
            Scenario::RowStructure => 6,
            Scenario::FieldData => 7,
            Scenario::PlaylistStructure => 8,
            Scenario::CrossTableRelationships => 9,
            Scenario::VersionInfo => 10,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Scenario::ALL.iter().copied().find(|s| s.number() == number)
    }

    /// Name of the structural region this scenario targets.
    pub fn region(&self) -> &'static str {
        match self {
            Scenario::MagicHeader => "magic_header",
            Scenario::MetadataHeader => "metadata_header",
            Scenario::PageHeaders => "page_headers",
            Scenario::RowPresenceBitmap => "row_presence_bitmap",
            Scenario::TableIndex => "table_index",
            Scenario::RowStructure => "row_structure",
            Scenario::FieldData => "field_data",
            Scenario::PlaylistStructure => "playlist_structure",
            Scenario::CrossTableRelationships => "cross_table_relationships",
            Scenario::VersionInfo => "version_info",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.region())
    }
}

impl FromStr for Scenario {
    type Err = DatabaseError;

    /// Accepts either the scenario number or the region name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(number) = trimmed.parse::<u8>() {
            return Scenario::from_number(number)
                .ok_or_else(|| DatabaseError::UnknownScenario(trimmed.to_string()));
        }
        let lowered = trimmed.to_lowercase();
        Scenario::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.region() == lowered)
            .ok_or_else(|| DatabaseError::UnknownScenario(trimmed.to_string()))
    }
}
