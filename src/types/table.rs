use serde::{Deserialize, Serialize};

use crate::types::{PageIndex, error::DatabaseError, read_u32, write_u32};

/// Table type tag as stored in table descriptors and page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableType {
    Tracks,
    Genres,
    Artists,
    Albums,
    Labels,
    Keys,
    Colors,
    PlaylistTree,
    PlaylistEntries,
    HistoryPlaylists,
    HistoryEntries,
    Artwork,
    Columns,
    History,
    Unknown(u32),
}

/// Highest tag value seen in real exports. Anything above is a damaged tag.
pub const MAX_TABLE_TYPE: u32 = 19;

impl TableType {
    pub fn from_u32(value: u32) -> Result<Self, DatabaseError> {
        Ok(match value {
            0 => TableType::Tracks,
            1 => TableType::Genres,
            2 => TableType::Artists,
            3 => TableType::Albums,
            4 => TableType::Labels,
            5 => TableType::Keys,
            6 => TableType::Colors,
            7 => TableType::PlaylistTree,
            8 => TableType::PlaylistEntries,
            11 => TableType::HistoryPlaylists,
            12 => TableType::HistoryEntries,
            13 => TableType::Artwork,
            16 => TableType::Columns,
            19 => TableType::History,
            9 | 10 | 14 | 15 | 17 | 18 => TableType::Unknown(value),
            _ => return Err(DatabaseError::InvalidTableType(value)),
        })
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            TableType::Tracks => 0,
            TableType::Genres => 1,
            TableType::Artists => 2,
            TableType::Albums => 3,
            TableType::Labels => 4,
            TableType::Keys => 5,
            TableType::Colors => 6,
            TableType::PlaylistTree => 7,
            TableType::PlaylistEntries => 8,
            TableType::HistoryPlaylists => 11,
            TableType::HistoryEntries => 12,
            TableType::Artwork => 13,
            TableType::Columns => 16,
            TableType::History => 19,
            TableType::Unknown(value) => *value,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TableType::Tracks => "tracks".to_string(),
            TableType::Genres => "genres".to_string(),
            TableType::Artists => "artists".to_string(),
            TableType::Albums => "albums".to_string(),
            TableType::Labels => "labels".to_string(),
            TableType::Keys => "keys".to_string(),
            TableType::Colors => "colors".to_string(),
            TableType::PlaylistTree => "playlist_tree".to_string(),
            TableType::PlaylistEntries => "playlist_entries".to_string(),
            TableType::HistoryPlaylists => "history_playlists".to_string(),
            TableType::HistoryEntries => "history_entries".to_string(),
            TableType::Artwork => "artwork".to_string(),
            TableType::Columns => "columns".to_string(),
            TableType::History => "history".to_string(),
            TableType::Unknown(value) => format!("unknown_{}", value),
        }
    }

    /// All 20 table types in directory order.
    pub fn all() -> Vec<TableType> {
        (0..=MAX_TABLE_TYPE)
            .filter_map(|value| TableType::from_u32(value).ok())
            .collect()
    }
}

pub const TABLE_DESCRIPTOR_SIZE: usize = 16;

/// One entry of the table directory in page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table_type: u32,
    pub empty_candidate: PageIndex,
    pub first_page: PageIndex,
    pub last_page: PageIndex,
}

impl TableDescriptor {
    pub fn new(table_type: TableType, first_page: PageIndex, last_page: PageIndex, empty_candidate: PageIndex) -> Self {
        Self {
            table_type: table_type.as_u32(),
            empty_candidate,
            first_page,
            last_page,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            table_type: read_u32(bytes, 0),
            empty_candidate: read_u32(bytes, 4),
            first_page: read_u32(bytes, 8),
            last_page: read_u32(bytes, 12),
        }
    }

    pub fn write_into(&self, bytes: &mut [u8]) {
        write_u32(bytes, 0, self.table_type);
        write_u32(bytes, 4, self.empty_candidate);
        write_u32(bytes, 8, self.first_page);
        write_u32(bytes, 12, self.last_page);
    }

    pub fn to_bytes(&self) -> [u8; TABLE_DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; TABLE_DESCRIPTOR_SIZE];
        self.write_into(&mut bytes);
        bytes
    }

    pub fn kind(&self) -> Option<TableType> {
        TableType::from_u32(self.table_type).ok()
    }
}
