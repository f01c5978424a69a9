use crate::types::{
    RowId, error::DatabaseError, read_u16, read_u32, string, table::TableType, write_u16,
    write_u32,
};

// Track rows
pub const TRACK_FIXED_SIZE: usize = 0x5E;
pub const TRACK_STRING_COUNT: usize = 21;
pub const TRACK_ROW_HEADER_SIZE: usize = TRACK_FIXED_SIZE + TRACK_STRING_COUNT * 2;
pub const TRACK_TEMPO_OFFSET: usize = 0x38;
pub const TRACK_DURATION_OFFSET: usize = 0x54;
pub const TRACK_ID_OFFSET: usize = 0x48;
pub const TRACK_STRING_ANALYZE_PATH: usize = 14;
pub const TRACK_STRING_TITLE: usize = 17;
pub const TRACK_STRING_FILENAME: usize = 19;
pub const TRACK_STRING_FILE_PATH: usize = 20;

// Playlist tree rows
pub const PLAYLIST_PARENT_OFFSET: usize = 0x00;
pub const PLAYLIST_SORT_ORDER_OFFSET: usize = 0x08;
pub const PLAYLIST_ID_OFFSET: usize = 0x0C;
pub const PLAYLIST_FOLDER_OFFSET: usize = 0x10;
pub const PLAYLIST_NAME_OFFSET: usize = 0x14;

// Playlist entry rows
pub const ENTRY_INDEX_OFFSET: usize = 0x00;
pub const ENTRY_TRACK_OFFSET: usize = 0x04;
pub const ENTRY_PLAYLIST_OFFSET: usize = 0x08;
pub const ENTRY_ROW_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdWidth {
    U8,
    U16,
    U32,
}

impl IdWidth {
    pub fn bytes(&self) -> usize {
        match self {
            IdWidth::U8 => 1,
            IdWidth::U16 => 2,
            IdWidth::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdField {
    pub offset: usize,
    pub width: IdWidth,
}

impl IdField {
    pub fn read(&self, page: &[u8], row_start: usize) -> RowId {
        let at = row_start + self.offset;
        match self.width {
            IdWidth::U8 => page[at] as RowId,
            IdWidth::U16 => read_u16(page, at) as RowId,
            IdWidth::U32 => read_u32(page, at),
        }
    }

    /// Little-endian bytes of `value` at this field's width.
    pub fn encode(&self, value: RowId) -> Vec<u8> {
        match self.width {
            IdWidth::U8 => vec![value as u8],
            IdWidth::U16 => (value as u16).to_le_bytes().to_vec(),
            IdWidth::U32 => value.to_le_bytes().to_vec(),
        }
    }

    pub fn write(&self, page: &mut [u8], row_start: usize, value: RowId) {
        let at = row_start + self.offset;
        match self.width {
            IdWidth::U8 => page[at] = value as u8,
            IdWidth::U16 => write_u16(page, at, value as u16),
            IdWidth::U32 => write_u32(page, at, value),
        }
    }
}

/// A reference from a row to the id column of another table.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub field: &'static str,
    pub column: IdField,
    pub target: TableType,
    /// Optional links may legitimately hold [`crate::types::UNRESOLVED_ID`].
    pub optional: bool,
}

/// Where a row keeps its variable-length strings.
#[derive(Debug, Clone, Copy)]
pub enum StringLocator {
    None,
    /// A single string at a fixed row-relative offset.
    Inline(usize),
    /// A u8 at this offset holds the row-relative offset of the string.
    Near(usize),
    /// `count` u16 row-relative offsets starting at `at`.
    OffsetTable { at: usize, count: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct RowLayout {
    pub table: TableType,
    pub fixed_size: usize,
    pub id: Option<IdField>,
    pub foreign_keys: &'static [ForeignKey],
    pub strings: StringLocator,
}

const fn u32_at(offset: usize) -> IdField {
    IdField {
        offset,
        width: IdWidth::U32,
    }
}

const fn fk(field: &'static str, offset: usize, width: IdWidth, target: TableType) -> ForeignKey {
    ForeignKey {
        field,
        column: IdField { offset, width },
        target,
        optional: true,
    }
}

const TRACK_KEYS: &[ForeignKey] = &[
    fk("composer_id", 0x0C, IdWidth::U32, TableType::Artists),
    fk("artwork_id", 0x1C, IdWidth::U32, TableType::Artwork),
    fk("key_id", 0x20, IdWidth::U32, TableType::Keys),
    fk("original_artist_id", 0x24, IdWidth::U32, TableType::Artists),
    fk("label_id", 0x28, IdWidth::U32, TableType::Labels),
    fk("remixer_id", 0x2C, IdWidth::U32, TableType::Artists),
    fk("genre_id", 0x3C, IdWidth::U32, TableType::Genres),
    fk("album_id", 0x40, IdWidth::U32, TableType::Albums),
    fk("artist_id", 0x44, IdWidth::U32, TableType::Artists),
    fk("color_id", 0x58, IdWidth::U8, TableType::Colors),
];

const ALBUM_KEYS: &[ForeignKey] = &[fk("artist_id", 0x08, IdWidth::U32, TableType::Artists)];

const ENTRY_KEYS: &[ForeignKey] = &[
    ForeignKey {
        field: "track_id",
        column: u32_at(ENTRY_TRACK_OFFSET),
        target: TableType::Tracks,
        optional: false,
    },
    ForeignKey {
        field: "playlist_id",
        column: u32_at(ENTRY_PLAYLIST_OFFSET),
        target: TableType::PlaylistTree,
        optional: false,
    },
];

const LAYOUTS: &[RowLayout] = &[
    RowLayout {
        table: TableType::Tracks,
        fixed_size: TRACK_ROW_HEADER_SIZE,
        id: Some(u32_at(TRACK_ID_OFFSET)),
        foreign_keys: TRACK_KEYS,
        strings: StringLocator::OffsetTable {
            at: TRACK_FIXED_SIZE,
            count: TRACK_STRING_COUNT,
        },
    },
    RowLayout {
        table: TableType::Genres,
        fixed_size: 4,
        id: Some(u32_at(0)),
        foreign_keys: &[],
        strings: StringLocator::Inline(4),
    },
    RowLayout {
        table: TableType::Artists,
        fixed_size: 10,
        id: Some(u32_at(4)),
        foreign_keys: &[],
        strings: StringLocator::Near(9),
    },
    RowLayout {
        table: TableType::Albums,
        fixed_size: 22,
        id: Some(u32_at(12)),
        foreign_keys: ALBUM_KEYS,
        strings: StringLocator::Near(21),
    },
    RowLayout {
        table: TableType::Labels,
        fixed_size: 4,
        id: Some(u32_at(0)),
        foreign_keys: &[],
        strings: StringLocator::Inline(4),
    },
    RowLayout {
        table: TableType::Keys,
        fixed_size: 8,
        id: Some(u32_at(0)),
        foreign_keys: &[],
        strings: StringLocator::Inline(8),
    },
    RowLayout {
        table: TableType::Colors,
        fixed_size: 8,
        id: Some(IdField {
            offset: 5,
            width: IdWidth::U16,
        }),
        foreign_keys: &[],
        strings: StringLocator::Inline(8),
    },
    RowLayout {
        table: TableType::Artwork,
        fixed_size: 4,
        id: Some(u32_at(0)),
        foreign_keys: &[],
        strings: StringLocator::Inline(4),
    },
    RowLayout {
        table: TableType::PlaylistTree,
        fixed_size: PLAYLIST_NAME_OFFSET,
        id: Some(u32_at(PLAYLIST_ID_OFFSET)),
        foreign_keys: &[],
        strings: StringLocator::Inline(PLAYLIST_NAME_OFFSET),
    },
    RowLayout {
        table: TableType::PlaylistEntries,
        fixed_size: ENTRY_ROW_SIZE,
        id: None,
        foreign_keys: ENTRY_KEYS,
        strings: StringLocator::None,
    },
];

impl RowLayout {
    pub fn for_table(table: TableType) -> Option<&'static RowLayout> {
        LAYOUTS.iter().find(|layout| layout.table == table)
    }

    /// Absolute positions (within the page) of the string starts of a row.
    /// Positions that would fall outside `limit` are reported as errors.
    pub fn string_positions(
        &self,
        page: &[u8],
        row_start: usize,
        limit: usize,
    ) -> Result<Vec<usize>, DatabaseError> {
        if row_start + self.fixed_size > limit {
            return Err(DatabaseError::InvalidString {
                offset: row_start,
                reason: format!("row fixed part overruns boundary {}", limit),
            });
        }
        let positions = match self.strings {
            StringLocator::None => Vec::new(),
            StringLocator::Inline(at) => vec![row_start + at],
            StringLocator::Near(at) => vec![row_start + page[row_start + at] as usize],
            StringLocator::OffsetTable { at, count } => (0..count)
                .map(|i| row_start + read_u16(page, row_start + at + i * 2) as usize)
                .collect(),
        };
        if let Some(bad) = positions.iter().find(|position| **position >= limit) {
            return Err(DatabaseError::InvalidString {
                offset: *bad,
                reason: format!("string offset beyond boundary {}", limit),
            });
        }
        Ok(positions)
    }

    /// End of the row starting at `row_start`: the furthest byte touched by
    /// its fixed part or any of its strings.
    pub fn row_end(&self, page: &[u8], row_start: usize, limit: usize) -> Result<usize, DatabaseError> {
        let mut end = row_start + self.fixed_size;
        for position in self.string_positions(page, row_start, limit)? {
            let decoded = string::decode(page, position, limit)?;
            end = end.max(decoded.end());
        }
        Ok(end)
    }

    pub fn read_id(&self, page: &[u8], row_start: usize) -> Option<RowId> {
        self.id.map(|field| field.read(page, row_start))
    }
}
