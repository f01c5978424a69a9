//! Domain records a semantic layer builds from a database, and a minimal
//! reader that produces them straight from an image.

use serde::{Deserialize, Serialize};

use crate::{
    storage::image::{DatabaseImage, RowRef},
    types::{
        RowId, UNRESOLVED_ID,
        error::Result,
        read_u16, read_u32,
        row::{
            ENTRY_PLAYLIST_OFFSET, ENTRY_TRACK_OFFSET, PLAYLIST_FOLDER_OFFSET, PLAYLIST_ID_OFFSET,
            PLAYLIST_NAME_OFFSET, PLAYLIST_PARENT_OFFSET, PLAYLIST_SORT_ORDER_OFFSET, RowLayout,
            TRACK_DURATION_OFFSET, TRACK_FIXED_SIZE, TRACK_ID_OFFSET, TRACK_STRING_ANALYZE_PATH,
            TRACK_STRING_FILE_PATH,
            TRACK_STRING_TITLE, TRACK_TEMPO_OFFSET, ENTRY_INDEX_OFFSET,
        },
        string,
        table::TableType,
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: RowId,
    pub title: Option<String>,
    pub artist_id: Option<RowId>,
    pub album_id: Option<RowId>,
    pub genre_id: Option<RowId>,
    pub key_id: Option<RowId>,
    /// Beats per minute.
    pub tempo: Option<f64>,
    /// Seconds.
    pub duration: Option<u16>,
    pub file_path: Option<String>,
    /// Location of the track's analysis file on the device.
    pub analyze_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: RowId,
    pub parent_id: Option<RowId>,
    pub name: Option<String>,
    pub is_folder: bool,
    pub sort_order: u32,
    /// Track ids in entry order.
    pub track_ids: Vec<RowId>,
}

/// Anything that can hand out domain records.
pub trait RecordSource {
    fn read_tracks(&self) -> Result<Vec<TrackRecord>>;
    fn read_playlists(&self) -> Result<Vec<PlaylistRecord>>;
}

fn link(value: RowId) -> Option<RowId> {
    (value != UNRESOLVED_ID).then_some(value)
}

fn present_rows(image: &DatabaseImage, table: TableType) -> Vec<RowRef> {
    image
        .table_rows(table)
        .into_iter()
        .filter(|row| row.slot.present)
        .collect()
}

/// Text of a string at `position`; undecodable or empty strings read as none.
fn text_at(page: &[u8], position: usize, limit: usize) -> Option<String> {
    string::decode(page, position, limit)
        .ok()
        .map(|decoded| decoded.text)
        .filter(|text| !text.is_empty())
}

fn track_string(page: &[u8], row: &RowRef, index: usize) -> Option<String> {
    let at = row.slot.start + TRACK_FIXED_SIZE + index * 2;
    if at + 2 > row.slot.end {
        return None;
    }
    let position = row.slot.start + read_u16(page, at) as usize;
    (position < row.slot.end)
        .then(|| text_at(page, position, row.slot.end))
        .flatten()
}

fn track_record(image: &DatabaseImage, row: &RowRef) -> Option<TrackRecord> {
    let page = image.page(row.page)?;
    let layout = RowLayout::for_table(TableType::Tracks)?;
    let key = |field: &str| {
        layout
            .foreign_keys
            .iter()
            .find(|key| key.field == field)
            .and_then(|key| link(key.column.read(page, row.slot.start)))
    };
    let start = row.slot.start;
    let tempo = read_u32(page, start + TRACK_TEMPO_OFFSET);
    let duration = read_u16(page, start + TRACK_DURATION_OFFSET);

    Some(TrackRecord {
        id: read_u32(page, start + TRACK_ID_OFFSET),
        title: track_string(page, row, TRACK_STRING_TITLE),
        artist_id: key("artist_id"),
        album_id: key("album_id"),
        genre_id: key("genre_id"),
        key_id: key("key_id"),
        tempo: (tempo != 0).then(|| tempo as f64 / 100.0),
        duration: (duration != 0).then_some(duration),
        file_path: track_string(page, row, TRACK_STRING_FILE_PATH),
        analyze_path: track_string(page, row, TRACK_STRING_ANALYZE_PATH),
    })
}

impl RecordSource for DatabaseImage {
    fn read_tracks(&self) -> Result<Vec<TrackRecord>> {
        let mut tracks: Vec<TrackRecord> = present_rows(self, TableType::Tracks)
            .iter()
            .filter_map(|row| track_record(self, row))
            .collect();
        tracks.sort_by_key(|track| track.id);
        Ok(tracks)
    }

    fn read_playlists(&self) -> Result<Vec<PlaylistRecord>> {
        let mut entries: Vec<(RowId, u32, RowId)> = Vec::new();
        for row in present_rows(self, TableType::PlaylistEntries) {
            let Some(page) = self.page(row.page) else {
                continue;
            };
            let start = row.slot.start;
            entries.push((
                read_u32(page, start + ENTRY_PLAYLIST_OFFSET),
                read_u32(page, start + ENTRY_INDEX_OFFSET),
                read_u32(page, start + ENTRY_TRACK_OFFSET),
            ));
        }
        entries.sort_unstable();

        let mut playlists = Vec::new();
        for row in present_rows(self, TableType::PlaylistTree) {
            let Some(page) = self.page(row.page) else {
                continue;
            };
            let start = row.slot.start;
            let id = read_u32(page, start + PLAYLIST_ID_OFFSET);
            let track_ids = entries
                .iter()
                .filter(|(playlist, _, track)| *playlist == id && *track != UNRESOLVED_ID)
                .map(|(_, _, track)| *track)
                .collect();
            playlists.push(PlaylistRecord {
                id,
                parent_id: link(read_u32(page, start + PLAYLIST_PARENT_OFFSET)),
                name: text_at(page, start + PLAYLIST_NAME_OFFSET, row.slot.end),
                is_folder: read_u32(page, start + PLAYLIST_FOLDER_OFFSET) != 0,
                sort_order: read_u32(page, start + PLAYLIST_SORT_ORDER_OFFSET),
                track_ids,
            });
        }
        playlists.sort_by_key(|playlist| playlist.sort_order);
        Ok(playlists)
    }
}
