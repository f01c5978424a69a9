use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{
    storage::{header::FileHeader, image::DatabaseImage},
    types::{
        DEFAULT_PAGE_SIZE, PageIndex, RowId,
        error::DatabaseError,
        page::PageBuilder,
        row::{
            ENTRY_ROW_SIZE, PLAYLIST_NAME_OFFSET, TRACK_DURATION_OFFSET, TRACK_FIXED_SIZE,
            TRACK_ROW_HEADER_SIZE, TRACK_STRING_ANALYZE_PATH, TRACK_STRING_COUNT,
            TRACK_STRING_FILE_PATH, TRACK_STRING_FILENAME, TRACK_STRING_TITLE,
            TRACK_TEMPO_OFFSET,
        },
        string,
        table::{TableDescriptor, TableType},
        write_u16, write_u32,
    },
};

const GENRES: &[&str] = &["House", "Techno", "Disco", "Electro", "Ambient", "Drum & Bass"];
const KEYS: &[&str] = &[
    "1A", "2A", "3A", "4A", "5A", "6A", "7A", "8A", "9A", "10A", "11A", "12A", "1B", "2B", "3B",
    "4B", "5B", "6B", "7B", "8B", "9B", "10B", "11B", "12B",
];
const COLORS: &[&str] = &["Pink", "Red", "Orange", "Yellow", "Green", "Aqua", "Blue", "Purple"];
const LABELS: &[&str] = &["Warp", "Kompakt", "Dial", "Running Back"];

/// Shape of a synthetic export database.
#[derive(Debug, Clone)]
pub struct FixtureSpec {
    pub page_size: usize,
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub artwork: usize,
    /// Slot of an artist row stored with a clear presence bit.
    pub deleted_artist_slot: Option<usize>,
    pub sequence: u32,
}

impl Default for FixtureSpec {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tracks: 40,
            artists: 12,
            albums: 8,
            artwork: 5,
            deleted_artist_slot: Some(5),
            sequence: 42,
        }
    }
}

impl FixtureSpec {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }
}

struct PlaylistNode {
    id: RowId,
    parent: RowId,
    name: &'static str,
    folder: bool,
}

const PLAYLISTS: &[PlaylistNode] = &[
    PlaylistNode { id: 1, parent: 0, name: "Sets", folder: true },
    PlaylistNode { id: 2, parent: 1, name: "Warmup", folder: false },
    PlaylistNode { id: 3, parent: 1, name: "Peak Time", folder: false },
    PlaylistNode { id: 4, parent: 0, name: "Favourites", folder: false },
    PlaylistNode { id: 5, parent: 1, name: "Archive", folder: true },
    PlaylistNode { id: 6, parent: 5, name: "2019", folder: false },
];

/// Lays pages out sequentially: each table gets its data pages followed by
/// one empty candidate page.
struct FixtureBuilder {
    spec: FixtureSpec,
    pages: Vec<Vec<u8>>,
    descriptors: Vec<TableDescriptor>,
}

impl FixtureBuilder {
    fn new(spec: FixtureSpec) -> Self {
        let page_size = spec.page_size;
        Self {
            spec,
            pages: vec![vec![0u8; page_size]],
            descriptors: Vec::new(),
        }
    }

    fn next_index(&self) -> PageIndex {
        self.pages.len() as PageIndex
    }

    fn stamp(&self, page_index: PageIndex) -> u32 {
        self.spec.sequence.saturating_sub(page_index % 3).max(1)
    }

    fn add_table(&mut self, table: TableType, rows: Vec<(Vec<u8>, bool)>) -> Result<(), DatabaseError> {
        let page_size = self.spec.page_size;
        let first_page = self.next_index();
        let mut current = PageBuilder::new(page_size, first_page, table);
        let mut current_index = first_page;

        for (row, present) in rows {
            if !current.can_fit(row.len()) {
                if current.row_count() == 0 {
                    return Err(DatabaseError::FixtureError {
                        details: format!("{} row of {} bytes exceeds page size", table.name(), row.len()),
                    });
                }
                let stamp = self.stamp(current_index);
                self.pages.push(current.finalize(current_index + 1, stamp));
                current_index += 1;
                current = PageBuilder::new(page_size, current_index, table);
            }
            current.push_row(&row, present)?;
        }

        let last_page = current_index;
        let candidate_index = last_page + 1;
        let stamp = self.stamp(last_page);
        self.pages.push(current.finalize(candidate_index, stamp));
        let stamp = self.stamp(candidate_index);
        self.pages
            .push(PageBuilder::candidate(page_size, candidate_index, table).finalize(0, stamp));

        self.descriptors
            .push(TableDescriptor::new(table, first_page, last_page, candidate_index));
        Ok(())
    }

    fn finish(mut self) -> Vec<u8> {
        let header = FileHeader {
            page_size: self.spec.page_size as u32,
            table_count: self.descriptors.len() as u32,
            next_unused_page: self.pages.len() as u32,
            sequence: self.spec.sequence,
            ..FileHeader::default()
        };
        header.write_into(&mut self.pages[0]);
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let offset = DatabaseImage::descriptor_offset(index);
            descriptor.write_into(&mut self.pages[0][offset..]);
        }
        self.pages.concat()
    }
}

fn named_row(id: u32, name: &str) -> Vec<u8> {
    let mut row = id.to_le_bytes().to_vec();
    row.extend_from_slice(&string::encode(name));
    row
}

fn artist_row(id: u32) -> Vec<u8> {
    let mut row = vec![0u8; 10];
    write_u16(&mut row, 0, 0x60);
    write_u32(&mut row, 4, id);
    row[8] = 0x03;
    row[9] = 10;
    row.extend_from_slice(&string::encode(&format!("Artist {:02}", id)));
    row
}

fn album_row(id: u32, artist_id: u32) -> Vec<u8> {
    let mut row = vec![0u8; 22];
    write_u16(&mut row, 0, 0x80);
    write_u32(&mut row, 8, artist_id);
    write_u32(&mut row, 12, id);
    row[20] = 0x03;
    row[21] = 22;
    row.extend_from_slice(&string::encode(&format!("Album {:02}", id)));
    row
}

fn key_row(id: u32, name: &str) -> Vec<u8> {
    let mut row = vec![0u8; 8];
    write_u32(&mut row, 0, id);
    write_u32(&mut row, 4, id);
    row.extend_from_slice(&string::encode(name));
    row
}

fn color_row(id: u16, name: &str) -> Vec<u8> {
    let mut row = vec![0u8; 8];
    write_u16(&mut row, 5, id);
    row.extend_from_slice(&string::encode(name));
    row
}

fn track_row(spec: &FixtureSpec, id: u32) -> Vec<u8> {
    let mut row = vec![0u8; TRACK_ROW_HEADER_SIZE];
    let artist = 1 + (id - 1) % spec.artists.max(1) as u32;
    let artist = if Some(artist as usize - 1) == spec.deleted_artist_slot {
        artist % spec.artists.max(1) as u32 + 1
    } else {
        artist
    };
    let album = if spec.albums > 0 && id % 3 != 0 {
        1 + (id - 1) % spec.albums as u32
    } else {
        0
    };
    let label = if id % 4 == 0 { 1 + (id / 4 - 1) % LABELS.len() as u32 } else { 0 };
    let artwork = if spec.artwork > 0 && id % 2 == 0 {
        1 + (id / 2 - 1) % spec.artwork as u32
    } else {
        0
    };

    write_u32(&mut row, 0x08, 44100);
    write_u32(&mut row, 0x10, 8_000_000 + id * 1000);
    write_u32(&mut row, 0x1C, artwork);
    write_u32(&mut row, 0x20, 1 + (id - 1) % KEYS.len() as u32);
    write_u32(&mut row, 0x28, label);
    write_u32(&mut row, TRACK_TEMPO_OFFSET, 12000 + id * 25);
    write_u32(&mut row, 0x3C, 1 + (id - 1) % GENRES.len() as u32);
    write_u32(&mut row, 0x40, album);
    write_u32(&mut row, 0x44, artist);
    write_u32(&mut row, 0x48, id);
    write_u16(&mut row, TRACK_DURATION_OFFSET, 240 + (id % 120) as u16);
    row[0x58] = (1 + id % COLORS.len() as u32) as u8;

    let title = format!("Track {:03}", id);
    let filename = format!("track_{:03}.mp3", id);
    let file_path = format!("/Contents/Artist {:02}/{}", artist, filename);
    let analyze_path = format!("/PIONEER/USBANLZ/P{:03}/0000{:04}/ANLZ0000.DAT", id % 7, id);

    for i in 0..TRACK_STRING_COUNT {
        let text = match i {
            TRACK_STRING_TITLE => title.as_str(),
            TRACK_STRING_FILENAME => filename.as_str(),
            TRACK_STRING_FILE_PATH => file_path.as_str(),
            TRACK_STRING_ANALYZE_PATH => analyze_path.as_str(),
            _ => "",
        };
        let offset = row.len() as u16;
        write_u16(&mut row, TRACK_FIXED_SIZE + i * 2, offset);
        row.extend_from_slice(&string::encode(text));
    }
    row
}

fn playlist_row(node: &PlaylistNode, sort_order: u32) -> Vec<u8> {
    let mut row = vec![0u8; PLAYLIST_NAME_OFFSET];
    write_u32(&mut row, 0x00, node.parent);
    write_u32(&mut row, 0x08, sort_order);
    write_u32(&mut row, 0x0C, node.id);
    write_u32(&mut row, 0x10, node.folder as u32);
    row.extend_from_slice(&string::encode(node.name));
    row
}

fn entry_rows(tracks: usize) -> Vec<(Vec<u8>, bool)> {
    let mut rows = Vec::new();
    for node in PLAYLISTS.iter().filter(|node| !node.folder) {
        let count = (tracks / 4).max(1).min(tracks);
        for position in 0..count {
            let track_id = 1 + ((node.id as usize * 7 + position * 3) % tracks.max(1)) as u32;
            let mut row = vec![0u8; ENTRY_ROW_SIZE];
            write_u32(&mut row, 0, position as u32 + 1);
            write_u32(&mut row, 4, track_id);
            write_u32(&mut row, 8, node.id);
            rows.push((row, true));
        }
    }
    rows
}

/// Build a complete, structurally valid export database in memory.
pub fn build_fixture(spec: &FixtureSpec) -> Result<Vec<u8>, DatabaseError> {
    let mut builder = FixtureBuilder::new(spec.clone());
    for table in TableType::all() {
        let rows: Vec<(Vec<u8>, bool)> = match table {
            TableType::Tracks => (1..=spec.tracks as u32)
                .map(|id| (track_row(spec, id), true))
                .collect(),
            TableType::Genres => GENRES
                .iter()
                .enumerate()
                .map(|(i, name)| (named_row(i as u32 + 1, name), true))
                .collect(),
            TableType::Artists => (1..=spec.artists as u32)
                .map(|id| (artist_row(id), Some(id as usize - 1) != spec.deleted_artist_slot))
                .collect(),
            TableType::Albums => (1..=spec.albums as u32)
                .map(|id| (album_row(id, 1 + id % spec.artists.max(1) as u32), true))
                .collect(),
            TableType::Labels => LABELS
                .iter()
                .enumerate()
                .map(|(i, name)| (named_row(i as u32 + 1, name), true))
                .collect(),
            TableType::Keys => KEYS
                .iter()
                .enumerate()
                .map(|(i, name)| (key_row(i as u32 + 1, name), true))
                .collect(),
            TableType::Colors => COLORS
                .iter()
                .enumerate()
                .map(|(i, name)| (color_row(i as u16 + 1, name), true))
                .collect(),
            TableType::Artwork => (1..=spec.artwork as u32)
                .map(|id| (named_row(id, &format!("/PIONEER/Artwork/00001/a{}.jpg", id)), true))
                .collect(),
            TableType::PlaylistTree => PLAYLISTS
                .iter()
                .enumerate()
                .map(|(i, node)| (playlist_row(node, i as u32), true))
                .collect(),
            TableType::PlaylistEntries => entry_rows(spec.tracks),
            _ => Vec::new(),
        };
        builder.add_table(table, rows)?;
    }
    Ok(builder.finish())
}

pub fn write_fixture<P: AsRef<Path>>(path: P, spec: &FixtureSpec) -> Result<(), DatabaseError> {
    let bytes = build_fixture(spec)?;
    let image = DatabaseImage::from_bytes(path.as_ref(), bytes, Some(spec.page_size))?;
    image.save(path)
}

/// Scratch directory holding a pristine fixture plus paths for the damaged
/// and recovered copies. Everything is removed on drop.
pub struct TempDatabase {
    pub dir: TempDir,
    pub source: PathBuf,
    pub corrupt: PathBuf,
    pub recovered: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Result<Self, DatabaseError> {
        Self::with_spec("pdb_fixture", &FixtureSpec::default())
    }

    pub fn with_spec(prefix: &str, spec: &FixtureSpec) -> Result<Self, DatabaseError> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let source = dir.path().join("export.pdb");
        write_fixture(&source, spec)?;
        Ok(Self {
            corrupt: dir.path().join("corrupt.pdb"),
            recovered: dir.path().join("recovered.pdb"),
            source,
            dir,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
