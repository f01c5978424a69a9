use std::path::PathBuf;

use thiserror::Error;

use crate::types::PageIndex;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("File too small: {actual} bytes, need at least {minimum}")]
    FileTooSmall { actual: usize, minimum: usize },

    #[error("Invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Invalid page size: {actual} bytes (allowed {min}..={max})")]
    InvalidPageSize { actual: usize, min: usize, max: usize },

    #[error("Page {page_index} out of range (page count {page_count})")]
    PageOutOfRange { page_index: PageIndex, page_count: usize },

    #[error("Corrupted page: page_index={page_index}, reason={reason}")]
    CorruptedPage { page_index: PageIndex, reason: String },

    #[error("Invalid table type: {0}")]
    InvalidTableType(u32),

    #[error("Invalid device string at offset {offset}: {reason}")]
    InvalidString { offset: usize, reason: String },

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Paths must differ: {} and {}", first.display(), second.display())]
    PathConflict { first: PathBuf, second: PathBuf },

    #[error("Path {} is outside the permitted directories", path.display())]
    PathNotPermitted { path: PathBuf },

    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fixture error: {details}")]
    FixtureError { details: String },
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
