//! Record acquisition from a directory tree or a database query.

mod database;
mod files;

pub use database::DatabaseSource;
pub use files::FileSource;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening or reading a record source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Input root is missing or the query cannot produce the required columns.
    #[error("Record source unavailable: {0}")]
    Unavailable(String),
    /// Single-record lookup found nothing.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// A single file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A second file in one directory shares its stem with an earlier one.
    #[error("Duplicate record name (same stem as an earlier file): {}", .0.display())]
    Duplicate(PathBuf),
    /// Database driver error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One unit of work for the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Stable identifier (file stem or primary key).
    pub id: String,
    /// Raw source text as stored.
    pub text: String,
    /// Directory of the source file relative to the input root; absent for database rows.
    pub relative_path: Option<PathBuf>,
    /// Name used in output file names and log lines.
    pub display_name: String,
    /// Location recorded in output metadata (path below the input root, or the record id).
    pub origin: String,
    /// `(language, text)` pairs for bilingual database rows, in configured column order.
    pub original_texts: Vec<(String, String)>,
}

impl SourceRecord {
    /// Build a record carrying a single text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            origin: id.clone(),
            id,
            text: text.into(),
            relative_path: None,
            original_texts: Vec::new(),
        }
    }
}

/// Lazily evaluated stream of records; items fail individually.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<SourceRecord, SourceError>> + 'a>;

/// Interface implemented by record backends.
pub trait RecordSource {
    /// Yield every record in a stable order.
    fn records(&self) -> Result<RecordIter<'_>, SourceError>;

    /// Fetch one record by file name or identifier.
    fn get(&self, name: &str) -> Result<SourceRecord, SourceError>;
}
