//! Output naming, atomic writes, and the existing-output index.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use walkdir::WalkDir;

use super::metadata;
use super::types::SchemaVariant;
use crate::source::SourceRecord;

const TIMESTAMPED_NAME: &str = r"^\d{8}-\d{6}_(.+)\.json$";

/// Errors raised while writing or rewriting output documents.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("I/O failure on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Document could not be serialized or parsed.
    #[error("JSON failure on {path}: {source}")]
    Serialize {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Existing document has an unexpected shape.
    #[error("Invalid output document {0}")]
    InvalidDocument(PathBuf),
    /// Timestamp could not be rendered.
    #[error("Failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    /// Output name pattern failed to compile.
    #[error("Invalid output name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Directory layout for output documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLayout {
    /// `<root>/<relative dir>/<YYYYMMDD-HHMMSS>_<name>.json` (file sources).
    Mirrored(PathBuf),
    /// `<root>/<id>.json` (database sources).
    Flat(PathBuf),
}

type IndexKey = (PathBuf, String);

impl OutputLayout {
    /// Output root.
    pub fn root(&self) -> &Path {
        match self {
            Self::Mirrored(root) | Self::Flat(root) => root,
        }
    }

    fn key(&self, record: &SourceRecord) -> IndexKey {
        match self {
            Self::Mirrored(_) => (
                record.relative_path.clone().unwrap_or_default(),
                record.display_name.clone(),
            ),
            Self::Flat(_) => (PathBuf::new(), record.id.clone()),
        }
    }

    /// Destination for `record` when written at `at`.
    pub fn target_path(
        &self,
        record: &SourceRecord,
        at: OffsetDateTime,
    ) -> Result<PathBuf, PersistError> {
        match self {
            Self::Mirrored(root) => {
                let stamp = at.format(format_description!(
                    "[year][month][day]-[hour][minute][second]"
                ))?;
                let dir = match &record.relative_path {
                    Some(relative) => root.join(relative),
                    None => root.clone(),
                };
                Ok(dir.join(format!("{stamp}_{}.json", record.display_name)))
            }
            Self::Flat(root) => Ok(root.join(format!("{}.json", record.id))),
        }
    }
}

/// Writes complete documents through a temporary file in the target directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    layout: OutputLayout,
}

impl OutputWriter {
    /// Create a writer for `layout`.
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    /// Layout used for naming.
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Serialize `document` for `record`, returning the final path.
    pub fn write(
        &self,
        record: &SourceRecord,
        document: &Value,
        at: OffsetDateTime,
    ) -> Result<PathBuf, PersistError> {
        let path = self.layout.target_path(record, at)?;
        write_atomic(&path, document)?;
        tracing::info!(record_id = %record.id, path = %path.display(), "Result saved");
        Ok(path)
    }
}

/// Replace the original-text field of the document at `path` and write it back.
pub fn update_metadata(
    path: &Path,
    variant: SchemaVariant,
    record: &SourceRecord,
) -> Result<(), PersistError> {
    let raw = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut document: Value =
        serde_json::from_str(&raw).map_err(|source| PersistError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
    if !metadata::refresh_original_text(variant, &mut document, record) {
        return Err(PersistError::InvalidDocument(path.to_path_buf()));
    }
    write_atomic(path, &document)?;
    tracing::info!(record_id = %record.id, path = %path.display(), "Metadata updated");
    Ok(())
}

fn write_atomic(path: &Path, document: &Value) -> Result<(), PersistError> {
    let io_error = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(io_error)?;

    let body = serde_json::to_string_pretty(document).map_err(|source| PersistError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .map_err(io_error)?;
    file.write_all(body.as_bytes()).map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|error| io_error(error.error))?;
    Ok(())
}

/// Point-in-time view of existing outputs, taken once at batch start.
#[derive(Debug, Default)]
pub struct OutputIndex {
    entries: HashMap<IndexKey, Vec<PathBuf>>,
}

impl OutputIndex {
    /// Scan the layout's root; a missing root yields an empty index.
    pub fn scan(layout: &OutputLayout) -> Result<Self, PersistError> {
        let root = layout.root();
        let mut index = Self::default();
        if !root.is_dir() {
            return Ok(index);
        }

        let pattern = Regex::new(TIMESTAMPED_NAME)?;
        let walker = match layout {
            OutputLayout::Mirrored(_) => WalkDir::new(root),
            OutputLayout::Flat(_) => WalkDir::new(root).max_depth(1),
        };

        for entry in walker.into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let name = match layout {
                OutputLayout::Mirrored(_) => pattern
                    .captures(file_name)
                    .and_then(|captures| captures.get(1))
                    .map(|name| name.as_str().to_string()),
                OutputLayout::Flat(_) => file_name.strip_suffix(".json").map(str::to_string),
            };
            let Some(name) = name else {
                continue;
            };
            let relative = path
                .parent()
                .and_then(|parent| parent.strip_prefix(root).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            index
                .entries
                .entry((relative, name))
                .or_default()
                .push(path.to_path_buf());
        }

        for paths in index.entries.values_mut() {
            paths.sort();
        }
        tracing::info!(root = %root.display(), outputs = index.len(), "Indexed existing outputs");
        Ok(index)
    }

    /// Number of distinct records with output.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no output exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest output for `record` (lexicographically last name).
    pub fn latest(&self, layout: &OutputLayout, record: &SourceRecord) -> Option<&Path> {
        self.entries
            .get(&layout.key(record))
            .and_then(|paths| paths.last())
            .map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn file_record(relative: &str, name: &str) -> SourceRecord {
        let mut record = SourceRecord::new(name, "Text");
        record.relative_path = Some(PathBuf::from(relative));
        record
    }

    #[test]
    fn mirrored_names_carry_timestamp_and_relative_dir() {
        let layout = OutputLayout::Mirrored(PathBuf::from("out"));
        let path = layout
            .target_path(&file_record("1850", "brief"), datetime!(2024-01-02 03:04:05 UTC))
            .unwrap();
        assert_eq!(path, PathBuf::from("out/1850/20240102-030405_brief.json"));

        let flat = OutputLayout::Flat(PathBuf::from("db"));
        let path = flat
            .target_path(&SourceRecord::new("42", "x"), datetime!(2024-01-02 03:04:05 UTC))
            .unwrap();
        assert_eq!(path, PathBuf::from("db/42.json"));
    }

    #[test]
    fn writes_pretty_json_without_leftover_temp_files() {
        let dir = tempdir().unwrap();
        let writer = OutputWriter::new(OutputLayout::Mirrored(dir.path().to_path_buf()));
        let record = file_record("a/b", "brief");
        let document = json!({ "entities": { "E1": { "label": "Wien", "typ": "Ort" } } });

        let path = writer
            .write(&record, &document, datetime!(2024-01-02 03:04:05 UTC))
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, serde_json::to_string_pretty(&document).unwrap());
        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn index_matches_by_directory_and_name() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("1850");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("20240101-000000_brief.json"), "{}").unwrap();
        fs::write(nested.join("20240301-000000_brief.json"), "{}").unwrap();
        fs::write(nested.join("brief.json"), "{}").unwrap();
        fs::write(nested.join(".partial-abc"), "{").unwrap();

        let layout = OutputLayout::Mirrored(dir.path().to_path_buf());
        let index = OutputIndex::scan(&layout).unwrap();

        assert!(index.latest(&layout, &file_record("", "brief")).is_none());
        assert!(index.latest(&layout, &file_record("1850", "other")).is_none());
        assert_eq!(
            index.latest(&layout, &file_record("1850", "brief")),
            Some(nested.join("20240301-000000_brief.json").as_path())
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn flat_index_uses_stems_and_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("17.json"), "{}").unwrap();
        let layout = OutputLayout::Flat(dir.path().to_path_buf());
        let index = OutputIndex::scan(&layout).unwrap();
        assert_eq!(
            index.latest(&layout, &SourceRecord::new("17", "")),
            Some(dir.path().join("17.json").as_path())
        );

        let missing = OutputLayout::Flat(dir.path().join("none"));
        assert!(OutputIndex::scan(&missing).unwrap().is_empty());
    }

    #[test]
    fn update_preserves_every_other_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240101-000000_brief.json");
        let original = json!({
            "entities": { "E1": { "label": "Betty", "typ": "Person" } },
            "triples": [],
            "quelle": {
                "datei": "brief.txt",
                "ausfuehrungszeit_sekunden": 2.5,
                "original_text": "alt"
            }
        });
        fs::write(&path, serde_json::to_string_pretty(&original).unwrap()).unwrap();

        let record = SourceRecord::new("brief", "neu");
        update_metadata(&path, SchemaVariant::Triples, &record).unwrap();

        let before = serde_json::to_string_pretty(&original).unwrap();
        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(
            after,
            before.replace("\"original_text\": \"alt\"", "\"original_text\": \"neu\"")
        );
    }

    #[test]
    fn update_keeps_full_precision_floats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("20240101-000000_brief.json");
        let before = r#"{
  "triples": [],
  "konfidenz": 0.00043080333908418635,
  "quelle": {
    "ausfuehrungszeit_sekunden": 12.345678901234567,
    "original_text": "Text"
  }
}"#;
        fs::write(&path, before).unwrap();

        let record = SourceRecord::new("brief", "Text");
        update_metadata(&path, SchemaVariant::Triples, &record).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn update_rejects_non_object_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.json");
        fs::write(&path, "[1, 2]").unwrap();
        let result = update_metadata(&path, SchemaVariant::Concepts, &SourceRecord::new("1", "x"));
        assert!(matches!(result, Err(PersistError::InvalidDocument(_))));
    }
}
