use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{RecordIter, RecordSource, SourceError, SourceRecord};

const ACCEPTED_EXTENSIONS: [&str; 2] = ["txt", "xml"];

/// Directory tree of `.txt` and `.xml` files.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    /// Open an input root, failing when it is missing or not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "input directory not found: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn discover(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_accepted(path))
            .collect();
        files.sort_unstable();
        files
    }

    fn load(&self, path: &Path) -> Result<SourceRecord, SourceError> {
        let text = fs::read_to_string(path).map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::warn!(path = %path.display(), "Source file is empty");
        }

        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| SourceError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file name is not valid UTF-8",
                ),
            })?
            .to_string();

        let relative_path = path
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let origin = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string();

        Ok(SourceRecord {
            id: stem.clone(),
            text,
            relative_path: Some(relative_path),
            display_name: stem,
            origin,
            original_texts: Vec::new(),
        })
    }
}

fn is_accepted(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
}

impl RecordSource for FileSource {
    fn records(&self) -> Result<RecordIter<'_>, SourceError> {
        let files = self.discover();
        tracing::info!(
            root = %self.root.display(),
            files = files.len(),
            "Discovered source files"
        );
        let mut claimed = HashSet::new();
        Ok(Box::new(files.into_iter().map(move |path| {
            // `brief.txt` and `brief.xml` would share one output name.
            if !claimed.insert(path.with_extension("")) {
                return Err(SourceError::Duplicate(path));
            }
            self.load(&path)
        })))
    }

    fn get(&self, name: &str) -> Result<SourceRecord, SourceError> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        self.load(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_root_is_unavailable() {
        let dir = tempdir().unwrap();
        let result = FileSource::open(dir.path().join("nope"));
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn walks_recursively_and_preserves_relative_dirs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("1850").join("maerz");
        fs::create_dir_all(&nested)?;
        fs::write(dir.path().join("z.txt"), "  Liebe Freundin  \n")?;
        fs::write(nested.join("b.xml"), "<TEI/>")?;
        fs::write(nested.join("ignored.md"), "skip me")?;

        let source = FileSource::open(dir.path())?;
        let records: Vec<_> = source.records()?.collect::<Result<_, _>>()?;

        // Paths sort by component, so the nested directory comes before `z.txt`.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display_name, "b");
        assert_eq!(records[0].origin, Path::new("1850/maerz/b.xml").display().to_string());
        assert_eq!(
            records[0].relative_path.as_deref(),
            Some(Path::new("1850/maerz"))
        );
        assert_eq!(records[1].id, "z");
        assert_eq!(records[1].text, "Liebe Freundin");
        assert_eq!(records[1].relative_path.as_deref(), Some(Path::new("")));
        Ok(())
    }

    #[test]
    fn same_stem_in_one_directory_fails_the_later_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("brief.txt"), "Text")?;
        fs::write(dir.path().join("brief.xml"), "<TEI/>")?;
        fs::write(dir.path().join("sub").join("brief.txt"), "Anderer Text")?;

        let source = FileSource::open(dir.path())?;
        let results: Vec<_> = source.records()?.collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().map(|r| r.origin.as_str()).ok(), Some("brief.txt"));
        match &results[1] {
            Err(SourceError::Duplicate(path)) => assert!(path.ends_with("brief.xml")),
            other => panic!("expected duplicate error, got {other:?}"),
        }
        let nested = results[2].as_ref().map_err(|e| e.to_string())?;
        assert_eq!(nested.id, "brief");
        assert_eq!(nested.relative_path.as_deref(), Some(Path::new("sub")));
        Ok(())
    }

    #[test]
    fn get_resolves_relative_to_root() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("sub").join("brief.txt"), "Text")?;

        let source = FileSource::open(dir.path())?;
        let record = source.get("sub/brief.txt")?;
        assert_eq!(record.id, "brief");
        assert_eq!(record.relative_path.as_deref(), Some(Path::new("sub")));

        assert!(matches!(source.get("missing.txt"), Err(SourceError::NotFound(_))));
        Ok(())
    }
}
