use rusqlite::{Connection, OpenFlags, types::ValueRef};
use std::path::Path;

use super::{RecordIter, RecordSource, SourceError, SourceRecord};

const ID_COLUMN: &str = "id";
const TEXT_COLUMN: &str = "sourcetext";

/// Rows produced by a configured SQLite query.
///
/// The query must project `id` and `sourcetext`; configured language columns are copied into
/// [`SourceRecord::original_texts`].
pub struct DatabaseSource {
    conn: Connection,
    query: String,
    language_columns: Vec<(String, String)>,
}

impl DatabaseSource {
    /// Open the database read-only and verify the query projects the required columns.
    pub fn open(
        path: &Path,
        query: impl Into<String>,
        language_columns: Vec<(String, String)>,
    ) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::Unavailable(format!(
                "database not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|error| SourceError::Unavailable(error.to_string()))?;
        let source = Self {
            conn,
            query: query.into(),
            language_columns,
        };
        source.check_columns()?;
        tracing::info!(database = %path.display(), "Database source ready");
        Ok(source)
    }

    fn check_columns(&self) -> Result<(), SourceError> {
        let stmt = self
            .conn
            .prepare(&self.query)
            .map_err(|error| SourceError::Unavailable(format!("query rejected: {error}")))?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let required = [ID_COLUMN, TEXT_COLUMN]
            .into_iter()
            .chain(self.language_columns.iter().map(|(column, _)| column.as_str()));
        let missing: Vec<&str> = required
            .filter(|name| !columns.iter().any(|column| column == name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SourceError::Unavailable(format!(
                "query result is missing columns: {}",
                missing.join(", ")
            )))
        }
    }

    fn fetch_all(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let mut stmt = self.conn.prepare(&self.query)?;
        let rows = stmt.query_map([], |row| {
            let id = value_to_string(row.get_ref(ID_COLUMN)?);
            let text = value_to_string(row.get_ref(TEXT_COLUMN)?);
            let mut original_texts = Vec::with_capacity(self.language_columns.len());
            for (column, language) in &self.language_columns {
                let text = value_to_string(row.get_ref(column.as_str())?);
                original_texts.push((language.clone(), text));
            }
            Ok(SourceRecord {
                display_name: id.clone(),
                origin: id.clone(),
                id,
                text,
                relative_path: None,
                original_texts,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        tracing::info!(records = records.len(), "Fetched records from database");
        Ok(records)
    }
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

impl RecordSource for DatabaseSource {
    fn records(&self) -> Result<RecordIter<'_>, SourceError> {
        let records = self.fetch_all()?;
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn get(&self, name: &str) -> Result<SourceRecord, SourceError> {
        self.fetch_all()?
            .into_iter()
            .find(|record| record.id == name)
            .ok_or_else(|| SourceError::NotFound(format!("record id {name}")))
    }
}
