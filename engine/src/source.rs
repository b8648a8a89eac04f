//! # Data Sources
//!
//! Tabular input for batch generation. A source exposes one or more sheets;
//! a [`Row`] merges the n-th record of every sheet. Columns of the first
//! (primary) sheet are addressable by plain name, every column also as
//! `"Sheet:Column"`.
//!
//! Missing cells are `None`. For CSV input an empty field counts as missing,
//! which is how spreadsheet readers report blank cells.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}", format_csv_error(.source, .line))]
    Csv {
        line: usize,
        #[source]
        source: csv::Error,
    },
    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),
    #[error("data source has no sheets")]
    NoSheets,
}

fn format_csv_error(err: &csv::Error, line: &usize) -> String {
    match err.kind() {
        csv::ErrorKind::Utf8 { .. } => "file is not valid utf-8".into(),
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!(
            "failed to parse CSV (found {} instead of {} fields in line {})",
            len, expected_len, line
        ),
        _ => format!("failed to parse CSV ({})", err),
    }
}

/// One raw record of a sheet, aligned with its columns.
pub type Record = Vec<Option<String>>;

/// A record iterator borrowed from a source.
pub type Records<'a> = Box<dyn Iterator<Item = Result<Record, SourceError>> + 'a>;

/// The data-source collaborator consumed by the renderer.
pub trait DataSource {
    /// Sheet names. The first is the primary sheet.
    fn sheets(&self) -> Vec<String>;

    fn columns(&self, sheet: &str) -> Result<Vec<String>, SourceError>;

    fn records(&self, sheet: &str) -> Result<Records<'_>, SourceError>;

    /// Number of records in `sheet`.
    fn row_count(&self, sheet: &str) -> Result<usize, SourceError> {
        let mut n = 0;
        for record in self.records(sheet)? {
            record?;
            n += 1;
        }
        Ok(n)
    }
}

/// Column values of one data row, keyed by column reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Option<String>>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        self.values.insert(column.into(), value);
    }

    /// `None` when the row has no such column, `Some(None)` for a missing value.
    pub fn lookup(&self, column: &str) -> Option<Option<&str>> {
        self.values.get(column).map(|v| v.as_deref())
    }

    /// The display value of `column`; missing values and columns read as "".
    pub fn value(&self, column: &str) -> &str {
        self.lookup(column).flatten().unwrap_or("")
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Value of the primary sheet's first column.
    pub fn first_value(&self) -> Option<&str> {
        self.values.values().next().and_then(|v| v.as_deref())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Qualified column reference for `column` on `sheet`.
pub fn column_key(sheet: &str, column: &str) -> String {
    format!("{}:{}", sheet, column)
}

/// Every column reference a template may use with `source`.
pub fn column_keys(source: &dyn DataSource) -> Result<Vec<String>, SourceError> {
    let sheets = source.sheets();
    let mut keys = Vec::new();
    for (i, sheet) in sheets.iter().enumerate() {
        for column in source.columns(sheet)? {
            if i == 0 {
                keys.push(column.clone());
            }
            keys.push(column_key(sheet, &column));
        }
    }
    Ok(keys)
}

struct SheetCursor<'a> {
    name: String,
    columns: Vec<String>,
    records: Records<'a>,
}

/// Merged rows over all sheets of a source, driven by the primary sheet.
pub struct Rows<'a> {
    sheets: Vec<SheetCursor<'a>>,
}

impl<'a> Rows<'a> {
    pub fn new(source: &'a dyn DataSource) -> Result<Self, SourceError> {
        let names = source.sheets();
        if names.is_empty() {
            return Err(SourceError::NoSheets);
        }
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            sheets.push(SheetCursor {
                columns: source.columns(&name)?,
                records: source.records(&name)?,
                name,
            });
        }
        Ok(Self { sheets })
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut row = Row::new();
        for (i, sheet) in self.sheets.iter_mut().enumerate() {
            let record = match sheet.records.next() {
                Some(Ok(record)) => Some(record),
                Some(Err(e)) => return Some(Err(e)),
                None if i == 0 => return None,
                None => None,
            };
            for (c, column) in sheet.columns.iter().enumerate() {
                let value = record.as_ref().and_then(|r| r.get(c).cloned().flatten());
                if i == 0 {
                    row.insert(column.clone(), value.clone());
                }
                row.insert(column_key(&sheet.name, column), value);
            }
        }
        Some(Ok(row))
    }
}

/// Merged rows of `source`.
pub fn rows(source: &dyn DataSource) -> Result<Rows<'_>, SourceError> {
    Rows::new(source)
}

/// An in-memory table, one or more sheets.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sheets: Vec<MemorySheet>,
}

#[derive(Debug, Clone)]
struct MemorySheet {
    name: String,
    columns: Vec<String>,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet. Cells are given as strings; use [`MemorySource::sheet_with_nulls`]
    /// for missing values.
    pub fn sheet(self, name: &str, columns: &[&str], records: &[&[&str]]) -> Self {
        let records = records
            .iter()
            .map(|r| r.iter().map(|v| Some(v.to_string())).collect())
            .collect();
        self.sheet_with_nulls(name, columns, records)
    }

    pub fn sheet_with_nulls(mut self, name: &str, columns: &[&str], records: Vec<Record>) -> Self {
        self.sheets.push(MemorySheet {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            records,
        });
        self
    }

    fn find(&self, sheet: &str) -> Result<&MemorySheet, SourceError> {
        self.sheets
            .iter()
            .find(|s| s.name == sheet)
            .ok_or_else(|| SourceError::UnknownSheet(sheet.to_string()))
    }
}

impl DataSource for MemorySource {
    fn sheets(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn columns(&self, sheet: &str) -> Result<Vec<String>, SourceError> {
        Ok(self.find(sheet)?.columns.clone())
    }

    fn records(&self, sheet: &str) -> Result<Records<'_>, SourceError> {
        let sheet = self.find(sheet)?;
        Ok(Box::new(sheet.records.iter().cloned().map(Ok)))
    }

    fn row_count(&self, sheet: &str) -> Result<usize, SourceError> {
        Ok(self.find(sheet)?.records.len())
    }
}

/// CSV files read lazily from disk. A single file is one sheet named after
/// its stem; a directory contributes each `.csv` file as a sheet, sorted by
/// name.
#[derive(Debug, Clone)]
pub struct CsvSource {
    sheets: Vec<(String, PathBuf)>,
    delimiter: u8,
}

impl CsvSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let io_err = |source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut sheets = Vec::new();
        if path.is_dir() {
            for entry in std::fs::read_dir(path).map_err(io_err)? {
                let entry = entry.map_err(io_err)?;
                let file = entry.path();
                let is_csv = file
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if is_csv && file.is_file() {
                    sheets.push((sheet_name(&file), file));
                }
            }
            sheets.sort();
        } else {
            std::fs::metadata(path).map_err(io_err)?;
            sheets.push((sheet_name(path), path.to_path_buf()));
        }
        if sheets.is_empty() {
            return Err(SourceError::NoSheets);
        }
        Ok(Self {
            sheets,
            delimiter: b',',
        })
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn path(&self, sheet: &str) -> Result<&Path, SourceError> {
        self.sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, p)| p.as_path())
            .ok_or_else(|| SourceError::UnknownSheet(sheet.to_string()))
    }

    fn reader(&self, sheet: &str) -> Result<csv::Reader<std::fs::File>, SourceError> {
        let path = self.path(sheet)?;
        let mut builder = csv::ReaderBuilder::new();
        builder.has_headers(true);
        builder.flexible(true);
        builder.delimiter(self.delimiter);
        builder.from_path(path).map_err(|source| SourceError::Csv { line: 1, source })
    }
}

fn sheet_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sheet1".to_string())
}

impl DataSource for CsvSource {
    fn sheets(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn columns(&self, sheet: &str) -> Result<Vec<String>, SourceError> {
        let mut reader = self.reader(sheet)?;
        let headers = reader
            .headers()
            .map_err(|source| SourceError::Csv { line: 1, source })?;
        Ok(headers.iter().map(|h| h.trim().to_string()).collect())
    }

    fn records(&self, sheet: &str) -> Result<Records<'_>, SourceError> {
        let reader = self.reader(sheet)?;
        // Counting lines from 2 because of the header.
        let iter = reader.into_records().enumerate().map(|(i, result)| {
            let record = result.map_err(|source| SourceError::Csv { line: i + 2, source })?;
            Ok(record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect())
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_merge_sheets() {
        let source = MemorySource::new()
            .sheet("Main", &["Name", "Note"], &[&["Alice", "hi"], &["Bob", ""]])
            .sheet("Extra", &["Code"], &[&["X1"]]);
        let rows: Vec<Row> = rows(&source).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("Name"), "Alice");
        assert_eq!(rows[0].value("Main:Name"), "Alice");
        assert_eq!(rows[0].value("Extra:Code"), "X1");
        assert_eq!(rows[1].lookup("Extra:Code"), Some(None));
        assert_eq!(rows[1].lookup("Code"), None);
        assert_eq!(rows[0].first_value(), Some("Alice"));
    }

    #[test]
    fn test_no_sheets() {
        assert!(matches!(rows(&MemorySource::new()), Err(SourceError::NoSheets)));
    }

    #[test]
    fn test_column_keys() {
        let source = MemorySource::new()
            .sheet("A", &["x"], &[])
            .sheet("B", &["y"], &[]);
        assert_eq!(column_keys(&source).unwrap(), vec!["x", "A:x", "B:y"]);
    }

    #[test]
    fn test_csv_blank_fields_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "Name,Note\nAlice,\nBob,late\n").unwrap();
        let source = CsvSource::open(&path).unwrap();
        assert_eq!(source.sheets(), vec!["people"]);
        assert_eq!(source.row_count("people").unwrap(), 2);
        let rows: Vec<Row> = rows(&source).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].lookup("Note"), Some(None));
        assert_eq!(rows[1].value("people:Note"), "late");
    }
}
