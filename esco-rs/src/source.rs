//! Streaming CSV row source.
//!
//! A [`RowSource`] opens one ESCO CSV file, checks its header against a
//! [`ColumnContract`] and then yields [`Row`]s lazily. Values are trimmed;
//! identifier columns are reduced to the trailing segment of the concept URI
//! via [`normalize_uri`].

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{EscoError, Result};

/// Columns a file must carry, and which of them hold concept identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnContract {
    pub required: &'static [&'static str],
    pub identifiers: &'static [&'static str],
}

impl ColumnContract {
    /// Required columns absent from `headers`.
    pub fn missing<'a>(&self, headers: impl IntoIterator<Item = &'a str> + Clone) -> Vec<String> {
        self.required
            .iter()
            .filter(|col| !headers.clone().into_iter().any(|h| h == **col))
            .map(|col| col.to_string())
            .collect()
    }
}

/// Reduce an ESCO concept URI to its stable trailing segment.
///
/// `http://data.europa.eu/esco/skill/0005c151-5b5a-4a66-8aac-60e734beb1ab`
/// becomes `0005c151-5b5a-4a66-8aac-60e734beb1ab`. Trailing slashes are
/// ignored and a `#fragment` counts as a segment. Bare identifiers pass
/// through unchanged.
pub fn normalize_uri(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    match trimmed.rfind(['/', '#']) {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// One data row, addressed by column name.
#[derive(Debug, Clone)]
pub struct Row {
    line: u64,
    columns: Arc<HashMap<String, usize>>,
    values: Vec<String>,
}

impl Row {
    /// Build a row from `(column, value)` pairs. Values are trimmed but no
    /// identifier normalization is applied.
    pub fn from_pairs(line: u64, pairs: &[(&str, &str)]) -> Self {
        let columns = pairs
            .iter()
            .enumerate()
            .map(|(idx, (col, _))| (col.to_string(), idx))
            .collect();
        Self {
            line,
            columns: Arc::new(columns),
            values: pairs.iter().map(|(_, v)| v.trim().to_string()).collect(),
        }
    }

    /// 1-based data line number (the header is line 0).
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Value of `column`, or `""` when the column is unknown or the cell is
    /// absent.
    pub fn get(&self, column: &str) -> &str {
        self.columns
            .get(column)
            .and_then(|idx| self.values.get(*idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Lazy, header-checked reader over one CSV file.
pub struct RowSource {
    path: PathBuf,
    contract: ColumnContract,
    columns: Arc<HashMap<String, usize>>,
    identifier_idx: Vec<usize>,
    records: csv::StringRecordsIntoIter<File>,
    line: u64,
}

impl std::fmt::Debug for RowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSource")
            .field("path", &self.path)
            .field("line", &self.line)
            .finish()
    }
}

impl RowSource {
    /// Open `path` and read its header only.
    ///
    /// Fails with [`EscoError::SchemaMismatch`] when a required column is
    /// absent and with [`EscoError::Io`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, contract: &ColumnContract) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| EscoError::io(&path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| EscoError::csv(&path, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let missing = contract.missing(headers.iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(EscoError::SchemaMismatch { path, missing });
        }

        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.clone(), idx))
            .collect();
        let identifier_idx = contract
            .identifiers
            .iter()
            .filter_map(|col| columns.get(*col).copied())
            .collect();

        Ok(Self {
            path,
            contract: *contract,
            columns: Arc::new(columns),
            identifier_idx,
            records: reader.into_records(),
            line: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopen the file from the first data row.
    pub fn restart(&mut self) -> Result<()> {
        *self = Self::open(&self.path, &self.contract)?;
        Ok(())
    }

    fn to_row(&self, record: &csv::StringRecord) -> Row {
        let mut values: Vec<String> = record.iter().map(|v| v.trim().to_string()).collect();
        for idx in &self.identifier_idx {
            if let Some(value) = values.get_mut(*idx) {
                *value = normalize_uri(value);
            }
        }
        Row {
            line: self.line,
            columns: Arc::clone(&self.columns),
            values,
        }
    }
}

impl Iterator for RowSource {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.line += 1;
        Some(
            record
                .map(|r| self.to_row(&r))
                .map_err(|e| EscoError::csv(&self.path, e)),
        )
    }
}
