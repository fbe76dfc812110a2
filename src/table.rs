//! The persistent output table: a CSV file that only ever grows.
//!
//! Each [`TableWriter::append`] rewrites the table as "existing bytes +
//! new rows" through [`crate::persist::write_atomic`]. A failed append
//! leaves the previous file untouched, and rows from earlier calls are
//! never rewritten or reordered.

use crate::error::PipelineError;
use crate::persist::write_atomic;
use crate::record::{ExtractionRecord, TABLE_HEADER};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends records to the CSV table at a fixed path.
#[derive(Debug, Clone)]
pub struct TableWriter {
    path: PathBuf,
}

impl TableWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records` below the existing rows.
    ///
    /// Creates the table with its header on first write. An empty slice
    /// touches nothing. Returns the number of rows appended.
    pub fn append(&self, records: &[ExtractionRecord]) -> Result<usize, PipelineError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut image = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(PipelineError::Persistence {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let fresh = image.iter().all(u8::is_ascii_whitespace);
        if fresh {
            image.clear();
        } else {
            self.check_header(&image)?;
            if image.last() != Some(&b'\n') {
                image.push(b'\n');
            }
        }

        let rows = self.encode_rows(records, fresh)?;
        image.extend_from_slice(&rows);
        write_atomic(&self.path, &image)?;

        debug!("Appended {} row(s) to {}", records.len(), self.path.display());
        Ok(records.len())
    }

    /// Read every row back. A missing table has no rows.
    pub fn read_all(&self) -> Result<Vec<ExtractionRecord>, PipelineError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.format_error(e))?;
        reader
            .deserialize()
            .collect::<Result<Vec<ExtractionRecord>, _>>()
            .map_err(|e| self.format_error(e))
    }

    /// Number of body rows (header excluded).
    pub fn row_count(&self) -> Result<usize, PipelineError> {
        Ok(self.read_all()?.len())
    }

    fn encode_rows(
        &self,
        records: &[ExtractionRecord],
        with_header: bool,
    ) -> Result<Vec<u8>, PipelineError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if with_header {
            writer
                .write_record(TABLE_HEADER)
                .map_err(|e| self.format_error(e))?;
        }
        for record in records {
            writer.serialize(record).map_err(|e| self.format_error(e))?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::Internal(format!("csv buffer: {e}")))
    }

    fn check_header(&self, image: &[u8]) -> Result<(), PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(image);
        let found: Vec<String> = reader
            .headers()
            .map_err(|e| self.format_error(e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{FEFF}').to_string())
            .collect();
        if found.iter().map(String::as_str).eq(TABLE_HEADER) {
            Ok(())
        } else {
            Err(PipelineError::TableHeaderMismatch {
                path: self.path.clone(),
                found,
                expected: TABLE_HEADER.iter().map(|h| h.to_string()).collect(),
            })
        }
    }

    fn format_error(&self, e: csv::Error) -> PipelineError {
        PipelineError::TableFormat {
            path: self.path.clone(),
            detail: e.to_string(),
        }
    }
}
