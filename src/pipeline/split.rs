//! Page splitting with lopdf.
//!
//! Each page of the source becomes its own PDF: the document is cloned,
//! every other page is deleted, unreachable objects are pruned and the
//! result is written atomically into the split directory.

use super::input::SourceDocument;
use super::unit::{unit_file_name, Unit};
use crate::error::{PipelineError, UnitError};
use crate::persist::write_atomic;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of splitting one document.
#[derive(Debug, Default)]
pub struct SplitOutcome {
    /// Units in page order.
    pub units: Vec<Unit>,
    /// Pages that could not be extracted or written.
    pub failures: Vec<UnitError>,
}

/// Splits documents into one-page units under `out_dir`.
#[derive(Debug, Clone)]
pub struct PageSplitter {
    out_dir: PathBuf,
}

impl PageSplitter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Split `source` into one unit per page.
    ///
    /// A document that cannot be parsed fails as a whole. A page that
    /// fails is recorded in [`SplitOutcome::failures`] and the remaining
    /// pages are still split.
    pub fn split(&self, source: &SourceDocument) -> Result<SplitOutcome, PipelineError> {
        let doc = Document::load_mem(source.bytes()).map_err(|e| PipelineError::Split {
            name: source.name().to_string(),
            detail: e.to_string(),
        })?;
        let numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        if numbers.is_empty() {
            return Err(PipelineError::Split {
                name: source.name().to_string(),
                detail: "document has no pages".into(),
            });
        }

        let mut outcome = SplitOutcome::default();
        for (ordinal, &number) in numbers.iter().enumerate() {
            let index = ordinal + 1;
            match self.write_page(&doc, &numbers, number, source.stem(), index) {
                Ok(unit) => {
                    debug!("Wrote {}", unit.path.display());
                    outcome.units.push(unit);
                }
                Err(detail) => {
                    warn!("Page {} of {} failed: {}", index, source.name(), detail);
                    outcome.failures.push(UnitError::PageFailed {
                        document: source.name().to_string(),
                        page: index,
                        detail,
                    });
                }
            }
        }
        Ok(outcome)
    }

    fn write_page(
        &self,
        doc: &Document,
        all: &[u32],
        keep: u32,
        stem: &str,
        index: usize,
    ) -> Result<Unit, String> {
        let content = single_page(doc, all, keep)?;
        let name = unit_file_name(stem, index);
        let path = self.out_dir.join(&name);
        write_atomic(&path, &content).map_err(|e| e.to_string())?;
        Ok(Unit {
            name,
            source: stem.to_string(),
            index,
            path,
            content,
        })
    }
}

/// Serialise a copy of `doc` that only keeps page `keep`.
fn single_page(doc: &Document, all: &[u32], keep: u32) -> Result<Vec<u8>, String> {
    let mut page_doc = doc.clone();
    let others: Vec<u32> = all.iter().copied().filter(|&n| n != keep).collect();
    page_doc.delete_pages(&others);
    page_doc.prune_objects();
    if page_doc.get_pages().len() != 1 {
        return Err(format!("page {keep} did not survive extraction"));
    }

    let mut bytes = Vec::new();
    page_doc
        .save_to(&mut bytes)
        .map_err(|e| format!("cannot serialise page {keep}: {e}"))?;
    Ok(bytes)
}
