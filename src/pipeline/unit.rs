//! Units and texted units, and the file naming that ties them together.
//!
//! Page `n` of `report.pdf` becomes `report_000n.pdf` in the split
//! directory and `report_000n.md` in the text directory. The fixed-width
//! ordinal makes lexicographic order equal to page order.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Width of the zero-padded page ordinal in unit file names.
pub const ORDINAL_WIDTH: usize = 4;

/// Extension of texted unit files.
pub const TEXT_EXTENSION: &str = "md";

/// File name of unit `index` (1-based) of a source with stem `stem`.
pub fn unit_file_name(stem: &str, index: usize) -> String {
    format!("{stem}_{index:0width$}.pdf", width = ORDINAL_WIDTH)
}

/// Split `report_0003` into (`report`, 3). Names without a numeric
/// suffix keep the whole stem as source and ordinal 0.
fn parse_stem(stem: &str) -> (String, usize) {
    stem.rsplit_once('_')
        .and_then(|(source, ordinal)| {
            let digits_only = !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit());
            digits_only
                .then(|| ordinal.parse().ok())
                .flatten()
                .map(|n| (source.to_string(), n))
        })
        .unwrap_or_else(|| (stem.to_string(), 0))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One single-page PDF produced by the splitter.
#[derive(Debug, Clone)]
pub struct Unit {
    /// File name, e.g. `report_0003.pdf`. Used as `SourceFile` in the table.
    pub name: String,
    /// Name stem of the source document, e.g. `report`.
    pub source: String,
    /// 1-based page ordinal.
    pub index: usize,
    pub path: PathBuf,
    pub content: Vec<u8>,
}

impl Unit {
    /// Load a unit file written by an earlier split.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read(path).map_err(|e| PipelineError::Conversion {
            unit: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let (source, index) = parse_stem(&file_stem(path));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            source,
            index,
            path: path.to_path_buf(),
            content,
        })
    }

    /// File name of this unit's texted counterpart.
    pub fn text_file_name(&self) -> String {
        format!("{}.{}", file_stem(Path::new(&self.name)), TEXT_EXTENSION)
    }
}

/// The text/markdown rendering of a unit.
#[derive(Debug, Clone)]
pub struct TextedUnit {
    /// Name of the originating unit, e.g. `report_0003.pdf`.
    pub unit_name: String,
    pub path: PathBuf,
    pub text: String,
}

impl TextedUnit {
    /// Load a texted unit from the text directory.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Conversion {
            unit: path.display().to_string(),
            detail: format!("cannot read text: {e}"),
        })?;
        Ok(Self {
            unit_name: format!("{}.pdf", file_stem(path)),
            path: path.to_path_buf(),
            text,
        })
    }
}
