//! Error types for the pdf2table library.
//!
//! Two error types reflect two failure scopes:
//!
//! * [`PipelineError`]: one operation cannot proceed (unreadable PDF,
//!   provider not configured, table not writable). Returned as `Err` from
//!   the component APIs.
//!
//! * [`UnitError`]: one unit of a batch failed (a page that would not
//!   convert, a model call that errored, rows that could not be appended).
//!   The orchestrator stores these in [`crate::orchestrator::StageReport`]
//!   and moves on to the next unit.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the pdf2table components.
///
/// Inside a stage loop every variant is downgraded to a [`UnitError`];
/// only preconditions and whole-document failures end a stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── Split errors ──────────────────────────────────────────────────────
    /// The source document cannot be parsed as a container of pages.
    #[error("Cannot split '{name}': {detail}")]
    Split { name: String, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// One unit could not be turned into text.
    #[error("Cannot convert '{unit}' to text: {detail}")]
    Conversion { unit: String, detail: String },

    /// Could not bind to a pdfium library (vision converter only).
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or use the text converter."
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model call failed (network, auth, provider error, timeout).
    #[error("Model invocation failed after {attempts} attempt(s): {detail}")]
    ModelInvocation { attempts: u32, detail: String },

    /// The model reply is not the expected JSON array.
    ///
    /// Never leaves the extraction engine: it is logged and treated as
    /// "no records found".
    #[error("Model reply is not a JSON array: {detail}")]
    MalformedResponse { detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The table (or a unit/text file) could not be written.
    #[error("Failed to write '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing table was written by something else.
    #[error("Table '{path}' has header {found:?}, expected {expected:?}")]
    TableHeaderMismatch {
        path: PathBuf,
        found: Vec<String>,
        expected: Vec<String>,
    },

    /// The existing table or its rows could not be read as CSV.
    #[error("Table '{path}' is not readable as CSV: {detail}")]
    TableFormat { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single unit of a batch.
///
/// Stored in [`crate::orchestrator::StageReport::errors`]. The stage keeps
/// going with the next unit.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// A whole source document could not be split.
    #[error("{document}: split failed: {detail}")]
    SplitFailed { document: String, detail: String },

    /// One page of a source document could not be written as a unit.
    #[error("{document} page {page}: {detail}")]
    PageFailed {
        document: String,
        page: usize,
        detail: String,
    },

    /// The unit could not be converted to text.
    #[error("{unit}: conversion failed: {detail}")]
    ConversionFailed { unit: String, detail: String },

    /// The model call for this unit failed; zero records were extracted.
    #[error("{unit}: model call failed: {detail}")]
    ModelFailed { unit: String, detail: String },

    /// Records were extracted but could not be appended to the table.
    #[error("{unit}: {records_lost} record(s) lost, table write failed: {detail}")]
    PersistenceFailed {
        unit: String,
        records_lost: usize,
        detail: String,
    },
}

impl UnitError {
    /// Name of the document or unit the error belongs to.
    pub fn subject(&self) -> &str {
        match self {
            UnitError::SplitFailed { document, .. } | UnitError::PageFailed { document, .. } => {
                document
            }
            UnitError::ConversionFailed { unit, .. }
            | UnitError::ModelFailed { unit, .. }
            | UnitError::PersistenceFailed { unit, .. } => unit,
        }
    }
}
