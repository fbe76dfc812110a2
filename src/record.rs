//! The structured output of the extraction stage.

use serde::{Deserialize, Serialize};

/// Column order of the output table.
pub const TABLE_HEADER: [&str; 5] = ["Number", "Date", "Description", "Page", "SourceFile"];

/// One validated record extracted from one texted unit.
///
/// `number` is always non-empty; `source_file` is attached by the
/// extraction engine and never taken from the model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(rename = "Number")]
    pub number: String,
    #[serde(rename = "Date")]
    pub date: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
    #[serde(rename = "Page")]
    pub page: Option<String>,
    #[serde(rename = "SourceFile")]
    pub source_file: String,
}
