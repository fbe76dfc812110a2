//! # pdf2table
//!
//! Turn PDF documents into rows of a CSV table with a generative model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Split    one single-page PDF per page (lopdf)
//!  ├─ 2. Convert  page → text, from the text layer or a vision model
//!  ├─ 3. Extract  prompt the model, clean and validate its JSON reply
//!  └─ 4. Append   validated records go to the end of the CSV table
//! ```
//!
//! Every stage reads the previous stage's output from disk, so stages can
//! be run, inspected and re-run independently. A page that fails in any
//! stage is reported and skipped; the rest of the batch carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2table::{Pipeline, PipelineConfig, SourceDocument, StatusLog};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = PipelineConfig::builder().table_path("deliberations.csv").build()?;
//!     let log = StatusLog::new();
//!     let mut pipeline = Pipeline::from_config(config, Arc::new(log.clone()))?;
//!
//!     let source = SourceDocument::resolve("bulletin.pdf", 120).await?;
//!     let report = pipeline.run_all(&source).await;
//!     eprintln!("{} record(s) written", report.records_written());
//!     for line in log.messages() {
//!         eprintln!("{line}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2table` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! pdf2table = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod status;
pub mod table;

#[cfg(test)]
pub(crate) mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterKind, ModelConfig, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, UnitError};
pub use model::{resolve_model, ProviderModel, TextModel};
pub use orchestrator::{Pipeline, PipelineState, RunReport, Stage, StageOutcome, StageReport};
pub use pipeline::convert::{TextConverter, TextLayerConverter};
pub use pipeline::extract::ExtractionEngine;
pub use pipeline::input::SourceDocument;
pub use pipeline::split::{PageSplitter, SplitOutcome};
pub use pipeline::unit::{TextedUnit, Unit};
pub use prompts::PromptBuilder;
pub use record::ExtractionRecord;
pub use status::{NoopSink, SharedSink, StatusLog, StatusSink, TracingSink};
pub use table::TableWriter;
