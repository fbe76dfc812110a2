//! Status side channel for pipeline runs.
//!
//! The orchestrator reports what it is doing through an injected
//! [`StatusSink`]. Sinks observe; they never influence control flow, and a
//! caller that does not care can pass [`NoopSink`].
//!
//! # Example
//!
//! ```rust
//! use pdf2table::{StatusLog, StatusSink};
//!
//! let log = StatusLog::new();
//! log.notify("Splitting report.pdf");
//! assert!(log.messages()[0].ends_with("Splitting report.pdf"));
//! ```

use crate::orchestrator::Stage;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Receives human-readable status messages and progress ticks.
///
/// Both methods have no-op defaults except `notify`, which every sink
/// must handle.
pub trait StatusSink: Send + Sync {
    /// A status line, e.g. "Converting file 2/5: report_0002.pdf".
    fn notify(&self, message: &str);

    /// Called after each unit of a stage, successful or not.
    ///
    /// # Arguments
    /// * `stage`: the running stage
    /// * `done` : units processed so far
    /// * `total`: units in this batch
    fn on_progress(&self, stage: Stage, done: usize, total: usize) {
        let _ = (stage, done, total);
    }
}

/// Discards everything.
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn notify(&self, _message: &str) {}
}

/// Forwards status lines to `tracing` at INFO level.
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn notify(&self, message: &str) {
        info!(target: "pdf2table::status", "{}", message);
    }
}

/// Collects `[HH:MM:SS] message` lines in memory for display after a run.
#[derive(Default, Clone)]
pub struct StatusLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines collected so far.
    pub fn messages(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl StatusSink for StatusLog {
    fn notify(&self, message: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("[{stamp}] {message}"));
        }
    }
}

/// Shared sink handle as stored by the orchestrator.
pub type SharedSink = Arc<dyn StatusSink>;
