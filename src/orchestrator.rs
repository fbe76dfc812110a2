//! Stage-by-stage driver: split → convert → extract.
//!
//! ```text
//!  Idle ──split──▶ Splitting ──convert──▶ Converting ──extract──▶ Extracting ──▶ Done
//!                     │                      │                       │
//!                     └──────────────────────┴───────────────────────┴──▶ Failed(stage)
//! ```
//!
//! Every stage is invocable on its own and works on whatever the previous
//! stage left on disk, so a failed run can be resumed from any stage.
//! Within a stage units are processed one at a time in file-name order.
//! A unit that fails is recorded in the [`StageReport`] and the stage
//! moves on; only a missing prerequisite, an unreadable source document
//! or cancellation ends a stage early.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, UnitError};
use crate::model::resolve_model;
use crate::persist::{list_files, write_atomic};
use crate::pipeline::convert::{build_converter, TextConverter};
use crate::pipeline::extract::ExtractionEngine;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::split::PageSplitter;
use crate::pipeline::unit::{TextedUnit, Unit, TEXT_EXTENSION};
use crate::prompts::PromptBuilder;
use crate::status::SharedSink;
use crate::table::TableWriter;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// One of the three batch stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Splitting,
    Converting,
    Extracting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Splitting => "splitting",
            Stage::Converting => "converting",
            Stage::Extracting => "extracting",
        };
        f.write_str(name)
    }
}

/// Where the orchestrator is.
///
/// While a stage runs the state names it. A successful extraction moves
/// to `Done`; a batch-level failure moves to `Failed(stage)`. Other
/// successful stages leave the state on the stage that just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Splitting,
    Converting,
    Extracting,
    Done,
    Failed(Stage),
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Splitting => PipelineState::Splitting,
            Stage::Converting => PipelineState::Converting,
            Stage::Extracting => PipelineState::Extracting,
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Every unit was attempted. Individual units may still have failed.
    Completed,
    /// The stage had nothing to work on.
    PreconditionFailed(String),
    /// The batch could not be processed at all.
    Aborted(String),
    /// The cancellation flag was raised before every unit was attempted.
    Cancelled,
}

/// Summary of one stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// Units (pages, files) the stage tried to process.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows appended to the table (extraction only).
    pub records_written: usize,
    /// Rows extracted but not persisted (extraction only).
    pub records_lost: usize,
    pub errors: Vec<UnitError>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Completed,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            records_written: 0,
            records_lost: 0,
            errors: Vec::new(),
        }
    }

    fn with_outcome(stage: Stage, outcome: StageOutcome) -> Self {
        Self {
            outcome,
            ..Self::new(stage)
        }
    }

    fn record_failure(&mut self, error: UnitError) {
        warn!("{}", error);
        self.failed += 1;
        self.errors.push(error);
    }

    /// `true` unless the stage failed as a batch. Per-unit failures are
    /// tolerated.
    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Completed
    }
}

/// Reports of the stages run by [`Pipeline::run_all`], in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.stages.len() == 3 && self.stages.iter().all(StageReport::is_success)
    }

    pub fn records_written(&self) -> usize {
        self.stages.iter().map(|s| s.records_written).sum()
    }

    /// The stage that stopped the run, if any.
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| !s.is_success())
    }
}

/// Drives the batch stages over the configured directories.
pub struct Pipeline {
    config: PipelineConfig,
    splitter: PageSplitter,
    converter: Arc<dyn TextConverter>,
    engine: ExtractionEngine,
    table: TableWriter,
    sink: SharedSink,
    state: PipelineState,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit components.
    pub fn new(
        config: PipelineConfig,
        converter: Arc<dyn TextConverter>,
        engine: ExtractionEngine,
        sink: SharedSink,
    ) -> Self {
        Self {
            splitter: PageSplitter::new(&config.split_dir),
            table: TableWriter::new(&config.table_path),
            config,
            converter,
            engine,
            sink,
            state: PipelineState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve the model, prompt template and converter from `config`.
    pub fn from_config(config: PipelineConfig, sink: SharedSink) -> Result<Self, PipelineError> {
        let model = resolve_model(&config.model)?;
        let prompts = match config.prompt_template {
            Some(ref path) => PromptBuilder::from_file(path),
            None => PromptBuilder::default(),
        };
        let converter = build_converter(&config)?;
        let engine = ExtractionEngine::new(model, prompts);
        Ok(Self::new(config, converter, engine, sink))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn table(&self) -> &TableWriter {
        &self.table
    }

    /// Flag checked before each unit. Setting it lets the in-flight unit
    /// finish and ends the stage with [`StageOutcome::Cancelled`].
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Use `flag` as the cancellation flag, e.g. one shared with a signal
    /// handler installed before the pipeline was built.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn notify(&self, message: &str) {
        self.sink.notify(message);
    }

    fn unit_failed(&self, report: &mut StageReport, error: UnitError) {
        self.notify(&format!("Warning: {error}"));
        report.record_failure(error);
    }

    fn begin(&mut self, stage: Stage) {
        self.state = stage.into();
        info!("Stage {} started", stage);
    }

    fn finish(&mut self, report: StageReport) -> StageReport {
        self.state = match (&report.outcome, report.stage) {
            (StageOutcome::Completed, Stage::Extracting) => PipelineState::Done,
            (StageOutcome::Completed, stage) => stage.into(),
            (_, stage) => PipelineState::Failed(stage),
        };
        info!(
            "Stage {} finished: {}/{} succeeded ({:?})",
            report.stage, report.succeeded, report.attempted, report.outcome
        );
        report
    }

    // ── Splitting ─────────────────────────────────────────────────────────

    /// Save `source` into the upload directory and split it into units.
    pub async fn split(&mut self, source: &SourceDocument) -> StageReport {
        self.begin(Stage::Splitting);
        if self.cancelled() {
            return self.finish(StageReport::with_outcome(Stage::Splitting, StageOutcome::Cancelled));
        }

        if let Err(e) = source.save_to(&self.config.upload_dir) {
            self.notify(&format!("Cannot save {}: {}", source.name(), e));
            return self.finish(StageReport::with_outcome(
                Stage::Splitting,
                StageOutcome::Aborted(e.to_string()),
            ));
        }

        let mut report = StageReport::new(Stage::Splitting);
        if let Err(e) = self.split_one(source, &mut report).await {
            report.outcome = StageOutcome::Aborted(e.to_string());
        }
        self.finish(report)
    }

    /// Split every PDF found in the upload directory.
    ///
    /// A document that cannot be read or split is recorded and the next
    /// one is tried.
    pub async fn split_uploads(&mut self) -> StageReport {
        self.begin(Stage::Splitting);
        let documents = match list_files(&self.config.upload_dir, "pdf") {
            Ok(files) if files.is_empty() => {
                let reason = format!("no PDF in {}", self.config.upload_dir.display());
                self.notify(&format!("Nothing to split: {reason}"));
                return self.finish(StageReport::with_outcome(
                    Stage::Splitting,
                    StageOutcome::PreconditionFailed(reason),
                ));
            }
            Ok(files) => files,
            Err(e) => {
                return self.finish(StageReport::with_outcome(
                    Stage::Splitting,
                    StageOutcome::Aborted(e.to_string()),
                ))
            }
        };

        let mut report = StageReport::new(Stage::Splitting);
        for path in &documents {
            if self.cancelled() {
                report.outcome = StageOutcome::Cancelled;
                break;
            }
            let loaded = SourceDocument::from_path(path);
            let result = match loaded {
                Ok(source) => self.split_one(&source, &mut report).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                report.attempted += 1;
                self.unit_failed(&mut report, UnitError::SplitFailed {
                    document: path.display().to_string(),
                    detail: e.to_string(),
                });
            }
        }
        self.finish(report)
    }

    async fn split_one(
        &self,
        source: &SourceDocument,
        report: &mut StageReport,
    ) -> Result<(), PipelineError> {
        self.notify(&format!(
            "Splitting {} ({} page(s))",
            source.name(),
            source.page_count()
        ));

        let splitter = self.splitter.clone();
        let owned = source.clone();
        let outcome = tokio::task::spawn_blocking(move || splitter.split(&owned))
            .await
            .map_err(|e| PipelineError::Internal(format!("Split task panicked: {e}")))??;

        report.attempted += outcome.units.len() + outcome.failures.len();
        report.succeeded += outcome.units.len();
        for failure in outcome.failures {
            self.unit_failed(report, failure);
        }
        self.sink
            .on_progress(Stage::Splitting, report.attempted, report.attempted);
        self.notify(&format!(
            "{}: {} unit(s) written to {}",
            source.name(),
            outcome.units.len(),
            self.splitter.out_dir().display()
        ));
        Ok(())
    }

    // ── Converting ────────────────────────────────────────────────────────

    /// Convert every unit in the split directory into a texted unit.
    pub async fn convert(&mut self) -> StageReport {
        self.begin(Stage::Converting);
        let files = match self.inputs(Stage::Converting, &self.config.split_dir, "pdf") {
            Ok(files) => files,
            Err(report) => return self.finish(report),
        };

        let total = files.len();
        let mut report = StageReport::new(Stage::Converting);
        for (i, path) in files.iter().enumerate() {
            if self.cancelled() {
                report.outcome = StageOutcome::Cancelled;
                break;
            }
            report.attempted += 1;

            let name = file_name(path);
            self.notify(&format!("Converting file {}/{}: {}", i + 1, total, name));
            match self.convert_one(path).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => self.unit_failed(&mut report, UnitError::ConversionFailed {
                    unit: name,
                    detail: e.to_string(),
                }),
            }
            self.sink.on_progress(Stage::Converting, i + 1, total);
        }

        self.notify(&format!(
            "Converted {}/{} file(s) into {}",
            report.succeeded,
            report.attempted,
            self.config.text_dir.display()
        ));
        self.finish(report)
    }

    async fn convert_one(&self, path: &Path) -> Result<(), PipelineError> {
        let unit = Unit::load(path)?;
        let text = self.converter.convert(&unit).await?;
        let out = self.config.text_dir.join(unit.text_file_name());
        write_atomic(&out, text.as_bytes())
    }

    // ── Extracting ────────────────────────────────────────────────────────

    /// Extract records from every texted unit and append them to the table.
    pub async fn extract(&mut self) -> StageReport {
        self.begin(Stage::Extracting);
        let files = match self.inputs(Stage::Extracting, &self.config.text_dir, TEXT_EXTENSION) {
            Ok(files) => files,
            Err(report) => return self.finish(report),
        };

        let total = files.len();
        let mut report = StageReport::new(Stage::Extracting);
        for (i, path) in files.iter().enumerate() {
            if self.cancelled() {
                report.outcome = StageOutcome::Cancelled;
                break;
            }
            report.attempted += 1;
            self.notify(&format!(
                "Extracting file {}/{}: {}",
                i + 1,
                total,
                file_name(path)
            ));
            self.extract_one(path, &mut report).await;
            self.sink.on_progress(Stage::Extracting, i + 1, total);
        }

        self.notify(&format!(
            "Extraction complete: {} record(s) appended to {}",
            report.records_written,
            self.table.path().display()
        ));
        self.finish(report)
    }

    async fn extract_one(&self, path: &Path, report: &mut StageReport) {
        let texted = match TextedUnit::load(path) {
            Ok(texted) => texted,
            Err(e) => {
                self.unit_failed(report, UnitError::ConversionFailed {
                    unit: file_name(path),
                    detail: e.to_string(),
                });
                return;
            }
        };

        let records = match self.engine.extract(&texted.text, &texted.unit_name).await {
            Ok(records) => records,
            Err(e) => {
                self.unit_failed(report, UnitError::ModelFailed {
                    unit: texted.unit_name,
                    detail: e.to_string(),
                });
                return;
            }
        };

        match self.table.append(&records) {
            Ok(written) => {
                report.succeeded += 1;
                report.records_written += written;
                self.notify(&format!(
                    "{}: {} record(s) appended",
                    texted.unit_name, written
                ));
            }
            Err(e) => {
                report.records_lost += records.len();
                self.unit_failed(report, UnitError::PersistenceFailed {
                    unit: texted.unit_name,
                    records_lost: records.len(),
                    detail: e.to_string(),
                });
            }
        }
    }

    /// Input files of a stage, or the report that ends it.
    fn inputs(
        &self,
        stage: Stage,
        dir: &Path,
        extension: &str,
    ) -> Result<Vec<PathBuf>, StageReport> {
        match list_files(dir, extension) {
            Ok(files) if files.is_empty() => {
                let reason = format!("no .{} file in {}", extension, dir.display());
                self.notify(&format!("Cannot start {stage}: {reason}"));
                Err(StageReport::with_outcome(
                    stage,
                    StageOutcome::PreconditionFailed(reason),
                ))
            }
            Ok(files) => Ok(files),
            Err(e) => Err(StageReport::with_outcome(
                stage,
                StageOutcome::Aborted(e.to_string()),
            )),
        }
    }

    // ── Whole run ─────────────────────────────────────────────────────────

    /// Split `source`, convert, extract. Stops after the first stage that
    /// fails as a batch.
    pub async fn run_all(&mut self, source: &SourceDocument) -> RunReport {
        let mut run = RunReport::default();

        let split = self.split(source).await;
        let ok = split.is_success();
        run.stages.push(split);
        if !ok {
            return run;
        }

        let convert = self.convert().await;
        let ok = convert.is_success();
        run.stages.push(convert);
        if !ok {
            return run;
        }

        run.stages.push(self.extract().await);
        run
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
