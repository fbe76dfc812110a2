//! End-to-end tests for the stage orchestrator.
//!
//! PDFs are built in memory with lopdf; the converter and the model are
//! scripted fakes, so no test touches the network or a pdfium library.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf2table::{
    ExtractionEngine, Pipeline, PipelineConfig, PipelineError, PipelineState, PromptBuilder,
    SourceDocument, StageOutcome, StatusLog, TextConverter, TextModel, Unit, UnitError,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// A PDF with one page per entry of `pages`, each showing its string.
fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn bulletin() -> SourceDocument {
    SourceDocument::from_bytes(
        "bur.pdf",
        build_pdf(&["first page", "second page", "third page"]),
    )
    .unwrap()
}

/// Converter returning a canned text per page ordinal.
struct ScriptedConverter {
    texts: Vec<&'static str>,
    failing: HashSet<usize>,
    cancel_after_first: Option<Arc<AtomicBool>>,
}

impl ScriptedConverter {
    fn new(texts: Vec<&'static str>) -> Self {
        Self {
            texts,
            failing: HashSet::new(),
            cancel_after_first: None,
        }
    }
}

#[async_trait]
impl TextConverter for ScriptedConverter {
    async fn convert(&self, unit: &Unit) -> Result<String, PipelineError> {
        if let Some(ref flag) = self.cancel_after_first {
            flag.store(true, Ordering::SeqCst);
        }
        if self.failing.contains(&unit.index) {
            return Err(PipelineError::Conversion {
                unit: unit.name.clone(),
                detail: "no text layer".into(),
            });
        }
        let text = self.texts.get(unit.index - 1).copied().unwrap_or_default();
        Ok(format!("{text}\n"))
    }
}

/// Model answering by looking for a marker in the rendered prompt.
struct ScriptedModel;

const PAGE_ONE: &str = "Deliberation no. 101 of 10 January 2024: budget approved.";
const PAGE_TWO: &str = "Minutes of the session. Nothing was decided.";
const PAGE_THREE: &str = "Deliberation no. 303 of 12 March 2024: new director.";
const PAGE_BROKEN: &str = "MODEL-OUTAGE";

#[async_trait]
impl TextModel for ScriptedModel {
    async fn invoke(&self, prompt: &str) -> Result<String, PipelineError> {
        if prompt.contains(PAGE_BROKEN) {
            return Err(PipelineError::ModelInvocation {
                attempts: 1,
                detail: "HTTP 503".into(),
            });
        }
        if prompt.contains("no. 101") {
            return Ok("```json\n[{\"Number\":\"101\",\"Date\":\"2024-01-10\",\
                       \"Description\":\"Budget approved\",\"Page\":\"1\"}]\n```"
                .into());
        }
        if prompt.contains("no. 303") {
            return Ok(r#"Here you go:
[
  {"Number": "303", "Date": "2024-03-12", "Description": "New director"},
  {"Number": "123", "Date": "2023-01-01", "Description": "Example Approval of the budget", "Page": "5"},
  {"Description": "A deliberation without a number"}
]"#
            .into());
        }
        Ok("Sure, here is the data: not actually json".into())
    }
}

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .upload_dir(root.join("uploads"))
        .split_dir(root.join("split_pdf"))
        .text_dir(root.join("markdown"))
        .table_path(root.join("output.csv"))
        .build()
        .unwrap()
}

fn pipeline_with(
    config: PipelineConfig,
    converter: ScriptedConverter,
    log: &StatusLog,
) -> Pipeline {
    let engine = ExtractionEngine::new(Arc::new(ScriptedModel), PromptBuilder::default());
    Pipeline::new(config, Arc::new(converter), engine, Arc::new(log.clone()))
}

fn default_pipeline(root: &Path, log: &StatusLog) -> Pipeline {
    pipeline_with(
        config(root),
        ScriptedConverter::new(vec![PAGE_ONE, PAGE_TWO, PAGE_THREE]),
        log,
    )
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_page_run_appends_two_rows() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);

    let run = pipeline.run_all(&bulletin()).await;

    assert!(run.is_success(), "{run:?}");
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(run.records_written(), 2);
    assert_eq!(files_in(&dir.path().join("uploads")), ["bur.pdf"]);
    assert_eq!(
        files_in(&dir.path().join("split_pdf")),
        ["bur_0001.pdf", "bur_0002.pdf", "bur_0003.pdf"]
    );
    assert_eq!(
        files_in(&dir.path().join("markdown")),
        ["bur_0001.md", "bur_0002.md", "bur_0003.md"]
    );

    let rows = pipeline.table().read_all().unwrap();
    let summary: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.number.as_str(), r.source_file.as_str()))
        .collect();
    assert_eq!(summary, [("101", "bur_0001.pdf"), ("303", "bur_0003.pdf")]);
    assert_eq!(rows[1].page, None);

    let extract = &run.stages[2];
    assert_eq!(extract.attempted, 3);
    assert_eq!(extract.succeeded, 3);
    assert!(extract.errors.is_empty());
}

#[tokio::test]
async fn stages_report_through_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);
    pipeline.run_all(&bulletin()).await;

    let messages = log.messages();
    assert!(messages
        .iter()
        .any(|m| m.ends_with("Converting file 2/3: bur_0002.pdf")));
    assert!(messages
        .iter()
        .any(|m| m.ends_with("Extracting file 3/3: bur_0003.md")));
}

#[tokio::test]
async fn stages_without_input_fail_their_precondition() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);

    let convert = pipeline.convert().await;
    assert!(matches!(convert.outcome, StageOutcome::PreconditionFailed(_)));
    assert_eq!(pipeline.state(), PipelineState::Failed(pdf2table::Stage::Converting));

    let extract = pipeline.extract().await;
    assert!(matches!(extract.outcome, StageOutcome::PreconditionFailed(_)));
    assert_eq!(extract.attempted, 0);
    assert!(!pipeline.table().path().exists());

    let split = pipeline.split_uploads().await;
    assert!(matches!(split.outcome, StageOutcome::PreconditionFailed(_)));
}

#[tokio::test]
async fn stages_run_independently() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);

    let split = pipeline.split(&bulletin()).await;
    assert!(split.is_success());
    assert_eq!((split.attempted, split.succeeded), (3, 3));
    assert_eq!(pipeline.state(), PipelineState::Splitting);

    let convert = pipeline.convert().await;
    assert_eq!((convert.attempted, convert.succeeded), (3, 3));

    let first = pipeline.extract().await;
    assert_eq!(first.records_written, 2);
    let before = pipeline.table().read_all().unwrap();

    // Re-running extraction only appends; earlier rows stay a prefix.
    let second = pipeline.extract().await;
    assert_eq!(second.records_written, 2);
    let after = pipeline.table().read_all().unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(&after[..2], &before[..]);
}

#[tokio::test]
async fn conversion_failure_skips_only_that_unit() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut converter = ScriptedConverter::new(vec![PAGE_ONE, PAGE_TWO, PAGE_THREE]);
    converter.failing.insert(1);
    let mut pipeline = pipeline_with(config(dir.path()), converter, &log);

    let run = pipeline.run_all(&bulletin()).await;
    assert!(run.is_success());

    let convert = &run.stages[1];
    assert_eq!((convert.attempted, convert.succeeded, convert.failed), (3, 2, 1));
    assert!(matches!(
        &convert.errors[0],
        UnitError::ConversionFailed { unit, .. } if unit == "bur_0001.pdf"
    ));
    assert!(log
        .messages()
        .iter()
        .any(|m| m.contains("Warning: bur_0001.pdf: conversion failed")));

    let rows = pipeline.table().read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_file, "bur_0003.pdf");
}

#[tokio::test]
async fn model_failure_skips_only_that_unit() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let converter = ScriptedConverter::new(vec![PAGE_BROKEN, PAGE_TWO, PAGE_THREE]);
    let mut pipeline = pipeline_with(config(dir.path()), converter, &log);

    let run = pipeline.run_all(&bulletin()).await;
    assert!(run.is_success());

    let extract = &run.stages[2];
    assert_eq!((extract.attempted, extract.succeeded, extract.failed), (3, 2, 1));
    assert!(matches!(
        &extract.errors[0],
        UnitError::ModelFailed { unit, .. } if unit == "bur_0001.pdf"
    ));
    assert_eq!(pipeline.table().row_count().unwrap(), 1);
}

#[tokio::test]
async fn table_write_failure_is_reported_with_lost_records() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let config = PipelineConfig::builder()
        .upload_dir(dir.path().join("uploads"))
        .split_dir(dir.path().join("split_pdf"))
        .text_dir(dir.path().join("markdown"))
        .table_path(blocker.join("output.csv"))
        .build()
        .unwrap();
    let log = StatusLog::new();
    let mut pipeline = pipeline_with(
        config,
        ScriptedConverter::new(vec![PAGE_ONE, PAGE_TWO, PAGE_THREE]),
        &log,
    );

    let run = pipeline.run_all(&bulletin()).await;
    let extract = &run.stages[2];
    assert_eq!(extract.outcome, StageOutcome::Completed);
    assert_eq!(extract.records_written, 0);
    assert_eq!(extract.records_lost, 2);
    // Page two had nothing to write, so it still counts as a success.
    assert_eq!(extract.succeeded, 1);
    assert!(extract
        .errors
        .iter()
        .all(|e| matches!(e, UnitError::PersistenceFailed { records_lost: 1, .. })));
}

#[tokio::test]
async fn run_stops_at_the_first_failed_stage() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    let config = PipelineConfig::builder()
        .upload_dir(blocker.join("uploads"))
        .split_dir(dir.path().join("split_pdf"))
        .text_dir(dir.path().join("markdown"))
        .table_path(dir.path().join("output.csv"))
        .build()
        .unwrap();
    let log = StatusLog::new();
    let mut pipeline = pipeline_with(
        config,
        ScriptedConverter::new(vec![PAGE_ONE, PAGE_TWO, PAGE_THREE]),
        &log,
    );

    let run = pipeline.run_all(&bulletin()).await;
    assert_eq!(run.stages.len(), 1);
    assert!(matches!(run.stages[0].outcome, StageOutcome::Aborted(_)));
    assert_eq!(
        pipeline.state(),
        PipelineState::Failed(pdf2table::Stage::Splitting)
    );
    assert!(!dir.path().join("split_pdf").exists());
}

#[tokio::test]
async fn cancelled_stage_attempts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);
    pipeline.split(&bulletin()).await;

    pipeline.cancel_handle().store(true, Ordering::SeqCst);
    let convert = pipeline.convert().await;
    assert_eq!(convert.outcome, StageOutcome::Cancelled);
    assert_eq!(convert.attempted, 0);
    assert!(files_in(&dir.path().join("markdown")).is_empty());
    assert_eq!(
        pipeline.state(),
        PipelineState::Failed(pdf2table::Stage::Converting)
    );
}

#[tokio::test]
async fn cancellation_lets_the_current_unit_finish() {
    let dir = tempfile::tempdir().unwrap();
    let log = StatusLog::new();
    let flag = Arc::new(AtomicBool::new(false));
    let mut converter = ScriptedConverter::new(vec![PAGE_ONE, PAGE_TWO, PAGE_THREE]);
    converter.cancel_after_first = Some(Arc::clone(&flag));
    let mut pipeline =
        pipeline_with(config(dir.path()), converter, &log).with_cancel_flag(Arc::clone(&flag));

    pipeline.split(&bulletin()).await;
    let convert = pipeline.convert().await;

    assert_eq!(convert.outcome, StageOutcome::Cancelled);
    assert_eq!((convert.attempted, convert.succeeded), (1, 1));
    assert_eq!(files_in(&dir.path().join("markdown")), ["bur_0001.md"]);
}

#[tokio::test]
async fn split_uploads_survives_a_broken_document() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::write(uploads.join("alpha.pdf"), build_pdf(&["a1", "a2"])).unwrap();
    std::fs::write(uploads.join("beta.pdf"), b"%PDF-1.4 truncated").unwrap();
    std::fs::write(uploads.join("gamma.pdf"), build_pdf(&["g1"])).unwrap();
    std::fs::write(uploads.join("notes.txt"), b"ignored").unwrap();

    let log = StatusLog::new();
    let mut pipeline = default_pipeline(dir.path(), &log);
    let report = pipeline.split_uploads().await;

    assert!(report.is_success());
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].subject().ends_with("beta.pdf"));
    assert_eq!(
        files_in(&dir.path().join("split_pdf")),
        ["alpha_0001.pdf", "alpha_0002.pdf", "gamma_0001.pdf"]
    );
}
