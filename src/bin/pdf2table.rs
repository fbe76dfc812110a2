//! CLI binary for pdf2table.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs the requested stages and prints their reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2table::{
    ConverterKind, NoopSink, Pipeline, PipelineConfig, SharedSink, SourceDocument, Stage,
    StageReport, StatusSink, TracingSink,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Status sink rendering an indicatif bar ───────────────────────────────────

/// Prints status lines above a progress bar that tracks the running stage.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl StatusSink for BarSink {
    fn notify(&self, message: &str) {
        self.bar.println(format!("  {} {}", cyan("·"), dim(message)));
    }

    fn on_progress(&self, stage: Stage, done: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
            self.bar.reset_eta();
        }
        self.bar.set_prefix(capitalise(&stage.to_string()));
        self.bar.set_position(done as u64);
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole pipeline on one document
  pdf2table run bulletin.pdf --table deliberations.csv

  # Download, then split only
  pdf2table split https://example.org/bur/2024/n12.pdf

  # Split every PDF already in the upload directory
  pdf2table split

  # Scanned pages: transcribe with a vision model
  pdf2table convert --converter vision --model gpt-4o

  # Re-run extraction with a custom prompt, JSON report on stdout
  pdf2table extract --prompt-template prompt.txt --json

ENVIRONMENT VARIABLES:
  SOURCE_DIR              Upload directory (default: uploads)
  SPLIT_PDF_DIR           Split-unit directory (default: split_pdf)
  DESTINATION_DIR         Converted-text directory (default: markdown)
  PDF2TABLE_TABLE         Output CSV table (default: output.csv)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium for --converter vision
"#;

/// Extract structured records from PDF documents into a CSV table.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2table",
    version,
    about = "Extract structured records from PDF documents into a CSV table using LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory the source PDF is saved into before splitting.
    #[arg(long, global = true, env = "SOURCE_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory holding one PDF per page.
    #[arg(long, global = true, env = "SPLIT_PDF_DIR", default_value = "split_pdf")]
    split_dir: PathBuf,

    /// Directory holding the converted text of each page.
    #[arg(long, global = true, env = "DESTINATION_DIR", default_value = "markdown")]
    text_dir: PathBuf,

    /// CSV table the records are appended to.
    #[arg(long, global = true, env = "PDF2TABLE_TABLE", default_value = "output.csv")]
    table: PathBuf,

    /// How pages are turned into text.
    #[arg(long, global = true, env = "PDF2TABLE_CONVERTER", value_enum, default_value = "text")]
    converter: ConverterArg,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Retries per model call (0 = skip the page on the first failure).
    #[arg(long, global = true, env = "PDF2TABLE_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "PDF2TABLE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "PDF2TABLE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "PDF2TABLE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "PDF2TABLE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Text file with a custom extraction prompt containing `{text}`.
    #[arg(long, global = true, env = "PDF2TABLE_PROMPT_TEMPLATE")]
    prompt_template: Option<PathBuf>,

    /// Print stage reports as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF2TABLE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a PDF (path or URL) into one PDF per page. Without INPUT,
    /// split every PDF in the upload directory.
    Split { input: Option<String> },
    /// Convert every split page into text.
    Convert,
    /// Extract records from every converted page and append them to the table.
    Extract,
    /// Split, convert and extract in one go.
    Run { input: String },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConverterArg {
    Text,
    Vision,
}

impl From<ConverterArg> for ConverterKind {
    fn from(v: ConverterArg) -> Self {
        match v {
            ConverterArg::Text => ConverterKind::TextLayer,
            ConverterArg::Vision => ConverterKind::Vision,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would fight with the progress bar; the bar's status lines
    // replace them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    let bar = show_progress.then(BarSink::new);
    let sink: SharedSink = match bar {
        Some(ref bar) => Arc::clone(bar) as SharedSink,
        None if cli.quiet || cli.json => Arc::new(NoopSink),
        None => Arc::new(TracingSink),
    };

    let mut pipeline =
        Pipeline::from_config(config, sink).context("Failed to set up the pipeline")?;

    // Ctrl-C lets the current page finish, then stops the stage.
    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let reports = match cli.command {
        Command::Split { input: Some(ref input) } => {
            let source = SourceDocument::resolve(input, cli.download_timeout)
                .await
                .with_context(|| format!("Failed to load {input}"))?;
            vec![pipeline.split(&source).await]
        }
        Command::Split { input: None } => vec![pipeline.split_uploads().await],
        Command::Convert => vec![pipeline.convert().await],
        Command::Extract => vec![pipeline.extract().await],
        Command::Run { ref input } => {
            let source = SourceDocument::resolve(input, cli.download_timeout)
                .await
                .with_context(|| format!("Failed to load {input}"))?;
            pipeline.run_all(&source).await.stages
        }
    };

    if let Some(bar) = bar {
        bar.finish();
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?;
        println!("{json}");
    } else if !cli.quiet {
        for report in &reports {
            print_report(report);
        }
    }

    if let Some(failed) = reports.iter().find(|r| !r.is_success()) {
        anyhow::bail!("Stage {} did not complete: {:?}", failed.stage, failed.outcome);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .upload_dir(&cli.upload_dir)
        .split_dir(&cli.split_dir)
        .text_dir(&cli.text_dir)
        .table_path(&cli.table)
        .converter(cli.converter.into())
        .download_timeout_secs(cli.download_timeout)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.prompt_template {
        builder = builder.prompt_template(path);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }

    builder.build().context("Invalid configuration")
}

fn print_report(report: &StageReport) {
    let mark = if !report.is_success() {
        red("✘")
    } else if report.failed > 0 {
        cyan("⚠")
    } else {
        green("✔")
    };

    let mut line = format!(
        "{} {:<11} {}/{} succeeded",
        mark,
        bold(&report.stage.to_string()),
        report.succeeded,
        report.attempted
    );
    if report.stage == Stage::Extracting {
        line.push_str(&format!("  {} record(s) written", report.records_written));
        if report.records_lost > 0 {
            line.push_str(&format!("  {}", red(&format!("{} lost", report.records_lost))));
        }
    }
    eprintln!("{line}");

    if !report.is_success() {
        eprintln!("    {}", red(&format!("{:?}", report.outcome)));
    }
    for error in &report.errors {
        eprintln!("    {} {}", red("✗"), dim(&error.to_string()));
    }
}
