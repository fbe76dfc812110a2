//! Configuration types for the extraction pipeline.
//!
//! Every location and knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Nothing in the library reads directories
//! from the environment on its own; the CLI maps flags and env vars onto
//! the builder.

use crate::error::PipelineError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Model used when a provider is named or auto-detected without a model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a pipeline run.
///
/// # Example
/// ```rust
/// use pdf2table::{ConverterKind, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .upload_dir("uploads")
///     .split_dir("work/pages")
///     .text_dir("work/text")
///     .table_path("deliberations.csv")
///     .converter(ConverterKind::TextLayer)
///     .build()
///     .unwrap();
/// assert_eq!(config.model.max_retries, 0);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where source documents are saved before splitting. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Where single-page unit PDFs are written. Default: `split_pdf`.
    pub split_dir: PathBuf,

    /// Where converted markdown files are written. Default: `markdown`.
    pub text_dir: PathBuf,

    /// CSV table that extracted records are appended to. Default: `output.csv`.
    pub table_path: PathBuf,

    /// Which text converter the convert stage uses. Default: text layer.
    pub converter: ConverterKind,

    /// Optional extraction prompt template file containing `{text}`.
    pub prompt_template: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Longest edge of a rendered page for the vision converter. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Generative model settings.
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            split_dir: PathBuf::from("split_pdf"),
            text_dir: PathBuf::from("markdown"),
            table_path: PathBuf::from("output.csv"),
            converter: ConverterKind::default(),
            prompt_template: None,
            download_timeout_secs: 120,
            max_rendered_pixels: 2000,
            model: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Settings for the generative-model capability.
///
/// Resolved once into a [`crate::model::TextModel`] handle by
/// [`crate::model::resolve_model`].
#[derive(Clone)]
pub struct ModelConfig {
    /// Provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Model identifier. If None, [`DEFAULT_MODEL`] is used.
    pub model: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (greedy).
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries after a failed model call. Default: 0.
    ///
    /// The pipeline skips a failing unit and continues. Set this above
    /// zero to retry with exponential backoff first.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn split_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.split_dir = dir.into();
        self
    }

    pub fn text_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.text_dir = dir.into();
        self
    }

    pub fn table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.table_path = path.into();
        self
    }

    pub fn converter(mut self, kind: ConverterKind) -> Self {
        self.config.converter = kind;
        self
    }

    pub fn prompt_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.prompt_template = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.model.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.model.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.model.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.model.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.model.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.model.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        let dirs = [
            ("upload_dir", &c.upload_dir),
            ("split_dir", &c.split_dir),
            ("text_dir", &c.text_dir),
        ];
        for (name, dir) in dirs {
            if dir.as_os_str().is_empty() {
                return Err(PipelineError::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if same_dir(&c.split_dir, &c.text_dir) {
            return Err(PipelineError::InvalidConfig(
                "split_dir and text_dir must be different directories".into(),
            ));
        }
        if c.table_path.file_name().is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "table_path {:?} does not name a file",
                c.table_path
            )));
        }
        if c.model.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.model.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    a.components().eq(b.components())
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the convert stage turns a unit PDF into text.
///
/// | Kind | Needs | Best for |
/// |------|-------|----------|
/// | `TextLayer` | nothing | born-digital PDFs with a text layer (default) |
/// | `Vision` | pdfium library + vision model | scans, complex layouts |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConverterKind {
    /// Read the embedded text layer with lopdf.
    #[default]
    TextLayer,
    /// Rasterise the page and have a vision model transcribe it to Markdown.
    Vision,
}
