//! The generative-model capability: `invoke(prompt) -> text`.
//!
//! Every backend sits behind [`TextModel`]. The pipeline never branches on
//! the provider; [`resolve_model`] picks one implementation at
//! configuration time and the result is injected into
//! [`crate::pipeline::extract::ExtractionEngine`].
//!
//! ## Retry
//!
//! By default a failed call is not retried: the unit is skipped and the
//! batch continues. With `max_retries > 0` the call is repeated with
//! exponential backoff (`retry_backoff_ms * 2^attempt`).

use crate::config::{ModelConfig, DEFAULT_MODEL};
use crate::error::PipelineError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A configured generative model handle.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Send one prompt and wait for the complete reply.
    async fn invoke(&self, prompt: &str) -> Result<String, PipelineError>;

    /// Short label for logs.
    fn label(&self) -> &str {
        "model"
    }
}

/// [`TextModel`] backed by an `edgequake-llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &ModelConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Single user-turn chat call, bounded by the per-call timeout.
    async fn chat_once(&self, messages: &[ChatMessage]) -> Result<String, String> {
        match timeout(self.call_timeout, self.provider.chat(messages, Some(&self.options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.label, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.call_timeout.as_secs())),
        }
    }

    /// Run `messages` with the configured retry policy.
    pub(crate) async fn chat(&self, messages: &[ChatMessage]) -> Result<String, PipelineError> {
        let start = Instant::now();
        let mut last_err = String::from("no attempt made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.chat_once(messages).await {
                Ok(content) => {
                    debug!("{}: reply after {:?}", self.label, start.elapsed());
                    return Ok(content);
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", self.label, attempt + 1, e);
                    last_err = e;
                }
            }
        }

        Err(PipelineError::ModelInvocation {
            attempts: self.max_retries + 1,
            detail: last_err,
        })
    }
}

#[async_trait]
impl TextModel for ProviderModel {
    async fn invoke(&self, prompt: &str) -> Result<String, PipelineError> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Build `CompletionOptions` from the model config.
fn build_options(config: &ModelConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the configured model into a [`ProviderModel`].
///
/// From most to least specific:
///
/// 1. **Pre-built provider** (`config.provider`).
/// 2. **Named provider + model** (`config.provider_name`); the factory
///    reads the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider_model(config: &ModelConfig) -> Result<ProviderModel, PipelineError> {
    let model_name = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref provider) = config.provider {
        return Ok(ProviderModel::new(Arc::clone(provider), "custom", config));
    }

    if let Some(ref name) = config.provider_name {
        let provider = create_provider(name, model_name)?;
        return Ok(ProviderModel::new(provider, format!("{name}/{model_name}"), config));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = create_provider(&prov, &model)?;
            return Ok(ProviderModel::new(provider, format!("{prov}/{model}"), config));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let provider = create_provider("openai", model_name)?;
            return Ok(ProviderModel::new(provider, format!("openai/{model_name}"), config));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(ProviderModel::new(provider, "auto", config))
}

/// [`resolve_provider_model`] as a shareable trait object.
pub fn resolve_model(config: &ModelConfig) -> Result<Arc<dyn TextModel>, PipelineError> {
    Ok(Arc::new(resolve_provider_model(config)?))
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
