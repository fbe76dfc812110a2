//! Unit → text conversion.
//!
//! [`TextConverter`] is the capability the orchestrator consumes. Two
//! implementations ship with the crate:
//!
//! | Kind | Implementation | Needs |
//! |------|----------------|-------|
//! | `text`   | [`TextLayerConverter`] | nothing; reads the embedded text layer with lopdf |
//! | `vision` | [`super::vision::VisionConverter`] | a pdfium library and a vision-capable model |
//!
//! Scanned pages have no text layer; use the vision converter for those.

use super::tidy::tidy_markdown;
use super::unit::Unit;
use super::vision::VisionConverter;
use crate::config::{ConverterKind, PipelineConfig};
use crate::error::PipelineError;
use crate::model::resolve_provider_model;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Converts one single-page unit into text or markdown.
#[async_trait]
pub trait TextConverter: Send + Sync {
    async fn convert(&self, unit: &Unit) -> Result<String, PipelineError>;
}

/// Reads the PDF text layer of a unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLayerConverter;

#[async_trait]
impl TextConverter for TextLayerConverter {
    async fn convert(&self, unit: &Unit) -> Result<String, PipelineError> {
        let name = unit.name.clone();
        let content = unit.content.clone();

        // lopdf parsing is CPU-bound; keep it off the async workers.
        let text = tokio::task::spawn_blocking(move || extract_text_layer(&content))
            .await
            .map_err(|e| PipelineError::Internal(format!("Text extraction task panicked: {e}")))?
            .map_err(|detail| PipelineError::Conversion {
                unit: name,
                detail,
            })?;

        debug!("{}: {} chars of text layer", unit.name, text.len());
        Ok(tidy_markdown(&text))
    }
}

fn extract_text_layer(content: &[u8]) -> Result<String, String> {
    let doc = lopdf::Document::load_mem(content).map_err(|e| format!("cannot parse unit: {e}"))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err("unit has no pages".into());
    }
    doc.extract_text(&pages)
        .map_err(|e| format!("cannot read text layer: {e}"))
}

/// Build the converter selected by `config.converter`.
///
/// The vision converter resolves its own model handle from
/// `config.model`, so a missing provider fails here rather than on the
/// first unit.
pub fn build_converter(config: &PipelineConfig) -> Result<Arc<dyn TextConverter>, PipelineError> {
    match config.converter {
        ConverterKind::TextLayer => Ok(Arc::new(TextLayerConverter)),
        ConverterKind::Vision => {
            let model = resolve_provider_model(&config.model)?;
            Ok(Arc::new(VisionConverter::new(
                Arc::new(model),
                config.max_rendered_pixels,
            )))
        }
    }
}
