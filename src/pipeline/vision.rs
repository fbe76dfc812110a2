//! Vision converter: rasterise a unit with pdfium and let a vision model
//! transcribe it.
//!
//! pdfium keeps thread-local state and blocks, so binding, loading and
//! rendering all happen inside `spawn_blocking`. The longest edge of the
//! rendered page is capped at `max_rendered_pixels` whatever the physical
//! page size.
//!
//! The library is located through `PDFIUM_LIB_PATH` (path to the shared
//! library file) or, failing that, the system library search path.

use super::convert::TextConverter;
use super::tidy::tidy_markdown;
use super::unit::Unit;
use crate::error::PipelineError;
use crate::model::ProviderModel;
use crate::prompts::TRANSCRIBE_SYSTEM_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, ImageData};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming an explicit pdfium library file.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// Transcribes rendered pages with a vision-capable model.
pub struct VisionConverter {
    model: Arc<ProviderModel>,
    max_pixels: u32,
    library: Option<String>,
}

impl VisionConverter {
    pub fn new(model: Arc<ProviderModel>, max_pixels: u32) -> Self {
        let library = std::env::var(PDFIUM_LIB_ENV)
            .ok()
            .filter(|p| !p.is_empty());
        Self {
            model,
            max_pixels,
            library,
        }
    }

    async fn render(&self, unit: &Unit) -> Result<DynamicImage, PipelineError> {
        let content = unit.content.clone();
        let library = self.library.clone();
        let max_pixels = self.max_pixels;
        let name = unit.name.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(library.as_deref())?;
            render_first_page(&pdfium, &content, max_pixels).map_err(|detail| {
                PipelineError::Conversion { unit: name, detail }
            })
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Render task panicked: {e}")))?
    }
}

#[async_trait]
impl TextConverter for VisionConverter {
    async fn convert(&self, unit: &Unit) -> Result<String, PipelineError> {
        let image = self.render(unit).await?;
        debug!(
            "{}: rendered {}x{} px",
            unit.name,
            image.width(),
            image.height()
        );

        let image_data = encode_page(&image).map_err(|e| PipelineError::Conversion {
            unit: unit.name.clone(),
            detail: format!("PNG encoding failed: {e}"),
        })?;

        let messages = [
            ChatMessage::system(TRANSCRIBE_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let markdown = self
            .model
            .chat(&messages)
            .await
            .map_err(|e| PipelineError::Conversion {
                unit: unit.name.clone(),
                detail: e.to_string(),
            })?;

        Ok(tidy_markdown(&markdown))
    }
}

/// Bind to pdfium at `library`, or the system library when `None`.
fn bind_pdfium(library: Option<&str>) -> Result<Pdfium, PipelineError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn render_first_page(pdfium: &Pdfium, content: &[u8], max_pixels: u32) -> Result<DynamicImage, String> {
    let document = pdfium
        .load_pdf_from_byte_slice(content, None)
        .map_err(|e| format!("pdfium cannot open unit: {e:?}"))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let page = document
        .pages()
        .get(0)
        .map_err(|e| format!("unit has no first page: {e:?}"))?;
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| format!("rasterisation failed: {e:?}"))?;
    Ok(bitmap.as_image())
}

/// Encode a rendered page as a base64 PNG attachment.
///
/// PNG keeps glyph edges crisp; `detail: "high"` lets the model tile the
/// image instead of reading a single downscaled overview.
fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}
