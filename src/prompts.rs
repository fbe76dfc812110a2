//! Prompts for record extraction and page transcription.
//!
//! All prompt text lives here so unit tests can inspect it without a model.
//! The extraction template is rendered by [`PromptBuilder`]; callers may
//! point it at a template file via
//! [`crate::config::PipelineConfig::prompt_template`].

use std::path::Path;
use tracing::{debug, warn};

/// Placeholder replaced by the page text in an extraction template.
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// Marker that starts the Description of every illustrative record in
/// [`EXTRACTION_TEMPLATE`]. Replies containing it are echoed examples.
pub const EXAMPLE_MARKER: &str = "Example";

/// Default extraction template.
pub const EXTRACTION_TEMPLATE: &str = r#"<instruction>
You are a clerk of the Regional administration. Your task is to extract information from a text that contains regional deliberations.

Extract every regional deliberation from the text below.
Do not confuse deliberations with regional laws: a record counts only if the word "Deliberation", "Delibera" or "Deliberazione" is present.
Do not invent or infer ANY information that is not in the text.

For each deliberation found, extract only:
- Number: [only if explicitly stated]
- Date: [only if explicitly stated]
- Description: [only if explicitly stated]
- Page: [only if explicitly stated]

Format the output as a JSON array with these fields:
```json
[
  {
    "Number": "value found",
    "Date": "value found",
    "Description": "value found",
    "Page": "value found"
  }
]
```

IMPORTANT:

If you cannot find a value for the "Number" field, do NOT produce any JSON.
Produce JSON ONLY when the "Number" field is present and has a value.
Do not add any explanation or comment to the JSON.

Example of the desired output, NOT to be included in your answer:
[
  {
    "Number": "123",
    "Date": "2023-01-01",
    "Description": "Example Approval of the budget",
    "Page": "5"
  },
  {
    "Number": "456",
    "Date": "2023-02-15",
    "Description": "Example Appointment of the new director",
    "Page": "10"
  }
]

</instruction> <text> ```{text}``` </text>
"#;

/// Inline instruction used when a template file cannot be used.
pub const FALLBACK_TEMPLATE: &str = r#"Extract every regional deliberation (the word "Deliberation", "Delibera" or "Deliberazione" must appear) from the text below.
Answer with a JSON array of objects with the fields "Number", "Date", "Description", "Page", using only values explicitly present.
Skip any deliberation without a Number. Output the JSON array only.

Text:
{text}
"#;

/// System prompt for the vision converter: transcribe one page image.
pub const TRANSCRIBE_SYSTEM_PROMPT: &str = r#"You transcribe a single scanned or rendered document page into Markdown.

Rules:
1. Reproduce ALL text faithfully and in reading order. Do not summarise.
2. Keep numbers, dates, reference codes and headings exactly as printed.
3. Render tables as GFM pipe tables.
4. Skip page numbers, running headers/footers and decorative elements.
5. Output ONLY the Markdown. No code fences, no commentary."#;

/// Renders the extraction template around a page's text.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            template: EXTRACTION_TEMPLATE.to_string(),
        }
    }
}

impl PromptBuilder {
    /// Use a custom template string. It must contain [`TEXT_PLACEHOLDER`];
    /// otherwise the builder falls back to [`FALLBACK_TEMPLATE`].
    pub fn with_template(template: impl Into<String>) -> Self {
        let template = template.into();
        if template.contains(TEXT_PLACEHOLDER) {
            Self { template }
        } else {
            warn!("Prompt template has no {} placeholder; using fallback", TEXT_PLACEHOLDER);
            Self::fallback()
        }
    }

    /// Load the template from a file, falling back to the inline
    /// instruction when the file cannot be read.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(template) => {
                debug!("Loaded prompt template from {}", path.display());
                Self::with_template(template)
            }
            Err(e) => {
                warn!(
                    "Prompt template {} unavailable ({}); using fallback",
                    path.display(),
                    e
                );
                Self::fallback()
            }
        }
    }

    /// The minimal inline instruction.
    pub fn fallback() -> Self {
        Self {
            template: FALLBACK_TEMPLATE.to_string(),
        }
    }

    /// Render the prompt for `text`. The text is the only substitution.
    pub fn render(&self, text: &str) -> String {
        self.template.replacen(TEXT_PLACEHOLDER, text, 1)
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}
