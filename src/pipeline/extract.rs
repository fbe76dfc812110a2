//! Record extraction: prompt the model, then recover trustworthy records
//! from whatever it replied.
//!
//! The model reply is untrusted free text. It may wrap the JSON array in
//! code fences or commentary, echo the prompt's illustrative examples, or
//! ignore the instruction to omit records without a Number. The steps
//! below run in this order:
//!
//! 1. [`clean_response`]: cut the reply down to the JSON array
//! 2. [`parse_items`]   : parse it; anything unparseable means "no records"
//! 3. [`is_echoed_example`]: drop items copied from the prompt
//! 4. [`validate_item`] : drop items without a Number, attach `SourceFile`

use crate::error::PipelineError;
use crate::model::TextModel;
use crate::prompts::{PromptBuilder, EXAMPLE_MARKER};
use crate::record::ExtractionRecord;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens stripped from a reply that contains no `[ ... ]` pair.
const NOISE_TOKENS: [&str; 9] = [
    "```",
    "json",
    "\\_",
    "<text>",
    "<instruction>",
    "</instruction>",
    "<output>",
    "</output>",
    "###END###",
];

const NUMBER_KEYS: [&str; 2] = ["Number", "Numero"];
const DATE_KEYS: [&str; 2] = ["Date", "Data"];
const DESCRIPTION_KEYS: [&str; 2] = ["Description", "Descrizione"];
const PAGE_KEYS: [&str; 2] = ["Page", "Pagina"];

/// Prompts the model and turns its reply into validated records.
#[derive(Clone)]
pub struct ExtractionEngine {
    model: Arc<dyn TextModel>,
    prompts: PromptBuilder,
}

impl ExtractionEngine {
    pub fn new(model: Arc<dyn TextModel>, prompts: PromptBuilder) -> Self {
        Self { model, prompts }
    }

    /// Extract the records in `text`, tagging each with `source_file`.
    ///
    /// # Errors
    /// Only [`PipelineError::ModelInvocation`] (or whatever the model
    /// returns). A malformed reply is not an error: it yields no records.
    pub async fn extract(
        &self,
        text: &str,
        source_file: &str,
    ) -> Result<Vec<ExtractionRecord>, PipelineError> {
        let prompt = self.prompts.render(text);
        debug!(
            "{}: prompting {} ({} chars)",
            source_file,
            self.model.label(),
            prompt.len()
        );
        let reply = self.model.invoke(&prompt).await?;
        let records = records_from_reply(&reply, source_file);
        info!("{}: {} record(s) extracted", source_file, records.len());
        Ok(records)
    }
}

/// Run the full cleaning/validation sequence over one raw reply.
pub fn records_from_reply(reply: &str, source_file: &str) -> Vec<ExtractionRecord> {
    let cleaned = clean_response(reply);
    let items = match parse_items(&cleaned) {
        Ok(items) => items,
        Err(e) => {
            warn!("{}: {}", source_file, e);
            debug!("{}: raw reply was {:?}", source_file, reply);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter(|item| {
            let echoed = is_echoed_example(item);
            if echoed {
                debug!("{}: dropping echoed example {}", source_file, item);
            }
            !echoed
        })
        .filter_map(|item| {
            let record = validate_item(&item, source_file);
            if record.is_none() {
                debug!("{}: dropping item without Number: {}", source_file, item);
            }
            record
        })
        .collect()
}

/// Cut a model reply down to the JSON array it most likely contains.
///
/// Takes everything from the first `[` to the last `]` inclusive. When the
/// reply has no such pair, strips known noise tokens instead and returns
/// the remainder. An empty reply becomes `[]`.
pub fn clean_response(reply: &str) -> String {
    if reply.trim().is_empty() {
        return "[]".to_string();
    }

    if let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) {
        if end > start {
            return reply[start..=end].to_string();
        }
    }

    NOISE_TOKENS
        .iter()
        .fold(reply.to_string(), |text, token| text.replace(token, ""))
}

/// Parse cleaned text as a JSON array of items.
///
/// A lone object is taken as a one-item array.
pub fn parse_items(cleaned: &str) -> Result<Vec<Value>, PipelineError> {
    let value: Value =
        serde_json::from_str(cleaned.trim()).map_err(|e| PipelineError::MalformedResponse {
            detail: e.to_string(),
        })?;

    match value {
        Value::Array(items) => Ok(items),
        obj @ Value::Object(_) => Ok(vec![obj]),
        other => Err(PipelineError::MalformedResponse {
            detail: format!("expected an array, got {}", json_kind(&other)),
        }),
    }
}

/// True when the item's Description carries the prompt's example marker.
pub fn is_echoed_example(item: &Value) -> bool {
    item.as_object()
        .and_then(|obj| field(obj, &DESCRIPTION_KEYS))
        .is_some_and(|d| d.contains(EXAMPLE_MARKER))
}

/// Turn one parsed item into a record, or `None` if it has no Number.
pub fn validate_item(item: &Value, source_file: &str) -> Option<ExtractionRecord> {
    let obj = item.as_object()?;
    let number = field(obj, &NUMBER_KEYS)?;

    Some(ExtractionRecord {
        number,
        date: field(obj, &DATE_KEYS),
        description: field(obj, &DESCRIPTION_KEYS),
        page: field(obj, &PAGE_KEYS),
        source_file: source_file.to_string(),
    })
}

/// First non-empty scalar under any of `keys`, as a trimmed string.
fn field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let text = match obj.get(*key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    const FENCED: &str = "```json\n[{\"Number\":\"12\",\"Date\":\"2024-01-01\",\"Description\":\"Approval\",\"Page\":\"3\"}]\n```";

    struct CannedModel(Result<String, String>);

    #[async_trait]
    impl TextModel for CannedModel {
        async fn invoke(&self, _prompt: &str) -> Result<String, PipelineError> {
            self.0.clone().map_err(|detail| PipelineError::ModelInvocation {
                attempts: 1,
                detail,
            })
        }
    }

    fn engine(reply: Result<&str, &str>) -> ExtractionEngine {
        let model = CannedModel(reply.map(str::to_string).map_err(str::to_string));
        ExtractionEngine::new(Arc::new(model), PromptBuilder::default())
    }

    #[test]
    fn fenced_reply_yields_inner_array() {
        assert_eq!(
            clean_response(FENCED),
            "[{\"Number\":\"12\",\"Date\":\"2024-01-01\",\"Description\":\"Approval\",\"Page\":\"3\"}]"
        );
        let records = records_from_reply(FENCED, "gazette_0003.pdf");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "12");
        assert_eq!(records[0].date.as_deref(), Some("2024-01-01"));
        assert_eq!(records[0].page.as_deref(), Some("3"));
        assert_eq!(records[0].source_file, "gazette_0003.pdf");
    }

    #[test]
    fn commentary_without_json_yields_nothing() {
        let reply = "Sure, here is the data: not actually json";
        assert!(parse_items(&clean_response(reply)).is_err());
        assert!(records_from_reply(reply, "a_0001.pdf").is_empty());
    }

    #[test]
    fn empty_reply_cleans_to_empty_array() {
        assert_eq!(clean_response("   \n"), "[]");
        assert!(records_from_reply("", "a_0001.pdf").is_empty());
    }

    #[test]
    fn reversed_brackets_fall_back_to_noise_stripping() {
        let reply = "] nothing [";
        assert_eq!(clean_response(reply), reply);
    }

    #[test]
    fn noise_tokens_are_stripped_without_brackets() {
        let reply = "<output>```json\n{\"Numero\": \"7\", \"Descrizione\": \"Nomina\\_ok\"}\n```</output>###END###";
        let cleaned = clean_response(reply);
        assert!(!cleaned.contains("```"));
        assert!(!cleaned.contains("<output>"));
        assert!(!cleaned.contains("###END###"));
        let records = records_from_reply(reply, "b_0002.pdf");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "7");
    }

    #[test]
    fn echoed_examples_are_filtered() {
        let reply = json!([
            {"Number": "123", "Description": "Example Approval of the budget", "Page": "5"},
            {"Number": "88", "Description": "Approval of the regional plan", "Page": "2"}
        ])
        .to_string();
        let records = records_from_reply(&reply, "c_0001.pdf");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "88");
    }

    #[test]
    fn items_without_number_are_dropped() {
        let reply = json!([
            {"Date": "2024-05-02", "Description": "Deliberation on transport"},
            {"Number": "  ", "Description": "blank number"},
            {"Number": null},
            "not an object",
            {"Number": "41"}
        ])
        .to_string();
        let records = records_from_reply(&reply, "d_0001.pdf");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "41");
        assert_eq!(records[0].date, None);
        assert_eq!(records[0].page, None);
    }

    #[test]
    fn numeric_fields_become_strings() {
        let item = json!({"Number": 1052, "Page": 14});
        let record = validate_item(&item, "e_0001.pdf").unwrap();
        assert_eq!(record.number, "1052");
        assert_eq!(record.page.as_deref(), Some("14"));
    }

    #[test]
    fn italian_field_names_are_accepted() {
        let item = json!({"Numero": "5", "Data": "1/2/2023", "Descrizione": "Bilancio", "Pagina": "9"});
        let record = validate_item(&item, "f_0001.pdf").unwrap();
        assert_eq!(record.description.as_deref(), Some("Bilancio"));
        assert_eq!(record.page.as_deref(), Some("9"));
    }

    #[test]
    fn scalar_json_is_malformed() {
        let err = parse_items("42").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn engine_attaches_source_file() {
        let records = engine(Ok(FENCED))
            .extract("Delibera n. 12", "bulletin_0001.pdf")
            .await
            .expect("extract");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_file, "bulletin_0001.pdf");
    }

    #[tokio::test]
    async fn engine_swallows_malformed_reply() {
        let records = engine(Ok("I could not find anything."))
            .extract("text", "x_0001.pdf")
            .await
            .expect("malformed replies are not errors");
        assert!(records.is_empty());
    }

    #[test]
    fn engine_propagates_invocation_failure() {
        let result = tokio_test::block_on(engine(Err("HTTP 401")).extract("text", "x_0001.pdf"));
        assert!(matches!(result, Err(PipelineError::ModelInvocation { .. })));
    }
}
