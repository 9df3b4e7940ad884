//! LLM-based enrichment: semantic triplets and SQL snippets.
//!
//! Both extractors prompt the completion model for JSON and parse it
//! strictly: after markdown fences are stripped, the payload must be either a
//! bare list or an object wrapping a named list. Anything else raises
//! [`RagError::Parse`] so malformed model output stays observable instead of
//! silently becoming an empty result.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::provider::{CompletionOptions, ProviderClient};
use crate::stores::Triplet;
use crate::types::RagError;

/// One SQL query surfaced by the side channel, with its structural metadata.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SqlSnippet {
    #[serde(default)]
    pub sql_query: String,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub joins: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawTriplet {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    predicate: String,
    #[serde(default)]
    object: String,
}

/// Removes markdown code fences the model tends to wrap JSON in.
pub fn strip_markdown_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parses model JSON that is either a bare list or `{"<wrapper_key>": [...]}`.
pub fn parse_wrapped_list<T: DeserializeOwned>(
    raw: &str,
    wrapper_key: &str,
) -> Result<Vec<T>, RagError> {
    let cleaned = strip_markdown_fences(raw);
    let value: serde_json::Value = serde_json::from_str(&cleaned)
        .map_err(|err| RagError::Parse(format!("invalid JSON: {err}")))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove(wrapper_key) {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(RagError::Parse(format!(
                    "expected a list or an object wrapping `{wrapper_key}`"
                )));
            }
        },
        _ => {
            return Err(RagError::Parse(format!(
                "expected a list or an object wrapping `{wrapper_key}`"
            )));
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|err| RagError::Parse(format!("malformed list item: {err}")))
        })
        .collect()
}

/// Prompts the completion model for enrichment data.
pub struct Extractor {
    provider: Arc<ProviderClient>,
}

impl Extractor {
    pub fn new(provider: Arc<ProviderClient>) -> Self {
        Self { provider }
    }

    /// Extracts semantic triplets from a chunk of text.
    ///
    /// Raw triplets are normalized afterwards; entries that trim to empty are
    /// dropped by the caller, not here.
    pub async fn triplets(&self, text: &str) -> Result<Vec<Triplet>, RagError> {
        let prompt = format!(
            "Extract semantic triplets (Subject, Predicate, Object) from the following text.\n\
             Return ONLY a JSON list of objects with \"subject\", \"predicate\", and \"object\" keys.\n\
             Do not include any explanation or markdown formatting (like ```json).\n\n\
             Text: {text}"
        );
        let response = self
            .provider
            .complete(&prompt, &CompletionOptions::default())
            .await?;

        let raw: Vec<RawTriplet> = parse_wrapped_list(&response, "triplets")?;
        Ok(raw
            .into_iter()
            .filter_map(|t| Triplet::normalize(&t.subject, &t.predicate, &t.object))
            .collect())
    }

    /// Extracts SQL queries and their metadata from a full document text.
    pub async fn sql_snippets(&self, text: &str) -> Result<Vec<SqlSnippet>, RagError> {
        let prompt = format!(
            "Extract all SQL queries from the following text. For each query, provide:\n\
             - The exact SQL query text\n\
             - Query type (SELECT, INSERT, UPDATE, DELETE, CREATE, ALTER, DROP, etc.)\n\
             - List of tables involved\n\
             - List of columns referenced (if any)\n\
             - Join relationships if present (list of joins with from_table, to_table, join_condition)\n\n\
             Return the result as a JSON list of objects with keys: \"sql_query\", \"query_type\", \
             \"tables\", \"columns\", \"joins\".\n\
             If no SQL queries found, return empty list.\n\n\
             Text: {text}"
        );
        let response = self
            .provider
            .complete(&prompt, &CompletionOptions::default())
            .await?;

        parse_wrapped_list(&response, "queries")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped_before_parsing() {
        let raw = "```json\n[{\"subject\": \"A\", \"predicate\": \"REL\", \"object\": \"B\"}]\n```";
        let parsed: Vec<RawTriplet> = parse_wrapped_list(raw, "triplets").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].subject, "A");
    }

    #[test]
    fn accepts_bare_list_shape() {
        let parsed: Vec<SqlSnippet> =
            parse_wrapped_list(r#"[{"sql_query": "SELECT 1", "tables": ["t"]}]"#, "queries")
                .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].sql_query, "SELECT 1");
    }

    #[test]
    fn accepts_wrapped_dict_shape() {
        let parsed: Vec<SqlSnippet> = parse_wrapped_list(
            r#"{"queries": [{"sql_query": "SELECT 2"}, {"sql_query": "SELECT 3"}]}"#,
            "queries",
        )
        .unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn rejects_other_shapes_with_parse_error() {
        let wrong_key: Result<Vec<SqlSnippet>, _> =
            parse_wrapped_list(r#"{"rows": []}"#, "queries");
        assert!(matches!(wrong_key, Err(RagError::Parse(_))));

        let scalar: Result<Vec<SqlSnippet>, _> = parse_wrapped_list("42", "queries");
        assert!(matches!(scalar, Err(RagError::Parse(_))));

        let garbage: Result<Vec<SqlSnippet>, _> = parse_wrapped_list("not json at all", "queries");
        assert!(matches!(garbage, Err(RagError::Parse(_))));
    }

    #[test]
    fn empty_list_is_valid() {
        let parsed: Vec<SqlSnippet> = parse_wrapped_list("[]", "queries").unwrap();
        assert!(parsed.is_empty());
    }
}
