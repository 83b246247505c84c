//! LLM-backed structured-data extraction.
//!
//! Sends the transcript to an OpenAI-compatible chat-completions API with a
//! constrained JSON output contract and parses the result into an
//! `Extraction`. The prompt is built from the tenant's schema mappings so
//! the model knows which entity types and fields exist.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{body_snippet, Extractor};
use crate::domain::{Confidence, Extraction, FieldKind, SchemaMapping};

/// Extractor backed by an OpenAI-compatible chat-completions API
pub struct ChatExtractor {
    /// Full endpoint URL (e.g. "https://api.groq.com/openai/v1/chat/completions")
    api_url: String,

    /// Model name
    model: String,

    /// Bearer token
    api_key: String,

    /// Sampling temperature; low values keep the JSON contract stable
    temperature: f32,

    /// HTTP client
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// The JSON contract the model is instructed to return
#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    entity_type: String,

    #[serde(default)]
    confidence: Confidence,

    #[serde(default)]
    extracted_data: Map<String, Value>,
}

impl ChatExtractor {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn system_prompt(schemas: &[SchemaMapping]) -> String {
        format!(
            "You extract structured data from voice transcripts about farm \
             animals and operations.\n\n\
             Available entity types and their fields:\n{}\n\
             Rules:\n\
             - Only extract information that is explicitly mentioned\n\
             - Use null for missing fields\n\
             - Be precise with numbers, dates, and identifiers\n\
             - If the transcript matches no entity type, use entity_type \"unknown\"",
            schema_descriptions(schemas)
        )
    }

    fn user_prompt(transcript: &str, entity_hint: Option<&str>) -> String {
        let hint = entity_hint
            .map(|h| format!("The submitter suggested this is about: {}.\n", h))
            .unwrap_or_default();

        format!(
            "Transcript:\n\"{}\"\n\n{}\
             Return ONLY a JSON object of this shape:\n\
             {{\"entity_type\": \"...\", \"confidence\": \"HIGH|MEDIUM|LOW\", \
             \"extracted_data\": {{\"field_name\": \"value\"}}}}",
            transcript, hint
        )
    }
}

#[async_trait]
impl Extractor for ChatExtractor {
    fn name(&self) -> &str {
        "chat-extractor"
    }

    async fn extract(
        &self,
        transcript: &str,
        entity_hint: Option<&str>,
        schemas: &[SchemaMapping],
        timeout: Duration,
    ) -> Result<Extraction> {
        let system = Self::system_prompt(schemas);
        let user = Self::user_prompt(transcript, entity_hint);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.api_url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to reach extraction API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Extraction API error ({}): {}", status, body_snippet(&body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse extraction response")?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .context("Extraction response contained no choices")?;

        parse_extraction(content)
    }
}

/// Parse the model's JSON output into an Extraction.
///
/// Tolerates a markdown code fence around the object; anything else that
/// fails to parse is malformed model output and fails the step.
fn parse_extraction(content: &str) -> Result<Extraction> {
    let json = strip_code_fence(content);

    let payload: ExtractionPayload = serde_json::from_str(json)
        .with_context(|| format!("Malformed extraction output: {}", body_snippet(content)))?;

    if payload.entity_type.is_empty() || payload.entity_type == "unknown" {
        anyhow::bail!("Could not determine entity type from transcript");
    }

    Ok(Extraction {
        entity_type: payload.entity_type,
        confidence: payload.confidence,
        fields: payload.extracted_data,
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the fence line (possibly "```json") and the closing fence
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().trim_end_matches("```").trim()
}

/// One line per schema: entity type, detection cues, and field contracts
fn schema_descriptions(schemas: &[SchemaMapping]) -> String {
    let mut out = String::new();

    for schema in schemas {
        out.push_str(&format!("- {}", schema.entity_type));

        if !schema.detection_keywords.is_empty() {
            out.push_str(&format!(" (cues: {})", schema.detection_keywords.join(", ")));
        }

        out.push_str(":\n");

        for field in &schema.fields {
            let kind = match &field.kind {
                FieldKind::Text => "text".to_string(),
                FieldKind::Date => "date".to_string(),
                FieldKind::Number => "number".to_string(),
                FieldKind::Enum { options } => format!("one of {}", options.join("|")),
            };
            let required = if field.required { ", required" } else { "" };
            out.push_str(&format!("    {} ({}{})\n", field.name, kind, required));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animal_schema() -> SchemaMapping {
        SchemaMapping::from_yaml(
            r#"
entity_type: animal
entity_set: cr4f2_animals
detection_keywords: [cow, heifer]
fields:
  - name: ear_tag
    target: cr4f2_eartag
    required: true
  - name: sex
    target: cr4f2_sex
    kind:
      type: enum
      options: [Cow, Heifer]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_plain_json() {
        let extraction = parse_extraction(
            r#"{"entity_type": "animal", "confidence": "HIGH",
                "extracted_data": {"ear_tag": "1234", "sex": "heifer"}}"#,
        )
        .unwrap();

        assert_eq!(extraction.entity_type, "animal");
        assert_eq!(extraction.confidence, Confidence::High);
        assert_eq!(extraction.fields["ear_tag"], "1234");
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"entity_type\": \"animal\", \"extracted_data\": {}}\n```";
        let extraction = parse_extraction(content).unwrap();
        assert_eq!(extraction.entity_type, "animal");
        assert_eq!(extraction.confidence, Confidence::Low);
    }

    #[test]
    fn test_unknown_entity_type_is_an_error() {
        let result = parse_extraction(r#"{"entity_type": "unknown", "extracted_data": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_output_is_an_error() {
        assert!(parse_extraction("the animal is a heifer").is_err());
    }

    #[test]
    fn test_schema_descriptions_include_contracts() {
        let text = schema_descriptions(&[animal_schema()]);
        assert!(text.contains("- animal (cues: cow, heifer):"));
        assert!(text.contains("ear_tag (text, required)"));
        assert!(text.contains("sex (one of Cow|Heifer)"));
    }

    #[test]
    fn test_user_prompt_carries_hint() {
        let prompt = ChatExtractor::user_prompt("new cow", Some("animal"));
        assert!(prompt.contains("suggested this is about: animal"));
        assert!(ChatExtractor::user_prompt("new cow", None).contains("Transcript"));
    }
}
