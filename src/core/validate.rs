//! Validation engine: extracted data + schema mapping in, CRM payload or a
//! complete missing/invalid field report out.
//!
//! The engine never fails fast. Every field definition is checked and every
//! problem collected, so a submitter sees all missing details in one pass.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Number, Value};

use crate::domain::{CrmPayload, FieldDef, FieldKind, SchemaMapping};

/// All fields that failed validation, with a reason per field.
///
/// The map is ordered by field name so rendering is stable; `render` turns
/// it into the single human-readable message stored on the recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldErrors {
    pub reasons: BTreeMap<String, String>,
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for FieldErrors {}

impl FieldErrors {
    /// One-line summary listing each failing field and its reason
    pub fn render(&self) -> String {
        let detail: Vec<String> = self
            .reasons
            .iter()
            .map(|(field, reason)| format!("{} ({})", field, reason))
            .collect();

        format!(
            "Missing or invalid fields: {}. Please re-record with these details.",
            detail.join(", ")
        )
    }
}

/// Validate extracted data against a schema mapping.
///
/// On success returns the CRM-ready payload: each canonical field renamed to
/// its external attribute and coerced to its declared kind. On failure
/// returns every missing required field and every uncoercible value.
pub fn validate(extracted: &Map<String, Value>, schema: &SchemaMapping) -> Result<CrmPayload, FieldErrors> {
    let mut attributes = Map::new();
    let mut reasons = BTreeMap::new();

    for def in &schema.fields {
        match lookup(extracted, def) {
            Some(value) => match coerce(&def.kind, value) {
                Ok(coerced) => {
                    attributes.insert(def.target.clone(), coerced);
                }
                Err(reason) => {
                    reasons.insert(def.name.clone(), reason);
                }
            },
            None if def.required => {
                reasons.insert(def.name.clone(), "required, not provided".to_string());
            }
            None => {}
        }
    }

    if reasons.is_empty() {
        Ok(CrmPayload {
            entity_set: schema.entity_set.clone(),
            attributes,
        })
    } else {
        Err(FieldErrors { reasons })
    }
}

/// Find a field's value in the extracted data, tolerating case differences
/// and the synonyms declared on the field definition. Null and blank values
/// count as absent.
fn lookup<'a>(extracted: &'a Map<String, Value>, def: &FieldDef) -> Option<&'a Value> {
    let wanted = normalize_key(&def.name);

    let found = extracted.iter().find(|(key, _)| {
        let key = normalize_key(key);
        key == wanted || def.aliases.iter().any(|alias| normalize_key(alias) == key)
    });

    match found {
        Some((_, Value::Null)) => None,
        Some((_, Value::String(s))) if s.trim().is_empty() => None,
        Some((_, value)) => Some(value),
        None => None,
    }
}

/// Lowercase and fold spaces/hyphens to underscores ("Ear Tag" == "ear_tag")
fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Coerce a raw extracted value to the declared field kind
fn coerce(kind: &FieldKind, value: &Value) -> Result<Value, String> {
    match kind {
        FieldKind::Text => coerce_text(value),
        FieldKind::Date => coerce_date(value),
        FieldKind::Number => coerce_number(value),
        FieldKind::Enum { options } => coerce_enum(options, value),
    }
}

fn coerce_text(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err("expected text".to_string()),
    }
}

fn coerce_date(value: &Value) -> Result<Value, String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        _ => return Err("could not parse as date".to_string()),
    };

    parse_date(&text)
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| "could not parse as date".to_string())
}

fn coerce_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => Ok(Value::Number(n.clone())),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::Number(Number::from(i)));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "not a number".to_string())
        }
        _ => Err("not a number".to_string()),
    }
}

fn coerce_enum(options: &[String], value: &Value) -> Result<Value, String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(enum_reason(options)),
    };

    options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(&text))
        .map(|canonical| Value::String(canonical.clone()))
        .ok_or_else(|| enum_reason(options))
}

fn enum_reason(options: &[String]) -> String {
    format!("not one of: {}", options.join(", "))
}

/// Parse a calendar date from the forms a transcript plausibly contains.
///
/// Accepts ISO (2025-01-01), slashed day-first then month-first, and
/// spelled-out month forms with or without ordinal suffixes
/// ("January 1st 2025", "1 January 2025", "January 1, 2025").
fn parse_date(text: &str) -> Option<NaiveDate> {
    let cleaned = strip_ordinals(&text.replace(',', " "));
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%B %d %Y",
        "%d %B %Y",
        "%b %d %Y",
        "%d %b %Y",
    ];

    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&cleaned, format).ok())
}

/// Remove ordinal suffixes that directly follow a digit ("1st" -> "1")
fn strip_ordinals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for word in text.split_whitespace() {
        let stripped = word
            .strip_suffix("st")
            .or_else(|| word.strip_suffix("nd"))
            .or_else(|| word.strip_suffix("rd"))
            .or_else(|| word.strip_suffix("th"))
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));

        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(stripped.unwrap_or(word));
    }

    out
}
