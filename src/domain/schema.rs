//! Schema mappings: per-tenant field definitions for an external entity type.
//!
//! Mappings are defined in YAML and consist of an ordered set of field
//! definitions, each naming the canonical field, its expected kind, whether
//! it is required, and the external attribute it maps to.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete schema mapping for one (tenant, entity type) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMapping {
    /// Canonical entity type (e.g. "animal")
    pub entity_type: String,

    /// Target collection in the external system (e.g. "cr4f2_animals")
    pub entity_set: String,

    /// Keywords that indicate this entity type in a transcript
    #[serde(default)]
    pub detection_keywords: Vec<String>,

    /// Ordered field definitions
    pub fields: Vec<FieldDef>,
}

impl SchemaMapping {
    /// Parse a schema mapping from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mapping: Self =
            serde_yaml::from_str(content).context("Failed to parse schema mapping YAML")?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Validate the mapping definition
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.is_empty() {
            anyhow::bail!("Schema mapping entity_type cannot be empty");
        }

        if self.entity_set.is_empty() {
            anyhow::bail!(
                "Schema mapping '{}' has an empty entity_set",
                self.entity_type
            );
        }

        if self.fields.is_empty() {
            anyhow::bail!("Schema mapping '{}' has no fields", self.entity_type);
        }

        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                anyhow::bail!("Field {} in '{}' has an empty name", i, self.entity_type);
            }

            if field.target.is_empty() {
                anyhow::bail!(
                    "Field '{}' in '{}' has an empty target attribute",
                    field.name,
                    self.entity_type
                );
            }

            let duplicate = self.fields[..i].iter().any(|f| f.name == field.name);
            if duplicate {
                anyhow::bail!(
                    "Duplicate field '{}' in schema mapping '{}'",
                    field.name,
                    self.entity_type
                );
            }

            if let FieldKind::Enum { ref options } = field.kind {
                if options.is_empty() {
                    anyhow::bail!(
                        "Enum field '{}' in '{}' declares no options",
                        field.name,
                        self.entity_type
                    );
                }
            }
        }

        Ok(())
    }

    /// Get a field definition by canonical name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Canonical names of all required fields
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }
}

/// A single field definition within a schema mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Canonical field name (unique within the mapping)
    pub name: String,

    /// External attribute name this field maps to
    pub target: String,

    #[serde(default)]
    pub required: bool,

    /// Expected value kind, drives coercion during validation
    #[serde(default)]
    pub kind: FieldKind,

    /// Synonyms the extraction step may use for this field
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Expected value kind for a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FieldKind {
    /// Free text, trimmed
    Text,

    /// Calendar date, normalized to ISO-8601 (YYYY-MM-DD)
    Date,

    /// Numeric value
    Number,

    /// One of a declared set of values, matched case-insensitively
    Enum { options: Vec<String> },
}

impl Default for FieldKind {
    fn default() -> Self {
        Self::Text
    }
}

/// The validated, coerced, externally-addressed payload ready for the CRM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmPayload {
    /// Target collection in the external system
    pub entity_set: String,

    /// External attribute name -> coerced value
    pub attributes: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANIMAL_SCHEMA_YAML: &str = r#"
entity_type: animal
entity_set: cr4f2_animals
detection_keywords: [cow, heifer, calf, "ear tag"]
fields:
  - name: ear_tag
    target: cr4f2_eartag
    required: true
  - name: birth_date
    target: cr4f2_birthdate
    required: true
    kind:
      type: date
  - name: sex
    target: cr4f2_sex
    required: true
    kind:
      type: enum
      options: [Bull, Steer, Cow, Heifer]
    aliases: [gender]
  - name: birth_weight
    target: cr4f2_birthweight
    kind:
      type: number
"#;

    #[test]
    fn test_schema_parsing() {
        let schema = SchemaMapping::from_yaml(ANIMAL_SCHEMA_YAML).unwrap();

        assert_eq!(schema.entity_type, "animal");
        assert_eq!(schema.entity_set, "cr4f2_animals");
        assert_eq!(schema.fields.len(), 4);

        let required: Vec<&str> = schema.required_fields().collect();
        assert_eq!(required, vec!["ear_tag", "birth_date", "sex"]);

        let sex = schema.field("sex").unwrap();
        assert_eq!(sex.aliases, vec!["gender"]);
        assert!(matches!(sex.kind, FieldKind::Enum { .. }));
    }

    #[test]
    fn test_default_kind_is_text() {
        let schema = SchemaMapping::from_yaml(ANIMAL_SCHEMA_YAML).unwrap();
        assert_eq!(schema.field("ear_tag").unwrap().kind, FieldKind::Text);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let yaml = r#"
entity_type: animal
entity_set: cr4f2_animals
fields:
  - name: ear_tag
    target: a
  - name: ear_tag
    target: b
"#;
        assert!(SchemaMapping::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_enum_options_rejected() {
        let yaml = r#"
entity_type: animal
entity_set: cr4f2_animals
fields:
  - name: sex
    target: cr4f2_sex
    kind:
      type: enum
      options: []
"#;
        assert!(SchemaMapping::from_yaml(yaml).is_err());
    }
}
