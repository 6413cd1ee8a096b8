use serde::{Deserialize, Serialize};
use serde_json::Value;

use beamline_core::error::ValidationIssue;
use beamline_core::traits::InputSchema;
use beamline_core::types::Params;

/// JSON type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any value, including null.
    Any,
}

impl JsonType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: JsonType,
    #[serde(default)]
    pub required: bool,
}

/// Field-based input schema.
///
/// Reports every missing required field and every type mismatch. Fields the
/// schema does not mention pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: JsonType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: JsonType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }
}

impl InputSchema for FieldSchema {
    fn validate(&self, input: &Params) -> Result<Params, Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for field in &self.fields {
            match input.get(&field.name) {
                None if field.required => {
                    issues.push(ValidationIssue::new(&field.name, "is required"));
                }
                None => {}
                Some(value) if !field.kind.matches(value) => {
                    issues.push(ValidationIssue::new(
                        &field.name,
                        format!("expected {}", field.kind.name()),
                    ));
                }
                Some(_) => {}
            }
        }

        if issues.is_empty() {
            Ok(input.clone())
        } else {
            Err(issues)
        }
    }
}

/// Schema that accepts any input.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl InputSchema for AcceptAll {
    fn validate(&self, input: &Params) -> Result<Params, Vec<ValidationIssue>> {
        Ok(input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_input_passes_through() {
        let schema = FieldSchema::new()
            .required("amount", JsonType::Number)
            .optional("note", JsonType::String);
        let input = params(json!({"amount": 12.5, "extra": true}));
        assert_eq!(schema.validate(&input).unwrap(), input);
    }

    #[test]
    fn test_reports_every_issue() {
        let schema = FieldSchema::new()
            .required("amount", JsonType::Number)
            .required("currency", JsonType::String)
            .optional("count", JsonType::Integer);
        let issues = schema
            .validate(&params(json!({"currency": 3, "count": 1.5})))
            .unwrap_err();

        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0], ValidationIssue::new("amount", "is required"));
        assert_eq!(issues[1].message, "expected string");
        assert_eq!(issues[2].field, "count");
    }

    #[test]
    fn test_schema_from_json() {
        let schema: FieldSchema = serde_json::from_value(json!({
            "fields": [{"name": "id", "type": "string", "required": true}]
        }))
        .unwrap();
        assert!(schema.validate(&Params::new()).is_err());
        assert!(schema.validate(&params(json!({"id": "x"}))).is_ok());
    }

    #[test]
    fn test_accept_all() {
        let input = params(json!({"anything": [1, 2]}));
        assert_eq!(AcceptAll.validate(&input).unwrap(), input);
    }
}
