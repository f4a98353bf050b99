//! Parse-with-defaults helpers for language-model documents
//!
//! Collaborator output is never trusted. Each parser returns either a
//! `Validated` value (listing the fields that were defaulted) or a
//! `ValidationError`; it never panics and never surfaces a raw serde error.

use crate::error::OrchestrationError;
use crate::Result;
use serde_json::{Map, Value};

/// A parsed document plus the names of fields that received defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Validated<T> {
    pub value: T,
    pub defaulted: Vec<String>,
}

impl<T> Validated<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            defaulted: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.defaulted.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validated<U> {
        Validated {
            value: f(self.value),
            defaulted: self.defaulted,
        }
    }
}

/// Pull the JSON object out of a model reply: strips ```json fences and any
/// prose before the first `{` / after the last `}`.
pub fn extract_object(raw: &str) -> Result<Map<String, Value>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => value,
        Err(_) => {
            let start = cleaned.find('{');
            let end = cleaned.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str::<Value>(&cleaned[start..=end]).map_err(|e| {
                        OrchestrationError::ValidationError(format!("Unparseable document: {}", e))
                    })?
                }
                _ => {
                    return Err(OrchestrationError::ValidationError(
                        "Document contains no JSON object".to_string(),
                    ))
                }
            }
        }
    };

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(OrchestrationError::ValidationError(format!(
            "Expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Clamp into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field-by-field reader that records every default it substitutes
pub struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    prefix: String,
    defaulted: Vec<String>,
}

impl<'a> FieldReader<'a> {
    pub fn new(object: &'a Map<String, Value>) -> Self {
        Self {
            object,
            prefix: String::new(),
            defaulted: Vec::new(),
        }
    }

    pub fn nested(object: &'a Map<String, Value>, prefix: impl Into<String>) -> Self {
        Self {
            object,
            prefix: prefix.into(),
            defaulted: Vec::new(),
        }
    }

    fn note(&mut self, field: &str) {
        if self.prefix.is_empty() {
            self.defaulted.push(field.to_string());
        } else {
            self.defaulted.push(format!("{}.{}", self.prefix, field));
        }
    }

    pub fn raw(&self, field: &str) -> Option<&'a Value> {
        self.object.get(field).filter(|v| !v.is_null())
    }

    pub fn string_or(&mut self, field: &str, default: &str) -> String {
        match self.raw(field).and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                self.note(field);
                default.to_string()
            }
        }
    }

    /// Required string: absence is a validation error, not a default.
    pub fn required_string(&self, field: &str) -> Result<String> {
        match self.raw(field).and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(OrchestrationError::ValidationError(format!(
                "Missing required field '{}{}'",
                if self.prefix.is_empty() {
                    String::new()
                } else {
                    format!("{}.", self.prefix)
                },
                field
            ))),
        }
    }

    pub fn f64_or(&mut self, field: &str, default: f64) -> f64 {
        let parsed = self.raw(field).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });

        match parsed {
            Some(v) if v.is_finite() => v,
            _ => {
                self.note(field);
                default
            }
        }
    }

    pub fn u64_or(&mut self, field: &str, default: u64) -> u64 {
        match self.raw(field).and_then(Value::as_u64) {
            Some(v) => v,
            None => {
                self.note(field);
                default
            }
        }
    }

    /// Like `u64_or`, but values that do not fit a `u32` are defaulted too.
    pub fn u32_or(&mut self, field: &str, default: u32) -> u32 {
        match self
            .raw(field)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
        {
            Some(v) => v,
            None => {
                self.note(field);
                default
            }
        }
    }

    pub fn string_list(&mut self, field: &str) -> Vec<String> {
        match self.raw(field).and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::trim))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => {
                self.note(field);
                Vec::new()
            }
        }
    }

    pub fn object_or_empty(&mut self, field: &str) -> Map<String, Value> {
        match self.raw(field).and_then(Value::as_object) {
            Some(map) => map.clone(),
            None => {
                self.note(field);
                Map::new()
            }
        }
    }

    pub fn into_defaulted(self) -> Vec<String> {
        self.defaulted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_fenced_object() {
        let map = extract_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn test_extract_object_with_prose() {
        let map = extract_object("Sure! Here is the plan: {\"a\": {\"b\": 2}} Hope this helps.").unwrap();
        assert_eq!(map["a"]["b"], 2);
    }

    #[test]
    fn test_extract_rejects_non_object() {
        assert!(matches!(
            extract_object("[1, 2, 3]"),
            Err(OrchestrationError::ValidationError(_))
        ));
        assert!(matches!(
            extract_object("I cannot help with that."),
            Err(OrchestrationError::ValidationError(_))
        ));
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }

    #[test]
    fn test_field_reader_records_defaults() {
        let doc = json!({ "name": "  ", "score": "0.7", "tags": ["a", "", "b"], "count": 4 });
        let map = doc.as_object().unwrap();
        let mut reader = FieldReader::nested(map, "steps[0]");

        assert_eq!(reader.string_or("name", "anon"), "anon");
        assert_eq!(reader.f64_or("score", 0.0), 0.7);
        assert_eq!(reader.string_list("tags"), vec!["a", "b"]);
        assert_eq!(reader.u64_or("count", 1), 4);
        assert!(reader.object_or_empty("extra").is_empty());
        assert!(reader.required_string("missing").is_err());

        assert_eq!(reader.into_defaulted(), vec!["steps[0].name", "steps[0].extra"]);
    }
}
