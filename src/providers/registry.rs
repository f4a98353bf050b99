//! Operation registry
//!
//! The set of operations a provider advertises is fixed at discovery time.
//! Calls are checked against it before anything is written to the channel.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// One advertised operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub required: Vec<String>,
}

impl OperationInfo {
    fn from_discovery(entry: &Value) -> Option<Self> {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();

        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let input_schema = entry
            .get("inputSchema")
            .or_else(|| entry.get("input_schema"))
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object" }));

        let required = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name,
            description,
            input_schema,
            required,
        })
    }
}

/// Closed registry: operation name → descriptor
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, OperationInfo>,
}

impl OperationRegistry {
    /// Build from a `tools/list` result. Zero operations is valid.
    pub fn from_discovery(provider: &str, result: &Value) -> Result<Self> {
        let entries = match result.get("tools") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(OrchestrationError::ProtocolError(format!(
                    "Provider '{}' returned a non-array operation list",
                    provider
                )))
            }
        };

        let mut operations = BTreeMap::new();

        for entry in entries {
            let Some(info) = OperationInfo::from_discovery(entry) else {
                warn!(provider = %provider, entry = %entry, "Skipping nameless operation");
                continue;
            };

            if operations.contains_key(&info.name) {
                warn!(provider = %provider, operation = %info.name, "Duplicate operation ignored");
                continue;
            }

            operations.insert(info.name.clone(), info);
        }

        Ok(Self { operations })
    }

    pub fn get(&self, name: &str) -> Option<&OperationInfo> {
        self.operations.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationInfo> {
        self.operations.values()
    }

    /// Validate a call against the advertised operation
    pub fn check_call(&self, operation: &str, args: &Map<String, Value>) -> Result<&OperationInfo> {
        let info = self.get(operation).ok_or_else(|| {
            OrchestrationError::ValidationError(format!(
                "Operation '{}' is not offered by this provider",
                operation
            ))
        })?;

        let missing: Vec<&str> = info
            .required
            .iter()
            .filter(|param| args.get(param.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(OrchestrationError::ValidationError(format!(
                "Operation '{}' is missing required parameters: {}",
                operation,
                missing.join(", ")
            )));
        }

        Ok(info)
    }
}
