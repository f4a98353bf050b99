//! Configuration
//!
//! Everything comes from the environment (optionally via `.env`), except the
//! provider catalog which is a JSON file pointed to by `PROVIDERS_CONFIG`.

use crate::entities::AliasTable;
use crate::error::OrchestrationError;
use crate::models::OperationCategory;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RPC_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PLAN_STEPS: usize = 20;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// How to launch one tool provider subprocess
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Which provider operation serves an operation category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationBinding {
    pub category: OperationCategory,
    pub provider: String,
    pub operation: String,
    /// Parameter that receives the target entity
    #[serde(default = "default_entity_param")]
    pub entity_param: String,
    /// Fixed parameters merged into every generated step
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Provider call made once per session to seed the analysis context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextOperation {
    pub key: String,
    pub provider: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Contents of the `PROVIDERS_CONFIG` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersFile {
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_catalog")]
    pub catalog: Vec<OperationBinding>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub context: Vec<ContextOperation>,
}

impl ProvidersFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::ConfigError(format!(
                "Failed to read providers config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: ProvidersFile = serde_json::from_str(raw).map_err(|e| {
            OrchestrationError::ConfigError(format!("Invalid providers config: {}", e))
        })?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            if provider.name.trim().is_empty() || provider.command.trim().is_empty() {
                return Err(OrchestrationError::ConfigError(
                    "Every provider needs a name and a command".to_string(),
                ));
            }
            if seen.contains(&provider.name) {
                return Err(OrchestrationError::ConfigError(format!(
                    "Duplicate provider name '{}'",
                    provider.name
                )));
            }
            seen.push(provider.name.clone());
        }

        for binding in &self.catalog {
            if !seen.contains(&binding.provider) {
                return Err(OrchestrationError::ConfigError(format!(
                    "Catalog entry {}/{} references unknown provider",
                    binding.provider, binding.operation
                )));
            }
        }

        Ok(())
    }
}

impl Default for ProvidersFile {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            catalog: default_catalog(),
            aliases: HashMap::new(),
            context: Vec::new(),
        }
    }
}

fn default_entity_param() -> String {
    "coin_id".to_string()
}

/// `market-provider` and `news-provider` are expected on PATH.
fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "market".to_string(),
            command: "market-provider".to_string(),
            args: vec![],
            env: HashMap::new(),
        },
        ProviderConfig {
            name: "news".to_string(),
            command: "news-provider".to_string(),
            args: vec![],
            env: HashMap::new(),
        },
    ]
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn default_catalog() -> Vec<OperationBinding> {
    vec![
        OperationBinding {
            category: OperationCategory::Price,
            provider: "market".to_string(),
            operation: "get_price".to_string(),
            entity_param: "coin_id".to_string(),
            parameters: object(json!({ "vs_currency": "usd" })),
        },
        OperationBinding {
            category: OperationCategory::MarketDetail,
            provider: "market".to_string(),
            operation: "get_market_data".to_string(),
            entity_param: "coin_id".to_string(),
            parameters: Map::new(),
        },
        OperationBinding {
            category: OperationCategory::News,
            provider: "news".to_string(),
            operation: "get_news".to_string(),
            entity_param: "entity".to_string(),
            parameters: object(json!({ "limit": 5 })),
        },
    ]
}

/// Settings the orchestration engine needs for one session
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub step_timeout: Duration,
    pub max_plan_steps: usize,
    pub catalog: Vec<OperationBinding>,
    pub context_operations: Vec<ContextOperation>,
    pub aliases: AliasTable,
}

impl EngineSettings {
    /// Category of a (provider, operation) pair according to the catalog
    pub fn category_of(&self, provider: &str, operation: &str) -> OperationCategory {
        self.catalog
            .iter()
            .find(|b| b.provider == provider && b.operation == operation)
            .map(|b| b.category)
            .unwrap_or(OperationCategory::Other)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            max_plan_steps: DEFAULT_MAX_PLAN_STEPS,
            catalog: default_catalog(),
            context_operations: Vec::new(),
            aliases: AliasTable::new(),
        }
    }
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: ProvidersFile,
    pub step_timeout: Duration,
    pub rpc_read_timeout: Duration,
    pub max_plan_steps: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub database_url: Option<String>,
    pub port: u16,
}

impl AppConfig {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let providers = match non_empty_var("PROVIDERS_CONFIG") {
            Some(path) => ProvidersFile::load(Path::new(&path))?,
            None => ProvidersFile::default(),
        };

        Ok(Self {
            providers,
            step_timeout: Duration::from_secs(parse_var(
                "STEP_TIMEOUT_SECS",
                DEFAULT_STEP_TIMEOUT_SECS,
            )?),
            rpc_read_timeout: Duration::from_secs(parse_var(
                "RPC_READ_TIMEOUT_SECS",
                DEFAULT_RPC_READ_TIMEOUT_SECS,
            )?),
            max_plan_steps: parse_var("MAX_PLAN_STEPS", DEFAULT_MAX_PLAN_STEPS)?,
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_model: non_empty_var("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            database_url: non_empty_var("DATABASE_URL"),
            port: match non_empty_var("PORT") {
                Some(_) => parse_var("PORT", DEFAULT_PORT)?,
                None => parse_var("API_PORT", DEFAULT_PORT)?,
            },
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            step_timeout: self.step_timeout,
            max_plan_steps: self.max_plan_steps,
            catalog: self.providers.catalog.clone(),
            context_operations: self.providers.context.clone(),
            aliases: AliasTable::with_extra(&self.providers.aliases),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match non_empty_var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
    }
}
