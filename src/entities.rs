//! Target entity extraction and alias normalization
//!
//! Maps the names people type ("BTC", "ether", "$SOL") onto the canonical
//! identifiers providers expect ("bitcoin", "ethereum", "solana").
//! Unknown names are never rejected: they normalize to a lower-cased copy.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Built-in aliases: lower-case alias, canonical provider identifier
const KNOWN_ALIASES: &[(&str, &str)] = &[
    // Majors
    ("btc", "bitcoin"), ("xbt", "bitcoin"), ("bitcoin", "bitcoin"),
    ("eth", "ethereum"), ("ether", "ethereum"), ("ethereum", "ethereum"),
    ("sol", "solana"), ("solana", "solana"),
    ("bnb", "binancecoin"), ("binance coin", "binancecoin"), ("binancecoin", "binancecoin"),
    ("xrp", "ripple"), ("ripple", "ripple"),
    // Alts
    ("ada", "cardano"), ("cardano", "cardano"),
    ("doge", "dogecoin"), ("dogecoin", "dogecoin"),
    ("dot", "polkadot"), ("polkadot", "polkadot"),
    ("ltc", "litecoin"), ("litecoin", "litecoin"),
    ("avax", "avalanche-2"), ("avalanche", "avalanche-2"),
    ("link", "chainlink"), ("chainlink", "chainlink"),
    ("matic", "matic-network"), ("polygon", "matic-network"),
    ("trx", "tron"), ("tron", "tron"),
    // Stablecoins
    ("usdt", "tether"), ("tether", "tether"),
    ("usdc", "usd-coin"),
];

/// Aliases that are also ordinary words. In free text they only count as
/// `$TICKER` or written in upper case.
const TICKER_ONLY: &[&str] = &["link", "dot", "tron", "sol", "ada"];

/// Parameter keys whose values name an entity and must be normalized
pub const ENTITY_PARAM_KEYS: &[&str] = &[
    "entity", "coin_id", "coin", "id", "ids", "symbol", "asset", "ticker",
];

/// Alias → canonical identifier lookup
#[derive(Debug, Clone)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        let aliases = KNOWN_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();

        Self { aliases }
    }

    /// Built-in table extended with configured aliases (configured entries win)
    pub fn with_extra(extra: &HashMap<String, String>) -> Self {
        let mut table = Self::new();
        for (alias, canonical) in extra {
            table.insert(alias, canonical);
        }
        table
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.trim().to_lowercase(), canonical.trim().to_lowercase());
    }

    /// Canonical identifier for a known alias
    pub fn resolve(&self, input: &str) -> Option<&str> {
        self.aliases
            .get(&input.trim().to_lowercase())
            .map(String::as_str)
    }

    /// Canonical identifier, or a lower-cased copy for unknown input
    pub fn normalize(&self, input: &str) -> String {
        let key = input.trim().trim_start_matches('$').to_lowercase();
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    /// Scan a free-text query for known aliases and `$TICKER` mentions.
    /// Result is de-duplicated and keeps first-seen order.
    pub fn extract(&self, query: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();

        let tokens: Vec<&str> = query
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '?' | '!' | '(' | ')'))
            .filter(|t| !t.is_empty())
            .collect();

        for (i, raw) in tokens.iter().enumerate() {
            let token = raw.trim_matches(|c: char| matches!(c, '.' | ':' | '"' | '\''));

            // Two-word aliases ("binance coin")
            if let Some(next) = tokens.get(i + 1) {
                let pair = format!("{} {}", token, next.trim_matches('.'));
                if let Some(canonical) = self.resolve(&pair) {
                    push_unique(&mut found, canonical.to_string());
                    continue;
                }
            }

            let entity = if let Some(ticker) = token.strip_prefix('$') {
                if ticker.is_empty() || !ticker.chars().all(|c| c.is_ascii_alphanumeric()) {
                    continue;
                }
                self.normalize(ticker)
            } else if let Some(canonical) = self.resolve(token) {
                if is_plain_word(token) {
                    continue;
                }
                canonical.to_string()
            } else {
                continue;
            };

            push_unique(&mut found, entity);
        }

        found
    }

    /// Explicit entities win over extraction from the query.
    pub fn target_entities(&self, query: &str, explicit: &[String]) -> Vec<String> {
        if explicit.iter().any(|e| !e.trim().is_empty()) {
            let mut entities = Vec::with_capacity(explicit.len());
            for entity in explicit.iter().filter(|e| !e.trim().is_empty()) {
                push_unique(&mut entities, self.normalize(entity));
            }
            return entities;
        }

        self.extract(query)
    }

    /// Rewrite entity-valued parameters to their canonical identifiers.
    /// Comma-separated lists and string arrays are normalized element-wise.
    pub fn normalize_parameters(&self, params: &Map<String, Value>) -> Map<String, Value> {
        params
            .iter()
            .map(|(key, value)| {
                if !ENTITY_PARAM_KEYS.contains(&key.as_str()) {
                    return (key.clone(), value.clone());
                }

                let normalized = match value {
                    Value::String(s) if s.contains(',') => Value::String(
                        s.split(',')
                            .map(|part| self.normalize(part))
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
                    Value::String(s) => Value::String(self.normalize(s)),
                    Value::Array(items) => Value::Array(
                        items
                            .iter()
                            .map(|item| match item {
                                Value::String(s) => Value::String(self.normalize(s)),
                                other => other.clone(),
                            })
                            .collect(),
                    ),
                    other => other.clone(),
                };

                (key.clone(), normalized)
            })
            .collect()
    }

    /// First entity-valued parameter in a step's parameter map
    pub fn entity_in(&self, params: &Map<String, Value>) -> Option<String> {
        ENTITY_PARAM_KEYS.iter().find_map(|key| {
            params
                .get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|s| self.normalize(s))
        })
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

fn is_plain_word(token: &str) -> bool {
    TICKER_ONLY.contains(&token.to_lowercase().as_str())
        && token.chars().any(|c| c.is_ascii_lowercase())
}

fn push_unique(list: &mut Vec<String>, entity: String) {
    if !list.contains(&entity) {
        list.push(entity);
    }
}
