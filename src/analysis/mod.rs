//! Per-step analysis
//!
//! An analyzer turns one provider payload into an `AnalysisResult`, or `None`
//! when there is nothing worth judging. Returning `None` is not an error: the
//! step is simply left out of the aggregate.

use crate::context::SessionContext;
use crate::models::{AnalysisResult, Judgment, OperationCategory, Sentiment};
use crate::schema::clamp_unit;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub mod llm;

pub use llm::LlmAnalyzer;

/// Judgments below this confidence are treated as no-ops
pub const NO_OP_CONFIDENCE: f64 = 0.05;

/// Confidence given to the labeled default when an analyzer fails internally
pub const DEGRADED_CONFIDENCE: f64 = 0.1;

pub const UNAVAILABLE_SIGNAL: &str = "analysis_unavailable";

/// Everything an analyzer sees for one completed step
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub step_id: u32,
    pub payload: &'a Value,
    pub kind: OperationCategory,
    pub operation: &'a str,
    pub target_entity: &'a str,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        context: &SessionContext,
    ) -> Option<AnalysisResult>;
}

/// Clamp confidence and drop no-op judgments.
pub fn finalize(mut result: AnalysisResult) -> Option<AnalysisResult> {
    result.confidence = clamp_unit(result.confidence);
    if result.confidence < NO_OP_CONFIDENCE {
        return None;
    }
    Some(result)
}

/// Low-confidence, clearly labeled judgment used when analysis itself failed
pub fn degraded_result(request: &AnalysisRequest<'_>, reason: &str) -> AnalysisResult {
    AnalysisResult {
        step_id: request.step_id,
        target_entity: request.target_entity.to_string(),
        category: request.kind,
        judgment: Judgment {
            sentiment: Sentiment::Neutral,
            signals: vec![UNAVAILABLE_SIGNAL.to_string()],
            metrics: Map::new(),
        },
        confidence: DEGRADED_CONFIDENCE,
        rationale: format!("Default judgment; analysis unavailable: {}", reason),
        degraded: true,
    }
}

/// Payloads that carry nothing to analyze: null, empty, or an error body
pub fn is_unusable_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            map.is_empty()
                || map.get("success").and_then(Value::as_bool) == Some(false)
                || (map.len() == 1 && map.get("error").map_or(false, |e| !e.is_null()))
        }
        _ => false,
    }
}

//
// ================= Heuristic Analyzer =================
//

const POSITIVE_TERMS: &[&str] = &[
    "surge", "rally", "gain", "record high", "bullish", "adoption", "approve",
    "approval", "inflow", "upgrade", "partnership", "breakout",
];

const NEGATIVE_TERMS: &[&str] = &[
    "crash", "plunge", "hack", "exploit", "ban", "lawsuit", "bearish",
    "sell-off", "selloff", "outflow", "fraud", "delist", "liquidation",
];

/// Percent move that counts as directional
const MOVE_THRESHOLD_PCT: f64 = 2.0;

/// Deterministic analyzer reading well-known payload fields.
/// Keeps the system functional without an LLM.
pub struct HeuristicAnalyzer;

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        _context: &SessionContext,
    ) -> Option<AnalysisResult> {
        if is_unusable_payload(request.payload) {
            return None;
        }

        let (judgment, confidence, rationale) = match request.kind {
            OperationCategory::Price | OperationCategory::MarketDetail => {
                judge_market(request.payload, request.kind)?
            }
            OperationCategory::News => judge_news(request.payload)?,
            OperationCategory::Other => judge_market(request.payload, request.kind)
                .or_else(|| judge_news(request.payload))?,
        };

        finalize(AnalysisResult {
            step_id: request.step_id,
            target_entity: request.target_entity.to_string(),
            category: request.kind,
            judgment,
            confidence,
            rationale,
            degraded: false,
        })
    }
}

/// Depth-first search for the first numeric field whose key satisfies `pred`
fn find_number(value: &Value, pred: &dyn Fn(&str) -> bool, depth: usize) -> Option<f64> {
    if depth > 4 {
        return None;
    }
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if pred(&key.to_lowercase()) {
                    if let Some(n) = v.as_f64() {
                        return Some(n);
                    }
                }
            }
            map.values().find_map(|v| find_number(v, pred, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_number(v, pred, depth + 1)),
        _ => None,
    }
}

fn is_change_key(k: &str) -> bool {
    k.contains("change") && (k.contains("percent") || k.contains("pct") || k.contains("24h"))
}

fn judge_market(payload: &Value, kind: OperationCategory) -> Option<(Judgment, f64, String)> {
    if !payload.is_object() && !payload.is_array() {
        return None;
    }

    // Price moves win over market-cap or volume moves reported alongside
    let change = find_number(payload, &|k| is_change_key(k) && k.contains("price"), 0)
        .or_else(|| {
            find_number(
                payload,
                &|k| is_change_key(k) && !k.contains("market_cap") && !k.contains("volume"),
                0,
            )
        })
        .or_else(|| find_number(payload, &is_change_key, 0));
    let price = find_number(
        payload,
        &|k| k == "usd" || k == "price" || k == "current_price" || k == "last",
        0,
    );
    let market_cap = find_number(payload, &|k| k.contains("market_cap") && !k.contains("change"), 0);
    let volume = find_number(payload, &|k| k.contains("volume") && !k.contains("change"), 0);

    if change.is_none() && price.is_none() && market_cap.is_none() {
        return None;
    }

    let mut metrics = Map::new();
    for (name, value) in [
        ("price", price),
        ("change_pct", change),
        ("market_cap", market_cap),
        ("volume", volume),
    ] {
        if let Some(v) = value {
            if let Some(n) = serde_json::Number::from_f64(v) {
                metrics.insert(name.to_string(), Value::Number(n));
            }
        }
    }

    let mut signals = Vec::new();
    let (sentiment, confidence, rationale) = match change {
        Some(pct) if pct >= MOVE_THRESHOLD_PCT => {
            signals.push("positive_momentum".to_string());
            (
                Sentiment::Bullish,
                (0.55 + pct.abs() / 50.0).min(0.85),
                format!("Up {:.2}% over the period", pct),
            )
        }
        Some(pct) if pct <= -MOVE_THRESHOLD_PCT => {
            signals.push("negative_momentum".to_string());
            (
                Sentiment::Bearish,
                (0.55 + pct.abs() / 50.0).min(0.85),
                format!("Down {:.2}% over the period", pct.abs()),
            )
        }
        Some(pct) => (
            Sentiment::Neutral,
            0.5,
            format!("Flat: {:+.2}% over the period", pct),
        ),
        None => (
            Sentiment::Neutral,
            0.25,
            "Level data only; no change figure available".to_string(),
        ),
    };

    if kind == OperationCategory::MarketDetail && volume.is_some() {
        signals.push("volume_reported".to_string());
    }

    Some((
        Judgment {
            sentiment,
            signals,
            metrics,
        },
        confidence,
        rationale,
    ))
}

fn news_texts(payload: &Value) -> Vec<String> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => ["articles", "news", "items", "results", "data"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        Value::String(s) => return vec![s.to_lowercase()],
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.to_lowercase()),
            Value::Object(article) => {
                let text = ["title", "headline", "summary", "description"]
                    .iter()
                    .filter_map(|k| article.get(*k).and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" ");
                (!text.is_empty()).then(|| text.to_lowercase())
            }
            _ => None,
        })
        .collect()
}

fn judge_news(payload: &Value) -> Option<(Judgment, f64, String)> {
    let texts = news_texts(payload);
    if texts.is_empty() {
        return None;
    }

    let count = |terms: &[&str]| -> usize {
        texts
            .iter()
            .map(|t| terms.iter().filter(|term| t.contains(**term)).count())
            .sum()
    };

    let positive = count(POSITIVE_TERMS);
    let negative = count(NEGATIVE_TERMS);

    let sentiment = if positive > negative {
        Sentiment::Bullish
    } else if negative > positive {
        Sentiment::Bearish
    } else {
        Sentiment::Neutral
    };

    let hits = positive + negative;
    let confidence = if hits == 0 {
        0.2
    } else {
        (0.35 + 0.05 * (positive.abs_diff(negative) as f64)).min(0.75)
    };

    let mut metrics = Map::new();
    metrics.insert("articles".to_string(), Value::from(texts.len()));
    metrics.insert("positive_terms".to_string(), Value::from(positive));
    metrics.insert("negative_terms".to_string(), Value::from(negative));

    Some((
        Judgment {
            sentiment,
            signals: vec![format!("news_{}", sentiment)],
            metrics,
        },
        confidence,
        format!(
            "{} article(s): {} positive vs {} negative cues",
            texts.len(),
            positive,
            negative
        ),
    ))
}
