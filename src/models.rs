//! Core data models for the market analysis orchestrator

use crate::error::StepErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Category of a provider operation, used for fallback planning and analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Price,
    MarketDetail,
    News,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Connection lifecycle: Disconnected → Connecting → Connected → Disconnected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Partial,
    Cancelled,
}

/// Where the executed plan came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Planner,
    PlannerWithDefaults,
    Fallback,
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Success {
        payload: Value,
        elapsed_ms: u64,
    },
    Failed {
        kind: StepErrorKind,
        error: String,
        elapsed_ms: u64,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            StepOutcome::Success { payload, .. } => Some(payload),
            StepOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepOutcome::Success { .. } => None,
            StepOutcome::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStep {
    pub id: u32,
    pub provider: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub target_entity: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    result: Option<StepOutcome>,
}

impl ExecutionStep {
    pub fn new(
        id: u32,
        provider: impl Into<String>,
        operation: impl Into<String>,
        parameters: Map<String, Value>,
        target_entity: impl Into<String>,
    ) -> Self {
        Self {
            id,
            provider: provider.into(),
            operation: operation.into(),
            parameters,
            target_entity: target_entity.into(),
            completed: false,
            result: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn result(&self) -> Option<&StepOutcome> {
        self.result.as_ref()
    }

    /// Record the step's outcome. The first outcome wins; later calls are ignored
    /// and return `false`.
    pub fn record(&mut self, outcome: StepOutcome) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(outcome);
        self.completed = true;
        true
    }
}

pub const DEFAULT_ANALYSIS_KIND: &str = "comprehensive";
pub const DEFAULT_PRIORITY: u8 = 3;

/// Ordered steps; the step list cannot grow or shrink once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    steps: Vec<ExecutionStep>,
    pub analysis_kind: String,
    pub priority: u8,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<ExecutionStep>, analysis_kind: impl Into<String>, priority: u8) -> Self {
        Self {
            steps,
            analysis_kind: analysis_kind.into(),
            priority,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&ExecutionStep> {
        self.steps.get(index)
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut ExecutionStep> {
        self.steps.get_mut(index)
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_completed()).count()
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgment {
    pub sentiment: Sentiment,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub step_id: u32,
    pub target_entity: String,
    pub category: OperationCategory,
    pub judgment: Judgment,
    /// Always within [0, 1].
    pub confidence: f64,
    pub rationale: String,
    /// Set when the analyzer could not run and a default judgment was substituted.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalSummary {
    pub sentiment: Sentiment,
    pub key_findings: Vec<String>,
    pub confidence: f64,
    pub narrative: String,
    #[serde(default)]
    pub entity_outlook: BTreeMap<String, Sentiment>,
}

impl FinalSummary {
    pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

    /// Summary used when there is nothing to synthesize.
    pub fn neutral() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            key_findings: Vec::new(),
            confidence: Self::NEUTRAL_CONFIDENCE,
            narrative: "No analyzable results were collected.".to_string(),
            entity_outlook: BTreeMap::new(),
        }
    }
}

//
// ================= Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub query: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub query: String,
    pub target_entities: Vec<String>,
    pub plan: ExecutionPlan,
    pub plan_source: PlanSource,
    pub plan_fingerprint: String,
    /// Analysis results keyed by target entity.
    pub results: BTreeMap<String, Vec<AnalysisResult>>,
    pub summary: FinalSummary,
    pub errors: Vec<String>,
    pub status: SessionStatus,
    /// One line per loop transition
    #[serde(default)]
    pub reasoning_trace: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Session {
    pub fn analyzed_count(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    pub fn all_results(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.results.values().flatten()
    }
}

impl Sentiment {
    /// Lenient label parsing for model output.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "bullish" | "positive" | "buy" | "up" => Some(Sentiment::Bullish),
            "bearish" | "negative" | "sell" | "down" => Some(Sentiment::Bearish),
            "neutral" | "mixed" | "hold" | "flat" => Some(Sentiment::Neutral),
            _ => None,
        }
    }

    /// +1 bullish, -1 bearish, 0 neutral
    pub fn score(self) -> f64 {
        match self {
            Sentiment::Bullish => 1.0,
            Sentiment::Bearish => -1.0,
            Sentiment::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationCategory::Price => "price",
            OperationCategory::MarketDetail => "market detail",
            OperationCategory::News => "related news",
            OperationCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> ExecutionStep {
        ExecutionStep::new(1, "market", "get_price", Map::new(), "bitcoin")
    }

    #[test]
    fn test_step_result_is_set_once() {
        let mut step = step();
        assert!(!step.is_completed());

        assert!(step.record(StepOutcome::Success {
            payload: json!({"usd": 1.0}),
            elapsed_ms: 3,
        }));
        assert!(!step.record(StepOutcome::Failed {
            kind: StepErrorKind::Provider,
            error: "late".to_string(),
            elapsed_ms: 9,
        }));

        assert!(step.is_completed());
        assert!(step.result().unwrap().is_success());
    }

    #[test]
    fn test_neutral_summary() {
        let summary = FinalSummary::neutral();
        assert_eq!(summary.sentiment, Sentiment::Neutral);
        assert!(summary.key_findings.is_empty());
        assert_eq!(summary.confidence, 0.5);
    }

    #[test]
    fn test_step_outcome_serialization_is_tagged() {
        let outcome = StepOutcome::Failed {
            kind: StepErrorKind::Timeout,
            error: "timed out".to_string(),
            elapsed_ms: 30_000,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["kind"], "timeout");
    }

    #[test]
    fn test_sentiment_labels() {
        assert_eq!(Sentiment::from_label(" Positive "), Some(Sentiment::Bullish));
        assert_eq!(Sentiment::from_label("SELL"), Some(Sentiment::Bearish));
        assert_eq!(Sentiment::from_label("mixed"), Some(Sentiment::Neutral));
        assert_eq!(Sentiment::from_label("to the moon"), None);
    }
}
