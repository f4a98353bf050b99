//! Final synthesis over all analysis results of a session
//!
//! A synthesizer always produces a summary. With zero inputs the summary is
//! `FinalSummary::neutral()`.

use crate::context::SessionContext;
use crate::models::{AnalysisResult, FinalSummary, Sentiment};
use crate::schema::clamp_unit;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod llm;

pub use llm::LlmSynthesizer;

/// Weighted score beyond which the vote is directional
const DIRECTION_THRESHOLD: f64 = 0.2;

const MAX_KEY_FINDINGS: usize = 5;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, results: &[AnalysisResult], context: &SessionContext) -> FinalSummary;
}

/// Deterministic confidence-weighted vote
pub struct AggregateSynthesizer;

impl AggregateSynthesizer {
    pub fn summarize(results: &[AnalysisResult]) -> FinalSummary {
        if results.is_empty() {
            return FinalSummary::neutral();
        }

        let sentiment = weighted_sentiment(results.iter());

        let mut by_entity: BTreeMap<&str, Vec<&AnalysisResult>> = BTreeMap::new();
        for result in results {
            by_entity
                .entry(result.target_entity.as_str())
                .or_default()
                .push(result);
        }

        let entity_outlook = by_entity
            .iter()
            .map(|(entity, items)| (entity.to_string(), weighted_sentiment(items.iter().copied())))
            .collect::<BTreeMap<_, _>>();

        let confidence =
            clamp_unit(results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64);

        let mut ranked: Vec<&AnalysisResult> = results.iter().filter(|r| !r.degraded).collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let key_findings = ranked
            .iter()
            .take(MAX_KEY_FINDINGS)
            .map(|r| {
                format!(
                    "{} ({}): {}, {}",
                    r.target_entity, r.category, r.judgment.sentiment, r.rationale
                )
            })
            .collect();

        let outlook = entity_outlook
            .iter()
            .map(|(entity, s)| format!("{} {}", entity, s))
            .collect::<Vec<_>>()
            .join("; ");

        let degraded = results.iter().filter(|r| r.degraded).count();
        let mut narrative = format!(
            "Overall {} across {} result(s) for {} entit{}. Outlook: {}.",
            sentiment,
            results.len(),
            entity_outlook.len(),
            if entity_outlook.len() == 1 { "y" } else { "ies" },
            outlook
        );
        if degraded > 0 {
            narrative.push_str(&format!(" {} result(s) used default judgments.", degraded));
        }

        FinalSummary {
            sentiment,
            key_findings,
            confidence,
            narrative,
            entity_outlook,
        }
    }
}

fn weighted_sentiment<'a>(results: impl Iterator<Item = &'a AnalysisResult>) -> Sentiment {
    let (score, weight) = results.fold((0.0, 0.0), |(score, weight), r| {
        (score + r.judgment.sentiment.score() * r.confidence, weight + r.confidence)
    });

    if weight <= f64::EPSILON {
        return Sentiment::Neutral;
    }

    match score / weight {
        s if s > DIRECTION_THRESHOLD => Sentiment::Bullish,
        s if s < -DIRECTION_THRESHOLD => Sentiment::Bearish,
        _ => Sentiment::Neutral,
    }
}

#[async_trait]
impl Synthesizer for AggregateSynthesizer {
    async fn synthesize(&self, results: &[AnalysisResult], _context: &SessionContext) -> FinalSummary {
        Self::summarize(results)
    }
}
