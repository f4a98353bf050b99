//! Language-model-backed synthesizer; falls back to the aggregate summary
//! whenever the model fails or its reply does not validate.

use crate::context::SessionContext;
use crate::gemini::LanguageModel;
use crate::models::{AnalysisResult, FinalSummary, Sentiment};
use crate::schema::{clamp_unit, extract_object, FieldReader, Validated};
use crate::synthesis::{AggregateSynthesizer, Synthesizer};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Language-model synthesis. Each missing field falls back to the
/// aggregate vote; an unusable reply falls back to the whole aggregate.
pub struct LlmSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl LlmSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(results: &[AnalysisResult], context: &SessionContext) -> String {
        let findings: Vec<String> = results
            .iter()
            .map(|r| {
                format!(
                    "- step {} | {} | {} | {} ({:.2}){} | {}",
                    r.step_id,
                    r.target_entity,
                    r.category,
                    r.judgment.sentiment,
                    r.confidence,
                    if r.degraded { " [default]" } else { "" },
                    r.rationale
                )
            })
            .collect();

        format!(
            r#"You are the synthesis stage of a market analysis engine.

Combine the per-step findings into one answer to the query.

QUERY:
{}

FINDINGS:
{}

Rules:
- sentiment is one of "bullish", "bearish", "neutral"
- confidence is a number between 0 and 1
- Findings marked [default] carry no information
- Return ONLY valid JSON
- JSON format:

{{
  "sentiment": "neutral",
  "confidence": 0.5,
  "key_findings": ["..."],
  "narrative": "short paragraph answering the query",
  "entity_outlook": {{ "bitcoin": "bullish" }}
}}
"#,
            context.query,
            findings.join("\n")
        )
    }
}

/// Validate a raw synthesis document, defaulting each field from `fallback`.
pub fn parse_summary(raw: &str, fallback: &FinalSummary) -> Result<Validated<FinalSummary>> {
    let object = extract_object(raw)?;
    let mut reader = FieldReader::new(&object);

    let label = reader.string_or("sentiment", &fallback.sentiment.to_string());
    let confidence = clamp_unit(reader.f64_or("confidence", fallback.confidence));
    let mut key_findings = reader.string_list("key_findings");
    let narrative = reader.string_or("narrative", &fallback.narrative);
    let outlook_raw = reader.object_or_empty("entity_outlook");

    let mut defaulted = reader.into_defaulted();

    let sentiment = Sentiment::from_label(&label).unwrap_or_else(|| {
        defaulted.push("sentiment".to_string());
        fallback.sentiment
    });

    if key_findings.is_empty() {
        key_findings = fallback.key_findings.clone();
    }

    let mut entity_outlook: BTreeMap<String, Sentiment> = outlook_raw
        .iter()
        .filter_map(|(entity, v)| {
            v.as_str()
                .and_then(Sentiment::from_label)
                .map(|s| (entity.clone(), s))
        })
        .collect();
    for (entity, sentiment) in &fallback.entity_outlook {
        entity_outlook.entry(entity.clone()).or_insert(*sentiment);
    }

    Ok(Validated {
        value: FinalSummary {
            sentiment,
            key_findings,
            confidence,
            narrative,
            entity_outlook,
        },
        defaulted,
    })
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, results: &[AnalysisResult], context: &SessionContext) -> FinalSummary {
        let aggregate = AggregateSynthesizer::summarize(results);
        if results.is_empty() {
            return aggregate;
        }

        let prompt = Self::build_prompt(results, context);
        let raw = match self.model.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Synthesis model call failed; using aggregate summary");
                return aggregate;
            }
        };

        match parse_summary(&raw, &aggregate) {
            Ok(validated) => {
                if !validated.is_clean() {
                    debug!(defaulted = ?validated.defaulted, "Summary accepted with defaults");
                }
                validated.value
            }
            Err(e) => {
                warn!(error = %e, "Synthesis output rejected; using aggregate summary");
                aggregate
            }
        }
    }
}
