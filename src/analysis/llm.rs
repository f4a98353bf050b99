//! Language-model-backed analyzer
//!
//! Asks the model for a judgment of one payload. A failed call or an
//! unreadable reply yields a degraded neutral result instead of an error.

use crate::analysis::{degraded_result, finalize, is_unusable_payload, AnalysisRequest, Analyzer};
use crate::context::SessionContext;
use crate::gemini::LanguageModel;
use crate::models::{AnalysisResult, Judgment, Sentiment};
use crate::schema::{extract_object, FieldReader, Validated};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on the payload text placed in the prompt
const MAX_PAYLOAD_CHARS: usize = 6000;

const DEFAULT_CONFIDENCE: f64 = 0.5;

pub struct LlmAnalyzer {
    model: Arc<dyn LanguageModel>,
}

impl LlmAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(request: &AnalysisRequest<'_>, context: &SessionContext) -> String {
        let mut payload = request.payload.to_string();
        if payload.len() > MAX_PAYLOAD_CHARS {
            let mut cut = MAX_PAYLOAD_CHARS;
            while !payload.is_char_boundary(cut) {
                cut -= 1;
            }
            payload.truncate(cut);
            payload.push('…');
        }

        format!(
            r#"You are the analysis stage of a market analysis engine.

Judge ONE data result for ONE entity.

{}
ENTITY: {}
DATA KIND: {} (operation "{}")
DATA:
{}

Rules:
- sentiment is one of "bullish", "bearish", "neutral"
- confidence is a number between 0 and 1
- Set "relevant": false if the data says nothing about the entity
- Return ONLY valid JSON
- JSON format:

{{
  "relevant": true,
  "sentiment": "neutral",
  "confidence": 0.5,
  "signals": ["short_signal_name"],
  "metrics": {{ "name": 0.0 }},
  "rationale": "one sentence"
}}
"#,
            context.render(),
            request.target_entity,
            request.kind,
            request.operation,
            payload
        )
    }
}

/// Validate a raw analysis document against the request it answers.
/// `Ok(None)` means the model judged the data irrelevant.
pub fn parse_analysis(
    raw: &str,
    request: &AnalysisRequest<'_>,
) -> Result<Option<Validated<AnalysisResult>>> {
    let object = extract_object(raw)?;
    let mut reader = FieldReader::new(&object);

    if reader.raw("relevant").and_then(Value::as_bool) == Some(false) {
        return Ok(None);
    }

    let label = reader.string_or("sentiment", "neutral");
    let sentiment = Sentiment::from_label(&label);

    let confidence = reader.f64_or("confidence", DEFAULT_CONFIDENCE);
    let signals = reader.string_list("signals");
    let metrics = reader.object_or_empty("metrics");
    let rationale = reader.string_or("rationale", "No rationale given");

    let mut defaulted = reader.into_defaulted();
    if sentiment.is_none() && !defaulted.iter().any(|f| f == "sentiment") {
        defaulted.push("sentiment".to_string());
    }

    Ok(Some(Validated {
        value: AnalysisResult {
            step_id: request.step_id,
            target_entity: request.target_entity.to_string(),
            category: request.kind,
            judgment: Judgment {
                sentiment: sentiment.unwrap_or(Sentiment::Neutral),
                signals,
                metrics,
            },
            confidence,
            rationale,
            degraded: false,
        },
        defaulted,
    }))
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        context: &SessionContext,
    ) -> Option<AnalysisResult> {
        if is_unusable_payload(request.payload) {
            return None;
        }

        let prompt = Self::build_prompt(&request, context);

        let raw = match self.model.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(step_id = request.step_id, error = %e, "Analyzer model call failed");
                return Some(degraded_result(&request, &e.to_string()));
            }
        };

        match parse_analysis(&raw, &request) {
            Ok(Some(validated)) => {
                if !validated.is_clean() {
                    debug!(
                        step_id = request.step_id,
                        defaulted = ?validated.defaulted,
                        "Analysis accepted with defaults"
                    );
                }
                finalize(validated.value)
            }
            Ok(None) => {
                debug!(step_id = request.step_id, "Model judged result irrelevant");
                None
            }
            Err(e) => {
                warn!(step_id = request.step_id, error = %e, "Analyzer output rejected");
                Some(degraded_result(&request, &e.to_string()))
            }
        }
    }
}
