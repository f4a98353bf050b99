//! Accumulated session context shared with the planner, analyzer and synthesizer

use crate::config::OperationBinding;
use crate::models::AnalysisResult;
use crate::providers::ProviderStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound on gathered context rendered into a prompt
const MAX_RENDERED_CONTEXT_CHARS: usize = 4000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub query: String,
    pub entities: Vec<String>,
    /// Connected providers and their advertised operations
    pub providers: Vec<ProviderStatus>,
    pub catalog: Vec<OperationBinding>,
    /// Results of the per-session context operations, keyed by their configured key
    pub gathered: Map<String, Value>,
    /// Analyses produced so far in this session, in step order
    pub prior: Vec<AnalysisResult>,
}

impl SessionContext {
    pub fn new(query: impl Into<String>, entities: Vec<String>) -> Self {
        Self {
            query: query.into(),
            entities,
            ..Self::default()
        }
    }

    /// Compact text block for prompts
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("QUERY:\n{}\n\n", self.query));

        out.push_str("TARGET ENTITIES:\n");
        if self.entities.is_empty() {
            out.push_str("(none)\n");
        } else {
            out.push_str(&self.entities.join(", "));
            out.push('\n');
        }

        if !self.gathered.is_empty() {
            let mut gathered = Value::Object(self.gathered.clone()).to_string();
            if gathered.len() > MAX_RENDERED_CONTEXT_CHARS {
                let mut cut = MAX_RENDERED_CONTEXT_CHARS;
                while !gathered.is_char_boundary(cut) {
                    cut -= 1;
                }
                gathered.truncate(cut);
                gathered.push_str("…");
            }
            out.push_str(&format!("\nMARKET CONTEXT:\n{}\n", gathered));
        }

        if !self.prior.is_empty() {
            out.push_str("\nPRIOR FINDINGS:\n");
            for result in &self.prior {
                out.push_str(&format!(
                    "- {} [{}]: {} ({:.2}) {}\n",
                    result.target_entity,
                    result.category,
                    result.judgment.sentiment,
                    result.confidence,
                    result.rationale
                ));
            }
        }

        out
    }
}
