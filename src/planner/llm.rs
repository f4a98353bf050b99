//! Language-model-backed planner
//!
//! Renders the session context and operation catalog into a planning prompt
//! and returns the model's raw document. Validation happens in `schema`.

use crate::context::SessionContext;
use crate::gemini::LanguageModel;
use crate::planner::Planner;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct LlmPlanner {
    model: Arc<dyn LanguageModel>,
    max_steps: usize,
}

impl LlmPlanner {
    /// `max_steps` is the ceiling the plan validator enforces.
    pub fn new(model: Arc<dyn LanguageModel>, max_steps: usize) -> Self {
        Self { model, max_steps }
    }

    fn build_prompt(context: &SessionContext, max_steps: usize) -> String {
        let mut operations = Vec::new();
        for provider in &context.providers {
            for operation in &provider.operations {
                operations.push(format!("{} / {}", provider.name, operation));
            }
        }

        let catalog: Vec<String> = context
            .catalog
            .iter()
            .map(|b| {
                format!(
                    "{} → {} / {} (entity parameter: \"{}\")",
                    b.category, b.provider, b.operation, b.entity_param
                )
            })
            .collect();

        format!(
            r#"You are the planning stage of a market analysis engine.

Build an ordered execution plan that gathers the data needed to answer the query.

{}
AVAILABLE OPERATIONS (provider / operation):
- {}

PREFERRED OPERATION PER CATEGORY:
- {}

Rules:
- Every step calls exactly ONE operation for ONE target entity
- Use only the operations listed above
- Put the target entity in the operation's entity parameter
- At most {} steps
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{
  "analysis_kind": "comprehensive",
  "priority": 3,
  "steps": [
    {{
      "id": 1,
      "provider": "market",
      "operation": "get_price",
      "parameters": {{ "coin_id": "bitcoin" }},
      "target_entity": "bitcoin"
    }}
  ]
}}
"#,
            context.render(),
            if operations.is_empty() {
                "(none advertised)".to_string()
            } else {
                operations.join("\n- ")
            },
            catalog.join("\n- "),
            (context.entities.len().max(1) * context.catalog.len().max(1)).min(max_steps),
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(&self, context: &SessionContext) -> Result<String> {
        let prompt = Self::build_prompt(context, self.max_steps);
        debug!(prompt_chars = prompt.len(), "Requesting plan from language model");
        self.model.generate(&prompt).await
    }
}
