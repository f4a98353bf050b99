//! Planner trait and implementations
//!
//! A planner returns a raw plan document. The orchestrator validates it with
//! `schema::parse_plan` and substitutes `schema::fallback_plan` when it is
//! unusable, so a planner failure can never stop a session.

use crate::context::SessionContext;
use crate::Result;
use async_trait::async_trait;

pub mod llm;
pub mod schema;

pub use llm::LlmPlanner;
pub use schema::{fallback_plan, parse_plan, to_planner_document};

/// Trait for plan generation (LLM controlled)
#[async_trait]
pub trait Planner: Send + Sync {
    /// Raw planner document, expected to match the planner schema
    async fn create_plan(&self, context: &SessionContext) -> Result<String>;
}

/// Catalog planner for development & offline runs.
/// Produces the same plan as the deterministic fallback, through the schema.
pub struct CatalogPlanner;

#[async_trait]
impl Planner for CatalogPlanner {
    async fn create_plan(&self, context: &SessionContext) -> Result<String> {
        let plan = fallback_plan(&context.entities, &context.catalog);
        Ok(to_planner_document(&plan).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_catalog;
    use crate::entities::AliasTable;

    #[tokio::test]
    async fn test_catalog_planner_document_parses_cleanly() {
        let mut context = SessionContext::new(
            "compare eth and sol",
            vec!["ethereum".to_string(), "solana".to_string()],
        );
        context.catalog = default_catalog();

        let raw = CatalogPlanner.create_plan(&context).await.unwrap();
        let parsed = parse_plan(&raw, &context.entities, &AliasTable::new(), 20).unwrap();

        assert!(parsed.is_clean());
        assert_eq!(parsed.value.len(), 6);
    }
}
