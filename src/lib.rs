//! Market Analysis Orchestrator
//!
//! Answers free-text market questions by:
//! - Resolving the entities a query is about
//! - Talking to tool providers (price, market data, news) over JSON-RPC on stdio
//! - Executing a validated plan one step at a time, never aborting on a single failure
//! - Judging each result and synthesizing one summary
//! - Persisting every session with a fingerprint of the plan it ran
//!
//! SESSION LOOP:
//! ENTITIES → CONNECT → CONTEXT → PLAN → (EXECUTE → ANALYZE)* → SYNTHESIZE → STORE

pub mod agent;
pub mod analysis;
pub mod api;
pub mod audit;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod models;
pub mod planner;
pub mod providers;
pub mod schema;
pub mod state;
pub mod synthesis;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use models::*;
