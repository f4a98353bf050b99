//! Step executor
//!
//! Runs exactly one plan step against its provider and records the outcome on
//! the step. A failing step is still a completed step; nothing here returns an
//! error to the session loop.

use crate::entities::AliasTable;
use crate::error::OrchestrationError;
use crate::models::{ExecutionStep, StepOutcome};
use crate::providers::ConnectionManager;
use crate::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct StepExecutor {
    manager: Arc<ConnectionManager>,
    aliases: AliasTable,
    step_timeout: Duration,
}

impl StepExecutor {
    pub fn new(manager: Arc<ConnectionManager>, aliases: AliasTable, step_timeout: Duration) -> Self {
        Self {
            manager,
            aliases,
            step_timeout,
        }
    }

    /// Execute `step` and record its outcome.
    ///
    /// Returns the session error-log line when the step failed.
    pub async fn execute_step(&self, step: &mut ExecutionStep) -> Option<String> {
        if step.is_completed() {
            debug!(step = step.id, "Step already completed; not re-running");
            return None;
        }

        step.parameters = self.aliases.normalize_parameters(&step.parameters);

        debug!(
            step = step.id,
            provider = %step.provider,
            operation = %step.operation,
            "Executing step"
        );

        let start = Instant::now();
        let result = self
            .call(&step.provider, &step.operation, &step.parameters)
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(payload) => {
                debug!(step = step.id, elapsed_ms, "Step succeeded");
                step.record(StepOutcome::Success {
                    payload,
                    elapsed_ms,
                });
                None
            }
            Err(e) => {
                warn!(
                    step = step.id,
                    provider = %step.provider,
                    operation = %step.operation,
                    kind = %e.step_kind(),
                    error = %e,
                    "Step failed"
                );
                let line = step_error_line(step, &e);
                step.record(StepOutcome::Failed {
                    kind: e.step_kind(),
                    error: e.to_string(),
                    elapsed_ms,
                });
                Some(line)
            }
        }
    }

    /// Get-or-connect `provider` and run one operation under the step deadline.
    pub async fn call(
        &self,
        provider: &str,
        operation: &str,
        args: &Map<String, Value>,
    ) -> Result<Value> {
        let call = async {
            self.manager.connect(provider).await?;
            self.manager.execute_operation(provider, operation, args).await
        };

        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                // The abandoned call may have left a half-read reply on the channel.
                self.manager.mark_unhealthy(provider).await;
                Err(OrchestrationError::TimeoutError(format!(
                    "{}/{} exceeded {}ms",
                    provider,
                    operation,
                    self.step_timeout.as_millis()
                )))
            }
        }
    }
}

/// `step {id} {provider}/{operation}: {error}`
pub fn step_error_line(step: &ExecutionStep, error: &OrchestrationError) -> String {
    format!(
        "step {} {}/{}: {}",
        step.id, step.provider, step.operation, error
    )
}
