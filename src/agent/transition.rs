//! Step-loop states and the pure transition rule

use crate::models::ExecutionPlan;
use serde::{Deserialize, Serialize};

/// Where a session currently is. Indices are 0-based plan positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "step", rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Executing(usize),
    Analyzing(usize),
    Synthesizing,
    Done,
}

/// Next loop state given the index of the next unexecuted step.
///
/// `just_completed` means the step at `current_index - 1` finished and has not
/// been analyzed yet; it takes precedence so the final step is analyzed too.
/// On `Done` the session moves on to synthesis.
pub fn should_continue(plan: &ExecutionPlan, current_index: usize, just_completed: bool) -> Phase {
    if just_completed && current_index > 0 {
        if let Some(step) = plan.step(current_index - 1) {
            if step.is_completed() {
                return Phase::Analyzing(current_index - 1);
            }
        }
    }

    if current_index >= plan.len() {
        return Phase::Done;
    }

    Phase::Executing(current_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStep, StepOutcome};
    use serde_json::{json, Map};

    fn plan(n: u32) -> ExecutionPlan {
        let steps = (1..=n)
            .map(|id| ExecutionStep::new(id, "market", "get_price", Map::new(), "bitcoin"))
            .collect();
        ExecutionPlan::new(steps, "comprehensive", 3)
    }

    fn complete(plan: &mut ExecutionPlan, index: usize) {
        plan.step_mut(index).unwrap().record(StepOutcome::Success {
            payload: json!({}),
            elapsed_ms: 0,
        });
    }

    #[test]
    fn test_empty_plan_is_done() {
        assert_eq!(should_continue(&plan(0), 0, false), Phase::Done);
    }

    #[test]
    fn test_fresh_plan_executes_first_step() {
        assert_eq!(should_continue(&plan(3), 0, false), Phase::Executing(0));
    }

    #[test]
    fn test_just_completed_step_is_analyzed() {
        let mut p = plan(2);
        complete(&mut p, 0);
        assert_eq!(should_continue(&p, 1, true), Phase::Analyzing(0));
        assert_eq!(should_continue(&p, 1, false), Phase::Executing(1));
    }

    #[test]
    fn test_last_step_is_analyzed_before_done() {
        let mut p = plan(2);
        complete(&mut p, 0);
        complete(&mut p, 1);
        assert_eq!(should_continue(&p, 2, true), Phase::Analyzing(1));
        assert_eq!(should_continue(&p, 2, false), Phase::Done);
    }

    #[test]
    fn test_index_past_end_is_done() {
        assert_eq!(should_continue(&plan(2), 7, false), Phase::Done);
    }
}
