//! Execution plan schema: parse-with-defaults, fallback generation, and the
//! document form the planner is asked to produce.

use crate::config::OperationBinding;
use crate::entities::AliasTable;
use crate::error::OrchestrationError;
use crate::models::{
    ExecutionPlan, ExecutionStep, OperationCategory, DEFAULT_ANALYSIS_KIND, DEFAULT_PRIORITY,
};
use crate::schema::{extract_object, type_name, FieldReader, Validated};
use crate::Result;
use serde_json::{json, Value};

const MIN_PRIORITY: u64 = 1;
const MAX_PRIORITY: u64 = 5;

/// Entity used when a step names none and the session has no single entity
pub const GENERAL_ENTITY: &str = "general";

/// Validate a raw planner document.
///
/// Missing optional fields are defaulted and listed in `defaulted`. A missing
/// `steps` array, a non-object step, a step without `provider`/`operation`, or
/// more than `max_steps` steps make the document invalid.
pub fn parse_plan(
    raw: &str,
    entities: &[String],
    aliases: &AliasTable,
    max_steps: usize,
) -> Result<Validated<ExecutionPlan>> {
    let object = extract_object(raw)?;
    let mut reader = FieldReader::new(&object);

    let steps_json = match reader.raw("steps") {
        Some(Value::Array(steps)) => steps,
        Some(other) => {
            return Err(OrchestrationError::ValidationError(format!(
                "'steps' must be an array, got {}",
                type_name(other)
            )))
        }
        None => {
            return Err(OrchestrationError::ValidationError(
                "Plan has no 'steps'".to_string(),
            ))
        }
    };

    if steps_json.len() > max_steps {
        return Err(OrchestrationError::ValidationError(format!(
            "Plan has {} steps; at most {} allowed",
            steps_json.len(),
            max_steps
        )));
    }

    let analysis_kind = reader.string_or("analysis_kind", DEFAULT_ANALYSIS_KIND);

    let raw_priority = reader.u64_or("priority", DEFAULT_PRIORITY as u64);
    let priority = raw_priority.clamp(MIN_PRIORITY, MAX_PRIORITY) as u8;

    let mut defaulted = reader.into_defaulted();
    if raw_priority != priority as u64 {
        defaulted.push("priority".to_string());
    }

    let mut steps = Vec::with_capacity(steps_json.len());

    for (index, step_json) in steps_json.iter().enumerate() {
        let step_object = step_json.as_object().ok_or_else(|| {
            OrchestrationError::ValidationError(format!(
                "steps[{}] must be an object, got {}",
                index,
                type_name(step_json)
            ))
        })?;

        let mut step_reader = FieldReader::nested(step_object, format!("steps[{}]", index));

        let provider = step_reader.required_string("provider")?;
        let operation = step_reader.required_string("operation")?;
        let id = step_reader.u32_or("id", index as u32 + 1);
        let parameters = step_reader.object_or_empty("parameters");

        let target_entity = match step_reader
            .raw("target_entity")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            Some(entity) => aliases.normalize(entity),
            None => {
                defaulted.push(format!("steps[{}].target_entity", index));
                aliases
                    .entity_in(&parameters)
                    .or_else(|| match entities {
                        [only] => Some(only.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| GENERAL_ENTITY.to_string())
            }
        };

        defaulted.extend(step_reader.into_defaulted());

        steps.push(ExecutionStep::new(
            id,
            provider,
            operation,
            parameters,
            target_entity,
        ));
    }

    // Ids must be unique; renumber by position otherwise.
    let mut ids: Vec<u32> = steps.iter().map(|s| s.id).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != steps.len() {
        defaulted.push("steps.id".to_string());
        for (index, step) in steps.iter_mut().enumerate() {
            step.id = index as u32 + 1;
        }
    }

    Ok(Validated {
        value: ExecutionPlan::new(steps, analysis_kind, priority),
        defaulted,
    })
}

/// Deterministic plan built from the entities alone: for every entity, one
/// step per operation category in the catalog (first binding per category
/// wins), entity-major order.
pub fn fallback_plan(entities: &[String], catalog: &[OperationBinding]) -> ExecutionPlan {
    let mut bindings: Vec<&OperationBinding> = Vec::new();
    let mut seen: Vec<OperationCategory> = Vec::new();
    for binding in catalog {
        if !seen.contains(&binding.category) {
            seen.push(binding.category);
            bindings.push(binding);
        }
    }

    let mut steps = Vec::with_capacity(entities.len() * bindings.len());

    for entity in entities {
        for binding in &bindings {
            let mut parameters = binding.parameters.clone();
            parameters.insert(binding.entity_param.clone(), Value::String(entity.clone()));

            steps.push(ExecutionStep::new(
                steps.len() as u32 + 1,
                binding.provider.clone(),
                binding.operation.clone(),
                parameters,
                entity.clone(),
            ));
        }
    }

    ExecutionPlan::new(steps, DEFAULT_ANALYSIS_KIND, DEFAULT_PRIORITY)
}

/// The document shape the planner is asked to produce
pub fn to_planner_document(plan: &ExecutionPlan) -> Value {
    let steps: Vec<Value> = plan
        .steps()
        .iter()
        .map(|step| {
            json!({
                "id": step.id,
                "provider": step.provider,
                "operation": step.operation,
                "parameters": step.parameters,
                "target_entity": step.target_entity,
            })
        })
        .collect();

    json!({
        "analysis_kind": plan.analysis_kind,
        "priority": plan.priority,
        "steps": steps,
    })
}
