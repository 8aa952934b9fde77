//! Deterministic decision rules shared by every synthesis strategy.
//!
//! The rule-based decider uses these directly; the model-backed deciders use
//! them as their fallback.

use serde_json::Value;

use crate::core::decision::{
    ActionDecision, DecisionContext, DecisionSource, PatternType, UNKNOWN_ACTION,
};
use crate::core::types::{AlignedPosition, Target};

/// Default action type for agent-as-action nodes.
pub const DEFAULT_AGENT_ACTION_TYPE: &str = "meta_workflow_agent";

/// Action type of the human-confirmation gate.
pub const WAIT_ACTION: &str = "wait";

/// Placeholder description for a position without a fixed action.
///
/// Lists each observed action type with its count from the representative
/// step's `variants` histogram.
pub fn describe_variable_step(position: &AlignedPosition) -> String {
    let variants = position
        .representative()
        .map(|step| step.variants())
        .unwrap_or_default();
    if variants.is_empty() {
        return format!("Variable step at position {}", position.index);
    }
    let observed = variants
        .iter()
        .map(|(action_type, count)| format!("{action_type} (×{count})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Variable step at position {}: observed {observed}",
        position.index
    )
}

/// Rule-based decision for one position.
pub fn rule_decision(
    position: &AlignedPosition,
    context: &DecisionContext<'_>,
    agent_action_type: &str,
) -> ActionDecision {
    let representative = position.representative();
    let (action_type, target, args) = match context.pattern_type {
        PatternType::Variable => (
            agent_action_type.to_string(),
            Some(Target::Value(Value::String(describe_variable_step(
                position,
            )))),
            None,
        ),
        PatternType::Parameterizable => match representative {
            Some(step) => {
                let args = match context.param_info {
                    Some(info) => {
                        let mut args = info.constant_args.clone();
                        for (key, variable) in &info.variable_args {
                            args.insert(key.clone(), Value::String(format!("{{{variable}}}")));
                        }
                        Some(args)
                    }
                    None => step.args.clone(),
                };
                (step.action_type.clone(), step.target.clone(), args)
            }
            None => (UNKNOWN_ACTION.to_string(), None, None),
        },
        _ => match representative {
            Some(step) => (
                step.action_type.clone(),
                step.target.clone(),
                step.args.clone(),
            ),
            None => (UNKNOWN_ACTION.to_string(), None, None),
        },
    };

    ActionDecision {
        position_index: position.index,
        action_type: Some(action_type),
        target,
        args,
        decision_source: DecisionSource::Rule,
        confidence: 1.0,
        reasoning: None,
    }
}

/// Decision recorded for a human-confirmation gate.
pub fn boundary_decision(position_index: usize, source: DecisionSource) -> ActionDecision {
    ActionDecision {
        position_index,
        action_type: Some(WAIT_ACTION.to_string()),
        target: Some(Target::Value(Value::Bool(true))),
        args: None,
        decision_source: source,
        confidence: 1.0,
        reasoning: None,
    }
}
