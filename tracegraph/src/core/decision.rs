//! Per-position synthesis decisions.

use serde::{Deserialize, Serialize};

use crate::core::types::{Args, ParameterizableInfo, Target};

/// Action type used when no confident decision exists; never emitted.
pub const UNKNOWN_ACTION: &str = "unknown";

/// Pattern bucket a position was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    UserInputBoundary,
    Deterministic,
    Parameterizable,
    Variable,
    Optional,
    BranchPoint,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::UserInputBoundary => "user_input_boundary",
            PatternType::Deterministic => "deterministic",
            PatternType::Parameterizable => "parameterizable",
            PatternType::Variable => "variable",
            PatternType::Optional => "optional",
            PatternType::BranchPoint => "branch_point",
        }
    }
}

/// Who produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Llm,
    Hybrid,
}

/// One synthesis decision, kept as an audit trail next to the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub position_index: usize,
    /// `None` or [`UNKNOWN_ACTION`] means "omit the step".
    pub action_type: Option<String>,
    pub target: Option<Target>,
    pub args: Option<Args>,
    pub decision_source: DecisionSource,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub reasoning: Option<String>,
}

impl ActionDecision {
    /// Whether applying this decision emits a graph action.
    pub fn is_emittable(&self) -> bool {
        self.action_type
            .as_deref()
            .is_some_and(|action_type| !action_type.trim().is_empty() && action_type != UNKNOWN_ACTION)
    }

    /// Names an action type that is blank, so it cannot be emitted.
    pub fn has_blank_action_type(&self) -> bool {
        self.action_type
            .as_deref()
            .is_some_and(|action_type| action_type.trim().is_empty())
    }
}

/// Clamp a reported confidence into `[0, 1]`. NaN reads as no confidence.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

/// Inputs a decider sees besides the position itself.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub task_description: &'a str,
    pub pattern_type: PatternType,
    /// Set for parameterizable positions that have extraction info.
    pub param_info: Option<&'a ParameterizableInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(action_type: Option<&str>) -> ActionDecision {
        ActionDecision {
            position_index: 0,
            action_type: action_type.map(str::to_string),
            target: None,
            args: None,
            decision_source: DecisionSource::Rule,
            confidence: 1.0,
            reasoning: None,
        }
    }

    #[test]
    fn unknown_and_missing_action_types_are_not_emitted() {
        assert!(decision(Some("click")).is_emittable());
        assert!(!decision(Some(UNKNOWN_ACTION)).is_emittable());
        assert!(!decision(None).is_emittable());
        assert!(!decision(Some("  ")).is_emittable());
        assert!(decision(Some("")).has_blank_action_type());
        assert!(!decision(Some(UNKNOWN_ACTION)).has_blank_action_type());
    }

    #[test]
    fn clamp_confidence_bounds_values() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }
}
