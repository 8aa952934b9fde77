//! Deterministic decisions with no external calls.

use crate::core::decision::{ActionDecision, DecisionContext};
use crate::core::rules::rule_decision;
use crate::core::types::AlignedPosition;

#[derive(Debug, Clone)]
pub struct RuleBasedDecider {
    agent_action_type: String,
}

impl RuleBasedDecider {
    pub fn new(agent_action_type: impl Into<String>) -> Self {
        Self {
            agent_action_type: agent_action_type.into(),
        }
    }

    pub fn decide(&self, position: &AlignedPosition, context: &DecisionContext<'_>) -> ActionDecision {
        rule_decision(position, context, &self.agent_action_type)
    }
}
