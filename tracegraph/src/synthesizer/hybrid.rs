//! Rules for clear patterns, the model for ambiguous ones.

use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::decision::{ActionDecision, DecisionContext, PatternType};
use crate::core::types::AlignedPosition;
use crate::io::inference::Inference;
use crate::synthesizer::SynthesizerOptions;
use crate::synthesizer::llm::LlmDecider;
use crate::synthesizer::rule::RuleBasedDecider;

pub struct HybridDecider {
    rule: RuleBasedDecider,
    llm: LlmDecider,
}

impl HybridDecider {
    pub fn new(inference: Option<Rc<dyn Inference>>, options: &SynthesizerOptions) -> Result<Self> {
        let inference =
            inference.ok_or_else(|| anyhow!("hybrid synthesis requires an inference backend"))?;
        Ok(Self {
            rule: RuleBasedDecider::new(options.agent_action_type.clone()),
            llm: LlmDecider::new(Some(inference), options)?,
        })
    }

    /// Deterministic, parameterizable and optional positions never reach the
    /// model; everything else gets exactly one inference call.
    pub fn decide(&self, position: &AlignedPosition, context: &DecisionContext<'_>) -> ActionDecision {
        match context.pattern_type {
            PatternType::Deterministic | PatternType::Parameterizable | PatternType::Optional => {
                self.rule.decide(position, context)
            }
            PatternType::Variable | PatternType::BranchPoint | PatternType::UserInputBoundary => {
                self.llm.decide(position, context)
            }
        }
    }
}
