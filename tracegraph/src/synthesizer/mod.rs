//! Turns extracted patterns into an [`ActionGraph`] plus an audit trail.
//!
//! The walk over patterns lives in [`engine`]; the per-position decision is
//! delegated to one [`Decider`] variant:
//!
//! - [`rule::RuleBasedDecider`]: deterministic, no external calls.
//! - [`llm::LlmDecider`]: one inference call per position, rule fallback.
//! - [`hybrid::HybridDecider`]: rules for clear patterns, the model for
//!   ambiguous ones.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::decision::{ActionDecision, DecisionContext, DecisionSource};
use crate::core::report::SynthesisReport;
use crate::core::rules::DEFAULT_AGENT_ACTION_TYPE;
use crate::core::strategy::SynthesisStrategy;
use crate::core::types::AlignedPosition;
use crate::graph::ActionGraph;
use crate::io::inference::Inference;
use crate::io::prompt::PromptBuilder;

pub mod engine;
pub mod hybrid;
pub mod llm;
pub mod rule;

use hybrid::HybridDecider;
use llm::LlmDecider;
use rule::RuleBasedDecider;

/// Action type → human-readable description offered to the model.
pub type ActionMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub graph: ActionGraph,
    pub report: SynthesisReport,
    /// One entry per walked position, in walk order.
    pub decisions: Vec<ActionDecision>,
    pub script: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SynthesizerOptions {
    pub agent_action_type: String,
    pub action_metadata: ActionMetadata,
    /// Shared prompt templates; built-in templates when unset.
    pub prompts: Option<Rc<PromptBuilder>>,
}

impl Default for SynthesizerOptions {
    fn default() -> Self {
        Self {
            agent_action_type: DEFAULT_AGENT_ACTION_TYPE.to_string(),
            action_metadata: ActionMetadata::new(),
            prompts: None,
        }
    }
}

/// Per-position decision policy.
pub enum Decider {
    RuleBased(RuleBasedDecider),
    Llm(LlmDecider),
    Hybrid(HybridDecider),
}

impl Decider {
    pub fn decide(&self, position: &AlignedPosition, context: &DecisionContext<'_>) -> ActionDecision {
        match self {
            Decider::RuleBased(decider) => decider.decide(position, context),
            Decider::Llm(decider) => decider.decide(position, context),
            Decider::Hybrid(decider) => decider.decide(position, context),
        }
    }

    /// Identity recorded on decisions the engine makes itself.
    pub fn source(&self) -> DecisionSource {
        match self {
            Decider::RuleBased(_) => DecisionSource::Rule,
            Decider::Llm(_) => DecisionSource::Llm,
            Decider::Hybrid(_) => DecisionSource::Hybrid,
        }
    }

    pub fn strategy(&self) -> SynthesisStrategy {
        match self {
            Decider::RuleBased(_) => SynthesisStrategy::RuleBased,
            Decider::Llm(_) => SynthesisStrategy::Llm,
            Decider::Hybrid(_) => SynthesisStrategy::Hybrid,
        }
    }
}

pub struct GraphSynthesizer {
    decider: Decider,
}

impl GraphSynthesizer {
    pub fn new(decider: Decider) -> Self {
        Self { decider }
    }

    /// Build the synthesizer for `strategy`.
    ///
    /// Model-backed strategies fail without an inference backend.
    pub fn for_strategy(
        strategy: SynthesisStrategy,
        inference: Option<Rc<dyn Inference>>,
        options: SynthesizerOptions,
    ) -> Result<Self> {
        let decider = match strategy {
            SynthesisStrategy::RuleBased => {
                Decider::RuleBased(RuleBasedDecider::new(options.agent_action_type))
            }
            SynthesisStrategy::Llm => Decider::Llm(LlmDecider::new(inference, &options)?),
            SynthesisStrategy::Hybrid => Decider::Hybrid(HybridDecider::new(inference, &options)?),
        };
        Ok(Self::new(decider))
    }

    pub fn strategy(&self) -> SynthesisStrategy {
        self.decider.strategy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedInference;

    #[test]
    fn rule_based_needs_no_inference() {
        let synthesizer =
            GraphSynthesizer::for_strategy(SynthesisStrategy::RuleBased, None, SynthesizerOptions::default())
                .expect("rule based");
        assert_eq!(synthesizer.strategy(), SynthesisStrategy::RuleBased);
        assert_eq!(synthesizer.decider.source(), DecisionSource::Rule);
    }

    #[test]
    fn model_backed_strategies_require_inference() {
        for strategy in [SynthesisStrategy::Llm, SynthesisStrategy::Hybrid] {
            assert!(
                GraphSynthesizer::for_strategy(strategy, None, SynthesizerOptions::default()).is_err(),
                "{strategy} built without inference"
            );
            let backend: Rc<dyn Inference> = Rc::new(ScriptedInference::new(Vec::new()));
            let synthesizer =
                GraphSynthesizer::for_strategy(strategy, Some(backend), SynthesizerOptions::default())
                    .expect("with inference");
            assert_eq!(synthesizer.strategy(), strategy);
        }
    }

    #[test]
    fn hybrid_gates_are_attributed_to_hybrid() {
        let backend: Rc<dyn Inference> = Rc::new(ScriptedInference::new(Vec::new()));
        let synthesizer = GraphSynthesizer::for_strategy(
            SynthesisStrategy::Hybrid,
            Some(backend),
            SynthesizerOptions::default(),
        )
        .expect("hybrid");
        assert_eq!(synthesizer.decider.source(), DecisionSource::Hybrid);
    }
}
