//! Model-backed decisions with rule-based fallback.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::decision::{
    ActionDecision, DecisionContext, DecisionSource, clamp_confidence,
};
use crate::core::rules::rule_decision;
use crate::core::types::{AlignedPosition, Args, Target};
use crate::io::inference::Inference;
use crate::io::prompt::{
    ActionTypeEntry, DecisionPromptInput, ObservedStep, PromptBuilder, VariableArg,
};
use crate::synthesizer::SynthesizerOptions;

pub const LLM_FAILURE_REASONING: &str = "LLM call failed, using rule-based fallback";

/// Confidence recorded when the model reports none, or the call failed.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

const BUILTIN_ACTIONS: [(&str, &str); 7] = [
    ("goto", "Navigate to a URL"),
    ("click", "Click an element"),
    ("type", "Type text into an input"),
    ("select", "Choose an option from a list"),
    ("scroll", "Scroll the page or an element"),
    ("wait", "Pause until a condition holds or a human confirms"),
    ("extract", "Read content from the page"),
];

/// Fields read from a model response; all optional.
#[derive(Debug, Clone, Default, PartialEq)]
struct Suggestion {
    action_type: Option<String>,
    target: Option<Target>,
    args: Option<Args>,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

impl Suggestion {
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            action_type: object
                .get("action_type")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|action_type| !action_type.is_empty())
                .map(str::to_string),
            target: object
                .get("target")
                .filter(|target| !target.is_null())
                .and_then(|target| serde_json::from_value(target.clone()).ok()),
            args: object.get("args").and_then(Value::as_object).cloned(),
            confidence: object.get("confidence").and_then(Value::as_f64),
            reasoning: object
                .get("reasoning")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn from_prose(text: String) -> Self {
        Self {
            reasoning: Some(text),
            ..Self::default()
        }
    }
}

pub struct LlmDecider {
    inference: Rc<dyn Inference>,
    prompts: Rc<PromptBuilder>,
    agent_action_type: String,
    catalogue: Vec<ActionTypeEntry>,
}

impl LlmDecider {
    pub fn new(inference: Option<Rc<dyn Inference>>, options: &SynthesizerOptions) -> Result<Self> {
        let inference = inference
            .ok_or_else(|| anyhow!("llm synthesis requires an inference backend"))?;
        let prompts = match &options.prompts {
            Some(prompts) => Rc::clone(prompts),
            None => Rc::new(PromptBuilder::new(&BTreeMap::new())?),
        };

        let mut catalogue: BTreeMap<String, String> = BUILTIN_ACTIONS
            .iter()
            .map(|(name, description)| (name.to_string(), description.to_string()))
            .collect();
        catalogue.extend(options.action_metadata.clone());
        catalogue
            .entry(options.agent_action_type.clone())
            .or_insert_with(|| "Delegate the step to an agent at run time".to_string());

        Ok(Self {
            inference,
            prompts,
            agent_action_type: options.agent_action_type.clone(),
            catalogue: catalogue
                .into_iter()
                .map(|(name, description)| ActionTypeEntry {
                    name,
                    description: (!description.trim().is_empty()).then_some(description),
                })
                .collect(),
        })
    }

    /// One inference call; falls back to the rule decision on any failure.
    ///
    /// The decision source is always `llm`.
    pub fn decide(&self, position: &AlignedPosition, context: &DecisionContext<'_>) -> ActionDecision {
        let fallback = rule_decision(position, context, &self.agent_action_type);
        match self.consult(position, context) {
            Ok(suggestion) => merge(suggestion, fallback),
            Err(err) => {
                warn!(
                    position = position.index,
                    error = %format!("{err:#}"),
                    "llm decision failed; using rule-based fallback"
                );
                ActionDecision {
                    decision_source: DecisionSource::Llm,
                    confidence: FALLBACK_CONFIDENCE,
                    reasoning: Some(LLM_FAILURE_REASONING.to_string()),
                    ..fallback
                }
            }
        }
    }

    #[instrument(skip_all, fields(position = position.index, pattern = context.pattern_type.as_str()))]
    fn consult(&self, position: &AlignedPosition, context: &DecisionContext<'_>) -> Result<Suggestion> {
        let prompt = self.prompts.decision_prompt(&self.prompt_input(position, context)?)?;
        let response = self
            .inference
            .infer(&prompt)
            .with_context(|| format!("infer decision for position {}", position.index))?;
        let suggestion = match response.into_object() {
            Ok(object) => Suggestion::from_object(&object),
            Err(prose) => Suggestion::from_prose(prose),
        };
        debug!(
            action_type = suggestion.action_type.as_deref().unwrap_or("-"),
            "parsed llm decision"
        );
        Ok(suggestion)
    }

    fn prompt_input(
        &self,
        position: &AlignedPosition,
        context: &DecisionContext<'_>,
    ) -> Result<DecisionPromptInput> {
        let observed_steps = position
            .steps
            .iter()
            .map(|(trace_id, step)| {
                let step = step
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .context("render observed step")?;
                Ok(ObservedStep {
                    trace_id: trace_id.clone(),
                    step,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (constant_args, variable_args) = match context.param_info {
            Some(info) => (
                (!info.constant_args.is_empty())
                    .then(|| serde_json::to_string(&info.constant_args))
                    .transpose()
                    .context("render constant args")?,
                info.variable_args
                    .iter()
                    .map(|(key, variable)| VariableArg {
                        key: key.clone(),
                        variable: variable.clone(),
                    })
                    .collect(),
            ),
            None => (None, Vec::new()),
        };

        Ok(DecisionPromptInput {
            task_description: context.task_description.to_string(),
            pattern_type: context.pattern_type.as_str().to_string(),
            position_index: position.index,
            observed_steps,
            constant_args,
            variable_args,
            action_types: self.catalogue.clone(),
            default_action_type: self.agent_action_type.clone(),
        })
    }
}

/// A suggestion naming an action replaces the rule defaults wholesale;
/// otherwise the defaults stand and only confidence/reasoning come from the
/// model.
fn merge(suggestion: Suggestion, fallback: ActionDecision) -> ActionDecision {
    let confidence = clamp_confidence(suggestion.confidence.unwrap_or(FALLBACK_CONFIDENCE));
    let (action_type, target, args) = match suggestion.action_type {
        Some(action_type) => (Some(action_type), suggestion.target, suggestion.args),
        None => (fallback.action_type, fallback.target, fallback.args),
    };
    ActionDecision {
        position_index: fallback.position_index,
        action_type,
        target,
        args,
        decision_source: DecisionSource::Llm,
        confidence,
        reasoning: suggestion.reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::PatternType;
    use crate::core::types::{AlignmentType, ParameterizableInfo};
    use crate::io::inference::InferenceResponse;
    use crate::test_support::{ScriptedInference, position, step, step_with_target};
    use serde_json::json;

    fn decider(inference: &Rc<ScriptedInference>) -> LlmDecider {
        let backend: Rc<dyn Inference> = inference.clone();
        LlmDecider::new(Some(backend), &SynthesizerOptions::default()).expect("decider")
    }

    fn context(pattern_type: PatternType) -> DecisionContext<'static> {
        DecisionContext {
            task_description: "order coffee",
            pattern_type,
            param_info: None,
        }
    }

    fn deterministic_click() -> AlignedPosition {
        position(
            2,
            AlignmentType::Deterministic,
            vec![("t1", Some(step_with_target("click", "css", "#buy")))],
        )
    }

    #[test]
    fn construction_requires_inference() {
        let err = LlmDecider::new(None, &SynthesizerOptions::default())
            .err()
            .expect("missing backend");
        assert!(err.to_string().contains("inference backend"));
    }

    #[test]
    fn structured_response_is_used_directly() {
        let inference = Rc::new(ScriptedInference::new(vec![Ok(InferenceResponse::Structured(
            json!({
                "action_type": "type",
                "target": {"strategy": "css", "value": "#q"},
                "args": {"text": "{drink}"},
                "confidence": 0.8,
                "reasoning": "search box"
            })
            .as_object()
            .cloned()
            .expect("obj"),
        ))]));
        let decision = decider(&inference).decide(&deterministic_click(), &context(PatternType::Variable));

        assert_eq!(decision.action_type.as_deref(), Some("type"));
        assert_eq!(
            decision.target,
            Some(Target::Spec(crate::core::types::TargetSpec {
                strategy: "css".to_string(),
                value: "#q".to_string()
            }))
        );
        assert_eq!(decision.args, json!({"text": "{drink}"}).as_object().cloned());
        assert_eq!(decision.confidence, 0.8);
        assert_eq!(decision.reasoning.as_deref(), Some("search box"));
        assert_eq!(decision.decision_source, DecisionSource::Llm);
    }

    #[test]
    fn fenced_text_response_parses_and_clamps_confidence() {
        let inference = Rc::new(ScriptedInference::new(vec![Ok(InferenceResponse::Text(
            "```json\n{\"action_type\": \"click\", \"confidence\": 7}\n```".to_string(),
        ))]));
        let decision = decider(&inference).decide(&deterministic_click(), &context(PatternType::Variable));
        assert_eq!(decision.action_type.as_deref(), Some("click"));
        assert!(decision.target.is_none());
        assert_eq!(decision.confidence, 1.0);

        let inference = Rc::new(ScriptedInference::new(vec![Ok(InferenceResponse::Text(
            r#"{"action_type": "click", "confidence": -3}"#.to_string(),
        ))]));
        let decision = decider(&inference).decide(&deterministic_click(), &context(PatternType::Variable));
        assert_eq!(decision.confidence, 0.0);
    }

    /// Verifies prose responses keep the rule defaults and record the text.
    #[test]
    fn prose_response_falls_back_to_rule_action() {
        let inference = Rc::new(ScriptedInference::new(vec![Ok(InferenceResponse::Text(
            "Probably click the buy button.".to_string(),
        ))]));
        let decision = decider(&inference).decide(&deterministic_click(), &context(PatternType::Deterministic));

        assert_eq!(decision.action_type.as_deref(), Some("click"));
        assert_eq!(decision.target, step_with_target("click", "css", "#buy").target);
        assert_eq!(
            decision.reasoning.as_deref(),
            Some("Probably click the buy button.")
        );
        assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(decision.decision_source, DecisionSource::Llm);
    }

    #[test]
    fn backend_error_uses_fixed_fallback_reasoning() {
        let inference = Rc::new(ScriptedInference::new(vec![Err("timeout".to_string())]));
        let decision = decider(&inference).decide(&deterministic_click(), &context(PatternType::Deterministic));

        assert_eq!(decision.action_type.as_deref(), Some("click"));
        assert_eq!(decision.confidence, 0.5);
        assert_eq!(decision.reasoning.as_deref(), Some(LLM_FAILURE_REASONING));
        assert_eq!(decision.decision_source, DecisionSource::Llm);
    }

    #[test]
    fn prompt_lists_observed_steps_and_argument_breakdown() {
        let inference = Rc::new(ScriptedInference::new(vec![Ok(InferenceResponse::Text(
            "{}".to_string(),
        ))]));
        let mut info = ParameterizableInfo {
            position_index: 1,
            constant_args: json!({"clear": true}).as_object().cloned().expect("obj"),
            ..ParameterizableInfo::default()
        };
        info.variable_args
            .insert("text".to_string(), "drink".to_string());
        let pos = position(
            1,
            AlignmentType::Parameterizable,
            vec![("t1", Some(step("type"))), ("t2", None)],
        );
        let ctx = DecisionContext {
            param_info: Some(&info),
            ..context(PatternType::Parameterizable)
        };

        let decision = decider(&inference).decide(&pos, &ctx);
        assert_eq!(
            decision.args.as_ref().and_then(|args| args.get("text")),
            Some(&json!("{drink}"))
        );

        let prompts = inference.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("order coffee"));
        assert!(prompts[0].contains(r#"<position index="1" pattern="parameterizable">"#));
        assert!(prompts[0].contains("- t2: (no step)"));
        assert!(prompts[0].contains("`{drink}`"));
        assert!(prompts[0].contains("- meta_workflow_agent: Delegate the step"));
    }
}
