//! Trace, alignment and pattern types shared by the synthesizer and pipeline.
//!
//! These are the data contracts exchanged with the external collaborators
//! (collector, evaluator, aligner, extractor, validator). They carry no
//! behavior beyond small lookups and must stay deterministic across runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String-keyed argument mapping attached to a step or action.
pub type Args = Map<String, Value>;

/// One way of locating a target (e.g. `css` → `#submit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub strategy: String,
    pub value: String,
}

/// Ordered list of alternative locators, tried first to last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpecWithFallback {
    pub strategies: Vec<TargetSpec>,
}

/// Target of a recorded step.
///
/// Deserialization tries the fallback shape first, then the single locator,
/// and accepts any other JSON value as a plain target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Fallback(TargetSpecWithFallback),
    Spec(TargetSpec),
    Value(Value),
}

impl Target {
    /// Distinct resolution strategies named by this target, in listed order.
    ///
    /// Plain values name no strategy.
    pub fn strategies(&self) -> Vec<&str> {
        match self {
            Target::Fallback(fallback) => {
                let mut seen: Vec<&str> = Vec::new();
                for spec in &fallback.strategies {
                    if !seen.contains(&spec.strategy.as_str()) {
                        seen.push(spec.strategy.as_str());
                    }
                }
                seen
            }
            Target::Spec(spec) => vec![spec.strategy.as_str()],
            Target::Value(_) => Vec::new(),
        }
    }
}

/// One action within a recorded trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub action_type: String,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub args: Option<Args>,
    /// Free-form metadata; variable steps may carry a `variants` histogram.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TraceStep {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            target: None,
            args: None,
            metadata: Map::new(),
        }
    }

    /// Observed `(action_type, count)` pairs from the `variants` metadata.
    ///
    /// Returns an empty list when no histogram is present. Non-integer counts
    /// are read as a single occurrence.
    pub fn variants(&self) -> Vec<(String, u64)> {
        let Some(Value::Object(variants)) = self.metadata.get("variants") else {
            return Vec::new();
        };
        variants
            .iter()
            .map(|(action_type, count)| (action_type.clone(), count.as_u64().unwrap_or(1)))
            .collect()
    }
}

/// One recorded run of the agent performing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: String,
    pub task_description: String,
    pub steps: Vec<TraceStep>,
    pub success: bool,
    #[serde(default)]
    pub input_data: Option<Args>,
}

/// Verdict for one trace, positionally paired with the evaluated trace list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub trace_id: String,
    pub passed: bool,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Classification of an aligned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlignmentType {
    Deterministic,
    Parameterizable,
    Variable,
    Optional,
    BranchPoint,
}

fn full_confidence() -> f64 {
    1.0
}

/// One slot across aligned traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedPosition {
    /// Position in the canonical step order.
    pub index: usize,
    pub alignment_type: AlignmentType,
    /// Step observed in each trace (keyed by trace id, in trace order);
    /// `None` when the trace has no step at this slot.
    pub steps: IndexMap<String, Option<TraceStep>>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

impl AlignedPosition {
    /// The exemplar step: first non-empty step in trace order.
    pub fn representative(&self) -> Option<&TraceStep> {
        self.steps.values().find_map(Option::as_ref)
    }
}

/// Argument breakdown for a parameterizable position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterizableInfo {
    pub position_index: usize,
    /// Arguments identical across traces.
    #[serde(default)]
    pub constant_args: Args,
    /// Argument key → template variable name.
    #[serde(default)]
    pub variable_args: IndexMap<String, String>,
}

/// Divergent paths that start at one branch point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPattern {
    pub branch_point_index: usize,
    /// Branch label → positions on that path, in first-seen label order.
    pub branches: IndexMap<String, Vec<AlignedPosition>>,
}

/// A repeated run of positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPattern {
    pub body_start: usize,
    /// Inclusive.
    pub body_end: usize,
    pub max_iterations: u32,
    pub body: Vec<AlignedPosition>,
}

impl LoopPattern {
    /// Indices covered by the loop: the `body_start..=body_end` range plus
    /// every body position's own index.
    pub fn consumed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (self.body_start..=self.body_end).chain(self.body.iter().map(|position| position.index))
    }
}

/// Full classification output of pattern extraction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedPatterns {
    #[serde(default)]
    pub deterministic: Vec<AlignedPosition>,
    #[serde(default)]
    pub parameterizable: Vec<AlignedPosition>,
    /// One entry per parameterizable position, keyed by `position_index`.
    #[serde(default)]
    pub parameter_info: Vec<ParameterizableInfo>,
    #[serde(default)]
    pub variable: Vec<AlignedPosition>,
    #[serde(default)]
    pub optional: Vec<AlignedPosition>,
    #[serde(default)]
    pub branch_patterns: Vec<BranchPattern>,
    #[serde(default)]
    pub loop_patterns: Vec<LoopPattern>,
    /// Indices where a human must confirm before the graph proceeds.
    #[serde(default)]
    pub user_input_boundaries: Vec<usize>,
    /// Canonical walk order over all positions.
    #[serde(default)]
    pub step_order: Vec<usize>,
}

/// Alignment output handed from the aligner to the extractor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlignedSequence {
    pub trace_ids: Vec<String>,
    pub positions: Vec<AlignedPosition>,
}

/// One replayed test case reported by a graph validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCase {
    pub input_data: Args,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence_point: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_outcome: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate validator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub results: Vec<ValidationCase>,
    pub success_rate: f64,
    pub all_passed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(action_type: &str) -> TraceStep {
        TraceStep::new(action_type)
    }

    #[test]
    fn representative_skips_missing_steps_in_trace_order() {
        let mut steps = IndexMap::new();
        steps.insert("t1".to_string(), None);
        steps.insert("t2".to_string(), Some(step("click")));
        steps.insert("t3".to_string(), Some(step("type")));
        let position = AlignedPosition {
            index: 0,
            alignment_type: AlignmentType::Optional,
            steps,
            confidence: 0.5,
        };

        assert_eq!(
            position.representative().map(|s| s.action_type.as_str()),
            Some("click")
        );
    }

    #[test]
    fn target_deserializes_each_shape() {
        let fallback: Target = serde_json::from_value(json!({
            "strategies": [
                {"strategy": "css", "value": "#a"},
                {"strategy": "xpath", "value": "//a"},
                {"strategy": "css", "value": "a.primary"}
            ]
        }))
        .expect("fallback");
        assert_eq!(fallback.strategies(), vec!["css", "xpath"]);

        let spec: Target =
            serde_json::from_value(json!({"strategy": "id", "value": "submit"})).expect("spec");
        assert!(matches!(spec, Target::Spec(_)));
        assert_eq!(spec.strategies(), vec!["id"]);

        let plain: Target = serde_json::from_value(json!("https://example.com")).expect("plain");
        assert!(matches!(plain, Target::Value(_)));
        assert!(plain.strategies().is_empty());
    }

    #[test]
    fn variants_reads_histogram_in_recorded_order() {
        let mut s = step("click");
        s.metadata
            .insert("variants".to_string(), json!({"type": 2, "click": 1}));
        assert_eq!(
            s.variants(),
            vec![("type".to_string(), 2), ("click".to_string(), 1)]
        );
        assert!(step("click").variants().is_empty());
    }

    #[test]
    fn loop_consumes_range_and_body_indices() {
        let pattern = LoopPattern {
            body_start: 2,
            body_end: 3,
            max_iterations: 4,
            body: vec![AlignedPosition {
                index: 7,
                alignment_type: AlignmentType::Deterministic,
                steps: IndexMap::new(),
                confidence: 1.0,
            }],
        };
        let consumed: Vec<usize> = pattern.consumed_indices().collect();
        assert_eq!(consumed, vec![2, 3, 7]);
    }
}
