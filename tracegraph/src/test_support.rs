//! Test-only builders and scripted collaborators.
//!
//! Every fake records its calls in a `RefCell` so tests can assert on exactly
//! what the pipeline handed it.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::types::{
    AlignedPosition, AlignedSequence, AlignmentType, Args, EvaluationResult, ExecutionTrace,
    ExtractedPatterns, ParameterizableInfo, Target, TargetSpec, TraceStep, ValidationCase,
    ValidationResults,
};
use crate::error::StageAborted;
use crate::graph::ActionGraph;
use crate::io::collaborators::{
    GraphValidator, PatternExtractor, TraceAligner, TraceCollector, TraceEvaluator,
    TraceNormalizer,
};
use crate::io::inference::{Inference, InferenceResponse};
use crate::pipeline::Collaborators;

/// Step with no target or args.
pub fn step(action_type: &str) -> TraceStep {
    TraceStep::new(action_type)
}

/// Step targeting a single locator.
pub fn step_with_target(action_type: &str, strategy: &str, value: &str) -> TraceStep {
    let mut step = TraceStep::new(action_type);
    step.target = Some(Target::Spec(TargetSpec {
        strategy: strategy.to_string(),
        value: value.to_string(),
    }));
    step
}

/// Trace for the task `"task"` without input data.
pub fn trace(trace_id: &str, success: bool, steps: Vec<TraceStep>) -> ExecutionTrace {
    ExecutionTrace {
        trace_id: trace_id.to_string(),
        task_description: "task".to_string(),
        steps,
        success,
        input_data: None,
    }
}

pub fn trace_with_input(
    trace_id: &str,
    success: bool,
    steps: Vec<TraceStep>,
    input_data: Args,
) -> ExecutionTrace {
    ExecutionTrace {
        input_data: Some(input_data),
        ..trace(trace_id, success, steps)
    }
}

pub fn position(
    index: usize,
    alignment_type: AlignmentType,
    steps: Vec<(&str, Option<TraceStep>)>,
) -> AlignedPosition {
    AlignedPosition {
        index,
        alignment_type,
        steps: steps
            .into_iter()
            .map(|(trace_id, step)| (trace_id.to_string(), step))
            .collect(),
        confidence: 1.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectCall {
    pub run_count: usize,
    pub input_data: Option<Args>,
}

/// Collector returning queued batches, one per call.
pub struct ScriptedCollector {
    batches: RefCell<VecDeque<Result<Vec<ExecutionTrace>, String>>>,
    pub calls: RefCell<Vec<CollectCall>>,
}

impl ScriptedCollector {
    pub fn new(batches: Vec<Result<Vec<ExecutionTrace>, String>>) -> Self {
        Self {
            batches: RefCell::new(batches.into()),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl TraceCollector for ScriptedCollector {
    fn collect(
        &self,
        _task_description: &str,
        run_count: usize,
        input_data: Option<&Args>,
    ) -> Result<Vec<ExecutionTrace>> {
        self.calls.borrow_mut().push(CollectCall {
            run_count,
            input_data: input_data.cloned(),
        });
        self.batches
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted batch left".to_string()))
            .map_err(|message| anyhow!(message))
    }
}

/// Evaluator passing exactly the listed trace ids.
pub struct ScriptedEvaluator {
    passing: BTreeSet<String>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedEvaluator {
    pub fn new(passing: &[&str]) -> Self {
        Self {
            passing: passing.iter().map(|id| id.to_string()).collect(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl TraceEvaluator for ScriptedEvaluator {
    fn evaluate(
        &self,
        traces: &[ExecutionTrace],
        _task_description: &str,
    ) -> Result<Vec<EvaluationResult>> {
        self.calls
            .borrow_mut()
            .push(traces.iter().map(|t| t.trace_id.clone()).collect());
        Ok(traces
            .iter()
            .map(|trace| EvaluationResult {
                trace_id: trace.trace_id.clone(),
                passed: self.passing.contains(&trace.trace_id),
                details: None,
            })
            .collect())
    }
}

/// Identity normalizer that records the trace ids it was given.
#[derive(Default)]
pub struct RecordingNormalizer {
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl TraceNormalizer for RecordingNormalizer {
    fn normalize(&self, traces: &[ExecutionTrace]) -> Result<Vec<ExecutionTrace>> {
        self.calls
            .borrow_mut()
            .push(traces.iter().map(|t| t.trace_id.clone()).collect());
        Ok(traces.to_vec())
    }
}

/// Normalizer that always fails, optionally as a deliberate abort.
pub struct FailingNormalizer {
    message: String,
    abort: bool,
}

impl FailingNormalizer {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            abort: false,
        }
    }

    pub fn aborting(message: &str) -> Self {
        Self {
            message: message.to_string(),
            abort: true,
        }
    }
}

impl TraceNormalizer for FailingNormalizer {
    fn normalize(&self, _traces: &[ExecutionTrace]) -> Result<Vec<ExecutionTrace>> {
        if self.abort {
            return Err(StageAborted::new(self.message.clone()).into());
        }
        Err(anyhow!(self.message.clone()))
    }
}

/// Aligns traces column by column: position `i` holds each trace's `i`th
/// step.
#[derive(Default)]
pub struct ColumnAligner;

impl TraceAligner for ColumnAligner {
    fn align(&self, traces: &[ExecutionTrace]) -> Result<AlignedSequence> {
        let width = traces.iter().map(|t| t.steps.len()).max().unwrap_or(0);
        let positions = (0..width)
            .map(|index| {
                let steps: IndexMap<String, Option<TraceStep>> = traces
                    .iter()
                    .map(|t| (t.trace_id.clone(), t.steps.get(index).cloned()))
                    .collect();
                let present: Vec<&TraceStep> = steps.values().flatten().collect();
                let alignment_type = match present.first() {
                    Some(_) if present.len() < steps.len() => AlignmentType::Optional,
                    Some(first) if present.iter().any(|s| s.action_type != first.action_type) => {
                        AlignmentType::Variable
                    }
                    Some(first) if present.iter().any(|s| s.args != first.args) => {
                        AlignmentType::Parameterizable
                    }
                    Some(_) => AlignmentType::Deterministic,
                    None => AlignmentType::Optional,
                };
                let confidence = present.len() as f64 / steps.len().max(1) as f64;
                AlignedPosition {
                    index,
                    alignment_type,
                    steps,
                    confidence,
                }
            })
            .collect();
        Ok(AlignedSequence {
            trace_ids: traces.iter().map(|t| t.trace_id.clone()).collect(),
            positions,
        })
    }
}

/// Sorts positions into buckets by alignment type.
///
/// Variable positions get a `variants` histogram on their representative
/// step; parameterizable positions get argument info with variables named
/// `{key}_{index}`.
#[derive(Default)]
pub struct BucketExtractor;

impl PatternExtractor for BucketExtractor {
    fn extract(&self, aligned: &AlignedSequence) -> Result<ExtractedPatterns> {
        let mut patterns = ExtractedPatterns::default();
        for position in &aligned.positions {
            patterns.step_order.push(position.index);
            match position.alignment_type {
                AlignmentType::Deterministic => patterns.deterministic.push(position.clone()),
                AlignmentType::Parameterizable => {
                    patterns.parameter_info.push(parameter_info(position));
                    patterns.parameterizable.push(position.clone());
                }
                AlignmentType::Optional => patterns.optional.push(position.clone()),
                AlignmentType::Variable | AlignmentType::BranchPoint => {
                    patterns.variable.push(with_variants(position));
                }
            }
        }
        Ok(patterns)
    }
}

fn parameter_info(position: &AlignedPosition) -> ParameterizableInfo {
    let present: Vec<&TraceStep> = position.steps.values().flatten().collect();
    let first_args = present
        .first()
        .and_then(|step| step.args.clone())
        .unwrap_or_default();
    let mut info = ParameterizableInfo {
        position_index: position.index,
        ..ParameterizableInfo::default()
    };
    for (key, value) in first_args {
        let constant = present
            .iter()
            .all(|step| step.args.as_ref().and_then(|args| args.get(&key)) == Some(&value));
        if constant {
            info.constant_args.insert(key, value);
        } else {
            let variable = format!("{key}_{}", position.index);
            info.variable_args.insert(key, variable);
        }
    }
    info
}

fn with_variants(position: &AlignedPosition) -> AlignedPosition {
    let mut histogram: IndexMap<String, u64> = IndexMap::new();
    for step in position.steps.values().flatten() {
        *histogram.entry(step.action_type.clone()).or_default() += 1;
    }
    let variants: Map<String, Value> = histogram
        .into_iter()
        .map(|(action_type, count)| (action_type, Value::from(count)))
        .collect();
    let mut position = position.clone();
    if let Some(step) = position.steps.values_mut().flatten().next() {
        step.metadata
            .insert("variants".to_string(), Value::Object(variants));
    }
    position
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidateCall {
    pub test_data: Vec<Args>,
    pub expected_trace_ids: Vec<String>,
}

/// Validator that passes every case, or fails the whole call.
pub struct FixedValidator {
    failure: Option<String>,
    pub calls: RefCell<Vec<ValidateCall>>,
}

impl FixedValidator {
    pub fn passing() -> Self {
        Self {
            failure: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl GraphValidator for FixedValidator {
    fn validate(
        &self,
        _graph: &ActionGraph,
        _task_description: &str,
        test_data: &[Args],
        expected_traces: &[ExecutionTrace],
    ) -> Result<ValidationResults> {
        self.calls.borrow_mut().push(ValidateCall {
            test_data: test_data.to_vec(),
            expected_trace_ids: expected_traces.iter().map(|t| t.trace_id.clone()).collect(),
        });
        if let Some(message) = &self.failure {
            return Err(anyhow!(message.clone()));
        }
        Ok(ValidationResults {
            results: test_data
                .iter()
                .map(|input| ValidationCase {
                    input_data: input.clone(),
                    passed: true,
                    divergence_point: None,
                    expected_outcome: None,
                    actual_outcome: None,
                    error: None,
                })
                .collect(),
            success_rate: 1.0,
            all_passed: true,
        })
    }
}

/// Inference backend returning queued responses and recording prompts.
pub struct ScriptedInference {
    responses: RefCell<VecDeque<Result<InferenceResponse, String>>>,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedInference {
    pub fn new(responses: Vec<Result<InferenceResponse, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }
}

impl Inference for ScriptedInference {
    fn infer(&self, prompt: &str) -> Result<InferenceResponse> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response left".to_string()))
            .map_err(|message| anyhow!(message))
    }
}

/// Scripted collector/evaluator/normalizer wired with the column aligner and
/// bucket extractor.
pub struct Harness {
    pub collector: Rc<ScriptedCollector>,
    pub evaluator: Rc<ScriptedEvaluator>,
    pub normalizer: Rc<RecordingNormalizer>,
}

impl Harness {
    pub fn new(batches: Vec<Vec<ExecutionTrace>>, passing: &[&str]) -> Self {
        Self {
            collector: Rc::new(ScriptedCollector::new(
                batches.into_iter().map(Ok).collect(),
            )),
            evaluator: Rc::new(ScriptedEvaluator::new(passing)),
            normalizer: Rc::new(RecordingNormalizer::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            collector: self.collector.clone(),
            evaluator: Some(self.evaluator.clone()),
            normalizer: self.normalizer.clone(),
            target_converter: None,
            aligner: Rc::new(ColumnAligner),
            extractor: Rc::new(BucketExtractor),
            validator: None,
            inference: None,
        }
    }
}
