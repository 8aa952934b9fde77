//! Stage descriptors and the driver that walks them.
//!
//! Each stage is plain data: a work function reading the run state, a merge
//! function folding the work's output back in, an error handler, and an
//! optional loop-back edge. The driver walks the list with an index cursor.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::core::stage::StageName;
use crate::core::types::{
    AlignedSequence, Args, EvaluationResult, ExecutionTrace, ExtractedPatterns, ValidationResults,
};
use crate::error::{InsufficientTraces, PipelineError, StageAborted};
use crate::pipeline::state::{CollectionRequest, RunState};
use crate::pipeline::{MetaAgentPipeline, PipelineResult};
use crate::synthesizer::SynthesisResult;

#[derive(Debug)]
pub enum StageOutput {
    Collected(Vec<ExecutionTrace>),
    Evaluated(Vec<EvaluationResult>),
    Normalized(Vec<ExecutionTrace>),
    Converted(Vec<ExecutionTrace>),
    Skipped,
    Aligned(AlignedSequence),
    Extracted(ExtractedPatterns),
    Synthesized(SynthesisResult),
    Validated(Option<ValidationResults>),
}

/// What the driver does after a stage.
#[derive(Debug)]
pub enum StageOutcome {
    Advance,
    Retry { target: StageName, reason: String },
    Abort(Box<PipelineResult>),
    Raise(PipelineError),
}

pub type Work = fn(&MetaAgentPipeline, &RunState) -> Result<StageOutput>;
pub type Merge = fn(&mut RunState, StageOutput) -> Result<()>;
pub type ErrorHandler = fn(StageName, anyhow::Error, &mut RunState) -> StageOutcome;
pub type LoopPredicate = fn(&MetaAgentPipeline, &RunState) -> bool;

/// Jump back to `target` while `predicate` holds, at most
/// `max_iterations` times.
pub struct LoopBack {
    pub target: StageName,
    pub predicate: LoopPredicate,
    pub max_iterations: usize,
}

pub struct Stage {
    pub name: StageName,
    pub work: Work,
    pub merge: Merge,
    pub on_error: ErrorHandler,
    pub loop_back: Option<LoopBack>,
}

impl Stage {
    fn linear(name: StageName, work: Work, merge: Merge) -> Self {
        Self {
            name,
            work,
            merge,
            on_error: abort_with_partial,
            loop_back: None,
        }
    }
}

/// The eight stages in execution order; evaluation loops back to collection
/// up to `max_retry_rounds` times while short of passing traces.
pub fn standard_stages(max_retry_rounds: usize) -> Vec<Stage> {
    vec![
        Stage::linear(StageName::Collection, collect, merge_collected),
        Stage {
            loop_back: Some(LoopBack {
                target: StageName::Collection,
                predicate: short_of_passing,
                max_iterations: max_retry_rounds,
            }),
            ..Stage::linear(StageName::Evaluation, evaluate, merge_evaluated)
        },
        Stage::linear(StageName::Normalization, normalize, merge_normalized),
        Stage::linear(StageName::TargetConversion, convert_targets, merge_normalized),
        Stage::linear(StageName::Alignment, align, merge_aligned),
        Stage::linear(StageName::Extraction, extract, merge_extracted),
        Stage::linear(StageName::Synthesis, synthesize, merge_synthesized),
        Stage::linear(StageName::Validation, validate, merge_validated),
    ]
}

pub fn drive(
    pipeline: &MetaAgentPipeline,
    stages: &[Stage],
    mut state: RunState,
) -> Result<PipelineResult, PipelineError> {
    let mut cursor = 0;
    while let Some(stage) = stages.get(cursor) {
        match run_stage(pipeline, stage, &mut state) {
            StageOutcome::Advance => cursor += 1,
            StageOutcome::Retry { target, reason } => {
                let Some(next) = stages.iter().position(|stage| stage.name == target) else {
                    let error = format!("loop-back target {} is not a stage", target.as_str());
                    return Ok(state.into_partial(stage.name.as_str().to_string(), error));
                };
                state.retry_round += 1;
                state.collection_request = CollectionRequest::Shortfall;
                info!(
                    round = state.retry_round,
                    target = target.as_str(),
                    %reason,
                    "retrying collection"
                );
                cursor = next;
            }
            StageOutcome::Abort(partial) => {
                warn!(
                    failed_stage = partial.failed_stage.as_deref().unwrap_or("-"),
                    error = partial.error.as_deref().unwrap_or("-"),
                    "pipeline aborted"
                );
                return Ok(*partial);
            }
            StageOutcome::Raise(err) => return Err(err),
        }
    }
    info!(
        traces = state.traces.len(),
        passing = state.filtered_traces.len(),
        "pipeline finished"
    );
    Ok(state.into_result())
}

fn run_stage(pipeline: &MetaAgentPipeline, stage: &Stage, state: &mut RunState) -> StageOutcome {
    debug!(stage = stage.name.as_str(), "stage started");
    let merged = (stage.work)(pipeline, state).and_then(|output| (stage.merge)(state, output));
    if let Err(err) = merged {
        return (stage.on_error)(stage.name, err, state);
    }
    pipeline.record_completion(stage.name, state);
    debug!(stage = stage.name.as_str(), "stage finished");

    if let Some(loop_back) = &stage.loop_back {
        if (loop_back.predicate)(pipeline, state) {
            let required = pipeline.config.min_success_traces;
            if state.retry_round < loop_back.max_iterations {
                return StageOutcome::Retry {
                    target: loop_back.target,
                    reason: format!(
                        "{} of {required} required passing traces",
                        state.filtered_traces.len()
                    ),
                };
            }
            return StageOutcome::Raise(state.take_insufficient(required).into());
        }
    }
    StageOutcome::Advance
}

/// Default handler: re-raise insufficient traces, otherwise return the
/// partial result.
pub fn abort_with_partial(stage: StageName, err: anyhow::Error, state: &mut RunState) -> StageOutcome {
    let err = match err.downcast::<InsufficientTraces>() {
        Ok(insufficient) => return StageOutcome::Raise(insufficient.into()),
        Err(err) => err,
    };
    let failed_stage = if err.chain().any(|cause| cause.is::<StageAborted>()) {
        format!("{}_aborted", stage.as_str())
    } else {
        stage.as_str().to_string()
    };
    let partial = std::mem::take(state).into_partial(failed_stage, format!("{err:#}"));
    StageOutcome::Abort(Box::new(partial))
}

fn short_of_passing(pipeline: &MetaAgentPipeline, state: &RunState) -> bool {
    state.filtered_traces.len() < pipeline.config.min_success_traces
}

fn collect(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let config = &pipeline.config;
    let (count, input_data) = match state.collection_request {
        CollectionRequest::Initial => (config.run_count, state.input_data.as_ref()),
        CollectionRequest::Shortfall => (
            config
                .min_success_traces
                .saturating_sub(state.filtered_traces.len()),
            None,
        ),
        CollectionRequest::Additional(count) => (count, None),
    };
    if count == 0 {
        return Ok(StageOutput::Collected(Vec::new()));
    }
    debug!(count, with_input = input_data.is_some(), "collecting traces");
    let traces = pipeline
        .collaborators
        .collector
        .collect(&state.task_description, count, input_data)
        .with_context(|| format!("collect {count} traces"))?;
    Ok(StageOutput::Collected(traces))
}

fn merge_collected(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Collected(traces) => {
            state.traces.extend(traces);
            Ok(())
        }
        other => bail!("collection cannot merge {other:?}"),
    }
}

/// Evaluates only traces that have no verdict yet.
fn evaluate(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let pending = state.pending_evaluation();
    if pending.is_empty() {
        return Ok(StageOutput::Evaluated(Vec::new()));
    }
    let results = pipeline
        .evaluator
        .evaluate(pending, &state.task_description)
        .with_context(|| format!("evaluate {} traces", pending.len()))?;
    if results.len() != pending.len() {
        bail!(
            "evaluator returned {} results for {} traces",
            results.len(),
            pending.len()
        );
    }
    Ok(StageOutput::Evaluated(results))
}

fn merge_evaluated(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Evaluated(results) => {
            state.evaluation_results.extend(results);
            state.refilter();
            Ok(())
        }
        other => bail!("evaluation cannot merge {other:?}"),
    }
}

fn normalize(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let normalized = pipeline
        .collaborators
        .normalizer
        .normalize(&state.filtered_traces)
        .context("normalize traces")?;
    Ok(StageOutput::Normalized(normalized))
}

fn convert_targets(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let Some(converter) = &pipeline.collaborators.target_converter else {
        return Ok(StageOutput::Skipped);
    };
    let mut traces = state.normalized.clone();
    for trace in &mut traces {
        converter
            .convert_all(&mut trace.steps)
            .with_context(|| format!("convert targets of trace {}", trace.trace_id))?;
    }
    Ok(StageOutput::Converted(traces))
}

fn merge_normalized(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Normalized(traces) | StageOutput::Converted(traces) => {
            state.normalized = traces;
            Ok(())
        }
        StageOutput::Skipped => Ok(()),
        other => bail!("normalization cannot merge {other:?}"),
    }
}

fn align(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let aligned = pipeline
        .collaborators
        .aligner
        .align(&state.normalized)
        .context("align traces")?;
    Ok(StageOutput::Aligned(aligned))
}

fn merge_aligned(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Aligned(aligned) => {
            state.aligned = Some(aligned);
            Ok(())
        }
        other => bail!("alignment cannot merge {other:?}"),
    }
}

fn extract(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let aligned = state.aligned.as_ref().context("no aligned sequence")?;
    let patterns = pipeline
        .collaborators
        .extractor
        .extract(aligned)
        .context("extract patterns")?;
    Ok(StageOutput::Extracted(patterns))
}

fn merge_extracted(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Extracted(patterns) => {
            state.patterns = Some(patterns);
            Ok(())
        }
        other => bail!("extraction cannot merge {other:?}"),
    }
}

/// Script rendering is best-effort: a failure leaves `script` unset.
fn synthesize(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    let patterns = state.patterns.as_ref().context("no extracted patterns")?;
    let mut result = pipeline
        .synthesizer
        .synthesize(patterns, &state.task_description)?;
    if pipeline.config.generate_script && result.script.is_none() {
        match result.graph.render_script() {
            Ok(script) => result.script = Some(script),
            Err(err) => warn!(error = %err, "script generation failed"),
        }
    }
    Ok(StageOutput::Synthesized(result))
}

fn merge_synthesized(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Synthesized(result) => {
            state.synthesis = Some(result);
            Ok(())
        }
        other => bail!("synthesis cannot merge {other:?}"),
    }
}

fn validate(pipeline: &MetaAgentPipeline, state: &RunState) -> Result<StageOutput> {
    if !pipeline.config.validate {
        return Ok(StageOutput::Validated(None));
    }
    let validator = pipeline
        .collaborators
        .validator
        .as_ref()
        .context("no graph validator configured")?;
    let synthesis = state.synthesis.as_ref().context("no synthesized graph")?;

    let with_input: Vec<&ExecutionTrace> = state
        .filtered_traces
        .iter()
        .filter(|trace| trace.input_data.is_some())
        .take(pipeline.config.validation_runs)
        .collect();
    let (test_data, expected): (Vec<Args>, Vec<ExecutionTrace>) = if with_input.is_empty() {
        (
            vec![Args::new()],
            state.filtered_traces.first().cloned().into_iter().collect(),
        )
    } else {
        with_input
            .into_iter()
            .map(|trace| (trace.input_data.clone().unwrap_or_default(), trace.clone()))
            .unzip()
    };

    let results = validator
        .validate(&synthesis.graph, &state.task_description, &test_data, &expected)
        .context("validate graph")?;
    Ok(StageOutput::Validated(Some(results)))
}

fn merge_validated(state: &mut RunState, output: StageOutput) -> Result<()> {
    match output {
        StageOutput::Validated(results) => {
            state.validation = results;
            Ok(())
        }
        other => bail!("validation cannot merge {other:?}"),
    }
}

/// Summary fields written to checkpoints and handed to stage hooks.
pub fn stage_summary(stage: StageName, state: &RunState) -> Map<String, Value> {
    let value = match stage {
        StageName::Collection => json!({
            "total_traces": state.traces.len(),
            "retry_round": state.retry_round,
        }),
        StageName::Evaluation => json!({
            "total_traces": state.traces.len(),
            "evaluated": state.evaluation_results.len(),
            "passed": state.filtered_traces.len(),
            "retry_round": state.retry_round,
        }),
        StageName::Normalization | StageName::TargetConversion => json!({
            "normalized_traces": state.normalized.len(),
        }),
        StageName::Alignment => json!({
            "trace_ids": state.aligned.as_ref().map(|a| a.trace_ids.clone()).unwrap_or_default(),
            "positions": state.aligned.as_ref().map_or(0, |a| a.positions.len()),
        }),
        StageName::Extraction => match &state.patterns {
            Some(patterns) => json!({
                "deterministic": patterns.deterministic.len(),
                "parameterizable": patterns.parameterizable.len(),
                "variable": patterns.variable.len(),
                "optional": patterns.optional.len(),
                "branch_patterns": patterns.branch_patterns.len(),
                "loop_patterns": patterns.loop_patterns.len(),
                "user_input_boundaries": patterns.user_input_boundaries.len(),
                "step_order": patterns.step_order.len(),
            }),
            None => json!({}),
        },
        StageName::Synthesis => match &state.synthesis {
            Some(synthesis) => json!({
                "graph_nodes": synthesis.graph.len(),
                "decisions": synthesis.decisions.len(),
                "total_steps": synthesis.report.total_steps,
                "warnings": synthesis.report.warnings.len(),
                "script": synthesis.script.is_some(),
            }),
            None => json!({}),
        },
        StageName::Validation => match &state.validation {
            Some(validation) => json!({
                "validated": true,
                "cases": validation.results.len(),
                "success_rate": validation.success_rate,
                "all_passed": validation.all_passed,
            }),
            None => json!({ "validated": false }),
        },
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
