//! Typed run state threaded through the pipeline stages.

use crate::core::types::{
    AlignedSequence, Args, EvaluationResult, ExecutionTrace, ExtractedPatterns, ValidationResults,
};
use crate::error::InsufficientTraces;
use crate::pipeline::PipelineResult;
use crate::synthesizer::SynthesisResult;

/// How many traces the next collection pass asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionRequest {
    /// `run_count` traces with the caller's input data.
    #[default]
    Initial,
    /// Just enough traces to cover the passing shortfall, no input data.
    Shortfall,
    /// A fixed number of extra traces, no input data.
    Additional(usize),
}

/// Everything one `run`/`refine` call accumulates.
///
/// `traces` and `evaluation_results` are paired by position;
/// `evaluation_results` never outgrows `traces`.
#[derive(Debug, Default)]
pub struct RunState {
    pub task_description: String,
    pub input_data: Option<Args>,
    pub traces: Vec<ExecutionTrace>,
    pub evaluation_results: Vec<EvaluationResult>,
    pub filtered_traces: Vec<ExecutionTrace>,
    pub normalized: Vec<ExecutionTrace>,
    pub aligned: Option<AlignedSequence>,
    pub patterns: Option<ExtractedPatterns>,
    pub synthesis: Option<SynthesisResult>,
    pub validation: Option<ValidationResults>,
    pub retry_round: usize,
    pub collection_request: CollectionRequest,
}

impl RunState {
    pub fn new(task_description: &str, input_data: Option<Args>) -> Self {
        Self {
            task_description: task_description.to_string(),
            input_data,
            ..Self::default()
        }
    }

    /// Traces collected but not yet evaluated.
    pub fn pending_evaluation(&self) -> &[ExecutionTrace] {
        self.traces
            .get(self.evaluation_results.len()..)
            .unwrap_or_default()
    }

    /// Rebuild `filtered_traces` from the passing evaluation results.
    pub fn refilter(&mut self) {
        self.filtered_traces = self
            .traces
            .iter()
            .zip(&self.evaluation_results)
            .filter(|(_, result)| result.passed)
            .map(|(trace, _)| trace.clone())
            .collect();
    }

    /// Move the accumulated traces into an insufficient-traces error.
    pub fn take_insufficient(&mut self, required: usize) -> InsufficientTraces {
        InsufficientTraces {
            required,
            actual: self.filtered_traces.len(),
            total: self.traces.len(),
            traces: std::mem::take(&mut self.traces),
            evaluation_results: std::mem::take(&mut self.evaluation_results),
        }
    }

    pub fn into_result(self) -> PipelineResult {
        let (graph, synthesis_report, decisions, script) = match self.synthesis {
            Some(synthesis) => (
                Some(synthesis.graph),
                Some(synthesis.report),
                synthesis.decisions,
                synthesis.script,
            ),
            None => (None, None, Vec::new(), None),
        };
        PipelineResult {
            task_description: self.task_description,
            graph,
            synthesis_report,
            decisions,
            validation_results: self.validation,
            traces: self.traces,
            evaluation_results: self.evaluation_results,
            script,
            error: None,
            failed_stage: None,
        }
    }

    /// Partial result keeping everything produced before the failure.
    pub fn into_partial(self, failed_stage: String, error: String) -> PipelineResult {
        PipelineResult {
            error: Some(error),
            failed_stage: Some(failed_stage),
            ..self.into_result()
        }
    }
}
