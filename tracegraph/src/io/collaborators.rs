//! Contracts for the pipeline's external collaborators.
//!
//! Each stage of the pipeline delegates its work to one of these traits.
//! Implementations may block; the pipeline calls them one at a time.

use anyhow::Result;

use crate::core::types::{
    AlignedSequence, Args, EvaluationResult, ExecutionTrace, ExtractedPatterns, TraceStep,
    ValidationResults,
};
use crate::graph::ActionGraph;

/// Drives the underlying agent and records traces.
pub trait TraceCollector {
    fn collect(
        &self,
        task_description: &str,
        run_count: usize,
        input_data: Option<&Args>,
    ) -> Result<Vec<ExecutionTrace>>;
}

/// Judges traces. Must return one result per trace, in input order.
pub trait TraceEvaluator {
    fn evaluate(
        &self,
        traces: &[ExecutionTrace],
        task_description: &str,
    ) -> Result<Vec<EvaluationResult>>;
}

pub trait TraceNormalizer {
    fn normalize(&self, traces: &[ExecutionTrace]) -> Result<Vec<ExecutionTrace>>;
}

/// Rewrites step targets in place.
pub trait TargetConverter {
    fn convert_all(&self, steps: &mut [TraceStep]) -> Result<()>;
}

pub trait TraceAligner {
    fn align(&self, traces: &[ExecutionTrace]) -> Result<AlignedSequence>;
}

pub trait PatternExtractor {
    fn extract(&self, aligned: &AlignedSequence) -> Result<ExtractedPatterns>;
}

/// Replays a synthesized graph against test inputs.
pub trait GraphValidator {
    fn validate(
        &self,
        graph: &ActionGraph,
        task_description: &str,
        test_data: &[Args],
        expected_traces: &[ExecutionTrace],
    ) -> Result<ValidationResults>;
}
