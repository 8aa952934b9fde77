//! Typed pipeline errors callers are expected to match on.

use thiserror::Error;

use crate::core::types::{EvaluationResult, ExecutionTrace};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected at construction; no stage has run.
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
    #[error(transparent)]
    InsufficientTraces(#[from] InsufficientTraces),
}

/// Not enough passing traces after every permitted collection round.
///
/// Carries everything collected so far so the caller can inspect or resume.
#[derive(Debug, Error)]
#[error("insufficient successful traces: required {required}, got {actual} of {total}")]
pub struct InsufficientTraces {
    pub required: usize,
    pub actual: usize,
    pub total: usize,
    pub traces: Vec<ExecutionTrace>,
    pub evaluation_results: Vec<EvaluationResult>,
}

/// Returned by a collaborator to abort the current stage deliberately.
#[derive(Debug, Error)]
#[error("stage aborted: {reason}")]
pub struct StageAborted {
    pub reason: String,
}

impl StageAborted {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
