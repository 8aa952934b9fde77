//! Built-in trace evaluators selected by `evaluation_strategy`.

use std::rc::Rc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::{EvaluationResult, ExecutionTrace, Target, TraceStep};
use crate::io::collaborators::TraceEvaluator;
use crate::io::inference::Inference;
use crate::io::prompt::{JudgePromptInput, PromptBuilder};

/// Passes a trace iff it finished without raising.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionOnlyEvaluator;

impl TraceEvaluator for ExceptionOnlyEvaluator {
    fn evaluate(
        &self,
        traces: &[ExecutionTrace],
        _task_description: &str,
    ) -> Result<Vec<EvaluationResult>> {
        Ok(traces
            .iter()
            .map(|trace| EvaluationResult {
                trace_id: trace.trace_id.clone(),
                passed: trace.success,
                details: None,
            })
            .collect())
    }
}

/// Asks a model whether each completed trace accomplished the task.
///
/// Traces that raised fail without a model call.
pub struct LlmJudgeEvaluator {
    inference: Rc<dyn Inference>,
    prompts: Rc<PromptBuilder>,
}

impl LlmJudgeEvaluator {
    pub fn new(inference: Rc<dyn Inference>, prompts: Rc<PromptBuilder>) -> Self {
        Self { inference, prompts }
    }

    #[instrument(skip_all, fields(trace_id = %trace.trace_id))]
    fn judge(&self, trace: &ExecutionTrace, task_description: &str) -> Result<EvaluationResult> {
        let prompt = self.prompts.judge_prompt(&JudgePromptInput {
            task_description: task_description.to_string(),
            trace_id: trace.trace_id.clone(),
            steps: trace.steps.iter().map(render_step).collect(),
        })?;
        let response = self
            .inference
            .infer(&prompt)
            .with_context(|| format!("judge trace {}", trace.trace_id))?;

        let (passed, details) = match response.into_object() {
            Ok(verdict) => match verdict.get("passed").and_then(Value::as_bool) {
                Some(passed) => (
                    passed,
                    verdict.get("reason").cloned().map(|reason| json!({ "reason": reason })),
                ),
                None => (
                    false,
                    Some(json!({
                        "reason": "judge response missing boolean 'passed'",
                        "raw": Value::Object(verdict),
                    })),
                ),
            },
            Err(raw) => (
                false,
                Some(json!({ "reason": "unparsable judge response", "raw": raw })),
            ),
        };
        debug!(passed, "judged trace");
        Ok(EvaluationResult {
            trace_id: trace.trace_id.clone(),
            passed,
            details,
        })
    }
}

impl TraceEvaluator for LlmJudgeEvaluator {
    fn evaluate(
        &self,
        traces: &[ExecutionTrace],
        task_description: &str,
    ) -> Result<Vec<EvaluationResult>> {
        traces
            .iter()
            .map(|trace| {
                if !trace.success {
                    return Ok(EvaluationResult {
                        trace_id: trace.trace_id.clone(),
                        passed: false,
                        details: Some(json!({ "reason": "trace raised during execution" })),
                    });
                }
                self.judge(trace, task_description)
            })
            .collect()
    }
}

fn render_step(step: &TraceStep) -> String {
    let mut line = step.action_type.clone();
    match &step.target {
        Some(Target::Value(Value::String(text))) => {
            line.push(' ');
            line.push_str(text);
        }
        Some(Target::Value(value)) => {
            line.push(' ');
            line.push_str(&value.to_string());
        }
        Some(Target::Spec(spec)) => {
            line.push_str(&format!(" {}={}", spec.strategy, spec.value));
        }
        Some(Target::Fallback(fallback)) => {
            if let Some(first) = fallback.strategies.first() {
                line.push_str(&format!(" {}={}", first.strategy, first.value));
            }
        }
        None => {}
    }
    if let Some(args) = &step.args {
        line.push(' ');
        line.push_str(&Value::Object(args.clone()).to_string());
    }
    line
}
