//! `MetaAgentPipeline`: traces in, synthesized ActionGraph out.
//!
//! Stages run in a fixed order (see [`StageName::ALL`]). Collection and
//! evaluation repeat while too few traces pass; every later stage runs once
//! and turns a failure into a partial [`PipelineResult`].

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::core::decision::ActionDecision;
use crate::core::report::SynthesisReport;
use crate::core::stage::StageName;
use crate::core::strategy::EvaluationStrategy;
use crate::core::types::{Args, EvaluationResult, ExecutionTrace, ValidationResults};
use crate::error::PipelineError;
use crate::evaluators::{ExceptionOnlyEvaluator, LlmJudgeEvaluator};
use crate::graph::ActionGraph;
use crate::io::checkpoint::{CheckpointWriteRequest, write_checkpoint};
use crate::io::collaborators::{
    GraphValidator, PatternExtractor, TargetConverter, TraceAligner, TraceCollector,
    TraceEvaluator, TraceNormalizer,
};
use crate::io::config::PipelineConfig;
use crate::io::inference::Inference;
use crate::io::prompt::PromptBuilder;
use crate::synthesizer::{GraphSynthesizer, SynthesizerOptions};

pub mod stages;
pub mod state;

use stages::{drive, stage_summary, standard_stages};
use state::{CollectionRequest, RunState};

/// External collaborators, one per stage.
///
/// `evaluator` falls back to the built-in evaluator named by
/// `evaluation_strategy`; `target_converter` and `validator` are optional.
pub struct Collaborators {
    pub collector: Rc<dyn TraceCollector>,
    pub evaluator: Option<Rc<dyn TraceEvaluator>>,
    pub normalizer: Rc<dyn TraceNormalizer>,
    pub target_converter: Option<Rc<dyn TargetConverter>>,
    pub aligner: Rc<dyn TraceAligner>,
    pub extractor: Rc<dyn PatternExtractor>,
    pub validator: Option<Rc<dyn GraphValidator>>,
    pub inference: Option<Rc<dyn Inference>>,
}

/// Called after collection (first pass), evaluation, synthesis and
/// validation with the stage's summary fields.
pub type StageHook = Box<dyn Fn(StageName, &Map<String, Value>)>;

/// Final or partial outcome of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineResult {
    pub task_description: String,
    pub graph: Option<ActionGraph>,
    pub synthesis_report: Option<SynthesisReport>,
    #[serde(default)]
    pub decisions: Vec<ActionDecision>,
    pub validation_results: Option<ValidationResults>,
    #[serde(default)]
    pub traces: Vec<ExecutionTrace>,
    #[serde(default)]
    pub evaluation_results: Vec<EvaluationResult>,
    pub script: Option<String>,
    pub error: Option<String>,
    /// Stage name, or `{stage}_aborted` for a deliberate abort.
    pub failed_stage: Option<String>,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct MetaAgentPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    evaluator: Rc<dyn TraceEvaluator>,
    synthesizer: GraphSynthesizer,
    hook: Option<StageHook>,
}

impl MetaAgentPipeline {
    /// Validate the configuration and resolve strategies.
    ///
    /// Fails before any stage runs when a strategy string is unknown, a
    /// model-backed strategy has no inference backend, validation is enabled
    /// without a validator, or a prompt override does not compile.
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self, PipelineError> {
        config.validate().map_err(config_error)?;
        let synthesis = config.synthesis().map_err(config_error)?;
        let evaluation = config.evaluation().map_err(config_error)?;

        if synthesis.requires_inference() && collaborators.inference.is_none() {
            return Err(PipelineError::Config(format!(
                "synthesis_strategy '{synthesis}' requires an inference backend"
            )));
        }
        if evaluation.requires_inference() && collaborators.inference.is_none() {
            return Err(PipelineError::Config(format!(
                "evaluation_strategy '{evaluation}' requires an inference backend"
            )));
        }
        if config.validate && collaborators.validator.is_none() {
            return Err(PipelineError::Config(
                "validate is set but no graph validator was supplied".to_string(),
            ));
        }

        let prompts = Rc::new(PromptBuilder::new(&config.prompt_templates).map_err(config_error)?);
        let evaluator: Rc<dyn TraceEvaluator> = match &collaborators.evaluator {
            Some(evaluator) => Rc::clone(evaluator),
            None => builtin_evaluator(evaluation, collaborators.inference.as_ref(), &prompts)?,
        };
        let synthesizer = GraphSynthesizer::for_strategy(
            synthesis,
            collaborators.inference.clone(),
            SynthesizerOptions {
                agent_action_type: config.agent_action_type.clone(),
                action_metadata: config.custom_type_map.clone(),
                prompts: Some(prompts),
            },
        )
        .map_err(config_error)?;

        Ok(Self {
            config,
            collaborators,
            evaluator,
            synthesizer,
            hook: None,
        })
    }

    pub fn with_stage_hook(mut self, hook: StageHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for `task_description`.
    ///
    /// Stage failures come back as a partial result; only a persistent
    /// shortfall of passing traces is returned as an error.
    pub fn run(&self, task_description: &str) -> Result<PipelineResult, PipelineError> {
        self.run_with_input(task_description, None)
    }

    /// Like [`run`](Self::run), passing `input_data` to the first collection
    /// pass only.
    #[instrument(skip_all, fields(task = %task_description))]
    pub fn run_with_input(
        &self,
        task_description: &str,
        input_data: Option<Args>,
    ) -> Result<PipelineResult, PipelineError> {
        let stages = standard_stages(self.config.max_retry_rounds);
        drive(self, &stages, RunState::new(task_description, input_data))
    }

    /// Collect `additional_run_count` more traces for an earlier result and
    /// rebuild everything from normalization on.
    ///
    /// Only the new traces are evaluated. There is no retry loop: a merged
    /// set still short of passing traces is an error.
    #[instrument(skip_all, fields(task = %existing.task_description, additional_run_count = additional_run_count))]
    pub fn refine(
        &self,
        existing: &PipelineResult,
        additional_run_count: usize,
    ) -> Result<PipelineResult, PipelineError> {
        let mut traces = existing.traces.clone();
        let mut evaluation_results = existing.evaluation_results.clone();
        if traces.len() != evaluation_results.len() {
            let paired = traces.len().min(evaluation_results.len());
            warn!(
                traces = traces.len(),
                evaluation_results = evaluation_results.len(),
                paired,
                "trace and evaluation counts differ; truncating to the paired prefix"
            );
            traces.truncate(paired);
            evaluation_results.truncate(paired);
        }

        let mut state = RunState::new(&existing.task_description, None);
        state.traces = traces;
        state.evaluation_results = evaluation_results;
        state.refilter();
        state.collection_request = CollectionRequest::Additional(additional_run_count);

        drive(self, &standard_stages(0), state)
    }

    /// Fire the stage hook and write the checkpoint for a finished stage.
    ///
    /// Collection records only its first pass and validation only when it
    /// ran. Checkpoint failures are logged and otherwise ignored.
    fn record_completion(&self, stage: StageName, state: &RunState) {
        let recorded = match stage {
            StageName::Collection => state.collection_request == CollectionRequest::Initial,
            StageName::Validation => state.validation.is_some(),
            _ => true,
        };
        if !recorded {
            return;
        }
        let hooked = matches!(
            stage,
            StageName::Collection
                | StageName::Evaluation
                | StageName::Synthesis
                | StageName::Validation
        );
        let hook = self.hook.as_ref().filter(|_| hooked);
        if hook.is_none() && self.config.output_dir.is_none() {
            return;
        }
        let summary = stage_summary(stage, state);

        if let Some(hook) = hook {
            hook(stage, &summary);
        }

        if let Some(output_dir) = &self.config.output_dir {
            let synthesis = state
                .synthesis
                .as_ref()
                .filter(|_| stage == StageName::Synthesis);
            let request = CheckpointWriteRequest {
                output_dir,
                stage,
                summary: &summary,
                action_graph: synthesis.map(|s| &s.graph),
                synthesis_report: synthesis.map(|s| &s.report),
                validation_results: state
                    .validation
                    .as_ref()
                    .filter(|_| stage == StageName::Validation),
            };
            if let Err(err) = write_checkpoint(&request) {
                warn!(stage = stage.as_str(), error = %format!("{err:#}"), "checkpoint write failed");
            }
        }
    }
}

fn config_error(err: anyhow::Error) -> PipelineError {
    PipelineError::Config(format!("{err:#}"))
}

fn builtin_evaluator(
    strategy: EvaluationStrategy,
    inference: Option<&Rc<dyn Inference>>,
    prompts: &Rc<PromptBuilder>,
) -> Result<Rc<dyn TraceEvaluator>, PipelineError> {
    match (strategy, inference) {
        (EvaluationStrategy::ExceptionOnly, _) => Ok(Rc::new(ExceptionOnlyEvaluator)),
        (EvaluationStrategy::LlmJudge, Some(inference)) => Ok(Rc::new(LlmJudgeEvaluator::new(
            Rc::clone(inference),
            Rc::clone(prompts),
        ))),
        (EvaluationStrategy::LlmJudge, None) => Err(PipelineError::Config(format!(
            "evaluation_strategy '{strategy}' requires an inference backend"
        ))),
    }
}
