//! Pipeline configuration stored as TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::rules::DEFAULT_AGENT_ACTION_TYPE;
use crate::core::strategy::{EvaluationStrategy, SynthesisStrategy};

/// Pipeline run configuration (TOML).
///
/// Missing fields default to the values below. Strategy names stay strings
/// here so a config file can be loaded and inspected before resolution;
/// [`PipelineConfig::synthesis`] and [`PipelineConfig::evaluation`] resolve
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Traces requested on the first collection pass.
    pub run_count: usize,

    /// Passing traces required before normalization may start.
    pub min_success_traces: usize,

    /// Extra collection rounds allowed when short of passing traces.
    pub max_retry_rounds: usize,

    pub synthesis_strategy: String,

    pub evaluation_strategy: String,

    /// Replay the synthesized graph through the validator.
    pub validate: bool,

    /// Upper bound on validation test cases.
    pub validation_runs: usize,

    /// Render a script from the graph when the synthesizer attaches none.
    pub generate_script: bool,

    /// Action type for agent-as-action nodes.
    pub agent_action_type: String,

    /// Directory for per-stage checkpoints; disabled when unset.
    pub output_dir: Option<PathBuf>,

    /// Extra action types (type → description) offered to the model.
    pub custom_type_map: BTreeMap<String, String>,

    /// Template name → minijinja source overriding a built-in prompt.
    pub prompt_templates: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_count: 3,
            min_success_traces: 2,
            max_retry_rounds: 2,
            synthesis_strategy: SynthesisStrategy::RuleBased.as_str().to_string(),
            evaluation_strategy: EvaluationStrategy::ExceptionOnly.as_str().to_string(),
            validate: false,
            validation_runs: 3,
            generate_script: false,
            agent_action_type: DEFAULT_AGENT_ACTION_TYPE.to_string(),
            output_dir: None,
            custom_type_map: BTreeMap::new(),
            prompt_templates: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run_count == 0 {
            return Err(anyhow!("run_count must be > 0"));
        }
        if self.min_success_traces == 0 {
            return Err(anyhow!("min_success_traces must be > 0"));
        }
        if self.validate && self.validation_runs == 0 {
            return Err(anyhow!("validation_runs must be > 0 when validate is set"));
        }
        if self.agent_action_type.trim().is_empty() {
            return Err(anyhow!("agent_action_type must be non-empty"));
        }
        Ok(())
    }

    pub fn synthesis(&self) -> Result<SynthesisStrategy> {
        self.synthesis_strategy.parse()
    }

    pub fn evaluation(&self) -> Result<EvaluationStrategy> {
        self.evaluation_strategy.parse()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
