//! Prompt templates for model-backed decisions and judging.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use minijinja::Environment;
use serde::Serialize;

const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");

pub const DECISION: &str = "decision";
pub const JUDGE: &str = "judge";

/// One trace's view of the position being decided.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedStep {
    pub trace_id: String,
    /// Step rendered as compact JSON; `None` when the trace skipped it.
    pub step: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableArg {
    pub key: String,
    pub variable: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionTypeEntry {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionPromptInput {
    pub task_description: String,
    pub pattern_type: String,
    pub position_index: usize,
    pub observed_steps: Vec<ObservedStep>,
    /// Constant arguments as compact JSON.
    pub constant_args: Option<String>,
    pub variable_args: Vec<VariableArg>,
    pub action_types: Vec<ActionTypeEntry>,
    pub default_action_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgePromptInput {
    pub task_description: String,
    pub trace_id: String,
    /// One rendered line per step.
    pub steps: Vec<String>,
}

/// Template engine wrapper around minijinja.
///
/// Built-in templates are compiled once; a configured override replaces the
/// built-in source for that template name.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    overrides: BTreeMap<String, String>,
}

impl PromptBuilder {
    pub fn new(overrides: &BTreeMap<String, String>) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(DECISION, DECISION_TEMPLATE)
            .context("compile decision template")?;
        env.add_template(JUDGE, JUDGE_TEMPLATE)
            .context("compile judge template")?;

        for (name, source) in overrides {
            if name != DECISION && name != JUDGE {
                return Err(anyhow!(
                    "unknown prompt template '{name}' (expected {DECISION} or {JUDGE})"
                ));
            }
            env.template_from_str(source)
                .with_context(|| format!("compile prompt template override '{name}'"))?;
        }

        Ok(Self {
            env,
            overrides: overrides.clone(),
        })
    }

    pub fn decision_prompt(&self, input: &DecisionPromptInput) -> Result<String> {
        self.render(DECISION, input)
    }

    pub fn judge_prompt(&self, input: &JudgePromptInput) -> Result<String> {
        self.render(JUDGE, input)
    }

    fn render<S: Serialize>(&self, name: &str, input: &S) -> Result<String> {
        let rendered = match self.overrides.get(name) {
            Some(source) => self.env.render_str(source, input),
            None => self.env.get_template(name)?.render(input),
        }
        .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }
}
