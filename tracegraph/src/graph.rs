//! Fluent ActionGraph builder.
//!
//! The synthesizer appends actions, branches and loops to an [`ActionGraph`];
//! the finished graph serializes to a structural JSON document and can render
//! a line-oriented script for replay tooling.

use std::fmt::Write as _;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{Args, Target};

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("action type must be non-empty")]
    EmptyActionType,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("loop max_iterations must be > 0")]
    ZeroIterations,
    #[error("loop body must contain at least one node")]
    EmptyLoopBody,
    #[error("graph has no nodes")]
    EmptyGraph,
}

/// One locator understood by the graph executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: String,
    pub value: String,
}

/// Target representation stored on graph actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GraphTarget {
    Literal(Value),
    Locator(Locator),
    Fallback(Vec<Locator>),
}

impl GraphTarget {
    /// Strict conversion from a recorded step target.
    pub fn try_from_target(target: &Target) -> Result<Self, GraphError> {
        match target {
            Target::Value(value) => Ok(GraphTarget::Literal(value.clone())),
            Target::Spec(spec) => Ok(GraphTarget::Locator(locator(&spec.strategy, &spec.value)?)),
            Target::Fallback(fallback) => {
                if fallback.strategies.is_empty() {
                    return Err(GraphError::InvalidTarget(
                        "fallback target lists no strategies".to_string(),
                    ));
                }
                let locators = fallback
                    .strategies
                    .iter()
                    .map(|spec| locator(&spec.strategy, &spec.value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GraphTarget::Fallback(locators))
            }
        }
    }

    /// Raw value used when strict conversion fails: the first listed
    /// strategy's value for a fallback, the value itself for a single spec.
    pub fn degraded(target: &Target) -> Self {
        match target {
            Target::Value(value) => GraphTarget::Literal(value.clone()),
            Target::Spec(spec) => GraphTarget::Literal(Value::String(spec.value.clone())),
            Target::Fallback(fallback) => GraphTarget::Literal(
                fallback
                    .strategies
                    .first()
                    .map(|spec| Value::String(spec.value.clone()))
                    .unwrap_or(Value::Null),
            ),
        }
    }
}

fn locator(strategy: &str, value: &str) -> Result<Locator, GraphError> {
    if strategy.trim().is_empty() {
        return Err(GraphError::InvalidTarget(format!(
            "locator for '{value}' has a blank strategy"
        )));
    }
    Ok(Locator {
        strategy: strategy.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAction {
    pub action_type: String,
    pub target: Option<GraphTarget>,
    pub args: Option<Args>,
    /// Skip instead of failing when the target cannot be resolved.
    pub no_action_if_target_not_found: bool,
}

/// Placeholder branch condition; always takes the true path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchCondition {
    AlwaysFirst { label: String },
}

impl BranchCondition {
    pub fn holds(&self) -> bool {
        match self {
            BranchCondition::AlwaysFirst { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopCondition {
    IterationsBelow { max_iterations: u32 },
}

impl LoopCondition {
    pub fn holds(&self, count: u32) -> bool {
        match self {
            LoopCondition::IterationsBelow { max_iterations } => count < *max_iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopAdvance {
    IncrementCounter,
}

/// Iteration state for one loop execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopCounter {
    pub count: u32,
}

impl LoopCounter {
    pub fn advance(&mut self, advance: LoopAdvance) {
        match advance {
            LoopAdvance::IncrementCounter => self.count = self.count.saturating_add(1),
        }
    }

    pub fn should_continue(&self, condition: &LoopCondition) -> bool {
        condition.holds(self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    pub condition: BranchCondition,
    pub if_true: ActionGraph,
    pub if_false: ActionGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopNode {
    pub condition: LoopCondition,
    pub max_loop: u32,
    pub advance: LoopAdvance,
    pub body: ActionGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum GraphNode {
    Action(GraphAction),
    Branch(BranchNode),
    Loop(LoopNode),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionGraph {
    pub nodes: Vec<GraphNode>,
}

impl ActionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(
        &mut self,
        action_type: &str,
        target: Option<GraphTarget>,
        args: Option<Args>,
        no_action_if_target_not_found: bool,
    ) -> Result<(), GraphError> {
        if action_type.trim().is_empty() {
            return Err(GraphError::EmptyActionType);
        }
        self.nodes.push(GraphNode::Action(GraphAction {
            action_type: action_type.to_string(),
            target,
            args,
            no_action_if_target_not_found,
        }));
        Ok(())
    }

    /// Append a branch whose paths are filled by the two callbacks.
    ///
    /// Nothing is appended when either callback fails.
    pub fn branch<T, F>(&mut self, condition: BranchCondition, if_true: T, if_false: F) -> Result<()>
    where
        T: FnOnce(&mut ActionGraph) -> Result<()>,
        F: FnOnce(&mut ActionGraph) -> Result<()>,
    {
        let mut true_path = ActionGraph::new();
        if_true(&mut true_path)?;
        let mut false_path = ActionGraph::new();
        if_false(&mut false_path)?;
        self.nodes.push(GraphNode::Branch(BranchNode {
            condition,
            if_true: true_path,
            if_false: false_path,
        }));
        Ok(())
    }

    /// Append a loop whose body is filled by `body`.
    pub fn loop_over<B>(
        &mut self,
        condition: LoopCondition,
        max_loop: u32,
        advance: LoopAdvance,
        body: B,
    ) -> Result<()>
    where
        B: FnOnce(&mut ActionGraph) -> Result<()>,
    {
        if max_loop == 0 {
            return Err(GraphError::ZeroIterations.into());
        }
        let mut inner = ActionGraph::new();
        body(&mut inner)?;
        if inner.is_empty() {
            return Err(GraphError::EmptyLoopBody.into());
        }
        self.nodes.push(GraphNode::Loop(LoopNode {
            condition,
            max_loop,
            advance,
            body: inner,
        }));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every action in the graph, depth-first, true path before false path.
    pub fn actions(&self) -> Vec<&GraphAction> {
        let mut out = Vec::new();
        collect_actions(&self.nodes, &mut out);
        out
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Render the graph as an indented script, one node per line.
    pub fn render_script(&self) -> Result<String, GraphError> {
        if self.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        let mut out = String::new();
        render_nodes(&self.nodes, 0, &mut out);
        Ok(out)
    }
}

fn collect_actions<'a>(nodes: &'a [GraphNode], out: &mut Vec<&'a GraphAction>) {
    for node in nodes {
        match node {
            GraphNode::Action(action) => out.push(action),
            GraphNode::Branch(branch) => {
                collect_actions(&branch.if_true.nodes, out);
                collect_actions(&branch.if_false.nodes, out);
            }
            GraphNode::Loop(looped) => collect_actions(&looped.body.nodes, out),
        }
    }
}

fn render_nodes(nodes: &[GraphNode], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            GraphNode::Action(action) => {
                let _ = write!(out, "{indent}action {}", action.action_type);
                if let Some(target) = &action.target {
                    let _ = write!(out, " target={}", render_target(target));
                }
                if let Some(args) = &action.args {
                    let _ = write!(out, " args={}", Value::Object(args.clone()));
                }
                if action.no_action_if_target_not_found {
                    out.push_str(" optional");
                }
                out.push('\n');
            }
            GraphNode::Branch(branch) => {
                let BranchCondition::AlwaysFirst { label } = &branch.condition;
                let _ = writeln!(out, "{indent}branch when first({label})");
                let _ = writeln!(out, "{indent}then");
                render_nodes(&branch.if_true.nodes, depth + 1, out);
                if !branch.if_false.is_empty() {
                    let _ = writeln!(out, "{indent}otherwise");
                    render_nodes(&branch.if_false.nodes, depth + 1, out);
                }
            }
            GraphNode::Loop(looped) => {
                let LoopCondition::IterationsBelow { max_iterations } = looped.condition;
                let _ = writeln!(out, "{indent}loop while iteration < {max_iterations}");
                render_nodes(&looped.body.nodes, depth + 1, out);
            }
        }
    }
}

fn render_target(target: &GraphTarget) -> String {
    match target {
        GraphTarget::Literal(value) => value.to_string(),
        GraphTarget::Locator(locator) => format!("{}:{}", locator.strategy, locator.value),
        GraphTarget::Fallback(locators) => locators
            .iter()
            .map(|locator| format!("{}:{}", locator.strategy, locator.value))
            .collect::<Vec<_>>()
            .join("|"),
    }
}
