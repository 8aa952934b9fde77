//! The shared walk from extracted patterns to graph nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::decision::{ActionDecision, DecisionContext, PatternType};
use crate::core::report::SynthesisReport;
use crate::core::rules::{WAIT_ACTION, boundary_decision};
use crate::core::types::{
    AlignedPosition, AlignmentType, BranchPattern, ExtractedPatterns, LoopPattern,
    ParameterizableInfo, Target,
};
use crate::graph::{
    ActionGraph, BranchCondition, GraphTarget, LoopAdvance, LoopCondition,
};
use crate::synthesizer::{GraphSynthesizer, SynthesisResult};

/// Where a walked index was classified.
#[derive(Clone, Copy)]
enum Slot<'a> {
    Boundary,
    Position(PatternType, &'a AlignedPosition),
}

impl Slot<'_> {
    fn pattern_type(&self) -> PatternType {
        match self {
            Slot::Boundary => PatternType::UserInputBoundary,
            Slot::Position(pattern_type, _) => *pattern_type,
        }
    }
}

impl GraphSynthesizer {
    /// Build the graph for `patterns`.
    ///
    /// Loops are materialized first, then branches, then every remaining
    /// index of `step_order` in ascending order. A loop or branch that cannot
    /// be built is recorded as a report warning; an index in `step_order` that
    /// no bucket claims is an error.
    #[instrument(skip_all, fields(strategy = %self.strategy(), positions = patterns.step_order.len()))]
    pub fn synthesize(
        &self,
        patterns: &ExtractedPatterns,
        task_description: &str,
    ) -> Result<SynthesisResult> {
        let mut graph = ActionGraph::new();
        let mut report = SynthesisReport::new(self.strategy().as_str());
        let mut decisions = Vec::new();

        let mut consumed: BTreeSet<usize> = BTreeSet::new();
        for pattern in &patterns.loop_patterns {
            consumed.extend(pattern.consumed_indices());
        }
        for pattern in &patterns.branch_patterns {
            consumed.insert(pattern.branch_point_index);
        }
        let param_info: HashMap<usize, &ParameterizableInfo> = patterns
            .parameter_info
            .iter()
            .map(|info| (info.position_index, info))
            .collect();
        let slots = classify(patterns, &mut report);

        for pattern in &patterns.loop_patterns {
            match synthesize_loop(&mut graph, pattern) {
                Ok(targets) => {
                    record_targets(&mut report, &targets);
                    report.record_loop();
                }
                Err(err) => {
                    warn!(body_start = pattern.body_start, error = %format!("{err:#}"), "loop skipped");
                    report.warn(format!(
                        "loop at positions {}..={}: {err:#}",
                        pattern.body_start, pattern.body_end
                    ));
                }
            }
        }

        for pattern in &patterns.branch_patterns {
            match synthesize_branch(&mut graph, pattern) {
                Ok(targets) => {
                    record_targets(&mut report, &targets);
                    report.record_position(PatternType::BranchPoint);
                }
                Err(err) => {
                    warn!(index = pattern.branch_point_index, error = %format!("{err:#}"), "branch skipped");
                    report.warn(format!(
                        "branch at position {}: {err:#}",
                        pattern.branch_point_index
                    ));
                }
            }
        }

        let mut order = patterns.step_order.clone();
        order.sort_unstable();
        order.dedup();
        let mut template_variables = Vec::new();

        for index in order {
            if consumed.contains(&index) {
                continue;
            }
            let Some(slot) = slots.get(&index) else {
                bail!("position {index} in step_order is not classified in any pattern bucket");
            };
            match *slot {
                Slot::Boundary => {
                    graph.action(
                        WAIT_ACTION,
                        Some(GraphTarget::Literal(Value::Bool(true))),
                        None,
                        false,
                    )?;
                    decisions.push(boundary_decision(index, self.decider.source()));
                }
                Slot::Position(pattern_type, position) => {
                    let info = if pattern_type == PatternType::Parameterizable {
                        param_info.get(&index).copied()
                    } else {
                        None
                    };
                    if let Some(info) = info {
                        template_variables.extend(info.variable_args.values().cloned());
                    }
                    let context = DecisionContext {
                        task_description,
                        pattern_type,
                        param_info: info,
                    };
                    let decision = self.decider.decide(position, &context);
                    if decision.has_blank_action_type() {
                        report.warn(format!("position {index} has a blank action type; step omitted"));
                    }
                    if let Some(target) = apply_decision(&mut graph, &decision, pattern_type)? {
                        report.record_target(target);
                    }
                    decisions.push(decision);
                }
            }
            report.record_position(slot.pattern_type());
        }

        report.set_template_variables(template_variables);
        debug!(
            nodes = graph.len(),
            decisions = decisions.len(),
            warnings = report.warnings.len(),
            "synthesis finished"
        );
        Ok(SynthesisResult {
            graph,
            report,
            decisions,
            script: None,
        })
    }
}

/// Map each index to its bucket, first match in precedence order.
///
/// An index claimed by more than one bucket gets a report warning.
fn classify<'a>(
    patterns: &'a ExtractedPatterns,
    report: &mut SynthesisReport,
) -> BTreeMap<usize, Slot<'a>> {
    let mut claims: BTreeMap<usize, Vec<Slot<'a>>> = BTreeMap::new();
    for index in &patterns.user_input_boundaries {
        claims.entry(*index).or_default().push(Slot::Boundary);
    }
    let buckets = [
        (PatternType::Deterministic, &patterns.deterministic),
        (PatternType::Parameterizable, &patterns.parameterizable),
        (PatternType::Variable, &patterns.variable),
        (PatternType::Optional, &patterns.optional),
    ];
    for (pattern_type, positions) in buckets {
        for position in positions {
            claims
                .entry(position.index)
                .or_default()
                .push(Slot::Position(pattern_type, position));
        }
    }

    let mut slots = BTreeMap::new();
    for (index, claimed) in claims {
        if claimed.len() > 1 {
            let names = claimed
                .iter()
                .map(|slot| slot.pattern_type().as_str())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(index, buckets = %names, "position classified more than once");
            report.warn(format!(
                "position {index} classified as {names}; using {}",
                claimed[0].pattern_type().as_str()
            ));
        }
        slots.insert(index, claimed[0]);
    }
    slots
}

fn synthesize_loop(graph: &mut ActionGraph, pattern: &LoopPattern) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    graph.loop_over(
        LoopCondition::IterationsBelow {
            max_iterations: pattern.max_iterations,
        },
        pattern.max_iterations,
        LoopAdvance::IncrementCounter,
        |body| {
            for position in &pattern.body {
                replay_representative(body, position, &mut targets)?;
            }
            Ok(())
        },
    )?;
    Ok(targets)
}

/// First label is the true path; every other label is merged, in label
/// order, into the false path.
fn synthesize_branch(graph: &mut ActionGraph, pattern: &BranchPattern) -> Result<Vec<Target>> {
    let mut labels = pattern.branches.iter();
    let Some((first_label, first_path)) = labels.next() else {
        bail!("branch pattern has no labels");
    };
    let rest: Vec<&AlignedPosition> = labels.flat_map(|(_, path)| path.iter()).collect();

    let mut true_targets = Vec::new();
    let mut false_targets = Vec::new();
    graph.branch(
        BranchCondition::AlwaysFirst {
            label: first_label.clone(),
        },
        |path| {
            for position in first_path {
                replay_representative(path, position, &mut true_targets)?;
            }
            Ok(())
        },
        |path| {
            for position in rest {
                replay_representative(path, position, &mut false_targets)?;
            }
            Ok(())
        },
    )?;
    true_targets.extend(false_targets);
    Ok(true_targets)
}

/// Append the representative step of `position`, if any.
fn replay_representative(
    graph: &mut ActionGraph,
    position: &AlignedPosition,
    targets: &mut Vec<Target>,
) -> Result<()> {
    let Some(step) = position.representative() else {
        return Ok(());
    };
    graph.action(
        &step.action_type,
        step.target.as_ref().map(to_graph_target),
        step.args.clone(),
        position.alignment_type == AlignmentType::Optional,
    )?;
    if let Some(target) = &step.target {
        targets.push(target.clone());
    }
    Ok(())
}

/// Emit the decision's action unless it names none; returns the emitted
/// target.
fn apply_decision<'d>(
    graph: &mut ActionGraph,
    decision: &'d ActionDecision,
    pattern_type: PatternType,
) -> Result<Option<&'d Target>> {
    let Some(action_type) = decision.action_type.as_deref().filter(|_| decision.is_emittable())
    else {
        return Ok(None);
    };
    graph.action(
        action_type,
        decision.target.as_ref().map(to_graph_target),
        decision.args.clone(),
        pattern_type == PatternType::Optional,
    )?;
    Ok(decision.target.as_ref())
}

fn to_graph_target(target: &Target) -> GraphTarget {
    GraphTarget::try_from_target(target).unwrap_or_else(|err| {
        warn!(error = %err, "target conversion failed; using raw value");
        GraphTarget::degraded(target)
    })
}

fn record_targets(report: &mut SynthesisReport, targets: &[Target]) {
    for target in targets {
        report.record_target(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use indexmap::IndexMap;
    use serde_json::json;

    use crate::core::decision::{DecisionSource, UNKNOWN_ACTION};
    use crate::core::strategy::SynthesisStrategy;
    use crate::core::types::{TargetSpec, TargetSpecWithFallback, TraceStep};
    use crate::graph::{GraphAction, GraphNode};
    use crate::io::inference::{Inference, InferenceResponse};
    use crate::synthesizer::SynthesizerOptions;
    use crate::test_support::{ScriptedInference, position, step, step_with_target};

    fn rule_based() -> GraphSynthesizer {
        GraphSynthesizer::for_strategy(
            SynthesisStrategy::RuleBased,
            None,
            SynthesizerOptions::default(),
        )
        .expect("synthesizer")
    }

    fn det(index: usize, step: TraceStep) -> AlignedPosition {
        position(index, AlignmentType::Deterministic, vec![("t1", Some(step))])
    }

    fn action_types(actions: &[&GraphAction]) -> Vec<String> {
        actions.iter().map(|a| a.action_type.clone()).collect()
    }

    /// Verifies a linear walk emits one action per position in index order,
    /// with the boundary gate and optional flag in place.
    #[test]
    fn linear_walk_emits_actions_in_order() {
        let optional_step = step_with_target("click", "css", "#cookie");
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step_with_target("goto", "url", "https://shop"))],
            optional: vec![position(
                2,
                AlignmentType::Optional,
                vec![("t1", None), ("t2", Some(optional_step))],
            )],
            user_input_boundaries: vec![1],
            step_order: vec![2, 0, 1],
            ..ExtractedPatterns::default()
        };

        let result = rule_based().synthesize(&patterns, "shop").expect("synthesize");

        let actions = result.graph.actions();
        assert_eq!(action_types(&actions), vec!["goto", WAIT_ACTION, "click"]);
        assert_eq!(
            actions[1].target,
            Some(GraphTarget::Literal(json!(true)))
        );
        assert!(actions[2].no_action_if_target_not_found);
        assert!(!actions[0].no_action_if_target_not_found);

        assert_eq!(result.decisions.len(), 3);
        assert_eq!(result.decisions[1].decision_source, DecisionSource::Rule);
        assert_eq!(result.report.deterministic_steps, 1);
        assert_eq!(result.report.user_input_boundaries, 1);
        assert_eq!(result.report.optional_steps, 1);
        assert_eq!(result.report.total_steps, 3);
        assert_eq!(result.report.synthesis_strategy, "rule_based");
        assert_eq!(result.report.target_strategy_coverage.get("css"), Some(&1));
        assert_eq!(result.report.target_strategy_coverage.get("url"), Some(&1));
    }

    #[test]
    fn parameterizable_positions_collect_template_variables() {
        let mut typed = step("type");
        typed.args = json!({"text": "Paris"}).as_object().cloned();
        let mut info = ParameterizableInfo {
            position_index: 0,
            ..ParameterizableInfo::default()
        };
        info.variable_args
            .insert("text".to_string(), "destination".to_string());
        let mut second = info.clone();
        second.position_index = 1;
        second
            .variable_args
            .insert("date".to_string(), "arrival".to_string());

        let patterns = ExtractedPatterns {
            parameterizable: vec![
                position(0, AlignmentType::Parameterizable, vec![("t1", Some(typed.clone()))]),
                position(1, AlignmentType::Parameterizable, vec![("t1", Some(typed))]),
            ],
            parameter_info: vec![info, second],
            step_order: vec![0, 1],
            ..ExtractedPatterns::default()
        };

        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert_eq!(
            result.report.template_variables,
            vec!["arrival", "destination"]
        );
        assert_eq!(
            result.graph.actions()[0].args,
            json!({"text": "{destination}"}).as_object().cloned()
        );
    }

    /// Verifies the loop is emitted before the walk and its indices are
    /// skipped by the walk.
    #[test]
    fn loops_are_materialized_first_and_consume_indices() {
        let patterns = ExtractedPatterns {
            deterministic: vec![
                det(0, step("goto")),
                det(1, step("scroll")),
                det(2, step("scroll")),
                det(3, step("submit")),
            ],
            loop_patterns: vec![LoopPattern {
                body_start: 1,
                body_end: 2,
                max_iterations: 5,
                body: vec![det(1, step("scroll"))],
            }],
            step_order: vec![0, 1, 2, 3],
            ..ExtractedPatterns::default()
        };

        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        let GraphNode::Loop(looped) = &result.graph.nodes[0] else {
            panic!("expected loop first, got {:?}", result.graph.nodes[0]);
        };
        assert_eq!(looped.max_loop, 5);
        assert_eq!(
            looped.condition,
            LoopCondition::IterationsBelow { max_iterations: 5 }
        );
        assert_eq!(action_types(&result.graph.actions()), vec!["scroll", "goto", "submit"]);
        assert_eq!(result.report.loops, 1);
        assert_eq!(result.report.deterministic_steps, 2);
        assert_eq!(result.report.total_steps, 3);
    }

    #[test]
    fn failed_loop_becomes_warning() {
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step("goto"))],
            loop_patterns: vec![LoopPattern {
                body_start: 4,
                body_end: 5,
                max_iterations: 0,
                body: vec![det(4, step("scroll"))],
            }],
            step_order: vec![0],
            ..ExtractedPatterns::default()
        };

        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert_eq!(result.report.loops, 0);
        assert_eq!(result.report.warnings.len(), 1);
        assert!(result.report.warnings[0].starts_with("loop at positions 4..=5"));
        assert_eq!(action_types(&result.graph.actions()), vec!["goto"]);
    }

    /// Verifies the first label becomes the true path and the rest merge
    /// into the false path.
    #[test]
    fn branch_merges_remaining_labels_into_false_path() {
        let mut branches = IndexMap::new();
        branches.insert("logged_in".to_string(), vec![det(4, step("click"))]);
        branches.insert("guest".to_string(), vec![det(5, step("type"))]);
        branches.insert("captcha".to_string(), vec![det(6, step("wait"))]);
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step("goto"))],
            branch_patterns: vec![BranchPattern {
                branch_point_index: 3,
                branches,
            }],
            step_order: vec![0, 3],
            ..ExtractedPatterns::default()
        };

        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        let GraphNode::Branch(branch) = &result.graph.nodes[0] else {
            panic!("expected branch first");
        };
        assert_eq!(
            branch.condition,
            BranchCondition::AlwaysFirst {
                label: "logged_in".to_string()
            }
        );
        assert!(branch.condition.holds());
        assert_eq!(action_types(&branch.if_true.actions()), vec!["click"]);
        assert_eq!(action_types(&branch.if_false.actions()), vec!["type", "wait"]);
        assert_eq!(result.report.branch_points, 1);
        assert_eq!(result.report.total_steps, 2);
    }

    #[test]
    fn empty_branch_is_warned() {
        let patterns = ExtractedPatterns {
            branch_patterns: vec![BranchPattern {
                branch_point_index: 0,
                branches: IndexMap::new(),
            }],
            step_order: vec![0],
            ..ExtractedPatterns::default()
        };
        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert_eq!(result.report.branch_points, 0);
        assert_eq!(
            result.report.warnings,
            vec!["branch at position 0: branch pattern has no labels".to_string()]
        );
    }

    #[test]
    fn unclassified_index_is_an_error() {
        let patterns = ExtractedPatterns {
            step_order: vec![9],
            ..ExtractedPatterns::default()
        };
        let err = rule_based().synthesize(&patterns, "").expect_err("unclassified");
        assert!(err.to_string().contains("position 9"));
    }

    #[test]
    fn overlapping_buckets_warn_and_use_precedence() {
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step("click"))],
            optional: vec![position(0, AlignmentType::Optional, vec![("t1", Some(step("click")))])],
            step_order: vec![0],
            ..ExtractedPatterns::default()
        };
        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert_eq!(result.report.deterministic_steps, 1);
        assert_eq!(result.report.optional_steps, 0);
        assert_eq!(
            result.report.warnings,
            vec!["position 0 classified as deterministic, optional; using deterministic".to_string()]
        );
        assert!(!result.graph.actions()[0].no_action_if_target_not_found);
    }

    /// Verifies unknown decisions emit nothing while still being recorded.
    #[test]
    fn unknown_decisions_are_not_emitted() {
        let patterns = ExtractedPatterns {
            deterministic: vec![position(0, AlignmentType::Deterministic, vec![("t1", None)])],
            step_order: vec![0],
            ..ExtractedPatterns::default()
        };
        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert!(result.graph.is_empty());
        assert_eq!(result.decisions.len(), 1);
        assert_eq!(result.decisions[0].action_type.as_deref(), Some(UNKNOWN_ACTION));
        assert_eq!(result.report.deterministic_steps, 1);
    }

    #[test]
    fn blank_action_type_is_skipped_with_warning() {
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step("")), det(1, step("click"))],
            step_order: vec![0, 1],
            ..ExtractedPatterns::default()
        };
        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        let actions = result.graph.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "click");
        assert_eq!(result.decisions.len(), 2);
        assert_eq!(
            result.report.warnings,
            vec!["position 0 has a blank action type; step omitted".to_string()]
        );
    }

    #[test]
    fn invalid_targets_degrade_to_raw_value() {
        let mut broken = step("click");
        broken.target = Some(Target::Fallback(TargetSpecWithFallback {
            strategies: vec![
                TargetSpec {
                    strategy: String::new(),
                    value: "#first".to_string(),
                },
                TargetSpec {
                    strategy: "css".to_string(),
                    value: "#second".to_string(),
                },
            ],
        }));
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, broken)],
            step_order: vec![0],
            ..ExtractedPatterns::default()
        };
        let result = rule_based().synthesize(&patterns, "").expect("synthesize");
        assert_eq!(
            result.graph.actions()[0].target,
            Some(GraphTarget::Literal(json!("#first")))
        );
    }

    /// Verifies every emittable decision maps to exactly one emitted action
    /// with matching fields.
    #[test]
    fn decisions_match_emitted_actions() {
        let inference = Rc::new(ScriptedInference::new(vec![
            Ok(InferenceResponse::Text(r#"{"action_type": "unknown"}"#.to_string())),
            Ok(InferenceResponse::Text(
                r#"{"action_type": "extract", "target": "price", "confidence": 0.9}"#.to_string(),
            )),
        ]));
        let backend: Rc<dyn Inference> = inference.clone();
        let synthesizer = GraphSynthesizer::for_strategy(
            SynthesisStrategy::Hybrid,
            Some(backend),
            SynthesizerOptions::default(),
        )
        .expect("synthesizer");
        let patterns = ExtractedPatterns {
            deterministic: vec![det(0, step_with_target("goto", "url", "https://shop"))],
            variable: vec![
                position(1, AlignmentType::Variable, vec![("t1", Some(step("click")))]),
                position(2, AlignmentType::Variable, vec![("t1", Some(step("scroll")))]),
            ],
            user_input_boundaries: vec![3],
            step_order: vec![0, 1, 2, 3],
            ..ExtractedPatterns::default()
        };

        let result = synthesizer.synthesize(&patterns, "price check").expect("synthesize");

        let emitted: Vec<&ActionDecision> =
            result.decisions.iter().filter(|d| d.is_emittable()).collect();
        let actions = result.graph.actions();
        assert_eq!(emitted.len(), actions.len());
        for (decision, action) in emitted.iter().zip(&actions) {
            assert_eq!(decision.action_type.as_deref(), Some(action.action_type.as_str()));
            assert_eq!(decision.args, action.args);
            assert_eq!(decision.target.as_ref().map(to_graph_target), action.target);
        }
        assert_eq!(action_types(&actions), vec!["goto", "extract", WAIT_ACTION]);
        assert_eq!(result.decisions[3].decision_source, DecisionSource::Hybrid);
        assert_eq!(result.report.synthesis_strategy, "hybrid");
        assert_eq!(inference.prompts.borrow().len(), 2);
    }
}
