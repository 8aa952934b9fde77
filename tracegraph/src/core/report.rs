//! Aggregate counters describing one synthesis run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::decision::PatternType;
use crate::core::types::Target;

/// Summary of what a synthesis run emitted.
///
/// `total_steps` is maintained as the sum of the seven category counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub total_steps: usize,
    pub deterministic_steps: usize,
    pub parameterizable_steps: usize,
    pub variable_steps: usize,
    pub optional_steps: usize,
    pub user_input_boundaries: usize,
    pub branch_points: usize,
    pub loops: usize,
    pub synthesis_strategy: String,
    /// Target resolution strategy → number of emitted targets naming it.
    pub target_strategy_coverage: BTreeMap<String, usize>,
    /// Sorted, unique template variable names.
    pub template_variables: Vec<String>,
    pub warnings: Vec<String>,
}

impl SynthesisReport {
    pub fn new(synthesis_strategy: &str) -> Self {
        Self {
            synthesis_strategy: synthesis_strategy.to_string(),
            ..Self::default()
        }
    }

    /// Count one walked position under its bucket.
    pub fn record_position(&mut self, pattern_type: PatternType) {
        match pattern_type {
            PatternType::UserInputBoundary => self.user_input_boundaries += 1,
            PatternType::Deterministic => self.deterministic_steps += 1,
            PatternType::Parameterizable => self.parameterizable_steps += 1,
            PatternType::Variable => self.variable_steps += 1,
            PatternType::Optional => self.optional_steps += 1,
            PatternType::BranchPoint => self.branch_points += 1,
        }
        self.total_steps = self.category_sum();
    }

    pub fn record_loop(&mut self) {
        self.loops += 1;
        self.total_steps = self.category_sum();
    }

    /// Count each distinct resolution strategy named by `target`.
    pub fn record_target(&mut self, target: &Target) {
        for strategy in target.strategies() {
            *self
                .target_strategy_coverage
                .entry(strategy.to_string())
                .or_default() += 1;
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Store template variables sorted and deduplicated.
    pub fn set_template_variables<I: IntoIterator<Item = String>>(&mut self, names: I) {
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names.dedup();
        self.template_variables = names;
    }

    pub fn category_sum(&self) -> usize {
        self.deterministic_steps
            + self.parameterizable_steps
            + self.variable_steps
            + self.optional_steps
            + self.user_input_boundaries
            + self.branch_points
            + self.loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TargetSpec, TargetSpecWithFallback};
    use serde_json::json;

    #[test]
    fn total_tracks_every_category() {
        let mut report = SynthesisReport::new("rule_based");
        report.record_position(PatternType::Deterministic);
        report.record_position(PatternType::Deterministic);
        report.record_position(PatternType::UserInputBoundary);
        report.record_position(PatternType::Optional);
        report.record_position(PatternType::BranchPoint);
        report.record_loop();

        assert_eq!(report.total_steps, 6);
        assert_eq!(report.total_steps, report.category_sum());
        assert_eq!(report.deterministic_steps, 2);
    }

    #[test]
    fn coverage_counts_each_listed_strategy_once() {
        let mut report = SynthesisReport::new("rule_based");
        report.record_target(&Target::Fallback(TargetSpecWithFallback {
            strategies: vec![
                TargetSpec {
                    strategy: "css".to_string(),
                    value: "#a".to_string(),
                },
                TargetSpec {
                    strategy: "text".to_string(),
                    value: "Go".to_string(),
                },
            ],
        }));
        report.record_target(&Target::Spec(TargetSpec {
            strategy: "css".to_string(),
            value: "#b".to_string(),
        }));
        report.record_target(&Target::Value(json!("plain")));

        assert_eq!(report.target_strategy_coverage.get("css"), Some(&2));
        assert_eq!(report.target_strategy_coverage.get("text"), Some(&1));
        assert_eq!(report.target_strategy_coverage.len(), 2);
    }

    #[test]
    fn template_variables_are_sorted_and_unique() {
        let mut report = SynthesisReport::default();
        report.set_template_variables(vec![
            "query".to_string(),
            "city".to_string(),
            "query".to_string(),
        ]);
        assert_eq!(report.template_variables, vec!["city", "query"]);
    }
}
