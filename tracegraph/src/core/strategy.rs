//! Strategy selectors parsed from configuration strings.

use std::fmt;
use std::str::FromStr;

use anyhow::{Error, anyhow};
use serde::{Deserialize, Serialize};

/// Policy used to decide, per pattern position, which graph action to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    RuleBased,
    Llm,
    Hybrid,
}

impl SynthesisStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SynthesisStrategy::RuleBased => "rule_based",
            SynthesisStrategy::Llm => "llm",
            SynthesisStrategy::Hybrid => "hybrid",
        }
    }

    /// Whether this strategy needs an inference backend.
    pub fn requires_inference(self) -> bool {
        !matches!(self, SynthesisStrategy::RuleBased)
    }
}

impl FromStr for SynthesisStrategy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rule_based" => Ok(SynthesisStrategy::RuleBased),
            "llm" => Ok(SynthesisStrategy::Llm),
            "hybrid" => Ok(SynthesisStrategy::Hybrid),
            _ => Err(anyhow!(
                "unknown synthesis strategy '{raw}' (expected rule_based, llm or hybrid)"
            )),
        }
    }
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy used to decide whether a collected trace passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStrategy {
    /// A trace passes when it finished without raising.
    ExceptionOnly,
    /// A model judges whether the trace accomplished the task.
    LlmJudge,
}

impl EvaluationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationStrategy::ExceptionOnly => "exception_only",
            EvaluationStrategy::LlmJudge => "llm_judge",
        }
    }

    pub fn requires_inference(self) -> bool {
        matches!(self, EvaluationStrategy::LlmJudge)
    }
}

impl FromStr for EvaluationStrategy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exception_only" => Ok(EvaluationStrategy::ExceptionOnly),
            "llm_judge" => Ok(EvaluationStrategy::LlmJudge),
            _ => Err(anyhow!(
                "unknown evaluation strategy '{raw}' (expected exception_only or llm_judge)"
            )),
        }
    }
}

impl fmt::Display for EvaluationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_strategies_case_insensitively() {
        assert_eq!(
            "Hybrid".parse::<SynthesisStrategy>().expect("parse"),
            SynthesisStrategy::Hybrid
        );
        assert_eq!(
            " llm_judge ".parse::<EvaluationStrategy>().expect("parse"),
            EvaluationStrategy::LlmJudge
        );
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = "genetic".parse::<SynthesisStrategy>().unwrap_err();
        assert!(err.to_string().contains("unknown synthesis strategy 'genetic'"));
    }

    #[test]
    fn only_model_backed_strategies_require_inference() {
        assert!(!SynthesisStrategy::RuleBased.requires_inference());
        assert!(SynthesisStrategy::Llm.requires_inference());
        assert!(SynthesisStrategy::Hybrid.requires_inference());
        assert!(!EvaluationStrategy::ExceptionOnly.requires_inference());
        assert!(EvaluationStrategy::LlmJudge.requires_inference());
    }
}
