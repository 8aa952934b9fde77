//! Pattern-file loading with schema validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::types::ExtractedPatterns;

const PATTERNS_SCHEMA: &str = include_str!("../../schemas/extracted_patterns.schema.json");

/// Load an `ExtractedPatterns` JSON file, validating it against the
/// embedded schema before deserializing.
pub fn load_patterns(path: &Path) -> Result<ExtractedPatterns> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read patterns {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse patterns {}", path.display()))?;
    validate_schema(&value)?;
    serde_json::from_value(value)
        .with_context(|| format!("deserialize patterns {}", path.display()))
}

fn validate_schema(patterns: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PATTERNS_SCHEMA).context("parse patterns schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(patterns) {
        let messages = compiled
            .iter_errors(patterns)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "patterns schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
