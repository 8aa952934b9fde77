//! Per-stage checkpoint files under the configured output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::report::SynthesisReport;
use crate::core::stage::StageName;
use crate::core::types::ValidationResults;
use crate::graph::ActionGraph;

#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub action_graph_path: PathBuf,
    pub synthesis_report_path: PathBuf,
    pub validation_results_path: PathBuf,
}

impl CheckpointPaths {
    pub fn new(output_dir: &Path, stage: StageName) -> Self {
        let dir = output_dir.join(format!("stage_{}", stage.as_str()));
        Self {
            dir: dir.clone(),
            checkpoint_path: dir.join("checkpoint.json"),
            action_graph_path: dir.join("action_graph.json"),
            synthesis_report_path: dir.join("synthesis_report.json"),
            validation_results_path: dir.join("validation_results.json"),
        }
    }
}

pub struct CheckpointWriteRequest<'a> {
    pub output_dir: &'a Path,
    pub stage: StageName,
    /// Stage-specific summary fields merged into `checkpoint.json`.
    pub summary: &'a Map<String, Value>,
    pub action_graph: Option<&'a ActionGraph>,
    pub synthesis_report: Option<&'a SynthesisReport>,
    pub validation_results: Option<&'a ValidationResults>,
}

pub fn write_checkpoint(request: &CheckpointWriteRequest<'_>) -> Result<CheckpointPaths> {
    let paths = CheckpointPaths::new(request.output_dir, request.stage);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create checkpoint dir {}", paths.dir.display()))?;

    let mut checkpoint = Map::new();
    checkpoint.insert(
        "stage".to_string(),
        Value::String(request.stage.as_str().to_string()),
    );
    checkpoint.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    for (key, value) in request.summary {
        checkpoint.insert(key.clone(), value.clone());
    }
    write_json_file(&paths.checkpoint_path, &checkpoint)?;

    if let Some(graph) = request.action_graph {
        write_json_file(&paths.action_graph_path, graph)?;
    }
    if let Some(report) = request.synthesis_report {
        write_json_file(&paths.synthesis_report_path, report)?;
    }
    if let Some(validation) = request.validation_results {
        write_json_file(&paths.validation_results_path, &validation.results)?;
    }

    Ok(paths)
}

/// Pretty-print `value` to `path` with a trailing newline.
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ValidationCase;
    use serde_json::json;

    #[test]
    fn checkpoint_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CheckpointPaths::new(temp.path(), StageName::TargetConversion);

        assert!(paths.dir.ends_with("stage_target_conversion"));
        assert!(paths.checkpoint_path.ends_with("checkpoint.json"));
        assert!(paths.action_graph_path.ends_with("action_graph.json"));
        assert!(paths.synthesis_report_path.ends_with("synthesis_report.json"));
        assert!(
            paths
                .validation_results_path
                .ends_with("validation_results.json")
        );
    }

    #[test]
    fn summary_only_checkpoint_writes_single_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut summary = Map::new();
        summary.insert("trace_count".to_string(), json!(4));

        let paths = write_checkpoint(&CheckpointWriteRequest {
            output_dir: temp.path(),
            stage: StageName::Collection,
            summary: &summary,
            action_graph: None,
            synthesis_report: None,
            validation_results: None,
        })
        .expect("write");

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&paths.checkpoint_path).expect("read"))
                .expect("parse");
        assert_eq!(written["stage"], json!("collection"));
        assert_eq!(written["trace_count"], json!(4));
        assert!(written["timestamp"].as_str().is_some_and(|ts| !ts.is_empty()));
        assert!(!paths.action_graph_path.exists());
    }

    #[test]
    fn validation_checkpoint_lists_cases() {
        let temp = tempfile::tempdir().expect("tempdir");
        let validation = ValidationResults {
            results: vec![ValidationCase {
                input_data: Map::new(),
                passed: false,
                divergence_point: Some(2),
                expected_outcome: None,
                actual_outcome: None,
                error: Some("diverged".to_string()),
            }],
            success_rate: 0.0,
            all_passed: false,
        };

        let paths = write_checkpoint(&CheckpointWriteRequest {
            output_dir: temp.path(),
            stage: StageName::Validation,
            summary: &Map::new(),
            action_graph: None,
            synthesis_report: None,
            validation_results: Some(&validation),
        })
        .expect("write");

        let cases: Value = serde_json::from_str(
            &fs::read_to_string(&paths.validation_results_path).expect("read"),
        )
        .expect("parse");
        assert_eq!(cases[0]["divergence_point"], json!(2));
        assert_eq!(cases[0]["passed"], json!(false));
        assert!(cases[0].get("expected_outcome").is_none());
    }
}
