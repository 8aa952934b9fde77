//! Command-line entry point for offline synthesis.
//!
//! `synthesize` turns a pattern file into an ActionGraph with the rule-based
//! strategy; `check-config` resolves and prints a pipeline config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use tracegraph::core::strategy::SynthesisStrategy;
use tracegraph::io::checkpoint::write_json_file;
use tracegraph::io::config::load_config;
use tracegraph::io::patterns_store::load_patterns;
use tracegraph::logging;
use tracegraph::synthesizer::{GraphSynthesizer, SynthesizerOptions};

#[derive(Parser)]
#[command(
    name = "tracegraph",
    version,
    about = "Synthesize replayable ActionGraphs from recorded agent traces"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an ActionGraph from an extracted-patterns JSON file.
    Synthesize {
        /// Path to the extracted patterns file.
        #[arg(long)]
        patterns: PathBuf,
        /// Task description recorded with the decisions.
        #[arg(long, default_value = "")]
        task: String,
        /// Pipeline config (TOML); defaults apply when missing.
        #[arg(long, default_value = "tracegraph.toml")]
        config: PathBuf,
        /// Directory for output files; prints the report when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also render the graph as a script.
        #[arg(long)]
        script: bool,
    },
    /// Load, validate and print the resolved pipeline config.
    CheckConfig {
        #[arg(long, default_value = "tracegraph.toml")]
        path: PathBuf,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Synthesize {
            patterns,
            task,
            config,
            out,
            script,
        } => cmd_synthesize(&patterns, &task, &config, out.as_deref(), script),
        Command::CheckConfig { path } => cmd_check_config(&path),
    }
}

fn cmd_synthesize(
    patterns_path: &Path,
    task: &str,
    config_path: &Path,
    out: Option<&Path>,
    script: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let strategy = config.synthesis()?;
    if strategy != SynthesisStrategy::RuleBased {
        bail!("synthesis_strategy '{strategy}' needs an inference backend; the CLI supports rule_based only");
    }
    let patterns = load_patterns(patterns_path)?;
    let synthesizer = GraphSynthesizer::for_strategy(
        strategy,
        None,
        SynthesizerOptions {
            agent_action_type: config.agent_action_type.clone(),
            action_metadata: config.custom_type_map.clone(),
            prompts: None,
        },
    )?;
    let mut result = synthesizer.synthesize(&patterns, task)?;
    if script || config.generate_script {
        result.script = Some(result.graph.render_script().context("render script")?);
    }

    let Some(out) = out else {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.report).context("serialize report")?
        );
        return Ok(());
    };
    fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    write_json_file(&out.join("action_graph.json"), &result.graph)?;
    write_json_file(&out.join("synthesis_report.json"), &result.report)?;
    write_json_file(&out.join("decisions.json"), &result.decisions)?;
    if let Some(script) = &result.script {
        let path = out.join("script.txt");
        fs::write(&path, script).with_context(|| format!("write {}", path.display()))?;
    }
    info!(
        out = %out.display(),
        nodes = result.graph.len(),
        warnings = result.report.warnings.len(),
        "wrote synthesis output"
    );
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    config.synthesis()?;
    config.evaluation()?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("serialize config toml")?
    );
    Ok(())
}
