//! Trace-to-ActionGraph synthesis.
//!
//! Recorded agent runs are collected, evaluated, aligned and classified into
//! patterns, then synthesized into a replayable [`graph::ActionGraph`]. The
//! crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic data and decisions (trace and pattern
//!   types, rule-based decisions, report counters). No I/O.
//! - **[`io`]**: Collaborator seams (collector, evaluator, aligner, inference
//!   backend), prompt templates, config and checkpoint files.
//!
//! [`synthesizer`] turns extracted patterns into a graph, and [`pipeline`]
//! drives the full collect → evaluate → … → validate run on top of both.

pub mod core;
pub mod error;
pub mod evaluators;
pub mod graph;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod synthesizer;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
