//! Deterministic, pure logic shared by the synthesizer and pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod report;
pub mod rules;
pub mod stage;
pub mod strategy;
pub mod types;
