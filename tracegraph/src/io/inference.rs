//! Inference backend abstraction.
//!
//! The [`Inference`] trait decouples synthesis and judging from any concrete
//! model client. Tests use a scripted backend that returns queued responses
//! and records every prompt it receives.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::{Map, Value};

/// Raw response from an inference backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    Text(String),
    Structured(Map<String, Value>),
}

impl InferenceResponse {
    /// Read the response as a JSON object.
    ///
    /// Text responses may be wrapped in a markdown code fence. Text that is
    /// not a JSON object comes back unchanged as the error value.
    pub fn into_object(self) -> Result<Map<String, Value>, String> {
        match self {
            InferenceResponse::Structured(map) => Ok(map),
            InferenceResponse::Text(text) => match serde_json::from_str(strip_code_fence(&text)) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(text),
            },
        }
    }
}

/// Abstraction over model backends. Retries and rate limiting are the
/// backend's concern.
pub trait Inference {
    fn infer(&self, prompt: &str) -> Result<InferenceResponse>;
}

static FENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*(.*?)\s*```\s*$").ok());

/// Strip one surrounding markdown code fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    FENCE_RE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map_or(text, |inner| inner.as_str())
}
