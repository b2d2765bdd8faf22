//! Token accounting and inference latency per model function.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Model-backed operations whose usage is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HelmsmanFunctionName {
    Synthesize,
    Decompose,
    Describe,
}

impl HelmsmanFunctionName {
    pub fn as_str(self) -> &'static str {
        match self {
            HelmsmanFunctionName::Synthesize => "synthesize",
            HelmsmanFunctionName::Decompose => "decompose",
            HelmsmanFunctionName::Describe => "describe",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synthesize" => Some(HelmsmanFunctionName::Synthesize),
            "decompose" => Some(HelmsmanFunctionName::Decompose),
            "describe" => Some(HelmsmanFunctionName::Describe),
            _ => None,
        }
    }
}

/// Aggregated metrics for token usage and latency across model functions.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelmsmanMetrics {
    pub synthesize_prompt_tokens: u64,
    pub synthesize_completion_tokens: u64,
    pub synthesize_inference_time_ms: u64,

    pub decompose_prompt_tokens: u64,
    pub decompose_completion_tokens: u64,
    pub decompose_inference_time_ms: u64,

    pub describe_prompt_tokens: u64,
    pub describe_completion_tokens: u64,
    pub describe_inference_time_ms: u64,

    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_inference_time_ms: u64,
    pub total_requests: u64,
}

impl HelmsmanMetrics {
    /// Merge the values from another metrics instance into this one.
    pub fn merge(&mut self, other: &HelmsmanMetrics) {
        self.synthesize_prompt_tokens += other.synthesize_prompt_tokens;
        self.synthesize_completion_tokens += other.synthesize_completion_tokens;
        self.synthesize_inference_time_ms += other.synthesize_inference_time_ms;

        self.decompose_prompt_tokens += other.decompose_prompt_tokens;
        self.decompose_completion_tokens += other.decompose_completion_tokens;
        self.decompose_inference_time_ms += other.decompose_inference_time_ms;

        self.describe_prompt_tokens += other.describe_prompt_tokens;
        self.describe_completion_tokens += other.describe_completion_tokens;
        self.describe_inference_time_ms += other.describe_inference_time_ms;

        self.total_prompt_tokens += other.total_prompt_tokens;
        self.total_completion_tokens += other.total_completion_tokens;
        self.total_inference_time_ms += other.total_inference_time_ms;
        self.total_requests += other.total_requests;
    }

    /// Record one request for `function` and update cumulative totals.
    pub fn record(
        &mut self,
        function: HelmsmanFunctionName,
        prompt_tokens: u64,
        completion_tokens: u64,
        inference_time_ms: u64,
    ) {
        match function {
            HelmsmanFunctionName::Synthesize => {
                self.synthesize_prompt_tokens += prompt_tokens;
                self.synthesize_completion_tokens += completion_tokens;
                self.synthesize_inference_time_ms += inference_time_ms;
            }
            HelmsmanFunctionName::Decompose => {
                self.decompose_prompt_tokens += prompt_tokens;
                self.decompose_completion_tokens += completion_tokens;
                self.decompose_inference_time_ms += inference_time_ms;
            }
            HelmsmanFunctionName::Describe => {
                self.describe_prompt_tokens += prompt_tokens;
                self.describe_completion_tokens += completion_tokens;
                self.describe_inference_time_ms += inference_time_ms;
            }
        }

        self.total_prompt_tokens += prompt_tokens;
        self.total_completion_tokens += completion_tokens;
        self.total_inference_time_ms += inference_time_ms;
        self.total_requests += 1;
    }
}

pub fn start_inference_timer() -> Instant {
    Instant::now()
}

/// Elapsed milliseconds since `start`, saturated to `u64`.
pub fn get_inference_time_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
