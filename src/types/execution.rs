//! Execution records and the per-agent loop-detection state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Hard upper bound on retained history, regardless of the time window.
pub const MAX_HISTORY_SIZE: usize = 100;

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionResult {
    Success,
    Error,
}

impl ExecutionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error)
    }
}

/// One observation of a tool invocation: name, arguments, outcome, timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Opaque unique identifier.
    pub id: String,
    /// Wall-clock milliseconds when the tool returned.
    pub timestamp: u64,
    /// Tool name, never empty.
    pub tool_name: String,
    /// Structured argument tree, deep-cloned on insert.
    pub tool_args: Map<String, Value>,
    /// 16-hex-character prefix of SHA-256 over the canonical JSON encoding
    /// of `tool_args` (keys sorted at every level).
    pub args_hash: String,
    pub result: ExecutionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn is_error(&self) -> bool {
        self.result.is_error()
    }
}

/// How constrained the agent currently is.
///
/// Serialized as its integer value (0..=4) so hosts can persist and compare
/// levels without knowing the variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(from = "u8", into = "u8")]
pub enum DegradationLevel {
    #[default]
    Normal = 0,
    Warning = 1,
    Restricted = 2,
    Minimal = 3,
    Halted = 4,
}

impl DegradationLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for DegradationLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => DegradationLevel::Normal,
            1 => DegradationLevel::Warning,
            2 => DegradationLevel::Restricted,
            3 => DegradationLevel::Minimal,
            _ => DegradationLevel::Halted,
        }
    }
}

impl From<DegradationLevel> for u8 {
    fn from(level: DegradationLevel) -> u8 {
        level as u8
    }
}

/// Mutable coordination state owned by the host and threaded through every
/// engine call for one agent instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopDetectionState {
    /// Execution records, newest last, bounded by [`MAX_HISTORY_SIZE`] and
    /// pruned to the configured time window.
    #[serde(default)]
    pub execution_history: Vec<ExecutionRecord>,
    /// Length of the maximal error suffix of the history. Resets to zero on
    /// any successful record.
    #[serde(default)]
    pub consecutive_error_count: u32,
    /// Running error count per tool, reset per tool on a success by that tool.
    #[serde(default)]
    pub tool_specific_error_counts: HashMap<String, u32>,
    /// Incremented when a newly appended record's `(tool_name, args_hash)`
    /// already exists elsewhere in history.
    #[serde(default)]
    pub similar_action_count: u32,
    /// Timestamp of the last decision where the engine recommended
    /// `switch-strategy`.
    #[serde(default)]
    pub last_strategy_switch: Option<u64>,
    #[serde(default)]
    pub degradation_level: DegradationLevel,
}

impl LoopDetectionState {
    pub fn new() -> Self {
        Self::default()
    }
}
