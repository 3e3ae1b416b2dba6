//! Append-only sliding window of execution records.
//!
//! Every operation here is a pure function of its inputs: pruning and
//! appending return new vectors, scans never mutate. The window is bounded
//! both by the configured time window and by [`MAX_HISTORY_SIZE`].

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::LoopPreventionConfig;
use crate::types::{ExecutionRecord, ExecutionResult, MAX_HISTORY_SIZE};

/// Render a value as canonical JSON: object keys sorted lexicographically at
/// every level, arrays in their original order, numbers and strings in
/// `serde_json`'s standard rendering.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Canonical 16-hex-character hash of an argument tree.
///
/// Two trees that differ only in key order hash identically.
pub fn hash_args(args: &Map<String, Value>) -> String {
    let canonical = canonical_json(&Value::Object(args.clone()));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Build a new execution record with a fresh id and args hash.
#[allow(clippy::too_many_arguments)]
pub fn create_entry(
    tool_name: &str,
    args: &Map<String, Value>,
    result: ExecutionResult,
    duration_ms: u64,
    error_type: Option<&str>,
    error_message: Option<&str>,
    now_ms: u64,
) -> ExecutionRecord {
    ExecutionRecord {
        id: format!("{}-{}", now_ms, Uuid::new_v4().simple()),
        timestamp: now_ms,
        tool_name: tool_name.to_string(),
        tool_args: args.clone(),
        args_hash: hash_args(args),
        result,
        error_type: error_type.map(str::to_string),
        error_message: error_message.map(str::to_string),
        duration_ms,
    }
}

/// Records still inside the configured time window.
pub fn prune_history(
    history: &[ExecutionRecord],
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> Vec<ExecutionRecord> {
    history
        .iter()
        .filter(|r| now_ms.saturating_sub(r.timestamp) <= config.time_window_ms)
        .cloned()
        .collect()
}

/// Append an entry: drop out-of-window records, push, cap at
/// [`MAX_HISTORY_SIZE`] keeping the newest.
pub fn add_to_history(
    history: &[ExecutionRecord],
    entry: ExecutionRecord,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> Vec<ExecutionRecord> {
    let mut pruned = prune_history(history, config, now_ms);
    pruned.push(entry);
    if pruned.len() > MAX_HISTORY_SIZE {
        let excess = pruned.len() - MAX_HISTORY_SIZE;
        pruned.drain(0..excess);
    }
    pruned
}

/// In-window records for one tool, oldest first.
pub fn get_tool_history<'a>(
    history: &'a [ExecutionRecord],
    tool_name: &str,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> Vec<&'a ExecutionRecord> {
    history
        .iter()
        .filter(|r| {
            r.tool_name == tool_name && now_ms.saturating_sub(r.timestamp) <= config.time_window_ms
        })
        .collect()
}

/// How many in-window records match `(tool_name, args_hash)`.
pub fn get_identical_call_count(
    history: &[ExecutionRecord],
    tool_name: &str,
    args_hash: &str,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> u32 {
    history
        .iter()
        .filter(|r| {
            r.tool_name == tool_name
                && r.args_hash == args_hash
                && now_ms.saturating_sub(r.timestamp) <= config.time_window_ms
        })
        .count() as u32
}

/// Length of the maximal error suffix of the history.
pub fn get_consecutive_error_count(history: &[ExecutionRecord]) -> u32 {
    history.iter().rev().take_while(|r| r.is_error()).count() as u32
}

/// Per-tool error tallies within the window.
pub fn get_tool_error_counts(
    history: &[ExecutionRecord],
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for record in history {
        if record.is_error() && now_ms.saturating_sub(record.timestamp) <= config.time_window_ms {
            *counts.entry(record.tool_name.clone()).or_insert(0) += 1;
        }
    }
    counts
}
