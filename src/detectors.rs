//! Pattern detectors: exact repeats, oscillating tool cycles, and gradual
//! argument drift.
//!
//! Detectors only read history; thin evidence always yields `None` rather
//! than an error.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::LoopPreventionConfig;
use crate::history::get_identical_call_count;
use crate::similarity::levenshtein_similarity;
use crate::types::{
    ChangeType, ExecutionRecord, GradualChangePattern, OscillationPattern, PatternCycle,
};

/// How many trailing records the oscillation detector inspects.
pub const OSCILLATION_WINDOW: usize = 20;
/// How many trailing per-tool records the gradual-change detector inspects.
pub const GRADUAL_WINDOW: usize = 10;

/// Count in-window calls identical to `(tool_name, args_hash)`; `Some(count)`
/// once the count reaches `max_identical_calls`.
pub fn detect_exact_repeat(
    history: &[ExecutionRecord],
    tool_name: &str,
    args_hash: &str,
    max_identical_calls: u32,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> Option<u32> {
    let count = get_identical_call_count(history, tool_name, args_hash, config, now_ms);
    if count >= max_identical_calls {
        tracing::debug!(tool_name, count, "exact repeat threshold reached");
        Some(count)
    } else {
        None
    }
}

/// Detect a repeating cycle of tool names in the trailing records.
///
/// For each cycle length `L` in `{2, 3, 4}` (shortest first), the trailing
/// `L` tool names form the candidate pattern; occurrences are counted
/// backwards in strides of `L`, the trailing block included. A cycle is
/// reported at two or more occurrences. Argument identity is irrelevant:
/// oscillation is about tool alternation, so at least two distinct tools
/// must appear in the pattern.
pub fn detect_oscillation_pattern(history: &[ExecutionRecord]) -> Option<OscillationPattern> {
    let start = history.len().saturating_sub(OSCILLATION_WINDOW);
    let names: Vec<&str> = history[start..]
        .iter()
        .map(|r| r.tool_name.as_str())
        .collect();

    for cycle_length in 2..=4usize {
        if names.len() < cycle_length * 2 {
            continue;
        }
        let pattern = &names[names.len() - cycle_length..];
        let distinct: BTreeSet<&&str> = pattern.iter().collect();
        if distinct.len() < 2 {
            continue;
        }

        let mut occurrences = 1u32;
        let mut end = names.len() - cycle_length;
        while end >= cycle_length && names[end - cycle_length..end] == *pattern {
            occurrences += 1;
            end -= cycle_length;
        }

        if occurrences >= 2 {
            tracing::debug!(?pattern, cycle_length, occurrences, "oscillation detected");
            return Some(OscillationPattern {
                tools: pattern.iter().map(|s| s.to_string()).collect(),
                cycle_length,
                occurrences,
            });
        }
    }
    None
}

/// Detect monotone drift in one argument field across a tool's recent calls.
///
/// Scans the last ten records for the tool; every argument key present in at
/// least three of them is checked (in sorted order, first match wins) for a
/// strictly monotone numeric progression, prefix-preserving string growth,
/// or consecutive small edits.
pub fn detect_gradual_change_pattern(
    history: &[ExecutionRecord],
    tool_name: &str,
) -> Option<GradualChangePattern> {
    let records: Vec<&ExecutionRecord> = history
        .iter()
        .filter(|r| r.tool_name == tool_name)
        .collect();
    let start = records.len().saturating_sub(GRADUAL_WINDOW);
    let recent = &records[start..];
    if recent.len() < 3 {
        return None;
    }

    let mut keys: BTreeSet<&str> = BTreeSet::new();
    for record in recent {
        keys.extend(record.tool_args.keys().map(String::as_str));
    }

    for key in keys {
        let values: Vec<&Value> = recent.iter().filter_map(|r| r.tool_args.get(key)).collect();
        if values.len() < 3 {
            continue;
        }
        let detected = detect_numeric_increment(key, &values)
            .or_else(|| detect_string_append(key, &values))
            .or_else(|| detect_string_modify(key, &values));
        if let Some(pattern) = detected {
            tracing::debug!(
                tool_name,
                field = %pattern.changing_field,
                change_type = ?pattern.change_type,
                "gradual change detected"
            );
            return Some(pattern);
        }
    }
    None
}

fn detect_numeric_increment(key: &str, values: &[&Value]) -> Option<GradualChangePattern> {
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.len() != values.len() {
        return None;
    }
    let increasing = numbers.windows(2).all(|w| w[1] > w[0]);
    let decreasing = numbers.windows(2).all(|w| w[1] < w[0]);
    if increasing || decreasing {
        return Some(GradualChangePattern {
            changing_field: key.to_string(),
            change_type: ChangeType::Increment,
            occurrences: numbers.len() as u32,
        });
    }
    None
}

fn detect_string_append(key: &str, values: &[&Value]) -> Option<GradualChangePattern> {
    let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
    if strings.len() != values.len() {
        return None;
    }
    let chained = strings.windows(2).all(|w| w[1].starts_with(w[0]));
    let grew = strings
        .last()
        .zip(strings.first())
        .map(|(last, first)| last.len() > first.len())
        .unwrap_or(false);
    if chained && grew {
        return Some(GradualChangePattern {
            changing_field: key.to_string(),
            change_type: ChangeType::Append,
            occurrences: strings.len() as u32,
        });
    }
    None
}

fn detect_string_modify(key: &str, values: &[&Value]) -> Option<GradualChangePattern> {
    let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
    if strings.len() != values.len() {
        return None;
    }
    let drifting = strings.windows(2).all(|w| {
        let sim = levenshtein_similarity(w[0], w[1]);
        sim > 0.7 && sim < 1.0
    });
    if drifting {
        return Some(GradualChangePattern {
            changing_field: key.to_string(),
            change_type: ChangeType::Modify,
            occurrences: strings.len() as u32,
        });
    }
    None
}

/// Enumerate trailing tool-name patterns that repeat at least twice, one
/// candidate per length in `[min_len, max_len]`.
pub fn find_pattern_cycles(
    history: &[ExecutionRecord],
    min_len: usize,
    max_len: usize,
) -> Vec<PatternCycle> {
    let names: Vec<&str> = history.iter().map(|r| r.tool_name.as_str()).collect();
    let mut cycles = Vec::new();

    for len in min_len..=max_len {
        if len == 0 || names.len() < len * 2 {
            continue;
        }
        let pattern = &names[names.len() - len..];
        let mut repetitions = 1u32;
        let mut end = names.len() - len;
        while end >= len && names[end - len..end] == *pattern {
            repetitions += 1;
            end -= len;
        }
        if repetitions >= 2 {
            cycles.push(PatternCycle {
                pattern: pattern.iter().map(|s| s.to_string()).collect(),
                repetitions,
            });
        }
    }
    cycles
}
