//! Cycle detection coordinator.
//!
//! Fuses the history store, similarity kernel, and pattern detectors into a
//! single pre-call decision and a post-call aggregate, and maintains the
//! host's [`LoopDetectionState`] after each execution.

use serde_json::{Map, Value};

use crate::config::LoopPreventionConfig;
use crate::detectors::{detect_gradual_change_pattern, detect_oscillation_pattern, find_pattern_cycles};
use crate::history::{
    add_to_history, get_identical_call_count, get_tool_error_counts, hash_args, prune_history,
};
use crate::similarity::args_similarity;
use crate::types::{
    CycleDecision, ExecutionRecord, LoopDetectionResult, LoopDetectionState, LoopPattern, LoopType,
    PatternType, RecommendedAction, SuggestedAction,
};

/// Pre-call check: is the candidate `(tool, args)` invocation a loop?
///
/// Decision order: exact repeats, then semantic similarity, then tool-name
/// pattern cycles. Ambiguous or thin evidence always yields the neutral
/// decision.
pub fn detect_cycle(
    tool_name: &str,
    args: &Map<String, Value>,
    state: &LoopDetectionState,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> CycleDecision {
    if !config.enabled {
        return CycleDecision::no_loop();
    }

    let window = prune_history(&state.execution_history, config, now_ms);
    let lookback = config.exact_match_lookback_window as usize;
    let start = window.len().saturating_sub(lookback);
    let recent = &window[start..];
    let limits = config.effective_limits(tool_name);

    // Exact repeats of the same (tool, args_hash).
    let candidate_hash = hash_args(args);
    let exact_matches: Vec<ExecutionRecord> = recent
        .iter()
        .filter(|r| r.tool_name == tool_name && r.args_hash == candidate_hash)
        .cloned()
        .collect();
    let exact_count = exact_matches.len() as u32;
    if exact_count >= limits.max_identical_calls {
        let action = degradation_ladder(exact_count, limits.max_identical_calls);
        tracing::info!(
            tool_name,
            count = exact_count,
            ?action,
            "exact loop detected before execution"
        );
        return CycleDecision {
            is_loop: true,
            loop_type: Some(LoopType::Exact),
            confidence: 1.0,
            suggested_action: action,
            matched_entries: exact_matches,
        };
    }

    // Semantically similar calls to the same tool.
    if config.semantic_similarity_enabled {
        let (similar, max_similarity) =
            check_for_similar_actions(recent, tool_name, args, config.semantic_similarity_threshold);
        if similar.len() as u32 >= limits.max_similar_calls {
            let action = degradation_ladder(similar.len() as u32, limits.max_similar_calls);
            tracing::info!(
                tool_name,
                count = similar.len(),
                max_similarity,
                ?action,
                "semantic loop detected before execution"
            );
            return CycleDecision {
                is_loop: true,
                loop_type: Some(LoopType::Semantic),
                confidence: max_similarity,
                suggested_action: action,
                matched_entries: similar,
            };
        }
    }

    // Repeating tool-name cycles.
    if config.pattern_detection_enabled {
        let cycles = find_pattern_cycles(
            recent,
            config.min_pattern_length as usize,
            config.max_pattern_length as usize,
        );
        if let Some(best) = cycles.iter().max_by_key(|c| c.repetitions) {
            if best.repetitions >= config.pattern_repetition_threshold {
                tracing::info!(
                    tool_name,
                    pattern = ?best.pattern,
                    repetitions = best.repetitions,
                    "pattern loop detected before execution"
                );
                return CycleDecision {
                    is_loop: true,
                    loop_type: Some(LoopType::Pattern),
                    confidence: (best.repetitions as f64 / 3.0).min(1.0),
                    suggested_action: SuggestedAction::SwitchStrategy,
                    matched_entries: Vec::new(),
                };
            }
        }
    }

    CycleDecision::no_loop()
}

/// History entries for `tool_name` whose arguments are at least
/// `similarity_threshold` similar to `args`, plus the highest similarity
/// observed.
pub fn check_for_similar_actions(
    history: &[ExecutionRecord],
    tool_name: &str,
    args: &Map<String, Value>,
    similarity_threshold: f64,
) -> (Vec<ExecutionRecord>, f64) {
    let mut matches = Vec::new();
    let mut max_similarity: f64 = 0.0;
    for record in history {
        if record.tool_name != tool_name {
            continue;
        }
        let similarity = args_similarity(args, &record.tool_args);
        if similarity >= similarity_threshold {
            max_similarity = max_similarity.max(similarity);
            matches.push(record.clone());
        }
    }
    (matches, max_similarity)
}

/// The T / 2T / 3T ladder, highest rule first.
fn degradation_ladder(count: u32, threshold: u32) -> SuggestedAction {
    if count >= threshold.saturating_mul(3) {
        SuggestedAction::Escalate
    } else if count >= threshold.saturating_mul(2) {
        SuggestedAction::Clarify
    } else if count >= threshold {
        SuggestedAction::SwitchStrategy
    } else {
        SuggestedAction::Continue
    }
}

fn suggestions_for(pattern_type: PatternType) -> &'static [&'static str] {
    match pattern_type {
        PatternType::ExactRepeat => &[
            "try a different approach for this operation",
            "vary the arguments or the target",
        ],
        PatternType::ErrorCycle => &[
            "address the underlying error before retrying",
            "try an alternative tool for the same goal",
        ],
        PatternType::Oscillation => &[
            "break the task into smaller steps",
            "request clarification",
        ],
        PatternType::GradualChange => &[
            "stop adjusting parameters incrementally",
            "step back and reassess the overall approach",
        ],
    }
}

/// Post-call aggregate: run every detector against the updated state and
/// derive one recommendation.
pub fn detect_cycles(
    state: &LoopDetectionState,
    tool_name: &str,
    args_hash: &str,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> LoopDetectionResult {
    if !config.enabled {
        return LoopDetectionResult::clean();
    }

    let window = prune_history(&state.execution_history, config, now_ms);
    let mut patterns: Vec<LoopPattern> = Vec::new();

    // Exact repeats of the just-executed call.
    let limits = config.effective_limits(tool_name);
    let identical = get_identical_call_count(&window, tool_name, args_hash, config, now_ms);
    if identical >= limits.max_identical_calls {
        patterns.push(LoopPattern {
            pattern_type: PatternType::ExactRepeat,
            description: format!("{identical} identical calls to {tool_name}"),
            tools: vec![tool_name.to_string()],
            occurrences: identical,
            confidence: confidence_from(identical, limits.max_identical_calls),
        });
    }

    patterns.extend(detect_error_cycles(state, &window, config));

    if let Some(oscillation) = detect_oscillation_pattern(&window) {
        patterns.push(LoopPattern {
            pattern_type: PatternType::Oscillation,
            description: format!(
                "tools {} repeating every {} calls",
                oscillation.tools.join(" -> "),
                oscillation.cycle_length
            ),
            tools: oscillation.tools.clone(),
            occurrences: oscillation.occurrences,
            confidence: oscillation.confidence(),
        });
    }

    if let Some(drift) = detect_gradual_change_pattern(&window, tool_name) {
        patterns.push(LoopPattern {
            pattern_type: PatternType::GradualChange,
            description: format!(
                "argument '{}' drifting ({:?}) across recent {} calls",
                drift.changing_field, drift.change_type, tool_name
            ),
            tools: vec![tool_name.to_string()],
            occurrences: drift.occurrences,
            confidence: (drift.occurrences as f64 / 10.0).min(1.0),
        });
    }

    if patterns.is_empty() {
        return LoopDetectionResult::clean();
    }

    let total_occurrences: u32 = patterns.iter().map(|p| p.occurrences).sum();
    let max_confidence = patterns.iter().fold(0.0f64, |acc, p| acc.max(p.confidence));
    let has_error_cycle = patterns
        .iter()
        .any(|p| p.pattern_type == PatternType::ErrorCycle);

    let recommended_action = if has_error_cycle && total_occurrences >= 5 {
        RecommendedAction::Halt
    } else if max_confidence >= 0.9 || total_occurrences >= 6 {
        RecommendedAction::Escalate
    } else if max_confidence >= 0.7 || total_occurrences >= 4 {
        RecommendedAction::Degrade
    } else if max_confidence >= 0.5 || total_occurrences >= 2 {
        RecommendedAction::Warn
    } else {
        RecommendedAction::Continue
    };

    let mut suggestions: Vec<String> = Vec::new();
    for pattern in &patterns {
        for suggestion in suggestions_for(pattern.pattern_type) {
            if !suggestions.iter().any(|s| s == suggestion) {
                suggestions.push(suggestion.to_string());
            }
        }
    }

    if recommended_action != RecommendedAction::Continue {
        tracing::warn!(
            tool_name,
            ?recommended_action,
            pattern_count = patterns.len(),
            total_occurrences,
            max_confidence,
            "loop patterns detected after execution"
        );
    }

    LoopDetectionResult {
        patterns,
        recommended_action,
        suggestions,
        total_occurrences,
        max_confidence,
    }
}

fn confidence_from(count: u32, threshold: u32) -> f64 {
    let denom = threshold.saturating_mul(2).max(1);
    (count as f64 / denom as f64).min(1.0)
}

/// Error-cycle detection: the overall consecutive-error counter first, then
/// per-tool counters against their per-tool thresholds.
fn detect_error_cycles(
    state: &LoopDetectionState,
    window: &[ExecutionRecord],
    config: &LoopPreventionConfig,
) -> Vec<LoopPattern> {
    let mut patterns = Vec::new();

    if state.consecutive_error_count >= config.max_consecutive_errors {
        let mut suffix_tools: Vec<String> = Vec::new();
        for record in window.iter().rev().take_while(|r| r.is_error()) {
            if !suffix_tools.contains(&record.tool_name) {
                suffix_tools.push(record.tool_name.clone());
            }
        }
        suffix_tools.reverse();
        patterns.push(LoopPattern {
            pattern_type: PatternType::ErrorCycle,
            description: format!(
                "{} consecutive errors across recent calls",
                state.consecutive_error_count
            ),
            tools: suffix_tools,
            occurrences: state.consecutive_error_count,
            confidence: confidence_from(state.consecutive_error_count, config.max_consecutive_errors),
        });
        return patterns;
    }

    let mut tools: Vec<&String> = state.tool_specific_error_counts.keys().collect();
    tools.sort();
    for tool in tools {
        let count = state.tool_specific_error_counts[tool];
        let threshold = config.effective_limits(tool).max_consecutive_errors;
        if count >= threshold {
            patterns.push(LoopPattern {
                pattern_type: PatternType::ErrorCycle,
                description: format!("{count} errors from {tool} within the window"),
                tools: vec![tool.clone()],
                occurrences: count,
                confidence: confidence_from(count, threshold),
            });
        }
    }
    patterns
}

/// Fold a freshly finished execution into the detection state.
///
/// Appends through the history store, maintains the consecutive-error and
/// per-tool error counters, backfills per-tool counters missing from a
/// restored state, and counts repeated `(tool, args_hash)` actions.
pub fn update_loop_detection_state(
    state: &mut LoopDetectionState,
    entry: ExecutionRecord,
    config: &LoopPreventionConfig,
    now_ms: u64,
) {
    let tool_name = entry.tool_name.clone();
    let had_prior_match = state
        .execution_history
        .iter()
        .any(|r| r.tool_name == entry.tool_name && r.args_hash == entry.args_hash);
    let is_error = entry.is_error();

    state.execution_history = add_to_history(&state.execution_history, entry, config, now_ms);

    if is_error {
        state.consecutive_error_count += 1;
        *state
            .tool_specific_error_counts
            .entry(tool_name.clone())
            .or_insert(0) += 1;
    } else {
        state.consecutive_error_count = 0;
        state.tool_specific_error_counts.insert(tool_name, 0);
    }

    // A state restored from a partial snapshot may be missing per-tool
    // counters; fill the gaps from the pruned history without touching
    // counters that were just reset or incremented.
    for (tool, count) in get_tool_error_counts(&state.execution_history, config, now_ms) {
        state.tool_specific_error_counts.entry(tool).or_insert(count);
    }

    if had_prior_match {
        state.similar_action_count += 1;
    }
}

/// Record that the engine recommended a strategy switch, starting the
/// escalation cooldown.
pub fn record_strategy_switch(state: &mut LoopDetectionState, now_ms: u64) {
    state.last_strategy_switch = Some(now_ms);
}

/// Whether the host should escalate now.
///
/// Requires auto-escalation, respects the cooldown after the last strategy
/// switch, and triggers on a deep degradation level or too many consecutive
/// errors.
pub fn should_escalate(
    state: &LoopDetectionState,
    config: &LoopPreventionConfig,
    now_ms: u64,
) -> bool {
    if !config.auto_escalation_enabled {
        return false;
    }
    if let Some(last_switch) = state.last_strategy_switch {
        if now_ms.saturating_sub(last_switch) < config.escalation_cooldown_ms {
            return false;
        }
    }
    state.degradation_level.as_u8() >= 3
        || state.consecutive_error_count >= config.max_consecutive_errors
}
