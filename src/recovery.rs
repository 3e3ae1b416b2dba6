//! Layered error recovery driven by a pattern-to-action registry.
//!
//! A [`RecoveryEngine`] owns the strategy list and per-error attempt
//! trackers behind coarse locks; every agent instance can own one, and a
//! process-wide default is available as sugar. Strategies are consulted in
//! priority order, each with its own attempt budget and cooldown.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::config::LoopPreventionConfig;
use crate::types::{
    AttemptTracker, ErrorPattern, LoopDetectionState, PatternKind, RecoveryAction, RecoveryResult,
    RecoveryStats, RecoveryStrategy, ToolError,
};

/// Registry of recovery strategies plus attempt bookkeeping.
pub struct RecoveryEngine {
    strategies: RwLock<Vec<RecoveryStrategy>>,
    attempts: RwLock<HashMap<String, AttemptTracker>>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RecoveryEngine {
    /// An engine with no strategies registered.
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// An engine preloaded with the six built-in strategies.
    pub fn with_builtins() -> Self {
        let engine = Self::new();
        for strategy in builtin_strategies() {
            engine.register_strategy(strategy);
        }
        engine
    }

    /// Register a strategy, replacing any existing strategy with the same id.
    pub fn register_strategy(&self, strategy: RecoveryStrategy) {
        let mut strategies = self.strategies.write();
        if let Some(existing) = strategies.iter_mut().find(|s| s.id == strategy.id) {
            tracing::debug!(id = %strategy.id, "replacing recovery strategy");
            *existing = strategy;
        } else {
            tracing::debug!(id = %strategy.id, priority = strategy.priority, "registered recovery strategy");
            strategies.push(strategy);
        }
    }

    /// Remove a strategy by id. Returns whether anything was removed.
    pub fn unregister_strategy(&self, id: &str) -> bool {
        let mut strategies = self.strategies.write();
        let before = strategies.len();
        strategies.retain(|s| s.id != id);
        strategies.len() != before
    }

    /// Add an error pattern to an existing strategy. Returns whether the
    /// strategy was found.
    pub fn register_error_pattern(&self, strategy_id: &str, pattern: ErrorPattern) -> bool {
        let mut strategies = self.strategies.write();
        match strategies.iter_mut().find(|s| s.id == strategy_id) {
            Some(strategy) => {
                strategy.patterns.push(pattern);
                true
            }
            None => false,
        }
    }

    /// Snapshot of all registered strategies.
    pub fn strategies(&self) -> Vec<RecoveryStrategy> {
        self.strategies.read().clone()
    }

    pub fn clear_strategies(&self) {
        self.strategies.write().clear();
    }

    /// Reset all attempt trackers.
    pub fn reset_attempts(&self) {
        self.attempts.write().clear();
    }

    /// Aggregate attempt/success totals for the health monitor.
    pub fn stats(&self) -> RecoveryStats {
        let attempts = self.attempts.read();
        RecoveryStats {
            attempts: attempts.values().map(|t| t.attempts as u64).sum(),
            successes: attempts.values().map(|t| t.success_count as u64).sum(),
        }
    }

    /// All strategies with at least one matching pattern, highest priority
    /// first.
    pub fn get_recovery_strategies(&self, error: &ToolError) -> Vec<RecoveryStrategy> {
        let mut matching: Vec<RecoveryStrategy> = self
            .strategies
            .read()
            .iter()
            .filter(|s| s.patterns.iter().any(|p| pattern_matches(p, error)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        matching
    }

    /// Whether any matching strategy still has budget and is past its
    /// cooldown; failing that, young errors (`attempt_count < 3`) remain
    /// recoverable.
    pub fn is_recoverable(&self, error: &ToolError, attempt_count: u32, now_ms: u64) -> bool {
        let attempts = self.attempts.read();
        for strategy in self.get_recovery_strategies(error) {
            let tracker = attempts.get(&attempt_key(error, &strategy.id));
            let used = tracker.map(|t| t.attempts).unwrap_or(0);
            let cooling = tracker
                .and_then(|t| t.last_attempt_ms)
                .map(|last| now_ms.saturating_sub(last) < strategy.cooldown_ms)
                .unwrap_or(false);
            if used < strategy.max_attempts && !cooling {
                return true;
            }
        }
        attempt_count < 3
    }

    /// Pick and consume the first viable strategy for this error.
    ///
    /// Strategies are tried in priority order; exhausted or cooling-down
    /// strategies are skipped. The chosen strategy's action is returned for
    /// the host to apply. When nothing is viable the result carries
    /// `success = false` and `should_retry = false`.
    pub fn attempt_recovery(
        &self,
        error: &ToolError,
        state: &LoopDetectionState,
        config: &LoopPreventionConfig,
        now_ms: u64,
    ) -> RecoveryResult {
        let matching = self.get_recovery_strategies(error);
        if matching.is_empty() {
            tracing::debug!(
                tool = %error.tool_name,
                "no recovery strategy matches this error"
            );
            return RecoveryResult::failure(format!(
                "no recovery strategy matches error from {}: {}",
                error.tool_name, error.message
            ));
        }

        let mut attempts = self.attempts.write();
        let mut saw_exhausted = false;

        for strategy in &matching {
            let key = attempt_key(error, &strategy.id);
            let tracker = attempts.entry(key).or_default();

            if tracker.attempts >= strategy.max_attempts {
                saw_exhausted = true;
                continue;
            }
            if let Some(last) = tracker.last_attempt_ms {
                if now_ms.saturating_sub(last) < strategy.cooldown_ms {
                    continue;
                }
            }

            tracker.attempts += 1;
            tracker.last_attempt_ms = Some(now_ms);
            tracker.success_count += 1;

            // A retry only makes sense while the error streak is below the
            // configured ceiling; past it the host should escalate instead.
            let should_retry = strategy.action.is_retry()
                && state.consecutive_error_count < config.max_consecutive_errors;

            tracing::info!(
                tool = %error.tool_name,
                strategy = %strategy.id,
                attempt = tracker.attempts,
                should_retry,
                "applying recovery strategy"
            );
            return RecoveryResult {
                success: true,
                strategy_id: Some(strategy.id.clone()),
                action: Some(strategy.action.clone()),
                message: format!(
                    "applying recovery strategy '{}' for {}",
                    strategy.name, error.tool_name
                ),
                should_retry,
            };
        }

        // Nothing viable: record the failed consultation on every matching
        // strategy's tracker.
        for strategy in &matching {
            attempts
                .entry(attempt_key(error, &strategy.id))
                .or_default()
                .failure_count += 1;
        }

        let message = if saw_exhausted {
            format!(
                "all matching recovery strategies exhausted for {} after {} consecutive errors",
                error.tool_name, state.consecutive_error_count
            )
        } else {
            format!(
                "matching recovery strategies are cooling down for {}",
                error.tool_name
            )
        };
        tracing::warn!(tool = %error.tool_name, saw_exhausted, "recovery unavailable");
        RecoveryResult::failure(message)
    }
}

fn attempt_key(error: &ToolError, strategy_id: &str) -> String {
    format!(
        "{}|{}|{}",
        error.tool_name,
        error.error_type.as_deref().unwrap_or("unknown"),
        strategy_id
    )
}

/// Whether one pattern matches one error, honoring the optional type and
/// tool filters. Invalid regular expressions never match.
fn pattern_matches(pattern: &ErrorPattern, error: &ToolError) -> bool {
    if let Some(required_type) = &pattern.error_type {
        match &error.error_type {
            Some(actual) if actual.eq_ignore_ascii_case(required_type) => {}
            _ => return false,
        }
    }
    if let Some(required_tool) = &pattern.tool_name {
        if !error.tool_name.eq_ignore_ascii_case(required_tool) {
            return false;
        }
    }

    let message = error.message.to_lowercase();
    let value = pattern.value.to_lowercase();
    match pattern.kind {
        PatternKind::Exact => message == value,
        PatternKind::Contains => message.contains(&value),
        PatternKind::Regex => regex::RegexBuilder::new(&pattern.value)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(&error.message))
            .unwrap_or(false),
    }
}

/// The six built-in strategies, pure data.
pub fn builtin_strategies() -> Vec<RecoveryStrategy> {
    vec![
        RecoveryStrategy {
            id: "rate_limit".into(),
            name: "Rate limit backoff".into(),
            description: "Wait out provider rate limits before retrying".into(),
            patterns: vec![
                ErrorPattern::contains("rate limit"),
                ErrorPattern::contains("too many requests"),
                ErrorPattern::contains("429"),
                ErrorPattern::contains("quota exceeded"),
            ],
            priority: 95,
            max_attempts: 5,
            cooldown_ms: 30_000,
            action: RecoveryAction::Retry { delay_ms: 30_000 },
        },
        RecoveryStrategy {
            id: "timeout".into(),
            name: "Timeout retry".into(),
            description: "Retry operations that timed out".into(),
            patterns: vec![
                ErrorPattern::contains("timeout"),
                ErrorPattern::contains("timed out"),
                ErrorPattern::contains("deadline exceeded"),
            ],
            priority: 90,
            max_attempts: 3,
            cooldown_ms: 5_000,
            action: RecoveryAction::Retry { delay_ms: 5_000 },
        },
        RecoveryStrategy {
            id: "connection_error".into(),
            name: "Connection retry".into(),
            description: "Retry transient network failures".into(),
            patterns: vec![
                ErrorPattern::contains("connection refused"),
                ErrorPattern::contains("connection reset"),
                ErrorPattern::contains("network error"),
                ErrorPattern::contains("econnrefused"),
                ErrorPattern::contains("socket hang up"),
            ],
            priority: 85,
            max_attempts: 3,
            cooldown_ms: 10_000,
            action: RecoveryAction::Retry { delay_ms: 10_000 },
        },
        RecoveryStrategy {
            id: "file_not_found".into(),
            name: "Locate missing file".into(),
            description: "Search for the target instead of reading a guessed path".into(),
            patterns: vec![
                ErrorPattern::contains("file not found"),
                ErrorPattern::contains("no such file"),
                ErrorPattern::contains("does not exist"),
                ErrorPattern::contains("enoent"),
                ErrorPattern::regex("cannot (find|locate|open) file"),
            ],
            priority: 80,
            max_attempts: 2,
            cooldown_ms: 5_000,
            action: RecoveryAction::AlternativeTool {
                tool_name: "search".into(),
                args_mapping: serde_json::Map::new(),
            },
        },
        RecoveryStrategy {
            id: "syntax_error".into(),
            name: "Clear stale parse state".into(),
            description: "Drop cached content that may be feeding bad syntax".into(),
            patterns: vec![
                ErrorPattern::contains("syntax error"),
                ErrorPattern::contains("unexpected token"),
                ErrorPattern::contains("parse error"),
                ErrorPattern::contains("invalid syntax"),
            ],
            priority: 75,
            max_attempts: 2,
            cooldown_ms: 3_000,
            action: RecoveryAction::ClearState {
                fields: vec!["cachedContent".into(), "parsedData".into()],
            },
        },
        RecoveryStrategy {
            id: "permission_denied".into(),
            name: "Skip forbidden operation".into(),
            description: "Permissions will not change on retry; skip and move on".into(),
            patterns: vec![
                ErrorPattern::contains("permission denied"),
                ErrorPattern::contains("access denied"),
                ErrorPattern::contains("eacces"),
                ErrorPattern::contains("eperm"),
                ErrorPattern::contains("operation not permitted"),
            ],
            priority: 70,
            max_attempts: 1,
            cooldown_ms: 10_000,
            action: RecoveryAction::Skip {
                reason: "operation not permitted in this environment".into(),
            },
        },
    ]
}

static GLOBAL_ENGINE: OnceLock<RecoveryEngine> = OnceLock::new();

/// The process-wide default engine, preloaded with the built-ins.
///
/// Sugar for hosts running a single agent; multi-agent hosts should own one
/// [`RecoveryEngine`] per instance instead.
pub fn global_engine() -> &'static RecoveryEngine {
    GLOBAL_ENGINE.get_or_init(RecoveryEngine::with_builtins)
}
