//! LoopGuard: loop prevention and recovery for autonomous agent tool
//! execution.
//!
//! The engine observes a stream of tool invocations and decides, before and
//! after each call, whether the agent is stuck in a repetitive or degenerate
//! pattern and what the host should do about it. Four detection strategies
//! (exact repeats, argument similarity, tool-name oscillation, gradual
//! argument drift) run over a time-bounded sliding window, coupled with a
//! pattern-driven recovery registry, a health-scoring model, and a
//! pre-execution risk gate.
//!
//! The engine never performs IO: it calls no models, reads no disks, and
//! opens no sockets. Hosts own the per-agent [`LoopDetectionState`] and
//! thread it through every call.

pub mod clock;
pub mod config;
pub mod cycle;
pub mod detectors;
pub mod health;
pub mod history;
pub mod prevention;
pub mod recovery;
pub mod similarity;
pub mod types;

// Re-export the public surface.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    get_preset, get_tool_category, parse_config, ConfigError, ConfigValidation,
    LoopPreventionConfig, ToolCategory, ToolLimits,
};
pub use cycle::{detect_cycle, detect_cycles, should_escalate, update_loop_detection_state};
pub use detectors::{
    detect_gradual_change_pattern, detect_oscillation_pattern, find_pattern_cycles,
};
pub use health::{build_metrics_from_state, get_health_status, needs_preventive_action};
pub use history::{add_to_history, create_entry, hash_args, prune_history};
pub use prevention::PreventionEngine;
pub use recovery::{builtin_strategies, global_engine, RecoveryEngine};
pub use similarity::{args_similarity, path_similarity};
pub use types::*;

use std::sync::Arc;

use serde_json::{Map, Value};

/// The assembled engine: configuration, recovery registry, prevention gate,
/// and a clock, behind the host-facing API.
///
/// Per-agent data stays in the caller-owned [`LoopDetectionState`]; the
/// engine itself only owns the shared registries, so one engine can serve
/// one agent instance (or several, if the host serializes calls per state).
pub struct LoopPreventionEngine {
    config: LoopPreventionConfig,
    recovery: RecoveryEngine,
    prevention: PreventionEngine,
    clock: Arc<dyn Clock>,
}

impl Default for LoopPreventionEngine {
    fn default() -> Self {
        Self::new(LoopPreventionConfig::default())
    }
}

impl LoopPreventionEngine {
    /// Engine on the system clock with the built-in recovery strategies.
    pub fn new(config: LoopPreventionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine on an injected clock (tests use [`ManualClock`]).
    pub fn with_clock(config: LoopPreventionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            recovery: RecoveryEngine::with_builtins(),
            prevention: PreventionEngine::new(),
            clock,
        }
    }

    pub fn config(&self) -> &LoopPreventionConfig {
        &self.config
    }

    pub fn update_config(&mut self, config: LoopPreventionConfig) {
        self.config = config;
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn prevention(&self) -> &PreventionEngine {
        &self.prevention
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Record a finished tool invocation into the state.
    #[allow(clippy::too_many_arguments)]
    pub fn append_record(
        &self,
        state: &mut LoopDetectionState,
        tool_name: &str,
        args: &Map<String, Value>,
        result: ExecutionResult,
        duration_ms: u64,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> ExecutionRecord {
        let now = self.now_ms();
        let entry = create_entry(
            tool_name,
            args,
            result,
            duration_ms,
            error_type,
            error_message,
            now,
        );
        update_loop_detection_state(state, entry.clone(), &self.config, now);
        entry
    }

    /// Pre-call cycle check. A `switch-strategy` decision stamps the
    /// state's strategy-switch timestamp, starting the escalation cooldown.
    pub fn detect_cycle_pre(
        &self,
        state: &mut LoopDetectionState,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> CycleDecision {
        let now = self.now_ms();
        let decision = detect_cycle(tool_name, args, state, &self.config, now);
        if decision.suggested_action == SuggestedAction::SwitchStrategy {
            cycle::record_strategy_switch(state, now);
        }
        decision
    }

    /// Post-call aggregate detection over the updated state.
    pub fn detect_cycles_post(
        &self,
        state: &LoopDetectionState,
        tool_name: &str,
        args_hash: &str,
    ) -> LoopDetectionResult {
        detect_cycles(state, tool_name, args_hash, &self.config, self.now_ms())
    }

    /// Consult the recovery registry for a failed call.
    pub fn attempt_recovery(
        &self,
        error: &ToolError,
        state: &LoopDetectionState,
    ) -> RecoveryResult {
        self.recovery
            .attempt_recovery(error, state, &self.config, self.now_ms())
    }

    pub fn is_recoverable(&self, error: &ToolError, attempt_count: u32) -> bool {
        self.recovery
            .is_recoverable(error, attempt_count, self.now_ms())
    }

    /// Health report over the state, folding in the recovery statistics.
    pub fn health(&self, state: &LoopDetectionState) -> HealthStatus {
        get_health_status(state, self.recovery.stats(), self.now_ms())
    }

    /// Preventive action for a health report, if any.
    pub fn preventive_action(&self, health: &HealthStatus) -> Option<PreventiveAction> {
        needs_preventive_action(health)
    }

    /// Pre-execution gate for a candidate call.
    pub fn pre_check(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        ctx: &PreExecutionContext,
    ) -> PreExecutionResult {
        self.prevention
            .perform_pre_execution_checks(tool_name, args, ctx)
    }

    /// Feed an executed action back into the learned-pattern registry.
    pub fn learn_from_action(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        outcome: &ActionOutcome,
    ) {
        self.prevention
            .learn_from_action(tool_name, args, outcome, self.now_ms());
    }

    pub fn should_escalate(&self, state: &LoopDetectionState) -> bool {
        should_escalate(state, &self.config, self.now_ms())
    }

    // Registry mutators, delegated to the owned recovery engine.

    pub fn register_strategy(&self, strategy: RecoveryStrategy) {
        self.recovery.register_strategy(strategy);
    }

    pub fn unregister_strategy(&self, id: &str) -> bool {
        self.recovery.unregister_strategy(id)
    }

    pub fn register_error_pattern(&self, strategy_id: &str, pattern: ErrorPattern) -> bool {
        self.recovery.register_error_pattern(strategy_id, pattern)
    }

    pub fn clear_strategies(&self) {
        self.recovery.clear_strategies();
    }

    pub fn reset_attempts(&self) {
        self.recovery.reset_attempts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_engine_smoke() {
        let clock = Arc::new(ManualClock::new(1_000));
        let engine =
            LoopPreventionEngine::with_clock(LoopPreventionConfig::default(), clock.clone());
        let mut state = LoopDetectionState::new();
        let call = args(&[("path", json!("/tmp/a"))]);

        // Clean pre-check and cycle check.
        let pre = engine.pre_check("read_file", &call, &PreExecutionContext::default());
        assert!(pre.can_proceed);
        let decision = engine.detect_cycle_pre(&mut state, "read_file", &call);
        assert!(!decision.is_loop);

        // Record a success; health stays perfect.
        let entry = engine.append_record(
            &mut state,
            "read_file",
            &call,
            ExecutionResult::Success,
            12,
            None,
            None,
        );
        assert_eq!(entry.timestamp, 1_000);
        assert_eq!(state.execution_history.len(), 1);
        let health = engine.health(&state);
        assert_eq!(health.status, HealthBand::Healthy);
        assert!(engine.preventive_action(&health).is_none());
    }

    #[test]
    fn test_engine_stamps_strategy_switch() {
        let clock = Arc::new(ManualClock::new(5_000));
        let engine = LoopPreventionEngine::with_clock(LoopPreventionConfig::default(), clock);
        let mut state = LoopDetectionState::new();
        let call = args(&[("path", json!("/tmp/a"))]);

        for _ in 0..3 {
            engine.append_record(
                &mut state,
                "read_file",
                &call,
                ExecutionResult::Success,
                10,
                None,
                None,
            );
        }
        let decision = engine.detect_cycle_pre(&mut state, "read_file", &call);
        assert_eq!(decision.suggested_action, SuggestedAction::SwitchStrategy);
        assert_eq!(state.last_strategy_switch, Some(5_000));
    }
}
