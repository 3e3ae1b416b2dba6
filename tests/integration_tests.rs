//! End-to-end scenarios exercising the engine through its host-facing API.

use std::sync::Arc;

use loopguard::*;
use serde_json::{json, Map, Value};

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn engine_at(start_ms: u64) -> (LoopPreventionEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let engine = LoopPreventionEngine::with_clock(LoopPreventionConfig::default(), clock.clone());
    (engine, clock)
}

#[test]
fn exact_repeat_triggers_switch_strategy() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("path", json!("/a"))]);

    for _ in 0..3 {
        clock.advance(100);
        engine.append_record(
            &mut state,
            "read_file",
            &call,
            ExecutionResult::Success,
            15,
            None,
            None,
        );
    }

    let decision = engine.detect_cycle_pre(&mut state, "read_file", &call);
    assert!(decision.is_loop);
    assert_eq!(decision.loop_type, Some(LoopType::Exact));
    assert_eq!(decision.confidence, 1.0);
    assert_eq!(decision.suggested_action, SuggestedAction::SwitchStrategy);
    assert_eq!(decision.matched_entries.len(), 3);
}

#[test]
fn oscillation_detected_and_aggregated() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("target", json!("src"))]);

    for i in 0..6 {
        clock.advance(50);
        let tool = if i % 2 == 0 { "a" } else { "b" };
        engine.append_record(
            &mut state,
            tool,
            &call,
            ExecutionResult::Success,
            10,
            None,
            None,
        );
    }

    let oscillation = detect_oscillation_pattern(&state.execution_history).unwrap();
    assert_eq!(oscillation.tools, vec!["a", "b"]);
    assert_eq!(oscillation.cycle_length, 2);
    assert_eq!(oscillation.occurrences, 3);

    let hash = state.execution_history.last().unwrap().args_hash.clone();
    let result = engine.detect_cycles_post(&state, "b", &hash);
    assert!(matches!(
        result.recommended_action,
        RecommendedAction::Degrade | RecommendedAction::Escalate
    ));
}

#[test]
fn gradual_timeout_growth_detected() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();

    for timeout in [1_000, 2_000, 3_000, 4_000, 5_000] {
        clock.advance(50);
        let call = args(&[("command", json!("slow_job")), ("timeout", json!(timeout))]);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Success,
            10,
            None,
            None,
        );
    }

    let drift = detect_gradual_change_pattern(&state.execution_history, "shell").unwrap();
    assert_eq!(drift.changing_field, "timeout");
    assert_eq!(drift.change_type, ChangeType::Increment);
    assert_eq!(drift.occurrences, 5);
}

#[test]
fn similar_commands_score_between_half_and_one() {
    let a = args(&[("command", json!("ls -la"))]);
    let b = args(&[("command", json!("ls -l"))]);
    let sim = args_similarity(&a, &b);
    assert!(sim > 0.5, "got {sim}");
    assert!(sim < 1.0, "got {sim}");
}

#[test]
fn single_shot_strategy_exhausts() {
    let (engine, clock) = engine_at(1_000);
    let state = LoopDetectionState::new();
    engine.clear_strategies();
    engine.register_strategy(RecoveryStrategy {
        id: "one_shot".into(),
        name: "One shot".into(),
        description: "single attempt, no cooldown".into(),
        patterns: vec![ErrorPattern::contains("flaky")],
        priority: 50,
        max_attempts: 1,
        cooldown_ms: 0,
        action: RecoveryAction::Retry { delay_ms: 100 },
    });

    let error = ToolError::new("shell", "flaky network thing");
    let first = engine.attempt_recovery(&error, &state);
    assert!(first.success);
    assert_eq!(first.strategy_id.as_deref(), Some("one_shot"));

    clock.advance(10);
    let second = engine.attempt_recovery(&error, &state);
    assert!(!second.success);
    assert!(!second.should_retry);
    assert!(second.message.contains("exhausted"), "message: {}", second.message);
}

#[test]
fn ten_errors_drive_health_critical() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("command", json!("make"))]);

    for _ in 0..10 {
        clock.advance(100);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Error,
            25,
            Some("build_error"),
            Some("compilation failed"),
        );
    }

    let health = engine.health(&state);
    assert_eq!(health.status, HealthBand::Critical);
    assert!(health
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::HighErrorRate));
    assert_eq!(
        engine.preventive_action(&health),
        Some(PreventiveAction::RequestReview)
    );
}

#[test]
fn window_invariant_holds_after_appends() {
    let config = LoopPreventionConfig::default();
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = LoopPreventionEngine::with_clock(config.clone(), clock.clone());
    let mut state = LoopDetectionState::new();

    // Many appends spread far beyond the window and the size cap.
    for i in 0..250u64 {
        clock.advance(config.time_window_ms / 50);
        let call = args(&[("n", json!(i))]);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Success,
            5,
            None,
            None,
        );
    }

    let now = clock.now_ms();
    assert!(state.execution_history.len() <= 100);
    for record in &state.execution_history {
        assert!(now - record.timestamp <= config.time_window_ms);
    }
    // Timestamps are non-decreasing.
    for pair in state.execution_history.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[test]
fn hash_ignores_key_permutation() {
    let a = args(&[
        ("path", json!("/x")),
        ("mode", json!("r")),
        ("opts", json!({"depth": 1, "follow": true})),
    ]);
    let b = args(&[
        ("opts", json!({"follow": true, "depth": 1})),
        ("mode", json!("r")),
        ("path", json!("/x")),
    ]);
    assert_eq!(hash_args(&a), hash_args(&b));
}

#[test]
fn consecutive_error_counter_tracks_suffix() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("x", json!(1))]);

    for expected in 1..=3u32 {
        clock.advance(10);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Error,
            5,
            Some("e"),
            Some("boom"),
        );
        assert_eq!(state.consecutive_error_count, expected);
    }

    clock.advance(10);
    engine.append_record(
        &mut state,
        "shell",
        &call,
        ExecutionResult::Success,
        5,
        None,
        None,
    );
    assert_eq!(state.consecutive_error_count, 0);
}

#[test]
fn degradation_ladder_is_monotone() {
    // Raising the identical-call count across T, 2T, 3T yields
    // switch-strategy, clarify, escalate in that order.
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("q", json!("needle"))]);
    let mut observed = Vec::new();

    for i in 1..=9u32 {
        clock.advance(10);
        engine.append_record(
            &mut state,
            "custom_tool",
            &call,
            ExecutionResult::Success,
            5,
            None,
            None,
        );
        if i % 3 == 0 {
            let decision = engine.detect_cycle_pre(&mut state, "custom_tool", &call);
            observed.push(decision.suggested_action);
        }
    }

    assert_eq!(
        observed,
        vec![
            SuggestedAction::SwitchStrategy,
            SuggestedAction::Clarify,
            SuggestedAction::Escalate
        ]
    );
}

#[test]
fn recovery_cooldown_skips_second_attempt() {
    let (engine, clock) = engine_at(1_000);
    let state = LoopDetectionState::new();
    engine.clear_strategies();
    engine.register_strategy(RecoveryStrategy {
        id: "cooling".into(),
        name: "Cooling".into(),
        description: "long cooldown".into(),
        patterns: vec![ErrorPattern::contains("transient")],
        priority: 50,
        max_attempts: 10,
        cooldown_ms: 60_000,
        action: RecoveryAction::Retry { delay_ms: 1_000 },
    });

    let error = ToolError::new("shell", "transient glitch");
    assert!(engine.attempt_recovery(&error, &state).success);

    clock.advance(1_000);
    assert!(!engine.attempt_recovery(&error, &state).success);

    clock.advance(60_000);
    assert!(engine.attempt_recovery(&error, &state).success);
}

#[test]
fn tool_categories_are_separator_insensitive() {
    assert_eq!(get_tool_category("Str-Replace-Editor"), ToolCategory::FileOperations);
    assert_eq!(get_tool_category("EXECUTE_COMMAND"), ToolCategory::ShellCommands);
    assert_eq!(get_tool_category("search-documents-for"), ToolCategory::SearchTools);
    assert_eq!(get_tool_category("Ask-Followup-Question"), ToolCategory::Communication);
    assert_eq!(get_tool_category("something_else"), ToolCategory::Other);
}

#[test]
fn error_streak_halts_and_escalates() {
    let (engine, clock) = engine_at(1_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("command", json!("deploy"))]);

    for _ in 0..5 {
        clock.advance(10);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Error,
            5,
            Some("deploy_error"),
            Some("connection refused by target"),
        );
    }

    let hash = state.execution_history.last().unwrap().args_hash.clone();
    let result = engine.detect_cycles_post(&state, "shell", &hash);
    assert_eq!(result.recommended_action, RecommendedAction::Halt);
    assert!(engine.should_escalate(&state));
}

#[test]
fn full_loop_lifecycle_with_recovery_and_prevention() {
    let (engine, clock) = engine_at(10_000);
    let mut state = LoopDetectionState::new();
    let call = args(&[("command", json!("curl https://api.example.com"))]);

    // Pre-check passes for a benign command.
    let pre = engine.pre_check("shell", &call, &PreExecutionContext::default());
    assert!(pre.can_proceed);
    assert_eq!(pre.risk.level, RiskLevel::Low);

    // The call fails twice with a connection error; the built-in strategy
    // recommends a delayed retry, and the failure is learned.
    for _ in 0..2 {
        clock.advance(100);
        engine.append_record(
            &mut state,
            "shell",
            &call,
            ExecutionResult::Error,
            2_500,
            Some("network"),
            Some("connection refused"),
        );
        engine.learn_from_action(
            "shell",
            &call,
            &ActionOutcome::failure("network", "connection refused"),
        );
    }

    let error = ToolError::new("shell", "connection refused").with_type("network");
    assert!(engine.is_recoverable(&error, 1));
    let recovery = engine.attempt_recovery(&error, &state);
    assert!(recovery.success);
    assert!(matches!(
        recovery.action,
        Some(RecoveryAction::Retry { delay_ms: 10_000 })
    ));

    // The learned failure now surfaces as a pre-check warning.
    let pre = engine.pre_check("shell", &call, &PreExecutionContext::default());
    assert!(pre
        .warnings
        .iter()
        .any(|w| w.contains("failed previously")));

    // A success clears the streak and keeps health reasonable.
    clock.advance(100);
    engine.append_record(
        &mut state,
        "shell",
        &call,
        ExecutionResult::Success,
        900,
        None,
        None,
    );
    assert_eq!(state.consecutive_error_count, 0);
    let health = engine.health(&state);
    assert!(health.score > 40.0);
}
