//! Proactive prevention: pre-execution argument validation, prerequisite
//! checks, learned failure patterns, and risk assessment.
//!
//! The gate never executes anything itself; it inspects the candidate call
//! and tells the host whether to proceed, with blockers for fatal problems
//! and warnings for everything advisory.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::history::hash_args;
use crate::types::{
    ActionOutcome, LearnedPattern, PreExecutionContext, PreExecutionResult, RiskAssessment,
    RiskFactors, RiskLevel,
};

/// Command fragments that mark an operation as destructive.
pub const CAUTION_COMMANDS: [&str; 16] = [
    "rm -rf",
    "rm -fr",
    "rm -r ",
    "rm -f ",
    "dd if=",
    "dd of=",
    "mkfs",
    "shred",
    "chmod -r",
    "chown -r",
    "git push --force",
    "git reset --hard",
    "git clean -fd",
    "drop table",
    "drop database",
    "rmdir /s",
];

const WRITE_TOOLS: [&str; 7] = [
    "write_file",
    "apply_patch",
    "edit_file",
    "insert",
    "replace",
    "str_replace_editor",
    "text_editor",
];

/// Tracks failure signatures learned from executed actions.
#[derive(Default)]
pub struct PreventionEngine {
    learned: RwLock<HashMap<String, LearnedPattern>>,
}

impl PreventionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every pre-execution check for a candidate call.
    pub fn perform_pre_execution_checks(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        ctx: &PreExecutionContext,
    ) -> PreExecutionResult {
        let mut blockers = Vec::new();
        let mut warnings = Vec::new();

        validate_arguments(tool_name, args, &mut blockers, &mut warnings);
        check_prerequisites(tool_name, args, ctx, &mut blockers);

        if let Some(command) = command_text(args) {
            if is_fatal_command(&command) {
                blockers.push(format!("command is known to be fatal: {command}"));
            }
        }

        let candidate_hash = hash_args(args);
        for pattern in self.match_error_patterns(tool_name) {
            if pattern.args_hash == candidate_hash {
                warnings.push(format!(
                    "these exact arguments failed previously with {}: {}",
                    pattern.error_type, pattern.sample_message
                ));
            } else if pattern.frequency >= 2 {
                warnings.push(format!(
                    "{} has failed {} times with {}",
                    tool_name, pattern.frequency, pattern.error_type
                ));
            }
        }

        let risk = self.assess_action_risk(tool_name, args, ctx);
        let can_proceed = blockers.is_empty();
        if !can_proceed {
            tracing::warn!(tool_name, ?blockers, "pre-execution check blocked a call");
        }

        PreExecutionResult {
            can_proceed,
            blockers,
            warnings,
            risk,
        }
    }

    /// Weighted risk blend in `[0, 100]` for a candidate call.
    pub fn assess_action_risk(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        ctx: &PreExecutionContext,
    ) -> RiskAssessment {
        let factors = RiskFactors {
            destructive_potential: destructive_potential(tool_name, args),
            operation_scope: operation_scope(args, ctx),
            rollback_availability: if ctx.checkpoint_available { 10.0 } else { 50.0 },
            historical_errors: self.historical_errors(tool_name),
        };

        let score = factors.destructive_potential * 0.4
            + factors.operation_scope * 0.3
            + factors.rollback_availability * 0.2
            + factors.historical_errors * 0.1;

        let level = if score < 30.0 {
            RiskLevel::Low
        } else if score < 60.0 {
            RiskLevel::Medium
        } else if score < 80.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        };

        RiskAssessment {
            score,
            level,
            factors,
        }
    }

    /// Learned failure signatures for one tool, most frequent first.
    pub fn match_error_patterns(&self, tool_name: &str) -> Vec<LearnedPattern> {
        let canon = canonical(tool_name);
        let mut patterns: Vec<LearnedPattern> = self
            .learned
            .read()
            .values()
            .filter(|p| canonical(&p.tool_name) == canon)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        patterns
    }

    /// Register or refresh a learned pattern from a finished action.
    /// Successes teach nothing here.
    pub fn learn_from_action(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
        outcome: &ActionOutcome,
        now_ms: u64,
    ) {
        if outcome.success {
            return;
        }
        let error_type = outcome
            .error_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let key = format!("{}|{}", canonical(tool_name), error_type.to_lowercase());
        let mut learned = self.learned.write();
        match learned.get_mut(&key) {
            Some(pattern) => {
                pattern.frequency += 1;
                pattern.last_seen_ms = now_ms;
                pattern.args_hash = hash_args(args);
                if let Some(message) = &outcome.error_message {
                    pattern.sample_message = message.clone();
                }
            }
            None => {
                learned.insert(
                    key,
                    LearnedPattern {
                        tool_name: tool_name.to_string(),
                        error_type,
                        sample_message: outcome.error_message.clone().unwrap_or_default(),
                        args_hash: hash_args(args),
                        frequency: 1,
                        last_seen_ms: now_ms,
                    },
                );
            }
        }
    }

    /// Snapshot of everything learned so far.
    pub fn learned_patterns(&self) -> Vec<LearnedPattern> {
        self.learned.read().values().cloned().collect()
    }

    pub fn clear_learned_patterns(&self) {
        self.learned.write().clear();
    }

    fn historical_errors(&self, tool_name: &str) -> f64 {
        let total: u32 = self
            .match_error_patterns(tool_name)
            .iter()
            .map(|p| p.frequency)
            .sum();
        (total as f64 * 20.0).min(100.0)
    }
}

fn canonical(tool_name: &str) -> String {
    tool_name.trim().to_lowercase().replace('-', "_")
}

fn string_arg<'a>(args: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| args.get(*k).and_then(Value::as_str))
}

/// Validate required fields and field types for known tools. Failures are
/// blockers: the call would fail anyway.
fn validate_arguments(
    tool_name: &str,
    args: &Map<String, Value>,
    blockers: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    match canonical(tool_name).as_str() {
        "read_file" | "view" | "write_file" => {
            if string_arg(args, &["path", "file_path", "file"]).is_none() {
                blockers.push(format!("{tool_name} requires a string 'path' argument"));
            }
            if canonical(tool_name) == "write_file" && !args.contains_key("content") {
                blockers.push("write_file requires a 'content' argument".to_string());
            }
        }
        "shell" | "execute_command" | "bash" => {
            match string_arg(args, &["command", "cmd"]) {
                Some(command) if !command.trim().is_empty() => {}
                Some(_) => blockers.push(format!("{tool_name} command must not be empty")),
                None => blockers.push(format!("{tool_name} requires a string 'command' argument")),
            }
        }
        "search_files" | "grep" | "search" => {
            let pattern = string_arg(args, &["pattern", "regex", "query"]);
            match pattern {
                Some(pattern) => {
                    if regex::Regex::new(pattern).is_err() {
                        blockers.push(format!("search pattern is not a valid regex: {pattern}"));
                    }
                }
                None => warnings.push(format!(
                    "{tool_name} called without a pattern, query, or regex argument"
                )),
            }
        }
        _ => {}
    }
}

/// Prerequisites that must hold before a call can work, checked only when
/// the context supplies the needed inventory.
fn check_prerequisites(
    tool_name: &str,
    args: &Map<String, Value>,
    ctx: &PreExecutionContext,
    blockers: &mut Vec<String>,
) {
    let reads_existing_file = matches!(
        canonical(tool_name).as_str(),
        "read_file" | "view" | "edit_file" | "apply_patch" | "str_replace_editor"
    );
    if !reads_existing_file {
        return;
    }
    let (Some(files), Some(path)) = (
        &ctx.available_files,
        string_arg(args, &["path", "file_path", "file"]),
    ) else {
        return;
    };
    if !files.contains(path) {
        blockers.push(format!("target path does not exist: {path}"));
    }
}

/// The command string of a call, whitespace-collapsed and lowercased.
fn command_text(args: &Map<String, Value>) -> Option<String> {
    string_arg(args, &["command", "cmd"]).map(|c| {
        c.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    })
}

/// Commands that destroy the environment outright.
fn is_fatal_command(command: &str) -> bool {
    if command.starts_with("rm ") && (command.contains("-rf") || command.contains("-fr")) {
        if let Some(target) = command.split_whitespace().last() {
            if matches!(target, "/" | "/*" | "~" | "~/") {
                return true;
            }
        }
    }
    (command.contains("mkfs") && command.contains("/dev/"))
        || (command.starts_with("dd ") && command.contains("of=/dev/"))
        || command.contains(":(){")
}

fn destructive_potential(tool_name: &str, args: &Map<String, Value>) -> f64 {
    let mut score: f64 = 0.0;
    if WRITE_TOOLS.contains(&canonical(tool_name).as_str()) {
        score = 40.0;
    }
    if let Some(command) = command_text(args) {
        if is_fatal_command(&command) {
            return 100.0;
        }
        if CAUTION_COMMANDS.iter().any(|c| command.contains(c)) {
            score = score.max(80.0);
        }
    }
    score
}

fn operation_scope(args: &Map<String, Value>, ctx: &PreExecutionContext) -> f64 {
    let mut score: f64 = 0.0;

    let has_wildcard = args.values().any(|v| {
        v.as_str()
            .map(|s| s.contains('*') || s.contains("**"))
            .unwrap_or(false)
    });
    if has_wildcard {
        score += 40.0;
    }

    if let Some(command) = command_text(args) {
        let recursive = command.contains(" -r")
            || command.contains("-rf")
            || command.contains("--recursive")
            || command.contains("/s ");
        if recursive {
            score += 30.0;
        }
    }

    score += (ctx.modified_files.len() as f64 * 3.0).min(30.0);
    score.min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_missing_required_argument_blocks() {
        let engine = PreventionEngine::new();
        let result = engine.perform_pre_execution_checks(
            "read_file",
            &Map::new(),
            &PreExecutionContext::default(),
        );
        assert!(!result.can_proceed);
        assert!(result.blockers[0].contains("path"));
    }

    #[test]
    fn test_invalid_regex_blocks() {
        let engine = PreventionEngine::new();
        let call = args(&[("pattern", json!("unclosed ["))]);
        let result = engine.perform_pre_execution_checks(
            "search_files",
            &call,
            &PreExecutionContext::default(),
        );
        assert!(!result.can_proceed);
        assert!(result.blockers[0].contains("valid regex"));
    }

    #[test]
    fn test_valid_call_proceeds() {
        let engine = PreventionEngine::new();
        let call = args(&[("path", json!("/tmp/notes.txt"))]);
        let result =
            engine.perform_pre_execution_checks("read_file", &call, &PreExecutionContext::default());
        assert!(result.can_proceed);
        assert!(result.blockers.is_empty());
        assert_eq!(result.risk.level, RiskLevel::Low);
    }

    #[test]
    fn test_prerequisite_requires_known_file() {
        let engine = PreventionEngine::new();
        let mut ctx = PreExecutionContext::default();
        ctx.available_files = Some(HashSet::from(["/src/lib.rs".to_string()]));

        let missing = args(&[("path", json!("/src/main.rs"))]);
        let result = engine.perform_pre_execution_checks("read_file", &missing, &ctx);
        assert!(!result.can_proceed);
        assert!(result.blockers[0].contains("/src/main.rs"));

        let present = args(&[("path", json!("/src/lib.rs"))]);
        let result = engine.perform_pre_execution_checks("read_file", &present, &ctx);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_fatal_command_blocks_and_maxes_risk() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("rm -rf /"))]);
        let result =
            engine.perform_pre_execution_checks("shell", &call, &PreExecutionContext::default());
        assert!(!result.can_proceed);
        assert!(result.blockers.iter().any(|b| b.contains("fatal")));
        assert_eq!(result.risk.factors.destructive_potential, 100.0);
    }

    #[test]
    fn test_scoped_delete_is_cautioned_not_fatal() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("rm -rf /tmp/build-cache"))]);
        let result =
            engine.perform_pre_execution_checks("shell", &call, &PreExecutionContext::default());
        assert!(result.can_proceed);
        assert_eq!(result.risk.factors.destructive_potential, 80.0);
        assert!(matches!(result.risk.level, RiskLevel::Medium | RiskLevel::High));
    }

    #[test]
    fn test_checkpoint_lowers_risk() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("git reset --hard"))]);
        let without = engine.assess_action_risk("shell", &call, &PreExecutionContext::default());
        let with = engine.assess_action_risk(
            "shell",
            &call,
            &PreExecutionContext {
                checkpoint_available: true,
                ..Default::default()
            },
        );
        assert!(with.score < without.score);
        assert_eq!(with.factors.rollback_availability, 10.0);
    }

    #[test]
    fn test_wildcard_and_modified_files_raise_scope() {
        let engine = PreventionEngine::new();
        let call = args(&[("pattern", json!("src/**/*.rs"))]);
        let mut ctx = PreExecutionContext::default();
        ctx.modified_files = (0..20).map(|i| format!("f{i}")).collect();
        let risk = engine.assess_action_risk("grep", &call, &ctx);
        // Wildcard 40 + modified-files cap 30.
        assert_eq!(risk.factors.operation_scope, 70.0);
    }

    #[test]
    fn test_learning_updates_frequency_not_duplicates() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("cargo build"))]);
        let outcome = ActionOutcome::failure("compile_error", "expected `;`");

        engine.learn_from_action("shell", &call, &outcome, 1_000);
        engine.learn_from_action("shell", &call, &outcome, 2_000);
        engine.learn_from_action("shell", &call, &ActionOutcome::success(), 3_000);

        let patterns = engine.match_error_patterns("shell");
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[0].last_seen_ms, 2_000);
    }

    #[test]
    fn test_learned_patterns_warn_on_repeat() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("cargo build"))]);
        let outcome = ActionOutcome::failure("compile_error", "expected `;`");
        engine.learn_from_action("shell", &call, &outcome, 1_000);

        // Same arguments: the exact-failure warning fires even at frequency 1.
        let result =
            engine.perform_pre_execution_checks("shell", &call, &PreExecutionContext::default());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("failed previously")));
    }

    #[test]
    fn test_historical_errors_feed_risk() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("cargo test"))]);
        let baseline = engine.assess_action_risk("shell", &call, &PreExecutionContext::default());

        for i in 0..3 {
            engine.learn_from_action(
                "shell",
                &call,
                &ActionOutcome::failure("test_failure", "assertion failed"),
                1_000 + i,
            );
        }
        let informed = engine.assess_action_risk("shell", &call, &PreExecutionContext::default());
        assert!(informed.score > baseline.score);
        assert_eq!(informed.factors.historical_errors, 60.0);
    }

    #[test]
    fn test_risk_bands() {
        let engine = PreventionEngine::new();
        // Plain read: only the no-checkpoint rollback factor contributes.
        let read = args(&[("path", json!("/tmp/a"))]);
        let risk = engine.assess_action_risk("read_file", &read, &PreExecutionContext::default());
        assert_eq!(risk.level, RiskLevel::Low);

        // Destructive recursive delete without a checkpoint.
        let nuke = args(&[("command", json!("rm -rf /var/data/*"))]);
        let risk = engine.assess_action_risk("shell", &nuke, &PreExecutionContext::default());
        assert!(matches!(risk.level, RiskLevel::Medium | RiskLevel::High | RiskLevel::Critical));
        assert!(risk.score > 50.0);
    }

    #[test]
    fn test_clear_learned_patterns() {
        let engine = PreventionEngine::new();
        let call = args(&[("command", json!("x"))]);
        engine.learn_from_action("shell", &call, &ActionOutcome::failure("e", "m"), 1_000);
        assert_eq!(engine.learned_patterns().len(), 1);
        engine.clear_learned_patterns();
        assert!(engine.learned_patterns().is_empty());
    }
}
