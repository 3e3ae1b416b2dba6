//! Recovery strategies, error patterns, and attempt bookkeeping.
//!
//! Strategies are plain data: new recovery behavior is added by registering
//! another [`RecoveryStrategy`] value, never by changing engine code.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool failure the recovery registry reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
}

impl ToolError {
    pub fn new(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            error_type: None,
            message: message.into(),
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

/// How an [`ErrorPattern`] value is matched against an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Exact,
    Contains,
    Regex,
}

/// One matchable error pattern, with optional type and tool filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub kind: PatternKind,
    pub value: String,
    /// When set, the error's type must match (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// When set, the failing tool's name must match (case-insensitive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ErrorPattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Exact,
            value: value.into(),
            error_type: None,
            tool_name: None,
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Contains,
            value: value.into(),
            error_type: None,
            tool_name: None,
        }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::Regex,
            value: value.into(),
            error_type: None,
            tool_name: None,
        }
    }

    pub fn for_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn for_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

/// What the host should do to recover from a matched error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry {
        delay_ms: u64,
    },
    RetryWithModification {
        modifications: Map<String, Value>,
    },
    Skip {
        reason: String,
    },
    AlternativeTool {
        tool_name: String,
        args_mapping: Map<String, Value>,
    },
    ClearState {
        fields: Vec<String>,
    },
    ResetContext {
        preserve_fields: Vec<String>,
    },
}

impl RecoveryAction {
    /// Whether applying this action implies re-running the failed call.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RecoveryAction::Retry { .. } | RecoveryAction::RetryWithModification { .. }
        )
    }
}

/// An immutable registry entry: patterns, budget, and the action to take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub patterns: Vec<ErrorPattern>,
    /// Higher priority strategies are consulted first.
    pub priority: i32,
    pub max_attempts: u32,
    pub cooldown_ms: u64,
    pub action: RecoveryAction,
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RecoveryAction>,
    pub message: String,
    pub should_retry: bool,
}

impl RecoveryResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy_id: None,
            action: None,
            message: message.into(),
            should_retry: false,
        }
    }
}

/// Per-`(error_tool, error_type, strategy)` attempt bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptTracker {
    pub attempts: u32,
    pub last_attempt_ms: Option<u64>,
    pub success_count: u32,
    pub failure_count: u32,
}

/// Aggregate recovery counters surfaced to the health monitor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub attempts: u64,
    pub successes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_action_wire_tag() {
        let action = RecoveryAction::Retry { delay_ms: 5000 };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "retry");
        assert_eq!(json["delay_ms"], 5000);

        let action = RecoveryAction::AlternativeTool {
            tool_name: "search".into(),
            args_mapping: Map::new(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "alternative_tool");
    }

    #[test]
    fn test_strategy_roundtrips_as_data() {
        let strategy = RecoveryStrategy {
            id: "custom".into(),
            name: "Custom".into(),
            description: "test strategy".into(),
            patterns: vec![ErrorPattern::contains("boom").for_tool("shell")],
            priority: 50,
            max_attempts: 2,
            cooldown_ms: 1000,
            action: RecoveryAction::Skip {
                reason: "unrecoverable".into(),
            },
        };
        let json = serde_json::to_string(&strategy).unwrap();
        let back: RecoveryStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "custom");
        assert_eq!(back.patterns.len(), 1);
        assert_eq!(back.patterns[0].kind, PatternKind::Contains);
        assert_eq!(back.patterns[0].tool_name.as_deref(), Some("shell"));
    }

    #[test]
    fn test_is_retry_classification() {
        assert!(RecoveryAction::Retry { delay_ms: 0 }.is_retry());
        assert!(RecoveryAction::RetryWithModification {
            modifications: Map::new()
        }
        .is_retry());
        assert!(!RecoveryAction::Skip {
            reason: String::new()
        }
        .is_retry());
    }
}
