//! Pre-execution check results, risk assessment, and learned error patterns.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Host-supplied context consulted by the pre-execution checks.
///
/// Everything is optional: an empty context disables the corresponding
/// checks rather than failing them.
#[derive(Debug, Clone, Default)]
pub struct PreExecutionContext {
    /// Known-existing files. `None` means the host has no file inventory and
    /// existence prerequisites are skipped.
    pub available_files: Option<HashSet<String>>,
    /// Whether a restorable checkpoint exists.
    pub checkpoint_available: bool,
    /// Files modified so far in the current task.
    pub modified_files: Vec<String>,
}

/// Individual contributions to the risk score, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskFactors {
    pub destructive_potential: f64,
    pub operation_scope: f64,
    pub rollback_availability: f64,
    pub historical_errors: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Weighted risk blend for one candidate action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Blended score in `[0, 100]`.
    pub score: f64,
    pub level: RiskLevel,
    pub factors: RiskFactors,
}

/// Result of the pre-execution gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreExecutionResult {
    pub can_proceed: bool,
    pub blockers: Vec<String>,
    pub warnings: Vec<String>,
    pub risk: RiskAssessment,
}

/// Outcome of an executed action, fed back for learning.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub success: bool,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_type: Some(error_type.into()),
            error_message: Some(message.into()),
        }
    }
}

/// A failure signature learned from past executions, keyed by
/// `(tool_name, error_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub tool_name: String,
    pub error_type: String,
    /// Most recent error message observed for this signature.
    pub sample_message: String,
    /// Hash of the argument tree that last produced this failure.
    pub args_hash: String,
    pub frequency: u32,
    pub last_seen_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        assert!(ActionOutcome::success().success);
        let failure = ActionOutcome::failure("timeout", "timed out after 30s");
        assert!(!failure.success);
        assert_eq!(failure.error_type.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_risk_level_wire_values() {
        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
