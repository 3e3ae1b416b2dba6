//! Health metrics, scoring bands, issues, and preventive actions.

use serde::{Deserialize, Serialize};

/// Rolling aggregate over an agent's execution history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_duration_ms: f64,
    /// Success rate over the whole retained history.
    pub overall_success_rate: f64,
    /// Success rate over the last ten records.
    pub recent_success_rate: f64,
    /// Ring of the last ten error messages, oldest first.
    pub recent_errors: Vec<String>,
    pub last_success_ms: Option<u64>,
    pub last_error_ms: Option<u64>,
    pub recovery_attempts: u64,
    pub recovery_successes: u64,
}

/// Coarse health classification derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

/// Kind of detected health issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighErrorRate,
    SlowPerformance,
    RepeatedFailures,
    RecoveryExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

/// One detected health issue with a human-readable description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthIssue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub description: String,
}

/// Full health report for one agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Score in `[0, 100]`.
    pub score: f64,
    pub status: HealthBand,
    pub issues: Vec<HealthIssue>,
    pub metrics: HealthMetrics,
}

/// Preventive action selected from a health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreventiveAction {
    SlowDown { delay_ms: u64 },
    ReduceComplexity,
    RequestReview,
    Checkpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preventive_action_wire_tag() {
        let action = PreventiveAction::SlowDown { delay_ms: 2000 };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "slow_down");
        assert_eq!(json["delay_ms"], 2000);

        let json = serde_json::to_value(&PreventiveAction::RequestReview).unwrap();
        assert_eq!(json["type"], "request_review");
    }

    #[test]
    fn test_issue_severity_ordering() {
        assert!(IssueSeverity::Low < IssueSeverity::Medium);
        assert!(IssueSeverity::Medium < IssueSeverity::High);
    }

    #[test]
    fn test_health_band_wire_values() {
        let json = serde_json::to_string(&HealthBand::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
