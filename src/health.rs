//! Health scoring over the execution history.
//!
//! Builds rolling metrics from the detection state, folds them into a
//! 0-100 score with penalty terms for stale successes and ineffective
//! recovery, detects issues, and selects at most one preventive action.

use crate::types::{
    HealthBand, HealthIssue, HealthMetrics, HealthStatus, IssueKind, IssueSeverity,
    LoopDetectionState, PreventiveAction, RecoveryStats,
};

/// Window for the recent success rate and error ring.
pub const RECENT_WINDOW: usize = 10;

/// Success elapsed time after which the duration penalty starts.
const STALE_SUCCESS_MS: u64 = 300_000;
/// Duration penalty cap.
const MAX_DURATION_PENALTY: f64 = 20.0;

/// Aggregate rolling metrics from the state's execution history.
pub fn build_metrics_from_state(
    state: &LoopDetectionState,
    recovery: RecoveryStats,
) -> HealthMetrics {
    let history = &state.execution_history;
    let total = history.len() as u64;
    let successful = history.iter().filter(|r| !r.is_error()).count() as u64;
    let failed = total - successful;

    let average_duration_ms = if total == 0 {
        0.0
    } else {
        history.iter().map(|r| r.duration_ms as f64).sum::<f64>() / total as f64
    };

    let recent_start = history.len().saturating_sub(RECENT_WINDOW);
    let recent = &history[recent_start..];
    let recent_success_rate = if recent.is_empty() {
        1.0
    } else {
        recent.iter().filter(|r| !r.is_error()).count() as f64 / recent.len() as f64
    };

    let overall_success_rate = if total == 0 {
        1.0
    } else {
        successful as f64 / total as f64
    };

    let recent_errors: Vec<String> = history
        .iter()
        .filter(|r| r.is_error())
        .rev()
        .take(RECENT_WINDOW)
        .filter_map(|r| r.error_message.clone())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let last_success_ms = history
        .iter()
        .rev()
        .find(|r| !r.is_error())
        .map(|r| r.timestamp);
    let last_error_ms = history
        .iter()
        .rev()
        .find(|r| r.is_error())
        .map(|r| r.timestamp);

    HealthMetrics {
        total_executions: total,
        successful_executions: successful,
        failed_executions: failed,
        average_duration_ms,
        overall_success_rate,
        recent_success_rate,
        recent_errors,
        last_success_ms,
        last_error_ms,
        recovery_attempts: recovery.attempts,
        recovery_successes: recovery.successes,
    }
}

/// Fold metrics into a 0-100 score.
pub fn calculate_health_score(metrics: &HealthMetrics, now_ms: u64) -> f64 {
    let mut score = 100.0;
    score -= 40.0 * (1.0 - metrics.overall_success_rate);
    score -= 30.0 * (1.0 - metrics.recent_success_rate);

    if let Some(last_success) = metrics.last_success_ms {
        let elapsed = now_ms.saturating_sub(last_success);
        if elapsed > STALE_SUCCESS_MS {
            let penalty = (elapsed - STALE_SUCCESS_MS) as f64 / 60_000.0;
            score -= penalty.min(MAX_DURATION_PENALTY);
        }
    }

    if metrics.recovery_attempts > 0 {
        let recovery_rate = metrics.recovery_successes as f64 / metrics.recovery_attempts as f64;
        score -= 10.0 * (1.0 - recovery_rate);
    }

    score.clamp(0.0, 100.0)
}

fn band_for(score: f64) -> HealthBand {
    if score >= 80.0 {
        HealthBand::Healthy
    } else if score >= 60.0 {
        HealthBand::Degraded
    } else if score >= 40.0 {
        HealthBand::Unhealthy
    } else {
        HealthBand::Critical
    }
}

/// Detect issues from the metrics alone.
pub fn detect_health_issues(metrics: &HealthMetrics) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    if metrics.total_executions == 0 {
        return issues;
    }

    if metrics.recent_success_rate < 0.5 {
        let severity = if metrics.recent_success_rate < 0.2 {
            IssueSeverity::High
        } else if metrics.recent_success_rate < 0.3 {
            IssueSeverity::Medium
        } else {
            IssueSeverity::Low
        };
        issues.push(HealthIssue {
            kind: IssueKind::HighErrorRate,
            severity,
            description: format!(
                "recent success rate is {:.0}%",
                metrics.recent_success_rate * 100.0
            ),
        });
    }

    if metrics.average_duration_ms > 10_000.0 {
        let severity = if metrics.average_duration_ms > 30_000.0 {
            IssueSeverity::High
        } else if metrics.average_duration_ms > 20_000.0 {
            IssueSeverity::Medium
        } else {
            IssueSeverity::Low
        };
        issues.push(HealthIssue {
            kind: IssueKind::SlowPerformance,
            severity,
            description: format!(
                "average tool duration is {:.0} ms",
                metrics.average_duration_ms
            ),
        });
    }

    if metrics.recent_errors.len() >= 4 {
        let unique: std::collections::BTreeSet<&String> = metrics.recent_errors.iter().collect();
        if unique.len() * 2 < metrics.recent_errors.len() {
            let severity = if unique.len() == 1 {
                IssueSeverity::High
            } else {
                IssueSeverity::Medium
            };
            issues.push(HealthIssue {
                kind: IssueKind::RepeatedFailures,
                severity,
                description: format!(
                    "{} of the last {} errors are repeats",
                    metrics.recent_errors.len() - unique.len(),
                    metrics.recent_errors.len()
                ),
            });
        }
    }

    if metrics.recovery_attempts > 5 {
        let recovery_rate = metrics.recovery_successes as f64 / metrics.recovery_attempts as f64;
        if recovery_rate < 0.3 {
            issues.push(HealthIssue {
                kind: IssueKind::RecoveryExhausted,
                severity: IssueSeverity::High,
                description: format!(
                    "only {} of {} recovery attempts succeeded",
                    metrics.recovery_successes, metrics.recovery_attempts
                ),
            });
        }
    }

    issues
}

/// Full health report for one agent instance.
pub fn get_health_status(
    state: &LoopDetectionState,
    recovery: RecoveryStats,
    now_ms: u64,
) -> HealthStatus {
    let metrics = build_metrics_from_state(state, recovery);
    let score = calculate_health_score(&metrics, now_ms);
    let status = band_for(score);
    let issues = detect_health_issues(&metrics);

    if status == HealthBand::Critical {
        tracing::warn!(score, issue_count = issues.len(), "agent health is critical");
    }

    HealthStatus {
        score,
        status,
        issues,
        metrics,
    }
}

/// Select at most one preventive action from a health report.
pub fn needs_preventive_action(health: &HealthStatus) -> Option<PreventiveAction> {
    if health.status == HealthBand::Critical {
        return Some(PreventiveAction::RequestReview);
    }
    if health
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::RecoveryExhausted)
    {
        return Some(PreventiveAction::Checkpoint);
    }
    if health
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::HighErrorRate)
    {
        return Some(PreventiveAction::SlowDown { delay_ms: 2_000 });
    }
    if health
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::SlowPerformance)
    {
        return Some(PreventiveAction::ReduceComplexity);
    }
    if health.status == HealthBand::Unhealthy {
        return Some(PreventiveAction::SlowDown { delay_ms: 1_000 });
    }
    None
}
