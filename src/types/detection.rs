//! Result types produced by the cycle detectors and the coordinator.

use serde::{Deserialize, Serialize};

use crate::types::execution::ExecutionRecord;

/// Kind of loop identified by the pre-call check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopType {
    Exact,
    Semantic,
    Pattern,
}

/// Per-cycle corrective action suggested to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedAction {
    Continue,
    SwitchStrategy,
    Clarify,
    Escalate,
}

/// Aggregate corrective action derived from all detected patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Continue,
    Warn,
    Degrade,
    Escalate,
    Halt,
}

/// Decision returned by the pre-call cycle check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleDecision {
    pub is_loop: bool,
    pub loop_type: Option<LoopType>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub suggested_action: SuggestedAction,
    /// History entries that matched the candidate call.
    pub matched_entries: Vec<ExecutionRecord>,
}

impl CycleDecision {
    /// The neutral decision: no loop, carry on.
    pub fn no_loop() -> Self {
        Self {
            is_loop: false,
            loop_type: None,
            confidence: 0.0,
            suggested_action: SuggestedAction::Continue,
            matched_entries: Vec::new(),
        }
    }
}

/// Category of a detected repetition pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    ExactRepeat,
    ErrorCycle,
    Oscillation,
    GradualChange,
}

/// One detected repetition pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPattern {
    pub pattern_type: PatternType,
    pub description: String,
    /// Tool names involved, in pattern order.
    pub tools: Vec<String>,
    pub occurrences: u32,
    pub confidence: f64,
}

/// Aggregate result of the post-call detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDetectionResult {
    pub patterns: Vec<LoopPattern>,
    pub recommended_action: RecommendedAction,
    /// Deduplicated, pattern-type-specific human-readable suggestions.
    pub suggestions: Vec<String>,
    /// Sum of occurrences across all detected patterns.
    pub total_occurrences: u32,
    /// Highest confidence across all detected patterns.
    pub max_confidence: f64,
}

impl LoopDetectionResult {
    pub fn clean() -> Self {
        Self {
            patterns: Vec::new(),
            recommended_action: RecommendedAction::Continue,
            suggestions: Vec::new(),
            total_occurrences: 0,
            max_confidence: 0.0,
        }
    }
}

/// A repeating fixed-length cycle of tool names in the recent suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscillationPattern {
    /// The tools forming one cycle, in order.
    pub tools: Vec<String>,
    pub cycle_length: usize,
    /// Consecutive matching cycles counted from the tail, inclusive.
    pub occurrences: u32,
}

impl OscillationPattern {
    pub fn confidence(&self) -> f64 {
        (self.occurrences as f64 / 4.0).min(1.0)
    }
}

/// How an argument field is drifting across a tool's recent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Strictly monotone numeric progression.
    Increment,
    /// Each value extends the previous as a prefix.
    Append,
    /// Small edits between consecutive values.
    Modify,
}

/// Monotone drift detected in one argument field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradualChangePattern {
    pub changing_field: String,
    pub change_type: ChangeType,
    pub occurrences: u32,
}

/// A trailing tool-name pattern and how many times it repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCycle {
    pub pattern: Vec<String>,
    pub repetitions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_action_wire_values() {
        let json = serde_json::to_string(&SuggestedAction::SwitchStrategy).unwrap();
        assert_eq!(json, "\"switch-strategy\"");
        let json = serde_json::to_string(&SuggestedAction::Clarify).unwrap();
        assert_eq!(json, "\"clarify\"");
    }

    #[test]
    fn test_recommended_action_wire_values() {
        for (action, wire) in [
            (RecommendedAction::Continue, "\"continue\""),
            (RecommendedAction::Warn, "\"warn\""),
            (RecommendedAction::Degrade, "\"degrade\""),
            (RecommendedAction::Escalate, "\"escalate\""),
            (RecommendedAction::Halt, "\"halt\""),
        ] {
            assert_eq!(serde_json::to_string(&action).unwrap(), wire);
        }
    }

    #[test]
    fn test_pattern_type_wire_values() {
        let json = serde_json::to_string(&PatternType::ExactRepeat).unwrap();
        assert_eq!(json, "\"exact_repeat\"");
        let json = serde_json::to_string(&PatternType::ErrorCycle).unwrap();
        assert_eq!(json, "\"error_cycle\"");
    }

    #[test]
    fn test_no_loop_decision_is_neutral() {
        let decision = CycleDecision::no_loop();
        assert!(!decision.is_loop);
        assert_eq!(decision.suggested_action, SuggestedAction::Continue);
        assert!(decision.matched_entries.is_empty());
    }

    #[test]
    fn test_oscillation_confidence_caps_at_one() {
        let pattern = OscillationPattern {
            tools: vec!["a".into(), "b".into()],
            cycle_length: 2,
            occurrences: 9,
        };
        assert_eq!(pattern.confidence(), 1.0);
    }
}
