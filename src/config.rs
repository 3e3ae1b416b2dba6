//! Configuration management for the loop-prevention engine.
//!
//! Provides the full threshold surface with validation, named presets,
//! per-tool and per-category overrides, merge semantics, and JSON
//! round-tripping. Unknown fields are preserved across parse/serialize so
//! hosts can carry their own keys through the engine untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-tool detection thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLimits {
    /// Identical `(tool, args_hash)` calls tolerated in the window.
    pub max_identical_calls: u32,
    /// Semantically similar calls tolerated in the window.
    pub max_similar_calls: u32,
    /// Consecutive errors tolerated for this tool.
    pub max_consecutive_errors: u32,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_identical_calls: 3,
            max_similar_calls: 3,
            max_consecutive_errors: 5,
        }
    }
}

impl ToolLimits {
    pub const fn new(
        max_identical_calls: u32,
        max_similar_calls: u32,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            max_identical_calls,
            max_similar_calls,
            max_consecutive_errors,
        }
    }
}

/// Fixed tool categories used for per-category threshold defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileOperations,
    ShellCommands,
    SearchTools,
    CodeModification,
    Communication,
    Other,
}

const FILE_OPERATIONS: [&str; 6] = [
    "read_file",
    "write_file",
    "list_files",
    "view",
    "str_replace_editor",
    "text_editor",
];
const SHELL_COMMANDS: [&str; 3] = ["shell", "execute_command", "bash"];
const SEARCH_TOOLS: [&str; 4] = ["grep", "search", "find", "search_documents_for"];
const CODE_MODIFICATION: [&str; 4] = ["apply_patch", "edit_file", "insert", "replace"];
const COMMUNICATION: [&str; 4] = [
    "ask_followup_question",
    "attempt_completion",
    "request_human_help",
    "update_plan",
];

/// Normalize a tool name for matching: lowercase, `-` and `_` equivalent.
fn canonical_tool_name(tool_name: &str) -> String {
    tool_name.trim().to_lowercase().replace('-', "_")
}

/// Categorize a tool name, case-insensitively and treating `-`/`_` as
/// equivalent. Unknown tools land in [`ToolCategory::Other`].
pub fn get_tool_category(tool_name: &str) -> ToolCategory {
    let canon = canonical_tool_name(tool_name);
    let canon = canon.as_str();
    if FILE_OPERATIONS.contains(&canon) {
        ToolCategory::FileOperations
    } else if SHELL_COMMANDS.contains(&canon) {
        ToolCategory::ShellCommands
    } else if SEARCH_TOOLS.contains(&canon) {
        ToolCategory::SearchTools
    } else if CODE_MODIFICATION.contains(&canon) {
        ToolCategory::CodeModification
    } else if COMMUNICATION.contains(&canon) {
        ToolCategory::Communication
    } else {
        ToolCategory::Other
    }
}

impl ToolCategory {
    /// Category threshold defaults, used when no per-tool override exists.
    /// [`ToolCategory::Other`] has none and falls through to the global
    /// thresholds.
    pub fn default_limits(&self) -> Option<ToolLimits> {
        match self {
            ToolCategory::FileOperations => Some(ToolLimits::new(3, 5, 3)),
            ToolCategory::ShellCommands => Some(ToolLimits::new(2, 4, 2)),
            ToolCategory::SearchTools => Some(ToolLimits::new(3, 8, 5)),
            ToolCategory::CodeModification => Some(ToolLimits::new(2, 4, 3)),
            ToolCategory::Communication => Some(ToolLimits::new(2, 3, 2)),
            ToolCategory::Other => None,
        }
    }
}

/// Descriptor for one degradation level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationLevelSpec {
    pub level: u8,
    pub name: String,
    pub description: String,
}

fn default_degradation_levels() -> Vec<DegradationLevelSpec> {
    let levels = [
        (0, "NORMAL", "Full tool access, no restrictions"),
        (1, "WARNING", "Loops suspected, host should surface a warning"),
        (2, "RESTRICTED", "Repetitive tools throttled by the host"),
        (3, "MINIMAL", "Only essential tools, escalation imminent"),
        (4, "HALTED", "Execution stopped pending intervention"),
    ];
    levels
        .into_iter()
        .map(|(level, name, description)| DegradationLevelSpec {
            level,
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect()
}

/// Full configuration surface for the engine.
///
/// All fields have serde defaults, so any partial JSON object parses; scalar
/// values outside their documented ranges are clamped to the nearest bound
/// by [`LoopPreventionConfig::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopPreventionConfig {
    pub enabled: bool,
    /// Sliding-window horizon for history pruning, milliseconds.
    pub time_window_ms: u64,
    /// Identical-call threshold, range `[1, 100]`.
    pub exact_match_threshold: u32,
    /// Records inspected by the pre-call detectors, range `[5, 1000]`.
    pub exact_match_lookback_window: u32,
    pub semantic_similarity_enabled: bool,
    /// Similarity floor for a semantic match, range `[0, 1]`.
    pub semantic_similarity_threshold: f64,
    /// Similar entries needed to report a semantic loop, at least 1.
    pub semantic_match_threshold: u32,
    pub pattern_detection_enabled: bool,
    pub min_pattern_length: u32,
    pub max_pattern_length: u32,
    pub pattern_repetition_threshold: u32,
    /// Consecutive errors tolerated before the error-cycle detector fires.
    pub max_consecutive_errors: u32,
    /// Per-tool threshold overrides, matched case/separator-insensitively.
    pub tool_specific_config: HashMap<String, ToolLimits>,
    pub degradation_levels: Vec<DegradationLevelSpec>,
    pub auto_escalation_enabled: bool,
    pub escalation_cooldown_ms: u64,
    /// Host-owned keys preserved across parse/serialize.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for LoopPreventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_window_ms: 300_000,
            exact_match_threshold: 3,
            exact_match_lookback_window: 50,
            semantic_similarity_enabled: true,
            semantic_similarity_threshold: 0.85,
            semantic_match_threshold: 3,
            pattern_detection_enabled: true,
            min_pattern_length: 2,
            max_pattern_length: 4,
            pattern_repetition_threshold: 3,
            max_consecutive_errors: 5,
            tool_specific_config: HashMap::new(),
            degradation_levels: default_degradation_levels(),
            auto_escalation_enabled: true,
            escalation_cooldown_ms: 60_000,
            extra: Map::new(),
        }
    }
}

/// Validation outcome: hard errors and advisory warnings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl LoopPreventionConfig {
    /// Effective thresholds for one tool: per-tool override, else category
    /// default, else the global thresholds.
    pub fn effective_limits(&self, tool_name: &str) -> ToolLimits {
        let canon = canonical_tool_name(tool_name);
        for (configured, limits) in &self.tool_specific_config {
            if canonical_tool_name(configured) == canon {
                return limits.clone();
            }
        }
        if let Some(limits) = get_tool_category(tool_name).default_limits() {
            return limits;
        }
        ToolLimits {
            max_identical_calls: self.exact_match_threshold,
            max_similar_calls: self.semantic_match_threshold,
            max_consecutive_errors: self.max_consecutive_errors,
        }
    }

    /// Report out-of-range fields and suspicious enable/value combinations.
    pub fn validate(&self) -> ConfigValidation {
        let mut report = ConfigValidation::default();

        if !(1..=100).contains(&self.exact_match_threshold) {
            report.errors.push(format!(
                "exact_match_threshold must be in [1, 100], got {}",
                self.exact_match_threshold
            ));
        }
        if !(5..=1000).contains(&self.exact_match_lookback_window) {
            report.errors.push(format!(
                "exact_match_lookback_window must be in [5, 1000], got {}",
                self.exact_match_lookback_window
            ));
        }
        if !(0.0..=1.0).contains(&self.semantic_similarity_threshold) {
            report.errors.push(format!(
                "semantic_similarity_threshold must be in [0, 1], got {}",
                self.semantic_similarity_threshold
            ));
        }
        if self.semantic_match_threshold < 1 {
            report
                .errors
                .push("semantic_match_threshold must be at least 1".to_string());
        }
        if self.min_pattern_length < 1 {
            report
                .errors
                .push("min_pattern_length must be at least 1".to_string());
        }
        if self.min_pattern_length > self.max_pattern_length {
            report.errors.push(format!(
                "min_pattern_length {} exceeds max_pattern_length {}",
                self.min_pattern_length, self.max_pattern_length
            ));
        }
        for descriptor in &self.degradation_levels {
            if descriptor.level > 4 {
                report.errors.push(format!(
                    "degradation level {} is outside 0..=4",
                    descriptor.level
                ));
            }
        }

        if self.semantic_similarity_enabled && self.semantic_similarity_threshold == 0.0 {
            report.warnings.push(
                "semantic similarity is enabled but semantic_similarity_threshold is 0"
                    .to_string(),
            );
        }
        if self.pattern_detection_enabled && self.pattern_repetition_threshold == 0 {
            report.warnings.push(
                "pattern detection is enabled but pattern_repetition_threshold is 0".to_string(),
            );
        }
        if self.auto_escalation_enabled && self.escalation_cooldown_ms == 0 {
            report.warnings.push(
                "auto escalation is enabled but escalation_cooldown_ms is 0".to_string(),
            );
        }

        report
    }

    /// Build a config from a JSON value, applying defaults for missing
    /// fields and clamping out-of-range scalars to the nearest bound.
    /// Values that cannot deserialize at all yield the defaults.
    pub fn from_value(value: &Value) -> Self {
        let mut config: Self = match serde_json::from_value(value.clone()) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(%error, "invalid loop-prevention config, using defaults");
                return Self::default();
            }
        };
        config.clamp_ranges();
        config
    }

    fn clamp_ranges(&mut self) {
        self.exact_match_threshold = self.exact_match_threshold.clamp(1, 100);
        self.exact_match_lookback_window = self.exact_match_lookback_window.clamp(5, 1000);
        self.semantic_similarity_threshold = self.semantic_similarity_threshold.clamp(0.0, 1.0);
        self.semantic_match_threshold = self.semantic_match_threshold.max(1);
        self.min_pattern_length = self.min_pattern_length.max(1);
        self.max_pattern_length = self.max_pattern_length.max(self.min_pattern_length);
        self.pattern_repetition_threshold = self.pattern_repetition_threshold.max(1);
        self.max_consecutive_errors = self.max_consecutive_errors.max(1);
    }

    /// Merge an override on top of this config.
    ///
    /// Present override keys win; `tool_specific_config` merges key-wise
    /// with each overridden tool fully replaced; `degradation_levels` is
    /// fully replaced when the override provides it (even a single entry).
    pub fn merge(&self, overlay: &Value) -> Self {
        let Some(overlay_map) = overlay.as_object() else {
            return self.clone();
        };
        let mut merged = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return self.clone(),
        };

        for (key, value) in overlay_map {
            if key == "tool_specific_config" {
                if let (Some(base_tools), Some(override_tools)) = (
                    merged
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                        .as_object_mut(),
                    value.as_object(),
                ) {
                    for (tool, limits) in override_tools {
                        base_tools.insert(tool.clone(), limits.clone());
                    }
                    continue;
                }
            }
            merged.insert(key.clone(), value.clone());
        }

        Self::from_value(&Value::Object(merged))
    }

    /// Serialize to UTF-8 JSON with two-space indentation.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Parse a config from an optional JSON string. `None` and invalid JSON
/// yield the defaults; partial objects get defaults for missing fields with
/// out-of-range scalars clamped.
pub fn parse_config(input: Option<&str>) -> LoopPreventionConfig {
    let Some(text) = input else {
        return LoopPreventionConfig::default();
    };
    match serde_json::from_str::<Value>(text) {
        Ok(value) => LoopPreventionConfig::from_value(&value),
        Err(error) => {
            tracing::warn!(%error, "unparseable loop-prevention config, using defaults");
            LoopPreventionConfig::default()
        }
    }
}

/// Retrieve a named preset as an independent deep copy.
///
/// Known presets: `strict`, `balanced`, `permissive`, `development`.
pub fn get_preset(name: &str) -> Option<LoopPreventionConfig> {
    let mut config = LoopPreventionConfig::default();
    match name.to_lowercase().as_str() {
        "strict" => {
            config.exact_match_threshold = 2;
            config.semantic_similarity_threshold = 0.75;
        }
        "balanced" => {}
        "permissive" => {
            config.exact_match_threshold = 5;
            config.semantic_similarity_threshold = 0.95;
        }
        "development" => {
            config.exact_match_threshold = 10;
            config.semantic_similarity_enabled = false;
            config.pattern_detection_enabled = false;
            config.auto_escalation_enabled = false;
        }
        _ => return None,
    }
    Some(config)
}
