//! Deterministic similarity between two tool-argument trees.
//!
//! The kernel normalizes both trees, then blends a key-overlap score with a
//! field-weighted value score. Strings use a Levenshtein + longest-common-
//! substring mix with token-Jaccard fallbacks for long inputs; path-like
//! fields get segment-aware comparison; numbers compare relatively; arrays
//! compare as normalized sets; nested objects recurse.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::history::canonical_json;

/// Argument keys that dominate a call's identity and carry double weight.
const HEAVY_KEYS: [&str; 9] = [
    "path", "file", "filename", "filepath", "command", "cmd", "query", "url", "content",
];

/// Inputs longer than this fall back to token Jaccard for Levenshtein.
const LEVENSHTEIN_MAX_LEN: usize = 500;
/// Inputs longer than this fall back to token Jaccard for the LCS ratio.
const LCS_MAX_LEN: usize = 100;

/// Similarity between two argument trees, in `[0, 1]`.
///
/// Symmetric, reflexive, and monotone in key overlap when values are equal.
pub fn args_similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
    let na = normalize_args(a);
    let nb = normalize_args(b);
    if na == nb {
        return 1.0;
    }

    let keys_a: BTreeSet<&str> = na.keys().map(String::as_str).collect();
    let keys_b: BTreeSet<&str> = nb.keys().map(String::as_str).collect();
    let common: Vec<&str> = keys_a.intersection(&keys_b).copied().collect();
    let union_len = keys_a.union(&keys_b).count();

    let key_similarity = if union_len == 0 {
        1.0
    } else {
        common.len() as f64 / union_len as f64
    };

    if common.is_empty() {
        return key_similarity * 0.3;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for &key in &common {
        let weight = if HEAVY_KEYS.contains(&key) { 2.0 } else { 1.0 };
        let sim = value_similarity(key, &na[key], &nb[key]);
        weighted_sum += weight * sim;
        weight_total += weight;
    }
    let value_score = weighted_sum / weight_total;

    let unmatched = (keys_a.len() - common.len()) + (keys_b.len() - common.len());
    let unmatched_penalty = 0.1 * unmatched as f64;

    (key_similarity * 0.2 + value_score * 0.8 - unmatched_penalty).clamp(0.0, 1.0)
}

/// Normalize an argument tree for comparison: keys lowercased and trimmed,
/// strings whitespace-collapsed and lowercased, arrays sorted element-wise,
/// nested maps recursively normalized.
pub fn normalize_args(args: &Map<String, Value>) -> Map<String, Value> {
    args.iter()
        .map(|(k, v)| (normalize_key(k), normalize_value(v)))
        .collect()
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_string(s)),
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items.iter().map(normalize_value).collect();
            normalized.sort_by_key(|v| canonical_json(v));
            Value::Array(normalized)
        }
        Value::Object(map) => Value::Object(normalize_args(map)),
        other => other.clone(),
    }
}

fn normalize_string(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn key_is_pathlike(key: &str) -> bool {
    key.contains("path") || key.contains("file") || key == "url"
}

fn value_similarity(key: &str, a: &Value, b: &Value) -> f64 {
    if a == b {
        return 1.0;
    }
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => 0.0,
        (Value::String(x), Value::String(y)) => {
            if key_is_pathlike(key) {
                path_similarity(x, y)
            } else {
                string_similarity(x, y)
            }
        }
        (Value::Number(x), Value::Number(y)) => {
            number_similarity(x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0))
        }
        (Value::Array(x), Value::Array(y)) => array_similarity(x, y),
        (Value::Object(x), Value::Object(y)) => args_similarity(x, y),
        _ => levenshtein_similarity(&render(a), &render(b)),
    }
}

/// `0.6 * levenshtein + 0.4 * longest-common-substring ratio`.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    0.6 * levenshtein_similarity(a, b) + 0.4 * lcs_ratio(a, b)
}

/// Edit-distance similarity normalized by the longer input, with a token
/// Jaccard fallback beyond [`LEVENSHTEIN_MAX_LEN`] characters.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.chars().count() > LEVENSHTEIN_MAX_LEN || b.chars().count() > LEVENSHTEIN_MAX_LEN {
        return token_jaccard(a, b);
    }
    strsim::normalized_levenshtein(a, b)
}

/// Longest common substring length over the longer input, with a token
/// Jaccard fallback beyond [`LCS_MAX_LEN`] characters.
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.len() > LCS_MAX_LEN || b_chars.len() > LCS_MAX_LEN {
        return token_jaccard(a, b);
    }
    if a_chars.is_empty() && b_chars.is_empty() {
        return 1.0;
    }
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    // Rolling single-row DP over substring end positions.
    let mut longest = 0usize;
    let mut prev = vec![0usize; b_chars.len() + 1];
    for &ca in &a_chars {
        let mut current = vec![0usize; b_chars.len() + 1];
        for (j, &cb) in b_chars.iter().enumerate() {
            if ca == cb {
                current[j + 1] = prev[j] + 1;
                longest = longest.max(current[j + 1]);
            }
        }
        prev = current;
    }
    longest as f64 / a_chars.len().max(b_chars.len()) as f64
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 1.0;
    }
    tokens_a.intersection(&tokens_b).count() as f64 / union as f64
}

fn number_similarity(a: f64, b: f64) -> f64 {
    if a == b {
        return 1.0;
    }
    let denom = a.abs().max(b.abs());
    if denom == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / denom).clamp(0.0, 1.0)
}

fn array_similarity(a: &[Value], b: &[Value]) -> f64 {
    let set_a: BTreeSet<String> = a.iter().map(canonical_json).collect();
    let set_b: BTreeSet<String> = b.iter().map(canonical_json).collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 1.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}

/// Path-aware string similarity: separator- and case-insensitive equality,
/// then basename match, then near-complete shared prefix, then segment
/// Jaccard.
pub fn path_similarity(p: &str, q: &str) -> f64 {
    let a = p.replace('\\', "/").to_lowercase();
    let b = q.replace('\\', "/").to_lowercase();
    if a == b {
        return 1.0;
    }

    let basename_a = a.rsplit('/').next().unwrap_or("");
    let basename_b = b.rsplit('/').next().unwrap_or("");
    if !basename_a.is_empty() && basename_a == basename_b {
        return 0.9;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    let shared = a_chars
        .iter()
        .zip(b_chars.iter())
        .take_while(|(x, y)| x == y)
        .count();
    if max_len > 0 && shared + 1 >= max_len {
        return 0.7 + (shared as f64 / max_len as f64) * 0.2;
    }

    let segments_a: BTreeSet<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let segments_b: BTreeSet<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
    let union = segments_a.union(&segments_b).count();
    if union == 0 {
        return 1.0;
    }
    segments_a.intersection(&segments_b).count() as f64 / union as f64
}
