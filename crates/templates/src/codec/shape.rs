//! Value-insensitive response shape fingerprints.
//!
//! A fingerprint is the set of typed paths (`$.items[].name:string`) seen in
//! a JSON value plus a sha256 digest of the sorted set. Arrays collapse into
//! one generic `[]` path sampled from their first few elements.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const MAX_DEPTH: usize = 12;
pub const ARRAY_SAMPLES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub paths: BTreeSet<String>,
    /// Array paths that were empty when sampled.
    #[serde(default)]
    pub empty_arrays: BTreeSet<String>,
}

impl Fingerprint {
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<Value>(body).ok().map(|v| fingerprint(&v))
    }
}

pub fn fingerprint(value: &Value) -> Fingerprint {
    let mut paths = BTreeSet::new();
    let mut empty_arrays = BTreeSet::new();
    walk(value, "$", 0, &mut paths, &mut empty_arrays);
    Fingerprint {
        digest: digest(&paths),
        paths,
        empty_arrays,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn walk(
    value: &Value,
    path: &str,
    depth: usize,
    paths: &mut BTreeSet<String>,
    empty_arrays: &mut BTreeSet<String>,
) {
    paths.insert(format!("{path}:{}", type_name(value)));
    if depth >= MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}{}", key_segment(key));
                walk(child, &child_path, depth + 1, paths, empty_arrays);
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                empty_arrays.insert(path.to_string());
            }
            let child_path = format!("{path}[]");
            for item in items.iter().take(ARRAY_SAMPLES) {
                walk(item, &child_path, depth + 1, paths, empty_arrays);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

fn key_segment(key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$');
    if plain {
        format!(".{key}")
    } else {
        format!("[{}]", Value::String(key.to_string()))
    }
}

fn digest(paths: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Jaccard similarity. Two empty sets are identical.
pub fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Similarity of a fresh response against the baseline, ignoring baseline
/// paths under arrays that came back empty.
pub fn drift_similarity(baseline: &Fingerprint, fresh: &Fingerprint) -> f64 {
    if fresh.empty_arrays.is_empty() {
        return similarity(&baseline.paths, &fresh.paths);
    }
    let prefixes: Vec<String> = fresh
        .empty_arrays
        .iter()
        .map(|path| format!("{path}[]"))
        .collect();
    let pruned: BTreeSet<String> = baseline
        .paths
        .iter()
        .filter(|path| !prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())))
        .cloned()
        .collect();
    similarity(&pruned, &fresh.paths)
}
