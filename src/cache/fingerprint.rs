//! Deterministic cache-key derivation (spec.md §4.6 "Key derivation")

use sha2::{Digest, Sha256};

use crate::ports::llm::LlmParams;

/// Computes the fingerprint for a `(prompt, model, params)` triple.
///
/// `sha256(prompt || "|" || model || "|" || sortedParamString)`, where
/// `sortedParamString` renders each parameter as `key=value;` in
/// lexicographic key order — so two logically-identical calls always
/// collide on cache key regardless of map iteration order.
#[must_use]
pub fn fingerprint(prompt: &str, model: &str, params: &LlmParams) -> String {
    let param_string = serialize_params(params);
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(param_string.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Renders `params` as `key=value;` pairs in lexicographic key order.
///
/// `LlmParams` is a `BTreeMap`, so iteration is already key-sorted; this
/// function exists as the named, testable seam for that guarantee.
#[must_use]
pub fn serialize_params(params: &LlmParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v};"))
        .collect::<String>()
}
