//! Stable token vocabulary and concept IDs.
//!
//! Every `@`-token has a concept ID (CID) derived by hashing the token under
//! a versioned namespace. Programs may use either form; [`normalize_node`]
//! rewrites CID keys and kind values back to their textual tokens, and folds
//! the `@in`/`@out` aliases into the `in`/`out` fields.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Namespace prefix keeping CIDs consistent across vocabulary versions.
const NAMESPACE: &str = "alp.vocab/1/";

/// Canonical vocabulary with human-readable meanings.
const VOCAB_MEANINGS: &[(&str, &str)] = &[
    ("@def", "declare entity/type"),
    ("@fn", "function node"),
    ("@op", "primitive operation (symbolic)"),
    ("@llm", "LLM operation"),
    ("@tool", "external tool call"),
    ("@flow", "control/data edges"),
    ("@import", "load another program file"),
    ("@in", "inputs"),
    ("@out", "outputs"),
    ("@expect", "output contract/schema"),
    ("@shape", "schema/struct definition"),
    ("@const", "constant literal"),
    ("@retry", "retry policy"),
];

/// Node kinds the parser recognizes.
const KINDS: &[&str] = &["@def", "@shape", "@fn", "@flow", "@tool", "@import"];

/// Top-level node keys subject to normalization. `@in`/`@out` fold into the
/// bare field names; the rest normalize to themselves (from CID form).
const TOP_LEVEL_KEYS: &[(&str, &str)] = &[
    ("@const", "@const"),
    ("@op", "@op"),
    ("@llm", "@llm"),
    ("@retry", "@retry"),
    ("@expect", "@expect"),
    ("@in", "in"),
    ("@out", "out"),
];

/// One row of the exported vocabulary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabEntry {
    /// Textual token, e.g. `@shape`.
    pub token: String,
    /// Stable concept ID, e.g. `0x1a2b…`.
    pub cid: String,
    /// Human-readable meaning.
    pub meaning: String,
}

/// Derive the concept ID for a token: `0x` plus the first 16 hex chars of
/// `sha256(namespace + token)`.
pub fn token_to_cid(token: &str) -> String {
    let digest = Sha256::digest(format!("{NAMESPACE}{token}").as_bytes());
    format!("0x{}", &hex::encode(digest)[..16])
}

/// Map a CID back to its token. Textual tokens pass through unchanged;
/// unknown strings are returned as-is.
pub fn cid_to_token(cid_or_token: &str) -> String {
    if VOCAB_MEANINGS.iter().any(|(tok, _)| *tok == cid_or_token) {
        return cid_or_token.to_string();
    }
    let lower = cid_or_token.to_ascii_lowercase();
    for (token, _) in VOCAB_MEANINGS {
        if token_to_cid(token).to_ascii_lowercase() == lower {
            return (*token).to_string();
        }
    }
    cid_or_token.to_string()
}

/// Export the full token/CID/meaning table for documentation tooling.
pub fn export_vocab() -> Vec<VocabEntry> {
    VOCAB_MEANINGS
        .iter()
        .map(|(token, meaning)| VocabEntry {
            token: (*token).to_string(),
            cid: token_to_cid(token),
            meaning: (*meaning).to_string(),
        })
        .collect()
}

/// Normalize a raw node object in place:
///
/// - a CID `kind` value becomes its textual token (known kinds only),
/// - CID top-level keys become their textual aliases,
/// - `@in`/`@out` keys (textual or CID) become `in`/`out`.
pub fn normalize_node(node: &mut Map<String, Value>) {
    if let Some(Value::String(kind)) = node.get("kind") {
        let token = cid_to_token(kind);
        if KINDS.contains(&token.as_str()) {
            node.insert("kind".to_string(), Value::String(token));
        }
    }

    let mut renames: Vec<(String, String)> = Vec::new();
    for key in node.keys() {
        if let Some((_, normalized)) = TOP_LEVEL_KEYS.iter().find(|(tok, _)| tok == key) {
            if *normalized != key {
                renames.push((key.clone(), (*normalized).to_string()));
            }
            continue;
        }
        let token = cid_to_token(key);
        if let Some((_, normalized)) = TOP_LEVEL_KEYS.iter().find(|(tok, _)| *tok == token) {
            renames.push((key.clone(), (*normalized).to_string()));
        }
    }
    for (from, to) in renames {
        if let Some(value) = node.remove(&from) {
            node.insert(to, value);
        }
    }
}
