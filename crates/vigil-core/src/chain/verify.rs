//! Read-only chain verification.
//!
//! Hashes are recomputed from the raw JSON of each line so fields unknown to
//! this build still count toward the hash.

use super::canonical::record_hash;
use super::record::{GENESIS, UNSIGNED};
use super::signer::verify_hash_signature;
use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use serde_json::Value;

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainBreak {
    Malformed { reason: String },
    SessionMismatch { expected: String, found: String },
    PrevHashMismatch { expected: String, found: String },
    HashMismatch { expected: String, found: String },
    BadSignature,
}

/// Result of verifying one chain file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub record_count: usize,
    pub signed_count: usize,
    /// Index of the first failing record and the failure.
    pub broken_at: Option<(usize, ChainBreak)>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.broken_at.is_none()
    }
}

/// Verifies a JSONL chain document.
///
/// Checks, per record: parseable envelope, consistent `session_id`, `prev_hash`
/// linkage starting at `GENESIS`, recomputed hash. With a verifying key, every
/// signed record's signature is checked as well; `"unsigned"` records pass.
pub fn verify_chain(content: &str, verifying_key: Option<&VerifyingKey>) -> ChainVerification {
    let mut expected_prev = GENESIS.to_string();
    let mut session: Option<String> = None;
    let mut record_count = 0;
    let mut signed_count = 0;

    for (index, line) in content.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        record_count = index + 1;
        let fields = match envelope_fields(line) {
            Ok(fields) => fields,
            Err(reason) => {
                return ChainVerification {
                    record_count,
                    signed_count,
                    broken_at: Some((index, ChainBreak::Malformed { reason })),
                };
            }
        };

        let broken = check_record(&fields, &mut session, &expected_prev, verifying_key);
        if let Some(reason) = broken {
            return ChainVerification {
                record_count,
                signed_count,
                broken_at: Some((index, reason)),
            };
        }

        if fields.signature != UNSIGNED {
            signed_count += 1;
        }
        expected_prev = fields.hash;
    }

    ChainVerification {
        record_count,
        signed_count,
        broken_at: None,
    }
}

struct EnvelopeFields {
    record_type: String,
    session_id: String,
    data: Value,
    prev_hash: String,
    hash: String,
    signature: String,
}

fn envelope_fields(line: &str) -> Result<EnvelopeFields, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let text = |key: &str| -> Result<String, String> {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("missing string field '{}'", key))
    };

    Ok(EnvelopeFields {
        record_type: text("type")?,
        session_id: text("session_id")?,
        data: value.get("data").cloned().unwrap_or(Value::Null),
        prev_hash: text("prev_hash")?,
        hash: text("hash")?,
        signature: text("signature")?,
    })
}

fn check_record(
    fields: &EnvelopeFields,
    session: &mut Option<String>,
    expected_prev: &str,
    verifying_key: Option<&VerifyingKey>,
) -> Option<ChainBreak> {
    match session {
        Some(expected) if *expected != fields.session_id => {
            return Some(ChainBreak::SessionMismatch {
                expected: expected.clone(),
                found: fields.session_id.clone(),
            });
        }
        Some(_) => {}
        None => *session = Some(fields.session_id.clone()),
    }

    if fields.prev_hash != expected_prev {
        return Some(ChainBreak::PrevHashMismatch {
            expected: expected_prev.to_string(),
            found: fields.prev_hash.clone(),
        });
    }

    let recomputed = record_hash(
        &fields.record_type,
        &fields.session_id,
        &fields.data,
        &fields.prev_hash,
    );
    if recomputed != fields.hash {
        return Some(ChainBreak::HashMismatch {
            expected: recomputed,
            found: fields.hash.clone(),
        });
    }

    if let Some(key) = verifying_key {
        if fields.signature != UNSIGNED
            && !verify_hash_signature(key, &fields.hash, &fields.signature)
        {
            return Some(ChainBreak::BadSignature);
        }
    }

    None
}
