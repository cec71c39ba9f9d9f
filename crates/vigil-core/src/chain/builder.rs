//! Pure construction of hashed (and optionally signed) chain records.

use super::canonical::{canonical_json, record_hash, sha256_hex};
use super::record::{ChainRecord, RecordBody, SessionSealData, UNSIGNED};
use super::signer::LedgerKey;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};

/// Formats an instant the way every record timestamp is written.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds a record stamped with the current time.
pub fn build_record(
    body: RecordBody,
    session_id: &str,
    prev_hash: &str,
    signing_key: Option<&LedgerKey>,
) -> Result<ChainRecord> {
    build_record_at(body, session_id, prev_hash, signing_key, Utc::now())
}

/// Builds a record with an explicit timestamp.
///
/// The hash covers `{type, session_id, data, prev_hash}`; with a key the hash is
/// signed, without one the signature is `"unsigned"`. Only payload serialization
/// can fail.
pub fn build_record_at(
    body: RecordBody,
    session_id: &str,
    prev_hash: &str,
    signing_key: Option<&LedgerKey>,
    at: DateTime<Utc>,
) -> Result<ChainRecord> {
    let envelope = serde_json::to_value(&body)?;
    let data = envelope
        .get("data")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let hash = record_hash(body.record_type().as_str(), session_id, &data, prev_hash);
    let signature = match signing_key {
        Some(key) => key.sign_hash(&hash),
        None => UNSIGNED.to_string(),
    };

    Ok(ChainRecord {
        body,
        session_id: session_id.to_string(),
        timestamp: format_timestamp(at),
        prev_hash: prev_hash.to_string(),
        hash,
        signature,
    })
}

/// Signs a seal payload and stores the result in `seal_signature`.
///
/// The signed digest is the SHA-256 of the canonical payload with an empty
/// `seal_signature`. Without a key the signature is `"unsigned"`.
pub fn sign_seal(data: &mut SessionSealData, signing_key: Option<&LedgerKey>) -> Result<()> {
    data.seal_signature = String::new();
    let digest = sha256_hex(canonical_json(&serde_json::to_value(&*data)?).as_bytes());
    data.seal_signature = match signing_key {
        Some(key) => key.sign_hash(&digest),
        None => UNSIGNED.to_string(),
    };
    Ok(())
}
