//! Hash-chained session records.
//!
//! # Module Structure
//!
//! - `record`: record envelope and typed payloads (`ChainRecord`, `RecordBody`)
//! - `canonical`: canonical JSON and the record hash domain
//! - `signer`: Ed25519 key handle (`LedgerKey`)
//! - `builder`: pure record construction
//! - `writer`: appends records and advances the session tip (`ChainWriter`)
//! - `verify`: read-only chain verification

pub mod builder;
pub mod canonical;
pub mod record;
pub mod signer;
pub mod verify;
pub mod writer;

pub use builder::{build_record, build_record_at, format_timestamp, sign_seal};
pub use record::{
    ChainRecord, GENESIS, HeartbeatData, MilestoneData, RecordBody, RecordType,
    SessionEndData, SessionSealData, SessionStartData, UNSIGNED,
};
pub use signer::{LedgerKey, verify_hash_signature};
pub use verify::{ChainBreak, ChainVerification, verify_chain};
pub use writer::ChainWriter;
