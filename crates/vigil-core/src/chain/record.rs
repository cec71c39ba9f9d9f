//! Chain record envelope and typed payloads.
//!
//! A chain file is newline-delimited JSON; each line is one [`ChainRecord`]:
//!
//! ```text
//! {"type":"heartbeat","data":{...},"session_id":"...","timestamp":"...",
//!  "prev_hash":"...","hash":"...","signature":"..."}
//! ```

use crate::evaluation::Evaluation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel `prev_hash` of the first record in every chain.
pub const GENESIS: &str = "GENESIS";

/// Signature value stored when no signing key is available.
pub const UNSIGNED: &str = "unsigned";

/// Discriminant of a chain record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    SessionStart,
    Heartbeat,
    Milestone,
    SessionEnd,
    SessionSeal,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::SessionStart => "session_start",
            RecordType::Heartbeat => "heartbeat",
            RecordType::Milestone => "milestone",
            RecordType::SessionEnd => "session_end",
            RecordType::SessionSeal => "session_seal",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `session_start` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartData {
    pub client: String,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub conversation_id: String,
    pub conversation_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

/// Payload of a `heartbeat` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub heartbeat_number: u32,
    pub cumulative_seconds: u64,
}

/// Payload of a `milestone` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneData {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    pub category: String,
    pub complexity: String,
}

/// Payload of a `session_end` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionEndData {
    pub duration_seconds: u64,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    pub files_touched: u32,
    pub heartbeat_count: u32,
    pub milestone_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    pub end_reason: String,
}

/// Payload of a `session_seal` record: a full metadata snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSealData {
    pub client: String,
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    pub conversation_id: String,
    pub conversation_index: u32,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: u64,
    pub heartbeat_count: u32,
    pub record_count: u32,
    pub milestone_count: u32,
    pub files_touched: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    pub chain_start_hash: String,
    pub chain_end_hash: String,
    pub seal_signature: String,
    #[serde(default)]
    pub auto_sealed: bool,
}

/// Typed record body. Serializes adjacently tagged as `"type"` + `"data"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordBody {
    SessionStart(SessionStartData),
    Heartbeat(HeartbeatData),
    Milestone(MilestoneData),
    SessionEnd(SessionEndData),
    SessionSeal(SessionSealData),
}

impl RecordBody {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordBody::SessionStart(_) => RecordType::SessionStart,
            RecordBody::Heartbeat(_) => RecordType::Heartbeat,
            RecordBody::Milestone(_) => RecordType::Milestone,
            RecordBody::SessionEnd(_) => RecordType::SessionEnd,
            RecordBody::SessionSeal(_) => RecordType::SessionSeal,
        }
    }
}

/// One immutable, hash-linked line of a session chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    #[serde(flatten)]
    pub body: RecordBody,
    pub session_id: String,
    pub timestamp: String,
    pub prev_hash: String,
    pub hash: String,
    pub signature: String,
}

impl ChainRecord {
    pub fn record_type(&self) -> RecordType {
        self.body.record_type()
    }

    pub fn is_signed(&self) -> bool {
        self.signature != UNSIGNED
    }

    /// Serializes the record as a single JSONL line (no trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
