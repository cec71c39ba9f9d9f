//! Durable index entries: session seals and milestones.

use crate::chain::record::SessionSealData;
use crate::evaluation::Evaluation;
use crate::repository::IndexEntry;
use serde::{Deserialize, Serialize};

/// Denormalized summary of one ended session, keyed by `session_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSeal {
    pub session_id: String,
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
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub conversation_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: u64,
    #[serde(default)]
    pub heartbeat_count: u32,
    #[serde(default)]
    pub record_count: u32,
    #[serde(default)]
    pub milestone_count: u32,
    #[serde(default)]
    pub files_touched: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default)]
    pub chain_start_hash: String,
    #[serde(default)]
    pub chain_end_hash: String,
    #[serde(default)]
    pub seal_signature: String,
    #[serde(default)]
    pub auto_sealed: bool,
}

impl SessionSeal {
    /// Builds an index entry from a `session_seal` payload.
    ///
    /// `chain_end_hash` in the payload is the hash of the `session_end` record
    /// (the seal cannot contain its own hash); callers that know the hash of the
    /// seal record pass it as `seal_record_hash`.
    pub fn from_seal_data(
        session_id: &str,
        data: &SessionSealData,
        seal_record_hash: Option<&str>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            client: data.client.clone(),
            task_type: data.task_type.clone(),
            title: data.title.clone(),
            private_title: data.private_title.clone(),
            project: data.project.clone(),
            model: data.model.clone(),
            languages: data.languages.clone(),
            conversation_id: data.conversation_id.clone(),
            conversation_index: data.conversation_index,
            parent_session_id: None,
            started_at: data.started_at.clone(),
            ended_at: data.ended_at.clone(),
            duration_seconds: data.duration_seconds,
            heartbeat_count: data.heartbeat_count,
            record_count: data.record_count,
            milestone_count: data.milestone_count,
            files_touched: data.files_touched,
            evaluation: None,
            score: data.score,
            chain_start_hash: data.chain_start_hash.clone(),
            chain_end_hash: seal_record_hash
                .map(str::to_string)
                .unwrap_or_else(|| data.chain_end_hash.clone()),
            seal_signature: data.seal_signature.clone(),
            auto_sealed: data.auto_sealed,
        }
    }
}

impl IndexEntry for SessionSeal {
    fn entry_id(&self) -> &str {
        &self.session_id
    }
}

/// Milestone as supplied by the caller at `end`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneInput {
    pub title: String,
    #[serde(default)]
    pub private_title: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_complexity")]
    pub complexity: String,
}

fn default_category() -> String {
    "other".to_string()
}

fn default_complexity() -> String {
    "medium".to_string()
}

/// A discrete accomplishment owned by one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub session_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_title: Option<String>,
    pub category: String,
    pub complexity: String,
    pub recorded_at: String,
    /// Hash of the chain record that recorded it; empty when recorded after an
    /// auto-seal (the sealed chain is never re-opened).
    #[serde(default)]
    pub chain_hash: String,
}

impl Milestone {
    pub fn from_input(
        session_id: &str,
        input: &MilestoneInput,
        recorded_at: &str,
        chain_hash: Option<&str>,
    ) -> Self {
        Self {
            id: format!("m_{}", uuid::Uuid::new_v4().simple()),
            session_id: session_id.to_string(),
            title: input.title.clone(),
            private_title: input.private_title.clone(),
            category: input.category.clone(),
            complexity: input.complexity.clone(),
            recorded_at: recorded_at.to_string(),
            chain_hash: chain_hash.unwrap_or_default().to_string(),
        }
    }
}

impl IndexEntry for Milestone {
    fn entry_id(&self) -> &str {
        &self.id
    }
}
