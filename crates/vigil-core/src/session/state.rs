//! Per-connection session state machine.
//!
//! A [`SessionState`] owns one live [`SessionFrame`] plus a stack of suspended
//! parent frames. Child (subagent) sessions push the parent frame with
//! [`SessionState::save_parent_state`] and pop it back with
//! [`SessionState::restore_parent_state`]; the child's records never touch the
//! parent's chain cursor.

use crate::chain::record::{ChainRecord, GENESIS};
use crate::chain::signer::LedgerKey;
use crate::error::{Result, VigilError};
use crate::repository::KeyProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task type recorded when the caller does not provide one.
pub const DEFAULT_TASK_TYPE: &str = "coding";

/// Lifecycle phase derived from the live frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Started,
    Active,
    Sealed,
}

/// Everything that belongs to one logical session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    // identity
    pub session_id: String,
    pub conversation_id: String,
    pub conversation_index: u32,
    #[serde(default)]
    pub mcp_session_id: Option<String>,

    // chain cursor
    pub chain_tip_hash: String,
    pub session_record_count: u32,
    #[serde(default)]
    pub chain_start_hash: Option<String>,
    #[serde(default)]
    pub sealed: bool,

    // descriptive
    pub client_name: String,
    pub task_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub private_title: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,

    // timers and counters
    #[serde(default)]
    pub session_start_time: Option<DateTime<Utc>>,
    pub heartbeat_count: u32,
    pub last_activity_time: DateTime<Utc>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub in_progress_since: Option<DateTime<Utc>>,

    // nesting and recovery
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub completed_children: Vec<String>,
    #[serde(default)]
    pub auto_sealed_session_id: Option<String>,
}

impl SessionFrame {
    fn fresh(client_name: String) -> Self {
        Self {
            session_id: new_id(),
            conversation_id: new_id(),
            conversation_index: 0,
            mcp_session_id: None,
            chain_tip_hash: GENESIS.to_string(),
            session_record_count: 0,
            chain_start_hash: None,
            sealed: false,
            client_name,
            task_type: DEFAULT_TASK_TYPE.to_string(),
            title: None,
            private_title: None,
            project: None,
            model_id: None,
            session_start_time: None,
            heartbeat_count: 0,
            last_activity_time: Utc::now(),
            in_progress: false,
            in_progress_since: None,
            parent_session_id: None,
            completed_children: Vec::new(),
            auto_sealed_session_id: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.sealed, self.session_record_count) {
            (true, _) => SessionPhase::Sealed,
            (false, 0) => SessionPhase::Idle,
            (false, 1) => SessionPhase::Started,
            (false, _) => SessionPhase::Active,
        }
    }

    /// Wall-clock seconds since the session started (0 before start).
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.session_start_time
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Immutable copy of a suspended parent frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    frame: SessionFrame,
}

impl SessionSnapshot {
    pub fn session_id(&self) -> &str {
        &self.frame.session_id
    }

    pub fn chain_tip_hash(&self) -> &str {
        &self.frame.chain_tip_hash
    }

    pub fn frame(&self) -> &SessionFrame {
        &self.frame
    }
}

/// Live session state for one connection or turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub frame: SessionFrame,
    #[serde(default)]
    parents: Vec<SessionSnapshot>,
    #[serde(skip)]
    signing_key: Option<LedgerKey>,
    #[serde(skip)]
    signing_available: bool,
}

impl SessionState {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            frame: SessionFrame::fresh(client_name.into()),
            parents: Vec::new(),
            signing_key: None,
            signing_available: false,
        }
    }

    // ============================================================================
    // Signing
    // ============================================================================

    /// Loads the signing key from the provider. A missing key means unsigned mode.
    pub fn initialize_signing(&mut self, provider: &dyn KeyProvider) {
        match provider.load_or_create() {
            Some(key) => {
                tracing::info!(key_id = %key.key_id(), "Signing key loaded");
                self.set_signing_key(Some(key));
            }
            None => {
                tracing::warn!("No signing key available, records will be unsigned");
                self.set_signing_key(None);
            }
        }
    }

    pub fn set_signing_key(&mut self, key: Option<LedgerKey>) {
        self.signing_available = key.is_some();
        self.signing_key = key;
    }

    pub fn signing_key(&self) -> Option<&LedgerKey> {
        self.signing_key.as_ref()
    }

    pub fn signing_available(&self) -> bool {
        self.signing_available
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    pub fn session_id(&self) -> &str {
        &self.frame.session_id
    }

    pub fn chain_tip_hash(&self) -> &str {
        &self.frame.chain_tip_hash
    }

    pub fn record_count(&self) -> u32 {
        self.frame.session_record_count
    }

    pub fn phase(&self) -> SessionPhase {
        self.frame.phase()
    }

    pub fn nesting_depth(&self) -> usize {
        self.parents.len()
    }

    pub fn is_child(&self) -> bool {
        !self.parents.is_empty()
    }

    pub fn parent(&self) -> Option<&SessionSnapshot> {
        self.parents.last()
    }

    // ============================================================================
    // Transitions
    // ============================================================================

    /// Starts a new logical session in this state.
    ///
    /// Identity and chain cursor are re-initialized; signing key, client name,
    /// transport id and conversation id are kept, and the conversation index
    /// advances by one.
    pub fn reset(&mut self) {
        let previous = std::mem::replace(&mut self.frame, SessionFrame::fresh(String::new()));
        self.frame.client_name = previous.client_name;
        self.frame.mcp_session_id = previous.mcp_session_id;
        self.frame.conversation_id = previous.conversation_id;
        self.frame.conversation_index = previous.conversation_index.saturating_add(1);
    }

    /// Advances the chain cursor past a record that is durably on disk.
    pub fn advance(&mut self, record: &ChainRecord) {
        let frame = &mut self.frame;
        if frame.chain_start_hash.is_none() {
            frame.chain_start_hash = Some(record.hash.clone());
        }
        frame.chain_tip_hash = record.hash.clone();
        frame.session_record_count += 1;
        frame.last_activity_time = Utc::now();
    }

    /// Marks the live session as in flight from `at`.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.frame.session_start_time = Some(at);
        self.frame.in_progress = true;
        self.frame.in_progress_since = Some(at);
    }

    /// Marks the live session as sealed; the chain cursor stays readable.
    pub fn mark_sealed(&mut self) {
        self.frame.sealed = true;
        self.frame.in_progress = false;
        self.frame.in_progress_since = None;
    }

    /// Records that an external sweep sealed the live chain.
    ///
    /// The chain cursor is cleared so a later `end` routes to enrichment.
    pub fn mark_auto_sealed(&mut self) {
        let sealed_id = self.frame.session_id.clone();
        self.frame.chain_tip_hash = GENESIS.to_string();
        self.frame.session_record_count = 0;
        self.frame.in_progress = false;
        self.frame.in_progress_since = None;
        self.frame.auto_sealed_session_id = Some(sealed_id);
    }

    /// Suspends the live frame so a child session can run.
    pub fn save_parent_state(&mut self) {
        tracing::debug!(
            parent_session_id = %self.frame.session_id,
            depth = self.parents.len() + 1,
            "Suspending parent session"
        );
        self.parents.push(SessionSnapshot {
            frame: self.frame.clone(),
        });
    }

    /// Resumes the most recently suspended parent frame.
    ///
    /// The parent's identity, chain cursor and counters come back exactly as
    /// saved; the finished child's id is added to `completed_children`.
    pub fn restore_parent_state(&mut self) -> Result<()> {
        let snapshot = self
            .parents
            .pop()
            .ok_or_else(|| VigilError::internal("no parent session to restore"))?;
        let child_id = std::mem::replace(&mut self.frame, snapshot.frame).session_id;
        self.frame.completed_children.push(child_id);
        tracing::debug!(
            session_id = %self.frame.session_id,
            "Restored parent session"
        );
        Ok(())
    }

    /// Drops a child that never wrote a record and resumes its parent.
    pub fn abandon_child(&mut self) -> Result<()> {
        let snapshot = self
            .parents
            .pop()
            .ok_or_else(|| VigilError::internal("no parent session to restore"))?;
        self.frame = snapshot.frame;
        Ok(())
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::build_record;
    use crate::chain::record::{HeartbeatData, RecordBody};

    fn append_heartbeat(state: &mut SessionState) -> ChainRecord {
        let body = RecordBody::Heartbeat(HeartbeatData {
            heartbeat_number: state.frame.heartbeat_count + 1,
            cumulative_seconds: 0,
        });
        let record = build_record(
            body,
            state.session_id(),
            state.chain_tip_hash(),
            state.signing_key(),
        )
        .unwrap();
        state.advance(&record);
        record
    }

    struct FixedKey(LedgerKey);

    impl KeyProvider for FixedKey {
        fn load_or_create(&self) -> Option<LedgerKey> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_new_state_is_idle_at_genesis() {
        let state = SessionState::new("cursor");
        assert_eq!(state.phase(), SessionPhase::Idle);
        assert_eq!(state.chain_tip_hash(), GENESIS);
        assert_eq!(state.record_count(), 0);
        assert!(!state.signing_available());
    }

    #[test]
    fn test_phase_follows_record_count() {
        let mut state = SessionState::new("cursor");
        append_heartbeat(&mut state);
        assert_eq!(state.phase(), SessionPhase::Started);
        append_heartbeat(&mut state);
        assert_eq!(state.phase(), SessionPhase::Active);
        state.mark_sealed();
        assert_eq!(state.phase(), SessionPhase::Sealed);
    }

    #[test]
    fn test_advance_tracks_tip() {
        let mut state = SessionState::new("cursor");
        let first = append_heartbeat(&mut state);
        let second = append_heartbeat(&mut state);
        assert_eq!(state.chain_tip_hash(), second.hash);
        assert_eq!(state.frame.chain_start_hash.as_deref(), Some(first.hash.as_str()));
    }

    #[test]
    fn test_reset_keeps_identity_adjacent_fields() {
        let mut state = SessionState::new("cursor");
        state.initialize_signing(&FixedKey(LedgerKey::from_seed(&[1u8; 32])));
        state.frame.mcp_session_id = Some("mcp-1".to_string());
        state.frame.title = Some("Fix parser".to_string());
        state.frame.heartbeat_count = 4;
        append_heartbeat(&mut state);

        let old_session = state.session_id().to_string();
        let conversation = state.frame.conversation_id.clone();
        let key_id = state.signing_key().unwrap().key_id();

        state.reset();

        assert_ne!(state.session_id(), old_session);
        assert_eq!(state.chain_tip_hash(), GENESIS);
        assert_eq!(state.record_count(), 0);
        assert_eq!(state.frame.heartbeat_count, 0);
        assert!(state.frame.title.is_none());
        assert_eq!(state.frame.conversation_id, conversation);
        assert_eq!(state.frame.conversation_index, 1);
        assert_eq!(state.frame.client_name, "cursor");
        assert_eq!(state.frame.mcp_session_id.as_deref(), Some("mcp-1"));
        assert!(state.signing_available());
        assert_eq!(state.signing_key().unwrap().key_id(), key_id);
    }

    #[test]
    fn test_restore_reproduces_parent_cursor() {
        let mut state = SessionState::new("cursor");
        append_heartbeat(&mut state);
        append_heartbeat(&mut state);
        let parent_id = state.session_id().to_string();
        let parent_tip = state.chain_tip_hash().to_string();
        let parent_frame = state.frame.clone();

        state.save_parent_state();
        state.reset();
        assert!(state.is_child());
        assert_eq!(state.chain_tip_hash(), GENESIS);
        append_heartbeat(&mut state);
        let child_id = state.session_id().to_string();

        state.restore_parent_state().unwrap();
        assert!(!state.is_child());
        assert_eq!(state.session_id(), parent_id);
        assert_eq!(state.chain_tip_hash(), parent_tip);
        assert_eq!(state.record_count(), 2);
        assert_eq!(state.frame.completed_children, vec![child_id]);

        let mut expected = parent_frame;
        expected.completed_children = state.frame.completed_children.clone();
        assert_eq!(state.frame, expected);
    }

    #[test]
    fn test_nested_children_unwind_in_order() {
        let mut state = SessionState::new("cursor");
        append_heartbeat(&mut state);
        let root = state.session_id().to_string();

        state.save_parent_state();
        state.reset();
        append_heartbeat(&mut state);
        let middle = state.session_id().to_string();

        state.save_parent_state();
        state.reset();
        assert_eq!(state.nesting_depth(), 2);

        state.restore_parent_state().unwrap();
        assert_eq!(state.session_id(), middle);
        state.restore_parent_state().unwrap();
        assert_eq!(state.session_id(), root);
    }

    #[test]
    fn test_abandon_child_skips_bookkeeping() {
        let mut state = SessionState::new("cursor");
        append_heartbeat(&mut state);
        let parent_id = state.session_id().to_string();

        state.save_parent_state();
        state.reset();
        state.abandon_child().unwrap();

        assert_eq!(state.session_id(), parent_id);
        assert!(state.frame.completed_children.is_empty());
        assert!(!state.is_child());
    }

    #[test]
    fn test_restore_without_parent_fails() {
        let mut state = SessionState::new("cursor");
        assert!(state.restore_parent_state().is_err());
    }

    #[test]
    fn test_mark_auto_sealed_clears_cursor() {
        let mut state = SessionState::new("cursor");
        state.mark_started(Utc::now());
        append_heartbeat(&mut state);
        let id = state.session_id().to_string();

        state.mark_auto_sealed();
        assert_eq!(state.record_count(), 0);
        assert!(!state.frame.in_progress);
        assert_eq!(state.frame.auto_sealed_session_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_serialized_state_never_contains_key() {
        let mut state = SessionState::new("cursor");
        state.set_signing_key(Some(LedgerKey::from_seed(&[5u8; 32])));
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("signing"));

        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert!(restored.signing_key().is_none());
        assert_eq!(restored.session_id(), state.session_id());
    }
}
