//! Session lifecycle orchestration.
//!
//! [`SessionLifecycle`] drives one [`SessionState`] through start, heartbeat
//! and end, writing chain records through the [`ChainStore`] and keeping the
//! session and milestone indexes current. It holds no per-session state
//! itself, so one instance can serve every client of a daemon.

use crate::enrichment::EnrichTarget;
use crate::identity::ClientIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_core::Result;
use vigil_core::chain::{
    ChainWriter, HeartbeatData, MilestoneData, RecordBody, SessionEndData, SessionSealData,
    SessionStartData, format_timestamp, sign_seal,
};
use vigil_core::config::VigilConfig;
use vigil_core::evaluation::{Evaluation, EvaluationScorer, WeightedScorer};
use vigil_core::repository::{ChainStore, IndexRepository, SealLocation};
use vigil_core::session::{DEFAULT_TASK_TYPE, Milestone, MilestoneInput, SessionSeal, SessionState};

/// Callback that seals a superseded session before the state is reset.
pub type SealBeforeReset = Arc<dyn Fn() + Send + Sync>;

pub const END_REASON_COMPLETED: &str = "completed";
pub const END_REASON_SUPERSEDED: &str = "superseded";
pub const END_REASON_AUTO_SEALED: &str = "auto_sealed";

/// Arguments of `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub task_type: Option<String>,
    pub title: Option<String>,
    pub private_title: Option<String>,
    pub project: Option<String>,
    pub model: Option<String>,
    /// Conversation id echoed back by the caller, possibly truncated.
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub session_id: String,
    pub conversation_id: String,
    pub conversation_index: u32,
    pub client: String,
    /// Set when the session was started as a child of a suspended session.
    pub parent_session_id: Option<String>,
    pub signed: bool,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    Recorded {
        heartbeat_number: u32,
        elapsed_seconds: u64,
        summary: String,
    },
    NotStarted {
        summary: String,
    },
}

impl HeartbeatOutcome {
    pub fn summary(&self) -> &str {
        match self {
            HeartbeatOutcome::Recorded { summary, .. }
            | HeartbeatOutcome::NotStarted { summary } => summary,
        }
    }
}

/// Arguments of `end`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndRequest {
    /// Names an already-sealed session to enrich when no session is live.
    pub session_id: Option<String>,
    pub task_type: Option<String>,
    pub languages: Vec<String>,
    pub files_touched_count: Option<u32>,
    pub milestones: Vec<MilestoneInput>,
    pub evaluation: Option<Evaluation>,
}

/// What an `end` call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndSummary {
    pub session_id: String,
    pub duration_seconds: u64,
    pub record_count: u32,
    pub milestone_count: u32,
    pub score: Option<u32>,
    pub signed: bool,
    pub location: Option<SealLocation>,
    /// Parent session resumed after a child ended.
    pub resumed_parent: Option<String>,
    /// Index write failure; the chain itself is sealed regardless.
    pub index_error: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EndOutcome {
    /// The live session was sealed.
    Ended(EndSummary),
    /// Late fields were merged into an auto-sealed session.
    Enriched(EndSummary),
    NothingToEnd { summary: String },
}

impl EndOutcome {
    pub(crate) fn nothing_to_end(summary: impl Into<String>) -> Self {
        EndOutcome::NothingToEnd {
            summary: summary.into(),
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            EndOutcome::Ended(s) | EndOutcome::Enriched(s) => &s.summary,
            EndOutcome::NothingToEnd { summary } => summary,
        }
    }
}

/// Fields that close a session: everything after the last heartbeat.
pub(crate) struct SealInput {
    pub end_reason: &'static str,
    pub languages: Vec<String>,
    pub files_touched: u32,
    pub evaluation: Option<Evaluation>,
    pub milestones: Vec<MilestoneInput>,
    pub auto_sealed: bool,
    pub ended_at: DateTime<Utc>,
}

impl SealInput {
    pub(crate) fn bare(end_reason: &'static str, ended_at: DateTime<Utc>) -> Self {
        Self {
            end_reason,
            languages: Vec::new(),
            files_touched: 0,
            evaluation: None,
            milestones: Vec::new(),
            auto_sealed: false,
            ended_at,
        }
    }
}

pub(crate) struct SealedSession {
    pub entry: SessionSeal,
    pub location: SealLocation,
    pub index_error: Option<String>,
}

/// Orchestrates session start, heartbeat and end.
///
/// # Responsibilities
///
/// - Deciding whether a new start suspends the live session as a parent or
///   supersedes it
/// - Conversation id reconciliation
/// - Writing the closing `session_end` / `session_seal` pair and the index entries
/// - Resuming the parent when a child ends
pub struct SessionLifecycle {
    pub(crate) config: VigilConfig,
    pub(crate) chains: Arc<dyn ChainStore>,
    pub(crate) sessions: Arc<dyn IndexRepository<SessionSeal>>,
    pub(crate) milestones: Arc<dyn IndexRepository<Milestone>>,
    pub(crate) scorer: Arc<dyn EvaluationScorer>,
    identity: ClientIdentity,
    seal_before_reset: Option<SealBeforeReset>,
}

impl SessionLifecycle {
    pub fn new(
        config: VigilConfig,
        chains: Arc<dyn ChainStore>,
        sessions: Arc<dyn IndexRepository<SessionSeal>>,
        milestones: Arc<dyn IndexRepository<Milestone>>,
    ) -> Self {
        let identity = ClientIdentity::from_env(config.client_name.clone());
        Self {
            config,
            chains,
            sessions,
            milestones,
            scorer: Arc::new(WeightedScorer::default()),
            identity,
            seal_before_reset: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn EvaluationScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Installs an external hook that seals superseded sessions.
    ///
    /// Without a hook, superseded sessions are sealed in-process with
    /// `end_reason = "superseded"`.
    pub fn with_seal_before_reset(mut self, hook: SealBeforeReset) -> Self {
        self.seal_before_reset = Some(hook);
        self
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    // ============================================================================
    // Start
    // ============================================================================

    pub async fn start(
        &self,
        state: &mut SessionState,
        request: StartRequest,
    ) -> Result<StartOutcome> {
        let now = Utc::now();
        let child = self.settle_previous(state, now).await?;
        let parent_session_id = child.then(|| state.session_id().to_string());
        let previous_conversation = state.frame.conversation_id.clone();

        state.reset();
        self.reconcile_conversation(
            state,
            request.conversation_id.as_deref(),
            &previous_conversation,
            child,
        );

        let handshake = state.frame.client_name.clone();
        state.frame.client_name = self.identity.resolve(Some(&handshake));
        state.frame.task_type = request
            .task_type
            .and_then(non_blank)
            .unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string());
        state.frame.title = request.title.and_then(non_blank);
        state.frame.private_title = request.private_title.and_then(non_blank);
        state.frame.project = request.project.and_then(non_blank);
        state.frame.model_id = request.model.and_then(non_blank);
        state.frame.parent_session_id = parent_session_id.clone();
        state.mark_started(now);

        let frame = &state.frame;
        let body = RecordBody::SessionStart(SessionStartData {
            client: frame.client_name.clone(),
            task_type: frame.task_type.clone(),
            title: frame.title.clone(),
            private_title: frame.private_title.clone(),
            project: frame.project.clone(),
            model: frame.model_id.clone(),
            conversation_id: frame.conversation_id.clone(),
            conversation_index: frame.conversation_index,
            parent_session_id: frame.parent_session_id.clone(),
        });

        if let Err(e) = ChainWriter::new(self.chains.as_ref()).append(state, body) {
            if child {
                state.abandon_child()?;
            }
            return Err(e);
        }

        let frame = &state.frame;
        tracing::info!(
            session_id = %frame.session_id,
            conversation_id = %frame.conversation_id,
            client = %frame.client_name,
            child,
            "Session started"
        );

        let mut summary = format!(
            "Session {} started ({}, {}).\nConversation: {} #{}",
            frame.session_id,
            frame.client_name,
            frame.task_type,
            frame.conversation_id,
            frame.conversation_index
        );
        if let Some(parent) = &parent_session_id {
            summary.push_str(&format!("\nRunning as a child of session {}.", parent));
        }
        if !state.signing_available() {
            summary.push_str("\nNo signing key available; records are unsigned.");
        }

        Ok(StartOutcome {
            session_id: frame.session_id.clone(),
            conversation_id: frame.conversation_id.clone(),
            conversation_index: frame.conversation_index,
            client: frame.client_name.clone(),
            parent_session_id,
            signed: state.signing_available(),
            summary,
        })
    }

    /// Deals with a session still in flight when a new one starts.
    ///
    /// Returns `true` when the live session was suspended as a parent.
    async fn settle_previous(&self, state: &mut SessionState, now: DateTime<Utc>) -> Result<bool> {
        loop {
            let frame = &state.frame;

            // A child that the sweep already sealed is finished.
            if frame.session_record_count == 0 {
                if frame.auto_sealed_session_id.is_some() && state.is_child() {
                    state.restore_parent_state()?;
                    continue;
                }
                return Ok(false);
            }
            if !frame.in_progress || frame.sealed {
                return Ok(false);
            }

            if self.is_child_start(state, now) {
                state.save_parent_state();
                return Ok(true);
            }

            self.supersede(state, now).await;
            if !state.is_child() {
                return Ok(false);
            }
            state.restore_parent_state()?;
        }
    }

    fn is_child_start(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        let idle = (now - state.frame.last_activity_time).num_seconds();
        state.nesting_depth() < self.config.max_nesting_depth
            && idle <= self.config.child_session_window_secs as i64
    }

    async fn supersede(&self, state: &mut SessionState, now: DateTime<Utc>) {
        let session_id = state.session_id().to_string();
        match &self.seal_before_reset {
            Some(hook) => {
                tracing::info!(session_id = %session_id, "Sealing superseded session via hook");
                hook();
            }
            None => {
                let input = SealInput::bare(END_REASON_SUPERSEDED, now);
                match self.seal_live(state, input).await {
                    Ok(_) => tracing::info!(session_id = %session_id, "Sealed superseded session"),
                    Err(e) => tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to seal superseded session, leaving it active"
                    ),
                }
            }
        }
    }

    fn reconcile_conversation(
        &self,
        state: &mut SessionState,
        supplied: Option<&str>,
        previous: &str,
        child: bool,
    ) {
        let supplied = supplied.map(str::trim).filter(|id| !id.is_empty());
        match supplied {
            Some(id) if self.matches_conversation(id, previous) => {}
            Some(id) => {
                state.frame.conversation_id = id.to_string();
                state.frame.conversation_index = 0;
            }
            None if child => {}
            None => {
                state.frame.conversation_id = uuid::Uuid::new_v4().to_string();
                state.frame.conversation_index = 0;
            }
        }
    }

    /// Exact match, or an echoed prefix long enough to be unambiguous.
    fn matches_conversation(&self, supplied: &str, previous: &str) -> bool {
        supplied == previous
            || (supplied.len() >= self.config.conversation_prefix_min_len
                && previous.starts_with(supplied))
    }

    // ============================================================================
    // Heartbeat
    // ============================================================================

    pub fn heartbeat(&self, state: &mut SessionState) -> Result<HeartbeatOutcome> {
        if state.record_count() == 0 || state.frame.sealed {
            return Ok(HeartbeatOutcome::NotStarted {
                summary: "No active session. Call start first.".to_string(),
            });
        }

        let heartbeat_number = state.frame.heartbeat_count + 1;
        let elapsed_seconds = state.frame.elapsed_seconds(Utc::now());
        let body = RecordBody::Heartbeat(HeartbeatData {
            heartbeat_number,
            cumulative_seconds: elapsed_seconds,
        });
        ChainWriter::new(self.chains.as_ref()).append(state, body)?;
        state.frame.heartbeat_count = heartbeat_number;

        Ok(HeartbeatOutcome::Recorded {
            heartbeat_number,
            elapsed_seconds,
            summary: format!(
                "Heartbeat {} recorded, {} elapsed.",
                heartbeat_number,
                format_duration(elapsed_seconds)
            ),
        })
    }

    // ============================================================================
    // End
    // ============================================================================

    pub async fn end(&self, state: &mut SessionState, request: EndRequest) -> Result<EndOutcome> {
        if state.record_count() == 0 {
            if let Some(session_id) = state.frame.auto_sealed_session_id.clone() {
                let target = EnrichTarget::AutoSealed(&session_id);
                return self.enrich(state, target, request).await;
            }
            return match request.session_id.clone() {
                Some(session_id) => {
                    let target = EnrichTarget::Requested(&session_id);
                    self.enrich(state, target, request).await
                }
                None => Ok(EndOutcome::nothing_to_end(
                    "No active session to end. Call start first.",
                )),
            };
        }

        if state.frame.sealed {
            return match request.session_id.clone() {
                Some(session_id) => {
                    let target = EnrichTarget::Requested(&session_id);
                    self.enrich(state, target, request).await
                }
                None => Ok(EndOutcome::nothing_to_end(format!(
                    "Session {} is already sealed.",
                    state.session_id()
                ))),
            };
        }

        if let Some(requested) = request.session_id.as_deref() {
            if requested != state.session_id() {
                tracing::debug!(
                    requested,
                    live = %state.session_id(),
                    "End names another session, ending the live one"
                );
            }
        }

        if let Some(task_type) = request.task_type.and_then(non_blank) {
            state.frame.task_type = task_type;
        }

        let input = SealInput {
            end_reason: END_REASON_COMPLETED,
            languages: request.languages,
            files_touched: request.files_touched_count.unwrap_or(0),
            evaluation: request.evaluation,
            milestones: request.milestones,
            auto_sealed: false,
            ended_at: Utc::now(),
        };
        let sealed = self.seal_live(state, input).await?;
        let entry = &sealed.entry;

        let resumed_parent = if state.is_child() {
            state.restore_parent_state()?;
            Some(state.session_id().to_string())
        } else {
            None
        };

        let mut summary = format!(
            "Session {} sealed after {}: {} records, {} milestones.",
            entry.session_id,
            format_duration(entry.duration_seconds),
            entry.record_count,
            entry.milestone_count
        );
        if let Some(score) = entry.score {
            summary.push_str(&format!("\nScore: {}/100", score));
        }
        if sealed.location == SealLocation::Active {
            summary.push_str("\nChain file could not be moved and remains in active storage.");
        }
        if let Some(error) = &sealed.index_error {
            summary.push_str(&format!("\nIndex update failed: {}", error));
        }
        if let Some(parent) = &resumed_parent {
            summary.push_str(&format!("\nResumed parent session {}.", parent));
        }

        tracing::info!(
            session_id = %entry.session_id,
            duration_seconds = entry.duration_seconds,
            records = entry.record_count,
            "Session ended"
        );

        Ok(EndOutcome::Ended(EndSummary {
            session_id: entry.session_id.clone(),
            duration_seconds: entry.duration_seconds,
            record_count: entry.record_count,
            milestone_count: entry.milestone_count,
            score: entry.score,
            signed: state.signing_available(),
            location: Some(sealed.location),
            resumed_parent,
            index_error: sealed.index_error,
            summary,
        }))
    }

    /// Appends milestones, `session_end` and `session_seal`, then moves the
    /// chain to sealed storage and writes the index entries.
    ///
    /// Leaves the state sealed; the caller decides whether a parent resumes.
    pub(crate) async fn seal_live(
        &self,
        state: &mut SessionState,
        input: SealInput,
    ) -> Result<SealedSession> {
        let writer = ChainWriter::new(self.chains.as_ref());
        let session_id = state.session_id().to_string();

        let mut milestones = Vec::with_capacity(input.milestones.len());
        for milestone in &input.milestones {
            let body = RecordBody::Milestone(MilestoneData {
                title: milestone.title.clone(),
                private_title: milestone.private_title.clone(),
                category: milestone.category.clone(),
                complexity: milestone.complexity.clone(),
            });
            let record = writer.append(state, body)?;
            milestones.push(Milestone::from_input(
                &session_id,
                milestone,
                &record.timestamp,
                Some(&record.hash),
            ));
        }
        let milestone_count = milestones.len() as u32;

        let duration_seconds = state.frame.elapsed_seconds(input.ended_at);
        let score = input.evaluation.as_ref().map(|e| self.scorer.score(e));
        let end_body = RecordBody::SessionEnd(SessionEndData {
            duration_seconds,
            task_type: state.frame.task_type.clone(),
            languages: input.languages.clone(),
            files_touched: input.files_touched,
            heartbeat_count: state.frame.heartbeat_count,
            milestone_count,
            evaluation: input.evaluation.clone(),
            score,
            end_reason: input.end_reason.to_string(),
        });
        let end_record = writer.append(state, end_body)?;

        let frame = &state.frame;
        let mut seal = SessionSealData {
            client: frame.client_name.clone(),
            task_type: frame.task_type.clone(),
            title: frame.title.clone(),
            private_title: frame.private_title.clone(),
            project: frame.project.clone(),
            model: frame.model_id.clone(),
            languages: input.languages,
            conversation_id: frame.conversation_id.clone(),
            conversation_index: frame.conversation_index,
            started_at: frame
                .session_start_time
                .map(format_timestamp)
                .unwrap_or_default(),
            ended_at: format_timestamp(input.ended_at),
            duration_seconds,
            heartbeat_count: frame.heartbeat_count,
            // Counts the seal record itself.
            record_count: frame.session_record_count + 1,
            milestone_count,
            files_touched: input.files_touched,
            score,
            chain_start_hash: frame.chain_start_hash.clone().unwrap_or_default(),
            chain_end_hash: end_record.hash.clone(),
            seal_signature: String::new(),
            auto_sealed: input.auto_sealed,
        };
        sign_seal(&mut seal, state.signing_key())?;
        let seal_record = writer.append(state, RecordBody::SessionSeal(seal.clone()))?;
        state.mark_sealed();

        let location = match self.chains.seal(&session_id) {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to seal chain file");
                SealLocation::Active
            }
        };

        let mut entry = SessionSeal::from_seal_data(&session_id, &seal, Some(&seal_record.hash));
        entry.evaluation = input.evaluation;
        entry.parent_session_id = state.frame.parent_session_id.clone();

        let index_error = self.write_indexes(entry.clone(), milestones).await;
        Ok(SealedSession {
            entry,
            location,
            index_error,
        })
    }

    /// Upserts the session entry and appends milestones. Failures are logged
    /// and reported, never raised: the chain is already sealed.
    pub(crate) async fn write_indexes(
        &self,
        entry: SessionSeal,
        milestones: Vec<Milestone>,
    ) -> Option<String> {
        let session_id = entry.session_id.clone();
        let mut errors = Vec::new();

        if let Err(e) = self.sessions.upsert(entry).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to update session index");
            errors.push(format!("session index: {}", e));
        }

        if !milestones.is_empty() {
            let result = self
                .milestones
                .update(Box::new(move |all: &mut Vec<Milestone>| {
                    all.extend(milestones)
                }))
                .await;
            if let Err(e) = result {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to update milestone index"
                );
                errors.push(format!("milestone index: {}", e));
            }
        }

        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}

pub(crate) fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Renders seconds as `1h 2m`, `3m 4s` or `5s`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
