//! Late metadata for sessions that were sealed without a regular `end`.
//!
//! When the sweep (or an external process) seals a chain, the caller's later
//! `end` can no longer append to it. The end-of-session fields are merged into
//! the session index instead; the sealed chain is never re-opened.

use crate::lifecycle::{
    END_REASON_AUTO_SEALED, EndOutcome, EndRequest, EndSummary, SessionLifecycle, format_duration,
    non_blank,
};
use chrono::{DateTime, Utc};
use vigil_core::Result;
use vigil_core::chain::{
    ChainRecord, RecordBody, SessionSealData, SessionStartData, UNSIGNED, format_timestamp,
};
use vigil_core::evaluation::Evaluation;
use vigil_core::session::{Milestone, MilestoneInput, SessionSeal, SessionState};

/// Session metadata read back from a chain file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecoveredSession {
    pub session_id: String,
    pub start: SessionStartData,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: u64,
    pub heartbeat_count: u32,
    pub milestone_count: u32,
    pub record_count: u32,
    pub chain_start_hash: String,
    pub chain_end_hash: String,
    pub end_reason: Option<String>,
    pub seal: Option<SessionSealData>,
}

/// How the session to enrich was named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnrichTarget<'a> {
    /// Recorded in the state when the session was auto-sealed.
    AutoSealed(&'a str),
    /// Named by the caller; only auto-sealed chains qualify.
    Requested(&'a str),
}

impl<'a> EnrichTarget<'a> {
    fn session_id(&self) -> &'a str {
        match *self {
            EnrichTarget::AutoSealed(id) | EnrichTarget::Requested(id) => id,
        }
    }
}

impl RecoveredSession {
    /// Parses a chain document. The first record must be `session_start`.
    ///
    /// Only the first and last lines must parse; unreadable lines in between
    /// are skipped. Integrity is the verifier's concern.
    pub(crate) fn parse(session_id: &str, content: &str) -> std::result::Result<Self, String> {
        let lines: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        let last_index = lines.len().saturating_sub(1);

        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match ChainRecord::from_line(line) {
                Ok(record) => records.push(record),
                Err(e) if index == 0 || index == last_index => {
                    return Err(format!("record {}: {}", index, e));
                }
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        index,
                        error = %e,
                        "Skipping unreadable chain record"
                    );
                }
            }
        }

        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err("chain is empty".to_string()),
        };
        let RecordBody::SessionStart(start) = &first.body else {
            return Err(format!(
                "first record is {}, expected session_start",
                first.record_type()
            ));
        };

        let seal = records.iter().rev().find_map(|record| match &record.body {
            RecordBody::SessionSeal(data) => Some(data.clone()),
            _ => None,
        });
        let heartbeat_count = records
            .iter()
            .filter(|r| matches!(r.body, RecordBody::Heartbeat(_)))
            .count() as u32;
        let milestone_count = records
            .iter()
            .filter(|r| matches!(r.body, RecordBody::Milestone(_)))
            .count() as u32;
        let end_reason = records.iter().rev().find_map(|record| match &record.body {
            RecordBody::SessionEnd(data) => Some(data.end_reason.clone()),
            _ => None,
        });

        let (ended_at, duration_seconds) = match &seal {
            Some(data) if !data.ended_at.is_empty() => {
                (data.ended_at.clone(), data.duration_seconds)
            }
            _ => (
                last.timestamp.clone(),
                seconds_between(&first.timestamp, &last.timestamp),
            ),
        };

        Ok(Self {
            session_id: session_id.to_string(),
            start: start.clone(),
            started_at: first.timestamp.clone(),
            ended_at,
            duration_seconds,
            heartbeat_count,
            milestone_count,
            record_count: records.len() as u32,
            chain_start_hash: first.hash.clone(),
            chain_end_hash: last.hash.clone(),
            end_reason,
            seal,
        })
    }

    /// Whether the chain itself records an auto-seal.
    pub(crate) fn was_auto_sealed(&self) -> bool {
        self.seal.as_ref().is_some_and(|seal| seal.auto_sealed)
            || self.end_reason.as_deref() == Some(END_REASON_AUTO_SEALED)
    }

    pub(crate) fn is_signed(&self) -> bool {
        self.seal
            .as_ref()
            .is_some_and(|seal| !seal.seal_signature.is_empty() && seal.seal_signature != UNSIGNED)
    }

    /// Index entry describing the chain as it is on disk.
    pub(crate) fn to_entry(&self) -> SessionSeal {
        let start = &self.start;
        SessionSeal {
            session_id: self.session_id.clone(),
            client: start.client.clone(),
            task_type: start.task_type.clone(),
            title: start.title.clone(),
            private_title: start.private_title.clone(),
            project: start.project.clone(),
            model: start.model.clone(),
            languages: self
                .seal
                .as_ref()
                .map(|seal| seal.languages.clone())
                .unwrap_or_default(),
            conversation_id: start.conversation_id.clone(),
            conversation_index: start.conversation_index,
            parent_session_id: start.parent_session_id.clone(),
            started_at: self.started_at.clone(),
            ended_at: self.ended_at.clone(),
            duration_seconds: self.duration_seconds,
            heartbeat_count: self.heartbeat_count,
            record_count: self.record_count,
            milestone_count: self.milestone_count,
            files_touched: self.seal.as_ref().map(|seal| seal.files_touched).unwrap_or(0),
            evaluation: None,
            score: self.seal.as_ref().and_then(|seal| seal.score),
            chain_start_hash: self.chain_start_hash.clone(),
            chain_end_hash: self.chain_end_hash.clone(),
            seal_signature: self
                .seal
                .as_ref()
                .map(|seal| seal.seal_signature.clone())
                .unwrap_or_default(),
            auto_sealed: true,
        }
    }
}

fn seconds_between(from: &str, to: &str) -> u64 {
    match (DateTime::parse_from_rfc3339(from), DateTime::parse_from_rfc3339(to)) {
        (Ok(from), Ok(to)) => (to - from).num_seconds().max(0) as u64,
        _ => 0,
    }
}

/// Caller-supplied fields merged into an auto-sealed session's index entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct LateFields {
    pub task_type: Option<String>,
    pub languages: Vec<String>,
    pub files_touched: Option<u32>,
    /// Chain milestones plus every milestone recorded through enrichment.
    pub milestone_count: u32,
    pub evaluation: Option<Evaluation>,
    pub score: Option<u32>,
}

impl LateFields {
    /// Overlays the supplied fields; absent fields keep the entry's values.
    ///
    /// Applying the same fields twice leaves the entry unchanged.
    pub(crate) fn apply(&self, entry: &mut SessionSeal) {
        if let Some(task_type) = &self.task_type {
            entry.task_type = task_type.clone();
        }
        if !self.languages.is_empty() {
            entry.languages = self.languages.clone();
        }
        if let Some(files_touched) = self.files_touched {
            entry.files_touched = files_touched;
        }
        entry.milestone_count = self.milestone_count;
        if self.evaluation.is_some() {
            entry.evaluation = self.evaluation.clone();
            entry.score = self.score;
        }
    }
}

impl SessionLifecycle {
    /// Merges end-of-session fields into a session that is already sealed.
    ///
    /// Missing or unparsable chains, and chains that were ended normally,
    /// yield `NothingToEnd`, never an error. Repeating a call with the same
    /// fields leaves both indexes unchanged.
    pub(crate) async fn enrich(
        &self,
        state: &mut SessionState,
        target: EnrichTarget<'_>,
        request: EndRequest,
    ) -> Result<EndOutcome> {
        let session_id = target.session_id();
        let (location, content) = match self.chains.read_chain(session_id) {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::warn!(session_id, "No chain file found for auto-sealed session");
                return Ok(EndOutcome::nothing_to_end(format!(
                    "No chain found for session {}. Nothing to end.",
                    session_id
                )));
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to read auto-sealed chain");
                return Ok(EndOutcome::nothing_to_end(format!(
                    "Chain for session {} could not be read. Nothing to end.",
                    session_id
                )));
            }
        };

        let recovered = match RecoveredSession::parse(session_id, &content) {
            Ok(recovered) => recovered,
            Err(reason) => {
                tracing::warn!(session_id, reason = %reason, "Failed to parse auto-sealed chain");
                return Ok(EndOutcome::nothing_to_end(format!(
                    "Chain for session {} could not be parsed. Nothing to end.",
                    session_id
                )));
            }
        };

        if matches!(target, EnrichTarget::Requested(_)) && !recovered.was_auto_sealed() {
            tracing::debug!(session_id, "Requested session was not auto-sealed");
            return Ok(EndOutcome::nothing_to_end(format!(
                "Session {} was already ended. Nothing to end.",
                session_id
            )));
        }

        let mut errors = Vec::new();
        let known = self.late_milestones(session_id, &request.milestones).await;
        let (fresh, late_milestones) = match known {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to read milestone index");
                errors.push(format!("milestone index: {}", e));
                (Vec::new(), 0)
            }
        };

        let score = request.evaluation.as_ref().map(|e| self.scorer.score(e));
        let late = LateFields {
            task_type: request.task_type.and_then(non_blank),
            languages: request.languages,
            files_touched: request.files_touched_count,
            milestone_count: recovered.milestone_count + late_milestones,
            evaluation: request.evaluation,
            score,
        };

        let mut incoming = recovered.to_entry();
        late.apply(&mut incoming);
        let target_id = session_id.to_string();

        let result = self
            .sessions
            .update(Box::new(move |entries: &mut Vec<SessionSeal>| {
                match entries.iter_mut().find(|entry| entry.session_id == target_id) {
                    Some(existing) => late.apply(existing),
                    None => entries.push(incoming),
                }
            }))
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id, error = %e, "Failed to update session index");
            errors.push(format!("session index: {}", e));
        }

        let added = fresh.len();
        if !fresh.is_empty() {
            let result = self
                .milestones
                .update(Box::new(move |all: &mut Vec<Milestone>| {
                    for milestone in fresh {
                        if !all.iter().any(|m| same_late_milestone(m, &milestone)) {
                            all.push(milestone);
                        }
                    }
                }))
                .await;
            if let Err(e) = result {
                tracing::warn!(session_id, error = %e, "Failed to update milestone index");
                errors.push(format!("milestone index: {}", e));
            }
        }
        let index_error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };

        let mut resumed_parent = None;
        if state.frame.auto_sealed_session_id.as_deref() == Some(session_id) {
            state.frame.auto_sealed_session_id = None;
            if state.is_child() && state.record_count() == 0 {
                state.restore_parent_state()?;
                resumed_parent = Some(state.session_id().to_string());
            }
        }

        tracing::info!(session_id, milestones = added, "Enriched auto-sealed session");

        let mut summary = format!(
            "Session {} was already sealed ({}, {} records); end details were added to the index.",
            session_id,
            format_duration(recovered.duration_seconds),
            recovered.record_count
        );
        if let Some(score) = score {
            summary.push_str(&format!("\nScore: {}/100", score));
        }
        if let Some(error) = &index_error {
            summary.push_str(&format!("\nIndex update failed: {}", error));
        }
        if let Some(parent) = &resumed_parent {
            summary.push_str(&format!("\nResumed parent session {}.", parent));
        }

        Ok(EndOutcome::Enriched(EndSummary {
            session_id: session_id.to_string(),
            duration_seconds: recovered.duration_seconds,
            record_count: recovered.record_count,
            milestone_count: recovered.milestone_count + late_milestones,
            score,
            signed: recovered.is_signed(),
            location: Some(location),
            resumed_parent,
            index_error,
            summary,
        }))
    }

    /// Splits the supplied milestones into those not yet in the index, and
    /// counts the late milestones the session will have once they are added.
    async fn late_milestones(
        &self,
        session_id: &str,
        inputs: &[MilestoneInput],
    ) -> Result<(Vec<Milestone>, u32)> {
        let mut known: Vec<Milestone> = self
            .milestones
            .read()
            .await?
            .into_iter()
            .filter(|m| m.session_id == session_id && m.chain_hash.is_empty())
            .collect();

        let recorded_at = format_timestamp(Utc::now());
        let mut fresh = Vec::new();
        for input in inputs {
            let milestone = Milestone::from_input(session_id, input, &recorded_at, None);
            if !known.iter().any(|m| same_late_milestone(m, &milestone)) {
                known.push(milestone.clone());
                fresh.push(milestone);
            }
        }
        Ok((fresh, known.len() as u32))
    }
}

/// Late milestones carry no chain hash, so they are matched by content.
fn same_late_milestone(a: &Milestone, b: &Milestone) -> bool {
    a.session_id == b.session_id
        && a.chain_hash.is_empty()
        && b.chain_hash.is_empty()
        && a.title == b.title
        && a.category == b.category
        && a.complexity == b.complexity
}
