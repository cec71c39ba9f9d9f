//! Raw export and merge-import of the ledger.
//!
//! A backup carries both indexes and every sealed chain file verbatim. Key
//! material is never part of a backup.

use crate::lifecycle::SessionLifecycle;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vigil_core::Result;
use vigil_core::chain::format_timestamp;
use vigil_core::repository::SealLocation;
use vigil_core::session::{Milestone, SessionSeal};

pub const BACKUP_VERSION: u32 = 1;

fn default_version() -> u32 {
    BACKUP_VERSION
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub sessions: Vec<SessionSeal>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Session id to raw JSONL chain text.
    #[serde(default)]
    pub sealed_chains: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    /// Sessions, milestones and chain files added, in total.
    pub restored_count: usize,
    pub sessions: usize,
    pub milestones: usize,
    pub chains: usize,
    /// Chain ids that could not be written.
    pub skipped_chains: Vec<String>,
}

impl SessionLifecycle {
    pub async fn backup(&self) -> Result<Backup> {
        let sessions = self.sessions.read().await?;
        let milestones = self.milestones.read().await?;

        let mut sealed_chains = BTreeMap::new();
        for session_id in self.chains.list_sealed()? {
            if let Some((SealLocation::Sealed, content)) = self.chains.read_chain(&session_id)? {
                sealed_chains.insert(session_id, content);
            }
        }

        tracing::info!(
            sessions = sessions.len(),
            milestones = milestones.len(),
            chains = sealed_chains.len(),
            "Backup exported"
        );

        Ok(Backup {
            version: BACKUP_VERSION,
            exported_at: format_timestamp(Utc::now()),
            sessions,
            milestones,
            sealed_chains,
        })
    }

    /// Merges a backup document.
    ///
    /// Entries are added only when their id is absent; existing chain files are
    /// never overwritten.
    pub async fn restore(&self, backup_json: &str) -> Result<RestoreOutcome> {
        let backup: Backup = serde_json::from_str(backup_json)?;

        let sessions = self.sessions.merge_new(backup.sessions).await?;
        let milestones = self.milestones.merge_new(backup.milestones).await?;

        let mut chains = 0;
        let mut skipped_chains = Vec::new();
        for (session_id, content) in &backup.sealed_chains {
            match self.chains.import_sealed(session_id, content) {
                Ok(true) => chains += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Skipping chain from backup"
                    );
                    skipped_chains.push(session_id.clone());
                }
            }
        }

        let outcome = RestoreOutcome {
            restored_count: sessions + milestones + chains,
            sessions,
            milestones,
            chains,
            skipped_chains,
        };
        tracing::info!(restored = outcome.restored_count, "Backup restored");
        Ok(outcome)
    }
}
