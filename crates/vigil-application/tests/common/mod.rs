#![allow(dead_code)]

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use vigil_application::{ClientIdentity, SessionLifecycle};
use vigil_core::chain::{ChainRecord, LedgerKey};
use vigil_core::config::VigilConfig;
use vigil_core::session::{Milestone, SessionSeal, SessionState};
use vigil_infrastructure::{FileChainStore, JsonIndexFile, JsonIndexRepository, VigilPaths};

pub fn test_key() -> LedgerKey {
    LedgerKey::from_seed(&[7u8; 32])
}

/// A lifecycle over file stores in a temporary data root.
pub struct Harness {
    pub dir: TempDir,
    pub paths: VigilPaths,
    pub chains: Arc<FileChainStore>,
    pub lifecycle: SessionLifecycle,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(VigilConfig::default(), |lifecycle| lifecycle)
    }

    pub fn with_config(config: VigilConfig) -> Self {
        Self::build(config, |lifecycle| lifecycle)
    }

    pub fn build(
        config: VigilConfig,
        customize: impl FnOnce(SessionLifecycle) -> SessionLifecycle,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = VigilPaths::new(dir.path());
        let chains = Arc::new(FileChainStore::new(paths.clone()));
        let sessions = Arc::new(JsonIndexRepository::new(JsonIndexFile::<SessionSeal>::new(
            paths.sessions_index(),
        )));
        let milestones = Arc::new(JsonIndexRepository::new(JsonIndexFile::<Milestone>::new(
            paths.milestones_index(),
        )));
        let lifecycle = SessionLifecycle::new(config, chains.clone(), sessions, milestones)
            .with_identity(ClientIdentity::fixed("test-client"));

        Self {
            dir,
            paths,
            chains,
            lifecycle: customize(lifecycle),
        }
    }

    /// A state signing with [`test_key`].
    pub fn signed_state(&self) -> SessionState {
        let mut state = SessionState::new("");
        state.set_signing_key(Some(test_key()));
        state
    }

    pub fn sessions(&self) -> Vec<SessionSeal> {
        JsonIndexFile::<SessionSeal>::new(self.paths.sessions_index())
            .load()
            .unwrap()
    }

    pub fn milestones(&self) -> Vec<Milestone> {
        JsonIndexFile::<Milestone>::new(self.paths.milestones_index())
            .load()
            .unwrap()
    }

    pub fn sealed_content(&self, session_id: &str) -> String {
        fs::read_to_string(self.paths.sealed_chain(session_id)).unwrap()
    }

    pub fn active_records(&self, session_id: &str) -> Vec<ChainRecord> {
        parse_records(&fs::read_to_string(self.paths.active_chain(session_id)).unwrap())
    }

    pub fn sealed_records(&self, session_id: &str) -> Vec<ChainRecord> {
        parse_records(&self.sealed_content(session_id))
    }
}

pub fn parse_records(content: &str) -> Vec<ChainRecord> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| ChainRecord::from_line(line).unwrap())
        .collect()
}

/// Asserts `prev_hash` linkage from `GENESIS` through every record.
pub fn assert_linked(records: &[ChainRecord]) {
    assert_eq!(records[0].prev_hash, vigil_core::chain::GENESIS);
    for pair in records.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
    }
}
