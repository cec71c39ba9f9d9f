//! File-backed wiring of the lifecycle.
//!
//! Resolves the data root, loads `config.toml`, and builds the lifecycle over
//! the bundled file stores and keystore.

use crate::lifecycle::SessionLifecycle;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use vigil_core::config::VigilConfig;
use vigil_core::session::{Milestone, SessionSeal, SessionState};
use vigil_infrastructure::{
    ConfigStorage, FileChainStore, FileKeystore, JsonIndexFile, JsonIndexRepository,
    StateStorage, VigilPaths,
};

/// Everything a front end needs to drive sessions stored under one data root.
pub struct VigilContext {
    paths: VigilPaths,
    lifecycle: SessionLifecycle,
    keystore: FileKeystore,
    state_storage: StateStorage,
}

impl VigilContext {
    /// Opens the data root: `root` if given, else `$VIGIL_HOME` or `~/.vigil`.
    ///
    /// A `data_dir` in the default root's config moves the data root, unless
    /// `root` was given explicitly.
    pub fn open(root: Option<PathBuf>) -> Result<Self> {
        let explicit = root.is_some();
        let paths = match root {
            Some(root) => VigilPaths::new(root),
            None => VigilPaths::from_default_root().context("Failed to resolve data root")?,
        };

        let config = ConfigStorage::new(paths.config_file())
            .load()
            .with_context(|| format!("Failed to load {}", paths.config_file().display()))?;

        let paths = match &config.data_dir {
            Some(dir) if !explicit => VigilPaths::new(dir),
            _ => paths,
        };

        tracing::debug!(root = %paths.root().display(), "Opened data root");
        Ok(Self::with_config(paths, config))
    }

    pub fn with_config(paths: VigilPaths, config: VigilConfig) -> Self {
        let chains = Arc::new(FileChainStore::new(paths.clone()));
        let sessions = Arc::new(JsonIndexRepository::new(
            JsonIndexFile::<SessionSeal>::new(paths.sessions_index())
                .with_locking(config.index_locking),
        ));
        let milestones = Arc::new(JsonIndexRepository::new(
            JsonIndexFile::<Milestone>::new(paths.milestones_index())
                .with_locking(config.index_locking),
        ));
        let keystore = FileKeystore::new(paths.keystore_file());
        let state_storage = StateStorage::new(paths.state_file());

        Self {
            lifecycle: SessionLifecycle::new(config, chains, sessions, milestones),
            paths,
            keystore,
            state_storage,
        }
    }

    pub fn paths(&self) -> &VigilPaths {
        &self.paths
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn keystore(&self) -> &FileKeystore {
        &self.keystore
    }

    /// Loads the saved session state (or a fresh one) and attaches the signing key.
    pub fn load_state(&self) -> Result<SessionState> {
        let mut state = self
            .state_storage
            .load()
            .with_context(|| format!("Failed to load {}", self.state_storage.path().display()))?
            .unwrap_or_else(|| SessionState::new(String::new()));
        state.initialize_signing(&self.keystore);
        Ok(state)
    }

    pub fn save_state(&self, state: &SessionState) -> Result<()> {
        self.state_storage
            .save(state)
            .with_context(|| format!("Failed to save {}", self.state_storage.path().display()))
    }
}
