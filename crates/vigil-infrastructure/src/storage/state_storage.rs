//! `state.json`: the session state carried between CLI invocations.
//!
//! The signing key is not part of the serialized state; callers re-attach it
//! after loading.

use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use vigil_core::Result;
use vigil_core::session::SessionState;

pub struct StateStorage {
    path: PathBuf,
}

impl StateStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved state, `None` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_core::chain::LedgerKey;

    #[test]
    fn test_round_trip_without_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StateStorage::new(temp_dir.path().join("state.json"));
        assert!(storage.load().unwrap().is_none());

        let mut state = SessionState::new("cursor");
        state.set_signing_key(Some(LedgerKey::from_seed(&[9u8; 32])));
        state.save_parent_state();
        storage.save(&state).unwrap();

        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.frame, state.frame);
        assert_eq!(loaded.nesting_depth(), 1);
        assert!(loaded.signing_key().is_none());
        assert!(!loaded.signing_available());
    }
}
