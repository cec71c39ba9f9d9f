//! Path management for the Vigil data root.
//!
//! Paths are resolved from an explicit root so tests and embedded deployments
//! can point the whole ledger at a temporary directory.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data root.
pub const VIGIL_HOME_ENV: &str = "VIGIL_HOME";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Layout of the Vigil data root.
///
/// # Directory Structure
///
/// ```text
/// ~/.vigil/                    # Data root (VIGIL_HOME overrides)
/// ├── config.toml              # Runtime configuration
/// ├── keystore.json            # Signing key (0600)
/// ├── state.json               # CLI session state between invocations
/// ├── sessions.json            # Session index
/// ├── milestones.json          # Milestone index
/// └── data/
///     ├── active/<id>.jsonl    # Open chains
///     └── sealed/<id>.jsonl    # Sealed chains
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VigilPaths {
    root: PathBuf,
}

impl VigilPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the default root: `$VIGIL_HOME`, else `~/.vigil`.
    pub fn default_root() -> Result<PathBuf, PathError> {
        if let Some(home) = std::env::var_os(VIGIL_HOME_ENV) {
            if !home.is_empty() {
                return Ok(PathBuf::from(home));
            }
        }
        dirs::home_dir()
            .map(|home| home.join(".vigil"))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn from_default_root() -> Result<Self, PathError> {
        Ok(Self::new(Self::default_root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// # Security Note
    ///
    /// The keystore holds private key material; it is written with 0600 on Unix.
    pub fn keystore_file(&self) -> PathBuf {
        self.root.join("keystore.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn sessions_index(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    pub fn milestones_index(&self) -> PathBuf {
        self.root.join("milestones.json")
    }

    pub fn active_dir(&self) -> PathBuf {
        self.root.join("data").join("active")
    }

    pub fn sealed_dir(&self) -> PathBuf {
        self.root.join("data").join("sealed")
    }

    pub fn active_chain(&self, session_id: &str) -> PathBuf {
        self.active_dir().join(chain_file_name(session_id))
    }

    pub fn sealed_chain(&self, session_id: &str) -> PathBuf {
        self.sealed_dir().join(chain_file_name(session_id))
    }
}

fn chain_file_name(session_id: &str) -> String {
    format!("{}.jsonl", session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_root() {
        let paths = VigilPaths::new("/tmp/vigil-test");
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/vigil-test/config.toml"));
        assert_eq!(
            paths.active_chain("abc"),
            PathBuf::from("/tmp/vigil-test/data/active/abc.jsonl")
        );
        assert_eq!(
            paths.sealed_chain("abc"),
            PathBuf::from("/tmp/vigil-test/data/sealed/abc.jsonl")
        );
        assert!(paths.sessions_index().starts_with(paths.root()));
        assert!(paths.milestones_index().ends_with("milestones.json"));
    }

    #[test]
    fn test_default_root_ends_with_vigil_or_env() {
        let root = VigilPaths::default_root().unwrap();
        match std::env::var_os(VIGIL_HOME_ENV) {
            Some(home) if !home.is_empty() => assert_eq!(root, PathBuf::from(home)),
            _ => assert!(root.ends_with(".vigil")),
        }
    }
}
