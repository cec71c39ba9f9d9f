use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration, read from `config.toml`. Every field has a default.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VigilConfig {
    /// Overrides the data root (default `~/.vigil`).
    pub data_dir: Option<PathBuf>,
    /// Serialize index read-modify-write through an exclusive file lock.
    pub index_locking: bool,
    /// A session started while the previous one was active within this many
    /// seconds is treated as a child (subagent) session.
    pub child_session_window_secs: u64,
    /// Maximum number of suspended parent sessions.
    pub max_nesting_depth: usize,
    /// Shortest caller-echoed conversation id accepted as a prefix match.
    pub conversation_prefix_min_len: usize,
    /// Idle seconds after which the sweep auto-seals an in-progress session.
    pub stale_after_secs: u64,
    /// Fixed client name; otherwise resolved from the transport or environment.
    pub client_name: Option<String>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            index_locking: false,
            child_session_window_secs: 1800,
            max_nesting_depth: 8,
            conversation_prefix_min_len: 8,
            stale_after_secs: 1800,
            client_name: None,
        }
    }
}
