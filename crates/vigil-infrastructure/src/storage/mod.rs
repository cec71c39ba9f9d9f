//! Storage layer: chain files, index documents, configuration and saved state.

mod chain_files;
mod config_storage;
mod json_index;
mod state_storage;

pub use chain_files::FileChainStore;
pub use config_storage::{ConfigStorage, ConfigStorageError};
pub use json_index::{IndexFileError, JsonIndexFile, JsonIndexRepository};
pub use state_storage::StateStorage;
