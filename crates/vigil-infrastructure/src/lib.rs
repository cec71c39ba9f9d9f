pub mod keystore;
pub mod paths;
pub mod storage;

pub use crate::keystore::{FileKeystore, KeyCipher, KeystoreError, PlaintextCipher};
pub use crate::paths::VigilPaths;
pub use crate::storage::{
    ConfigStorage, FileChainStore, JsonIndexFile, JsonIndexRepository, StateStorage,
};
