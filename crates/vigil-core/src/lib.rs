pub mod chain;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod repository;
pub mod session;

// Re-export common error type
pub use error::{Result, VigilError};
