//! Application layer for VIGIL.
//!
//! This crate provides the session lifecycle (start, heartbeat, end), the
//! auto-seal sweep and enrichment, and backup/restore, coordinating the domain
//! types of `vigil-core` with the stores of `vigil-infrastructure`.

pub mod backup;
pub mod context;
mod enrichment;
pub mod identity;
pub mod lifecycle;
mod sweep;

pub use backup::{Backup, RestoreOutcome};
pub use context::VigilContext;
pub use identity::ClientIdentity;
pub use lifecycle::{
    EndOutcome, EndRequest, EndSummary, HeartbeatOutcome, SealBeforeReset, SessionLifecycle,
    StartOutcome, StartRequest,
};
