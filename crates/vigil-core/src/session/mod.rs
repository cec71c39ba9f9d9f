//! Session domain module.
//!
//! - `state`: the per-connection state machine (`SessionState`, `SessionFrame`)
//! - `model`: durable index entries (`SessionSeal`, `Milestone`)

mod model;
mod state;

pub use model::{Milestone, MilestoneInput, SessionSeal};
pub use state::{DEFAULT_TASK_TYPE, SessionFrame, SessionPhase, SessionSnapshot, SessionState};
