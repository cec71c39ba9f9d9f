//! Auto-seal sweep for idle sessions.

use crate::lifecycle::{END_REASON_AUTO_SEALED, SealInput, SessionLifecycle};
use chrono::{DateTime, Utc};
use vigil_core::Result;
use vigil_core::session::SessionState;

impl SessionLifecycle {
    /// Seals the live session if it has been idle longer than
    /// `stale_after_secs` at `now`.
    ///
    /// The session ends at its last activity. Afterwards the live chain cursor
    /// is cleared and `auto_sealed_session_id` names the sealed chain, so a
    /// later `end` enriches it instead of reporting nothing to end.
    ///
    /// Returns the id of the sealed session, if any.
    pub async fn seal_stale(
        &self,
        state: &mut SessionState,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let frame = &state.frame;
        if frame.session_record_count == 0 || !frame.in_progress || frame.sealed {
            return Ok(None);
        }

        let idle = (now - frame.last_activity_time).num_seconds();
        if idle < self.config.stale_after_secs as i64 {
            return Ok(None);
        }

        let session_id = frame.session_id.clone();
        let input = SealInput {
            auto_sealed: true,
            ..SealInput::bare(END_REASON_AUTO_SEALED, frame.last_activity_time)
        };
        let sealed = self.seal_live(state, input).await?;
        state.mark_auto_sealed();

        tracing::info!(
            session_id = %session_id,
            idle_seconds = idle,
            location = ?sealed.location,
            "Auto-sealed idle session"
        );
        Ok(Some(session_id))
    }
}
