//! Appends records to a session's chain and advances its tip.

use super::builder::build_record;
use super::record::{ChainRecord, RecordBody};
use crate::error::Result;
use crate::repository::ChainStore;
use crate::session::SessionState;

/// Writes records for one session state through a [`ChainStore`].
pub struct ChainWriter<'a> {
    store: &'a dyn ChainStore,
}

impl<'a> ChainWriter<'a> {
    pub fn new(store: &'a dyn ChainStore) -> Self {
        Self { store }
    }

    /// Builds a record on top of the current tip and appends it.
    ///
    /// The tip, record count and activity time only move after the store
    /// reports the line written. A failed append leaves the state untouched.
    pub fn append(&self, state: &mut SessionState, body: RecordBody) -> Result<ChainRecord> {
        let record = build_record(
            body,
            state.session_id(),
            state.chain_tip_hash(),
            state.signing_key(),
        )?;
        let line = record.to_line()?;
        self.store.append_line(&record.session_id, &line)?;
        state.advance(&record);

        tracing::debug!(
            session_id = %record.session_id,
            record_type = %record.record_type(),
            count = state.record_count(),
            "Appended chain record"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::record::{GENESIS, HeartbeatData};
    use crate::error::VigilError;
    use crate::repository::SealLocation;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        lines: Mutex<HashMap<String, Vec<String>>>,
        fail: bool,
    }

    impl ChainStore for MemoryStore {
        fn append_line(&self, session_id: &str, line: &str) -> Result<()> {
            if self.fail {
                return Err(VigilError::io("disk full"));
            }
            self.lines
                .lock()
                .unwrap()
                .entry(session_id.to_string())
                .or_default()
                .push(line.to_string());
            Ok(())
        }

        fn seal(&self, _session_id: &str) -> Result<SealLocation> {
            Ok(SealLocation::Sealed)
        }

        fn read_chain(&self, session_id: &str) -> Result<Option<(SealLocation, String)>> {
            Ok(self
                .lines
                .lock()
                .unwrap()
                .get(session_id)
                .map(|lines| (SealLocation::Active, lines.join("\n"))))
        }

        fn list_sealed(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn import_sealed(&self, _session_id: &str, _content: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn heartbeat(n: u32) -> RecordBody {
        RecordBody::Heartbeat(HeartbeatData {
            heartbeat_number: n,
            cumulative_seconds: u64::from(n),
        })
    }

    #[test]
    fn test_append_links_and_advances() {
        let store = MemoryStore::default();
        let writer = ChainWriter::new(&store);
        let mut state = SessionState::new("test");

        let first = writer.append(&mut state, heartbeat(1)).unwrap();
        let second = writer.append(&mut state, heartbeat(2)).unwrap();

        assert_eq!(first.prev_hash, GENESIS);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(state.chain_tip_hash(), second.hash);
        assert_eq!(state.record_count(), 2);

        let lines = store.lines.lock().unwrap();
        assert_eq!(lines[state.session_id()].len(), 2);
    }

    #[test]
    fn test_failed_append_keeps_tip() {
        let store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        let writer = ChainWriter::new(&store);
        let mut state = SessionState::new("test");

        let err = writer.append(&mut state, heartbeat(1)).unwrap_err();
        assert!(err.is_io());
        assert_eq!(state.chain_tip_hash(), GENESIS);
        assert_eq!(state.record_count(), 0);
        assert!(state.frame.chain_start_hash.is_none());
    }
}
