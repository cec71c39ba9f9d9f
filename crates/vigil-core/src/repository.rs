//! Storage and provider traits.
//!
//! These decouple the lifecycle from where chains, indexes and keys live.
//! `vigil-infrastructure` provides the file-backed implementations.

use crate::chain::signer::LedgerKey;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supplies the signing key, or `None` for unsigned mode.
///
/// Implementations recover from corrupt key material themselves (regenerate
/// and persist); they never fail session start.
pub trait KeyProvider: Send + Sync {
    fn load_or_create(&self) -> Option<LedgerKey>;
}

/// Storage area a chain file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealLocation {
    Active,
    Sealed,
}

/// Per-session append-only chain files.
///
/// Each chain has exactly one writer (the owning session state), so
/// implementations need no locking.
pub trait ChainStore: Send + Sync {
    /// Appends one line to the session's active chain file.
    ///
    /// Must only return `Ok` once the line is written; the caller advances the
    /// in-memory tip on success only.
    fn append_line(&self, session_id: &str, line: &str) -> Result<()>;

    /// Moves the chain from active to sealed storage.
    ///
    /// A failed move leaves the file in place and reports `SealLocation::Active`.
    fn seal(&self, session_id: &str) -> Result<SealLocation>;

    /// Reads a chain, looking in sealed storage first, then active storage.
    fn read_chain(&self, session_id: &str) -> Result<Option<(SealLocation, String)>>;

    /// Ids of every sealed chain.
    fn list_sealed(&self) -> Result<Vec<String>>;

    /// Writes a sealed chain unless one already exists. Returns whether it wrote.
    fn import_sealed(&self, session_id: &str, content: &str) -> Result<bool>;
}

/// An entry of a whole-document index, identified by a stable id.
pub trait IndexEntry: Clone + Send + Sync + 'static {
    fn entry_id(&self) -> &str;
}

/// Read-modify-write closure applied to a whole index document.
pub type IndexUpdate<T> = Box<dyn FnOnce(&mut Vec<T>) + Send>;

/// A whole-document index (session index, milestone index).
///
/// The default `update` is read, mutate, write with no locking; concurrent
/// writers to the same document can lose updates. Implementations may
/// override `update` to serialize it.
#[async_trait]
pub trait IndexRepository<T: IndexEntry>: Send + Sync {
    async fn read(&self) -> Result<Vec<T>>;

    async fn write(&self, entries: Vec<T>) -> Result<()>;

    async fn update(&self, apply: IndexUpdate<T>) -> Result<()> {
        let mut entries = self.read().await?;
        apply(&mut entries);
        self.write(entries).await
    }

    /// Inserts the entry, replacing any entry with the same id.
    async fn upsert(&self, entry: T) -> Result<()> {
        self.update(Box::new(move |entries: &mut Vec<T>| {
            match entries
                .iter_mut()
                .find(|existing| existing.entry_id() == entry.entry_id())
            {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }))
        .await
    }

    /// Appends entries whose id is not present yet. Returns how many were added.
    async fn merge_new(&self, incoming: Vec<T>) -> Result<usize> {
        let existing = self.read().await?;
        let fresh: Vec<T> = incoming
            .into_iter()
            .filter(|entry| !existing.iter().any(|e| e.entry_id() == entry.entry_id()))
            .collect();
        let added = fresh.len();
        if added > 0 {
            self.update(Box::new(move |entries: &mut Vec<T>| {
                for entry in fresh {
                    if !entries.iter().any(|e| e.entry_id() == entry.entry_id()) {
                        entries.push(entry);
                    }
                }
            }))
            .await?;
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        id: String,
        value: u32,
    }

    impl IndexEntry for Entry {
        fn entry_id(&self) -> &str {
            &self.id
        }
    }

    struct MemoryIndex {
        entries: Mutex<Vec<Entry>>,
        writes: Mutex<u32>,
    }

    impl MemoryIndex {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                writes: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl IndexRepository<Entry> for MemoryIndex {
        async fn read(&self) -> Result<Vec<Entry>> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn write(&self, entries: Vec<Entry>) -> Result<()> {
            *self.entries.lock().unwrap() = entries;
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn entry(id: &str, value: u32) -> Entry {
        Entry {
            id: id.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = MemoryIndex::new();
        index.upsert(entry("a", 1)).await.unwrap();
        index.upsert(entry("b", 2)).await.unwrap();
        index.upsert(entry("a", 3)).await.unwrap();

        let entries = index.read().await.unwrap();
        assert_eq!(entries, vec![entry("a", 3), entry("b", 2)]);
    }

    #[tokio::test]
    async fn test_merge_new_skips_existing_ids() {
        let index = MemoryIndex::new();
        index.upsert(entry("a", 1)).await.unwrap();

        let added = index
            .merge_new(vec![entry("a", 9), entry("c", 4)])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let entries = index.read().await.unwrap();
        assert_eq!(entries, vec![entry("a", 1), entry("c", 4)]);
    }

    #[tokio::test]
    async fn test_merge_new_without_fresh_entries_does_not_write() {
        let index = MemoryIndex::new();
        index.upsert(entry("a", 1)).await.unwrap();
        let writes_before = *index.writes.lock().unwrap();

        let added = index.merge_new(vec![entry("a", 2)]).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(*index.writes.lock().unwrap(), writes_before);
    }
}
