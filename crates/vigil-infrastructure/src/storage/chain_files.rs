//! JSONL chain files under `data/active` and `data/sealed`.

use crate::paths::VigilPaths;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::Path;
use vigil_core::repository::{ChainStore, SealLocation};
use vigil_core::{Result, VigilError};

/// File-backed [`ChainStore`]: one `<session_id>.jsonl` per session.
pub struct FileChainStore {
    paths: VigilPaths,
}

impl FileChainStore {
    pub fn new(paths: VigilPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &VigilPaths {
        &self.paths
    }
}

/// Session ids become file names; anything that could escape the directory is refused.
fn is_safe_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\', '\0'])
}

fn require_safe_id(session_id: &str) -> Result<()> {
    if is_safe_id(session_id) {
        Ok(())
    } else {
        Err(VigilError::io(format!("invalid session id '{}'", session_id)))
    }
}

/// Truncates `file` back to `len` when a write failed, so a torn line never
/// stays behind for the next append to land on.
fn rollback_on_error(file: &File, len: u64, result: std::io::Result<()>) -> std::io::Result<()> {
    if let Err(e) = result {
        if let Err(truncate) = file.set_len(len) {
            tracing::warn!(error = %truncate, "Failed to truncate partially written chain line");
        }
        return Err(e);
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

impl ChainStore for FileChainStore {
    fn append_line(&self, session_id: &str, line: &str) -> Result<()> {
        require_safe_id(session_id)?;
        ensure_dir(&self.paths.active_dir())?;

        let path = self.paths.active_chain(session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let len = file.metadata()?.len();
        let written = file.write_all(buf.as_bytes()).and_then(|_| file.sync_data());
        rollback_on_error(&file, len, written)?;
        Ok(())
    }

    fn seal(&self, session_id: &str) -> Result<SealLocation> {
        require_safe_id(session_id)?;
        let active = self.paths.active_chain(session_id);
        let sealed = self.paths.sealed_chain(session_id);

        if !active.exists() {
            if sealed.exists() {
                return Ok(SealLocation::Sealed);
            }
            return Err(VigilError::not_found("chain", session_id));
        }

        let moved = ensure_dir(&self.paths.sealed_dir())
            .and_then(|_| fs::rename(&active, &sealed).map_err(VigilError::from));
        match moved {
            Ok(()) => Ok(SealLocation::Sealed),
            Err(e) => {
                // The seal record is already on disk; the chain stays readable in place.
                tracing::warn!(
                    session_id,
                    error = %e,
                    "Failed to move chain to sealed storage, leaving it active"
                );
                Ok(SealLocation::Active)
            }
        }
    }

    fn read_chain(&self, session_id: &str) -> Result<Option<(SealLocation, String)>> {
        if !is_safe_id(session_id) {
            return Ok(None);
        }
        for (location, path) in [
            (SealLocation::Sealed, self.paths.sealed_chain(session_id)),
            (SealLocation::Active, self.paths.active_chain(session_id)),
        ] {
            if path.exists() {
                return Ok(Some((location, fs::read_to_string(&path)?)));
            }
        }
        Ok(None)
    }

    fn list_sealed(&self) -> Result<Vec<String>> {
        let dir = self.paths.sealed_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn import_sealed(&self, session_id: &str, content: &str) -> Result<bool> {
        require_safe_id(session_id)?;
        if self.paths.sealed_chain(session_id).exists()
            || self.paths.active_chain(session_id).exists()
        {
            return Ok(false);
        }

        ensure_dir(&self.paths.sealed_dir())?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.paths.sealed_chain(session_id))
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(content.as_bytes())?;
        if !content.is_empty() && !content.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.sync_all()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileChainStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileChainStore::new(VigilPaths::new(temp_dir.path()));
        (temp_dir, store)
    }

    #[test]
    fn test_append_writes_one_line_per_record() {
        let (_dir, store) = store();
        store.append_line("s-1", r#"{"n":1}"#).unwrap();
        store.append_line("s-1", r#"{"n":2}"#).unwrap();

        let content = fs::read_to_string(store.paths().active_chain("s-1")).unwrap();
        assert_eq!(content, "{\"n\":1}\n{\"n\":2}\n");
    }

    #[test]
    fn test_failed_write_is_truncated() {
        let (_dir, store) = store();
        store.append_line("s-1", r#"{"n":1}"#).unwrap();
        let path = store.paths().active_chain("s-1");
        let len = fs::metadata(&path).unwrap().len();

        // A short write leaves part of the next line behind before failing.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"n":"#).unwrap();
        let failed = Err(std::io::Error::other("disk full"));
        assert!(rollback_on_error(&file, len, failed).is_err());
        drop(file);

        store.append_line("s-1", r#"{"n":2}"#).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"n\":1}\n{\"n\":2}\n");
    }

    #[test]
    fn test_seal_moves_file() {
        let (_dir, store) = store();
        store.append_line("s-1", "{}").unwrap();

        assert_eq!(store.seal("s-1").unwrap(), SealLocation::Sealed);
        assert!(!store.paths().active_chain("s-1").exists());
        assert!(store.paths().sealed_chain("s-1").exists());

        // Sealing twice is harmless.
        assert_eq!(store.seal("s-1").unwrap(), SealLocation::Sealed);
    }

    #[test]
    fn test_seal_missing_chain_is_not_found() {
        let (_dir, store) = store();
        assert!(store.seal("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_seal_rename_failure_leaves_file_active() {
        let (_dir, store) = store();
        store.append_line("s-1", "{}").unwrap();
        // A file where the sealed directory should be makes the move fail.
        fs::create_dir_all(store.paths().root().join("data")).unwrap();
        fs::write(store.paths().sealed_dir(), "blocker").unwrap();

        assert_eq!(store.seal("s-1").unwrap(), SealLocation::Active);
        assert!(store.paths().active_chain("s-1").exists());
    }

    #[test]
    fn test_read_prefers_sealed() {
        let (_dir, store) = store();
        store.append_line("s-1", "active").unwrap();
        fs::create_dir_all(store.paths().sealed_dir()).unwrap();
        fs::write(store.paths().sealed_chain("s-1"), "sealed\n").unwrap();

        let (location, content) = store.read_chain("s-1").unwrap().unwrap();
        assert_eq!(location, SealLocation::Sealed);
        assert_eq!(content, "sealed\n");
        assert!(store.read_chain("missing").unwrap().is_none());
    }

    #[test]
    fn test_unsafe_ids_rejected() {
        let (_dir, store) = store();
        assert!(store.append_line("../escape", "{}").is_err());
        assert!(store.read_chain("a/b").unwrap().is_none());
        assert!(store.import_sealed("..", "{}").is_err());
    }

    #[test]
    fn test_import_never_overwrites() {
        let (_dir, store) = store();
        assert!(store.import_sealed("s-1", "{\"a\":1}").unwrap());
        assert!(!store.import_sealed("s-1", "{\"a\":2}").unwrap());

        let content = fs::read_to_string(store.paths().sealed_chain("s-1")).unwrap();
        assert_eq!(content, "{\"a\":1}\n");
        assert_eq!(store.list_sealed().unwrap(), vec!["s-1".to_string()]);
    }
}
