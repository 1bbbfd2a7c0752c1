//! Capacity-bounded key-value persistence underneath the snapshot cache.
//!
//! Values are opaque bytes. Every write is all-or-nothing: it either replaces the
//! whole value or leaves the previous one untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

const FILE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("could not serialize cache record: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait SnapshotStore: Send {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replace the value under `key`. Fails with [`StoreError::QuotaExceeded`] when the
    /// store would grow past its quota.
    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn check_quota(used_by_others: u64, needed: u64, quota: u64) -> Result<(), StoreError> {
    if used_by_others + needed > quota {
        return Err(StoreError::QuotaExceeded {
            needed,
            available: quota.saturating_sub(used_by_others),
        });
    }
    Ok(())
}

/// One file per key inside a directory
pub struct FileSnapshotStore {
    dir: PathBuf,
    quota_bytes: u64,
}

impl FileSnapshotStore {
    pub fn open(dir: impl AsRef<Path>, quota_bytes: u64) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        tracing::debug!(dir = %dir.display(), quota_bytes, "Opened snapshot store");
        Ok(Self { dir, quota_bytes })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.{}", file_name, FILE_EXTENSION))
    }

    fn used_bytes_excluding(&self, excluded: &Path) -> Result<u64, StoreError> {
        let mut used = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path == excluded || path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            used += fs::metadata(&path)?.len();
        }
        Ok(used)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        check_quota(self.used_bytes_excluding(&path)?, value.len() as u64, self.quota_bytes)?;

        // Write aside and rename so readers never see a partial record
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Process-local store with the same quota semantics, for runs that must not touch disk
pub struct MemorySnapshotStore {
    entries: BTreeMap<String, Vec<u8>>,
    quota_bytes: u64,
}

impl MemorySnapshotStore {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota_bytes,
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let used: u64 = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len() as u64)
            .sum();
        check_quota(used, value.len() as u64, self.quota_bytes)?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSnapshotStore::open(dir.path().join("snapshots"), 1024).unwrap();

        store.write("playlist.abc", b"{\"a\":1}").unwrap();
        store.write("playlist.def", b"{}").unwrap();

        assert_eq!(store.read("playlist.abc").unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(store.keys().unwrap(), vec!["playlist.abc", "playlist.def"]);

        store.remove("playlist.abc").unwrap();
        assert!(store.read("playlist.abc").unwrap().is_none());
        // Removing twice is fine
        store.remove("playlist.abc").unwrap();
    }

    #[test]
    fn file_store_enforces_quota_but_allows_replacing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSnapshotStore::open(dir.path(), 10).unwrap();

        store.write("a", &[0; 6]).unwrap();
        let err = store.write("b", &[0; 6]).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 6, available: 4 }));

        // Replacing the existing value does not count its old size
        store.write("a", &[1; 10]).unwrap();
        assert_eq!(store.read("a").unwrap().unwrap().len(), 10);
        assert!(store.read("b").unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileSnapshotStore::open(dir.path(), 100).unwrap();
            store.write("playlist.x", b"data").unwrap();
        }
        let store = FileSnapshotStore::open(dir.path(), 100).unwrap();
        assert_eq!(store.read("playlist.x").unwrap().as_deref(), Some(&b"data"[..]));
    }

    #[test]
    fn memory_store_enforces_quota() {
        let mut store = MemorySnapshotStore::new(8);
        store.write("a", &[0; 5]).unwrap();
        assert!(matches!(store.write("b", &[0; 5]), Err(StoreError::QuotaExceeded { .. })));
        store.remove("a").unwrap();
        store.write("b", &[0; 5]).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["b"]);
    }
}
