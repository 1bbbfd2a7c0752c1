//! Persistent cache of playlist snapshots keyed by (playlist id, snapshot id).
//!
//! All versions of one playlist live in a single store record so the number of keys
//! stays bounded by the number of playlists. Several versions of the same playlist may
//! coexist until evicted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::store::{SnapshotStore, StoreError};
use super::types::{ContainerContents, ContainerDescriptor};

const KEY_PREFIX: &str = "playlist.";

/// One stored playlist version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub container_id: String,
    pub version_id: String,
    pub owner_id: String,
    pub name: String,
    pub contents: ContainerContents,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContainerRecord {
    versions: BTreeMap<String, CacheEntry>,
}

impl ContainerRecord {
    fn owned_by(&self, owner_id: &str) -> bool {
        self.versions.values().any(|entry| entry.owner_id == owner_id)
    }
}

/// Non-fatal notice that a snapshot could not be persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheAdvisory {
    pub container_id: String,
    pub reason: String,
}

impl fmt::Display for CacheAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache is full, playlist {} was not saved ({}); continuing without persistence",
            self.container_id, self.reason
        )
    }
}

/// Result of [`SnapshotCache::put`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheWrite {
    Stored,
    /// The same (id, version) was already persisted, nothing written
    AlreadyPresent,
    Dropped(CacheAdvisory),
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<Mutex<Box<dyn SnapshotStore>>>,
}

fn key_for(container_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, container_id)
}

fn load_record(store: &dyn SnapshotStore, key: &str) -> Option<ContainerRecord> {
    match store.read(key) {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unreadable cache record");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read cache record");
            None
        }
    }
}

fn write_entry(store: &mut dyn SnapshotStore, key: &str, entry: &CacheEntry) -> Result<(), StoreError> {
    let mut record = load_record(store, key).unwrap_or_default();
    record.versions.insert(entry.version_id.clone(), entry.clone());
    let bytes = serde_json::to_vec(&record)?;
    store.write(key, &bytes)
}

fn evict_owner(store: &mut dyn SnapshotStore, owner_id: &str) -> usize {
    let keys = match store.keys() {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list cache records for eviction");
            return 0;
        }
    };

    let mut evicted = 0;
    for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
        let Some(mut record) = load_record(store, key) else {
            continue;
        };
        if !record.owned_by(owner_id) {
            continue;
        }

        let before = record.versions.len();
        record.versions.retain(|_, entry| entry.owner_id != owner_id);
        let removed = before - record.versions.len();

        let result = if record.versions.is_empty() {
            store.remove(key)
        } else {
            // Shrinks the record, so it cannot hit the quota
            serde_json::to_vec(&record)
                .map_err(StoreError::from)
                .and_then(|bytes| store.write(key, &bytes))
        };
        match result {
            Ok(()) => evicted += removed,
            Err(e) => tracing::warn!(key, error = %e, "Failed to evict cache record"),
        }
    }
    evicted
}

impl SnapshotCache {
    pub fn new(store: impl SnapshotStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Pure lookup, never touches the network
    pub async fn get(&self, container_id: &str, version_id: &str) -> Option<ContainerContents> {
        let store = self.store.lock().await;
        let record = load_record(store.as_ref(), &key_for(container_id))?;
        record
            .versions
            .get(version_id)
            .map(|entry| entry.contents.clone())
    }

    /// Persist one playlist version.
    ///
    /// Writing a key that is already present is a no-op. When the store is full every
    /// entry owned by `current_user` is evicted and the write retried once; if that
    /// fails too the write is dropped and reported as an advisory.
    pub async fn put(
        &self,
        descriptor: &ContainerDescriptor,
        contents: &ContainerContents,
        current_user: &str,
    ) -> CacheWrite {
        let key = key_for(&contents.container_id);
        let mut store = self.store.lock().await;

        if let Some(record) = load_record(store.as_ref(), &key) {
            if record.versions.contains_key(&contents.version_id) {
                tracing::trace!(playlist_id = %contents.container_id, "Snapshot already cached");
                return CacheWrite::AlreadyPresent;
            }
        }

        let entry = CacheEntry {
            container_id: contents.container_id.clone(),
            version_id: contents.version_id.clone(),
            owner_id: descriptor.owner_id.clone(),
            name: descriptor.name.clone(),
            contents: contents.clone(),
            stored_at: Utc::now(),
        };

        let failure = match write_entry(store.as_mut(), &key, &entry) {
            Ok(()) => return CacheWrite::Stored,
            Err(StoreError::QuotaExceeded { needed, available }) => {
                let evicted = evict_owner(store.as_mut(), current_user);
                tracing::info!(
                    playlist_id = %entry.container_id,
                    needed,
                    available,
                    evicted,
                    owner = current_user,
                    "Cache quota reached, evicted the current user's snapshots"
                );
                match write_entry(store.as_mut(), &key, &entry) {
                    Ok(()) => return CacheWrite::Stored,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        let advisory = CacheAdvisory {
            container_id: entry.container_id,
            reason: failure.to_string(),
        };
        tracing::warn!(advisory = %advisory, "Snapshot write dropped");
        CacheWrite::Dropped(advisory)
    }

    /// Remove every cached version of playlists owned by `owner_id`
    pub async fn evict_all_for(&self, owner_id: &str) -> usize {
        let mut store = self.store.lock().await;
        evict_owner(store.as_mut(), owner_id)
    }

    /// Drop all cached versions of one playlist. Returns whether anything was stored.
    pub async fn invalidate(&self, container_id: &str) -> Result<bool, StoreError> {
        let key = key_for(container_id);
        let mut store = self.store.lock().await;
        let existed = store.read(&key)?.is_some();
        store.remove(&key)?;
        Ok(existed)
    }

    /// Every stored version, newest first
    pub async fn remembered(&self) -> Vec<CacheEntry> {
        let store = self.store.lock().await;
        let keys = match store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list cache records");
                return Vec::new();
            }
        };

        let mut entries: Vec<CacheEntry> = keys
            .iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .filter_map(|key| load_record(store.as_ref(), key))
            .flat_map(|record| record.versions.into_values())
            .collect();
        entries.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::MemorySnapshotStore;
    use crate::model::types::ContentItem;
    use std::sync::Mutex as StdMutex;

    fn descriptor(id: &str, version: &str, owner: &str) -> ContainerDescriptor {
        ContainerDescriptor {
            id: id.into(),
            version_id: version.into(),
            name: format!("Playlist {}", id),
            owner_id: owner.into(),
            contents_uri: format!("https://api.example/playlists/{}/tracks", id),
            external_uri: format!("https://open.example/playlist/{}", id),
        }
    }

    fn contents(id: &str, version: &str, tracks: usize) -> ContainerContents {
        let items = (0..tracks)
            .map(|i| ContentItem {
                position: i,
                title: format!("Song {}", i),
                uri: format!("spotify:track:{}{}", id, i),
                artist_names: vec!["Artist".into()],
                album_name: "Album".into(),
            })
            .collect();
        ContainerContents::new(id, version, items)
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Op {
        Write(String, bool),
        Remove(String),
        Keys,
    }

    /// Memory store that records mutating calls and can refuse every write
    struct RecordingStore {
        inner: MemorySnapshotStore,
        ops: Arc<StdMutex<Vec<Op>>>,
        always_full: bool,
    }

    impl SnapshotStore for RecordingStore {
        fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.read(key)
        }

        fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            let result = if self.always_full {
                Err(StoreError::QuotaExceeded { needed: value.len() as u64, available: 0 })
            } else {
                self.inner.write(key, value)
            };
            self.ops.lock().unwrap().push(Op::Write(key.to_string(), result.is_ok()));
            result
        }

        fn remove(&mut self, key: &str) -> Result<(), StoreError> {
            self.ops.lock().unwrap().push(Op::Remove(key.to_string()));
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.ops.lock().unwrap().push(Op::Keys);
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn get_returns_only_the_requested_version() {
        let cache = SnapshotCache::new(MemorySnapshotStore::new(1 << 20));
        let d = descriptor("p1", "v1", "me");

        assert_eq!(cache.put(&d, &contents("p1", "v1", 2), "me").await, CacheWrite::Stored);
        assert_eq!(cache.get("p1", "v1").await, Some(contents("p1", "v1", 2)));
        assert_eq!(cache.get("p1", "v2").await, None);
        assert_eq!(cache.get("p2", "v1").await, None);
    }

    #[tokio::test]
    async fn put_twice_is_a_no_op() {
        let cache = SnapshotCache::new(MemorySnapshotStore::new(1 << 20));
        let d = descriptor("p1", "v1", "me");
        let c = contents("p1", "v1", 3);

        assert_eq!(cache.put(&d, &c, "me").await, CacheWrite::Stored);
        let first = cache.remembered().await;
        assert_eq!(cache.put(&d, &c, "me").await, CacheWrite::AlreadyPresent);
        let second = cache.remembered().await;

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn versions_of_one_playlist_coexist() {
        let cache = SnapshotCache::new(MemorySnapshotStore::new(1 << 20));
        cache.put(&descriptor("p1", "v1", "me"), &contents("p1", "v1", 1), "me").await;
        cache.put(&descriptor("p1", "v2", "me"), &contents("p1", "v2", 2), "me").await;

        assert_eq!(cache.get("p1", "v1").await.unwrap().items.len(), 1);
        assert_eq!(cache.get("p1", "v2").await.unwrap().items.len(), 2);
        assert_eq!(cache.remembered().await.len(), 2);
    }

    #[tokio::test]
    async fn evict_all_for_keeps_foreign_playlists() {
        let cache = SnapshotCache::new(MemorySnapshotStore::new(1 << 20));
        cache.put(&descriptor("mine", "v1", "me"), &contents("mine", "v1", 1), "me").await;
        cache.put(&descriptor("theirs", "v1", "friend"), &contents("theirs", "v1", 1), "me").await;

        assert_eq!(cache.evict_all_for("me").await, 1);
        assert!(cache.get("mine", "v1").await.is_none());
        assert!(cache.get("theirs", "v1").await.is_some());
    }

    #[tokio::test]
    async fn quota_pressure_evicts_current_user_then_retries() {
        let c1 = contents("mine", "v1", 20);
        let one_record = serde_json::to_vec(&ContainerRecord {
            versions: BTreeMap::from([(
                "v1".to_string(),
                CacheEntry {
                    container_id: "mine".into(),
                    version_id: "v1".into(),
                    owner_id: "me".into(),
                    name: "Playlist mine".into(),
                    contents: c1.clone(),
                    stored_at: Utc::now(),
                },
            )]),
        })
        .unwrap();
        // Room for one record, not two
        let quota = one_record.len() as u64 * 3 / 2;
        let cache = SnapshotCache::new(MemorySnapshotStore::new(quota));

        assert_eq!(cache.put(&descriptor("mine", "v1", "me"), &c1, "me").await, CacheWrite::Stored);
        let write = cache
            .put(&descriptor("theirs", "v1", "friend"), &contents("theirs", "v1", 20), "me")
            .await;

        assert_eq!(write, CacheWrite::Stored);
        assert!(cache.get("mine", "v1").await.is_none());
        assert!(cache.get("theirs", "v1").await.is_some());
    }

    #[tokio::test]
    async fn failed_retry_drops_the_write_after_exactly_one_eviction() {
        let ops = Arc::new(StdMutex::new(Vec::new()));
        let cache = SnapshotCache::new(RecordingStore {
            inner: MemorySnapshotStore::new(1 << 20),
            ops: ops.clone(),
            always_full: true,
        });

        let write = cache.put(&descriptor("p1", "v1", "me"), &contents("p1", "v1", 1), "me").await;

        match write {
            CacheWrite::Dropped(advisory) => assert_eq!(advisory.container_id, "p1"),
            other => panic!("expected a dropped write, got {:?}", other),
        }
        let ops = ops.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                Op::Write("playlist.p1".into(), false),
                Op::Keys,
                Op::Write("playlist.p1".into(), false),
            ]
        );
    }

    #[tokio::test]
    async fn invalidate_removes_every_version() {
        let cache = SnapshotCache::new(MemorySnapshotStore::new(1 << 20));
        cache.put(&descriptor("p1", "v1", "me"), &contents("p1", "v1", 1), "me").await;
        cache.put(&descriptor("p1", "v2", "me"), &contents("p1", "v2", 1), "me").await;

        assert!(cache.invalidate("p1").await.unwrap());
        assert!(!cache.invalidate("p1").await.unwrap());
        assert!(cache.remembered().await.is_empty());
    }

    #[tokio::test]
    async fn persisted_snapshots_survive_a_new_cache_instance() {
        use crate::model::store::FileSnapshotStore;

        let dir = tempfile::tempdir().unwrap();
        {
            let cache = SnapshotCache::new(FileSnapshotStore::open(dir.path(), 1 << 20).unwrap());
            cache.put(&descriptor("p1", "v1", "me"), &contents("p1", "v1", 4), "me").await;
        }
        let cache = SnapshotCache::new(FileSnapshotStore::open(dir.path(), 1 << 20).unwrap());
        assert_eq!(cache.get("p1", "v1").await.unwrap().items.len(), 4);
    }
}
