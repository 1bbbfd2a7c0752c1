//! Controller module - the sync engine and the playback ladder
//!
//! It is organized into submodules by responsibility:
//!
//! - `executor`: Single-call execution with throttling retry
//! - `collector`: Paginated playlist listing
//! - `loader`: Sequential, cache-first content loading
//! - `playback`: Play command verify-and-retry ladder
//! - `sync`: Sync runs, resync and progress publication

mod executor;
mod collector;
mod loader;
mod playback;
mod sync;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::model::{CatalogApi, ContainerContents, LiveContainer, SnapshotCache, SyncProgress};

use executor::RequestExecutor;

pub use playback::{resolve_device, PlaybackOutcome, PlaybackRequest, PlaybackSequencer, PlaybackTimings};

/// What readers see of the library: the playlists materialized by the newest run
#[derive(Debug, Default)]
pub(crate) struct LibraryView {
    generation: u64,
    live: BTreeMap<usize, LiveContainer>,
    /// Contents of earlier runs, offered to the next run as already materialized
    retained: HashMap<String, Arc<ContainerContents>>,
}

impl LibraryView {
    /// Start a view for `generation` and hand back everything materialized so far
    fn restart(&mut self, generation: u64) -> HashMap<String, Arc<ContainerContents>> {
        let live = std::mem::take(&mut self.live);
        for container in live.into_values() {
            self.retained
                .insert(container.descriptor.id.clone(), container.contents);
        }
        self.generation = generation;
        self.retained.clone()
    }
}

/// Owns sync runs against one catalog and one snapshot cache
pub struct SyncEngine<A> {
    api: Arc<A>,
    cache: SnapshotCache,
    executor: RequestExecutor,
    generation: Arc<AtomicU64>,
    view: Arc<RwLock<LibraryView>>,
    progress: Arc<watch::Sender<SyncProgress>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            cache: self.cache.clone(),
            executor: self.executor.clone(),
            generation: self.generation.clone(),
            view: self.view.clone(),
            progress: self.progress.clone(),
            task: self.task.clone(),
        }
    }
}

impl<A: CatalogApi + 'static> SyncEngine<A> {
    pub fn new(api: Arc<A>, cache: SnapshotCache, config: &EngineConfig) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            api,
            cache,
            executor: RequestExecutor::new(config.cooldown),
            generation: Arc::new(AtomicU64::new(0)),
            view: Arc::new(RwLock::new(LibraryView::default())),
            progress: Arc::new(progress),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Latest published progress
    pub fn progress(&self) -> SyncProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Contents of the playlist at listing position `index`, once materialized
    pub async fn contents_for(&self, index: usize) -> Option<LiveContainer> {
        self.view.read().await.live.get(&index).cloned()
    }

    /// Every playlist materialized by the newest run, in listing order
    pub async fn live(&self) -> Vec<LiveContainer> {
        self.view.read().await.live.values().cloned().collect()
    }
}
