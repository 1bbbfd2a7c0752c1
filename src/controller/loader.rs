//! Loads playlist contents one descriptor at a time

use std::sync::Arc;

use crate::auth::Credential;
use crate::model::{ApiFailure, CacheWrite, CatalogApi, LoadSource, SnapshotCache, SyncState};
use super::executor::RequestExecutor;

/// What a single `load_next` call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStep {
    Loaded { index: usize, source: LoadSource },
    /// The fetch failed and the playlist was skipped
    Failed { index: usize },
    /// The listing never filled this slot
    Missing { index: usize },
    /// Every listed playlist has been processed
    Exhausted,
}

pub struct ContentLoader<'a, A: ?Sized> {
    api: &'a A,
    executor: &'a RequestExecutor,
    cache: &'a SnapshotCache,
    credential: &'a Credential,
    /// Owner whose snapshots get evicted under quota pressure
    current_user: &'a str,
}

impl<'a, A: CatalogApi + ?Sized> ContentLoader<'a, A> {
    pub fn new(
        api: &'a A,
        executor: &'a RequestExecutor,
        cache: &'a SnapshotCache,
        credential: &'a Credential,
        current_user: &'a str,
    ) -> Self {
        Self {
            api,
            executor,
            cache,
            credential,
            current_user,
        }
    }

    /// Advance exactly one descriptor.
    ///
    /// Only `Unauthorized` comes back as an error, and it leaves the index where it
    /// was. Any other failure is recorded against the playlist and the index moves on.
    pub async fn load_next(&self, state: &mut SyncState) -> Result<LoadStep, ApiFailure> {
        let index = state.next_to_load_index();
        if index >= state.descriptors().len() {
            return Ok(LoadStep::Exhausted);
        }

        let Some(descriptor) = state.descriptor(index).cloned().flatten() else {
            tracing::warn!(index, "Listing left a gap, skipping slot");
            state.record_missing(index);
            return Ok(LoadStep::Missing { index });
        };

        if let Some(contents) = state.materialized(&descriptor) {
            tracing::trace!(playlist_id = %descriptor.id, "Version unchanged since last run");
            state.record_loaded(index, contents, LoadSource::Carried);
            return Ok(LoadStep::Loaded { index, source: LoadSource::Carried });
        }

        if let Some(contents) = self.cache.get(&descriptor.id, &descriptor.version_id).await {
            tracing::debug!(playlist_id = %descriptor.id, tracks = contents.items.len(), "Loaded from cache");
            state.record_loaded(index, Arc::new(contents), LoadSource::Cache);
            return Ok(LoadStep::Loaded { index, source: LoadSource::Cache });
        }

        let fetched = self
            .executor
            .execute("container_contents", || {
                self.api.container_contents(self.credential, &descriptor)
            })
            .await;

        match fetched {
            Ok(contents) => {
                let contents = Arc::new(contents);
                if !state.persistence_degraded() {
                    let write = self.cache.put(&descriptor, &contents, self.current_user).await;
                    if let CacheWrite::Dropped(advisory) = write {
                        tracing::warn!(%advisory, "Continuing without persistence for this run");
                        state.degrade_persistence(advisory);
                    }
                }
                tracing::debug!(
                    playlist_id = %descriptor.id,
                    tracks = contents.items.len(),
                    "Loaded from network"
                );
                state.record_loaded(index, contents, LoadSource::Network);
                Ok(LoadStep::Loaded { index, source: LoadSource::Network })
            }
            Err(ApiFailure::Unauthorized) => Err(ApiFailure::Unauthorized),
            Err(failure) => {
                tracing::warn!(
                    playlist_id = %descriptor.id,
                    name = %descriptor.name,
                    error = %failure,
                    "Skipping playlist that failed to load"
                );
                state.record_failed(index, &failure);
                Ok(LoadStep::Failed { index })
            }
        }
    }
}
