//! Sync runs: listing, then sequential loading, published under a generation guard

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use futures::TryStreamExt;
use tokio::task::JoinHandle;

use crate::auth::Credential;
use crate::model::{ApiFailure, CatalogApi, SyncPhase, SyncReport, SyncState};
use super::collector::PaginatedCollector;
use super::loader::{ContentLoader, LoadStep};
use super::SyncEngine;

impl<A: CatalogApi + 'static> SyncEngine<A> {
    /// Run one complete sync in place.
    ///
    /// A listing failure ends the run with [`SyncPhase::ListingHalted`] in the report;
    /// only a rejected credential is returned as an error. A run that gets superseded
    /// by a newer one stops at its next step and returns what it had.
    pub async fn run(&self, credential: &Credential) -> Result<SyncReport, ApiFailure> {
        let generation = self.next_generation();
        self.run_generation(generation, credential).await
    }

    /// Start a sync in the background unless one is already running.
    /// Returns the generation of the run in flight.
    pub async fn begin_sync(&self, credential: Credential) -> u64 {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                let current = self.generation.load(Ordering::SeqCst);
                tracing::debug!(generation = current, "Sync already running");
                return current;
            }
        }
        self.spawn_run(&mut task, credential)
    }

    /// Discard whatever run is in flight and start over from an empty listing
    pub async fn resync(&self, credential: Credential) -> u64 {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if !handle.is_finished() {
                tracing::info!("Discarding the running sync");
            }
            handle.abort();
        }
        self.spawn_run(&mut task, credential)
    }

    fn spawn_run(&self, task: &mut Option<JoinHandle<()>>, credential: Credential) -> u64 {
        let generation = self.next_generation();
        let engine = self.clone();
        *task = Some(tokio::spawn(async move {
            match engine.run_generation(generation, &credential).await {
                Ok(report) => tracing::debug!(
                    generation,
                    loaded = report.progress.containers_loaded,
                    "Background sync finished"
                ),
                Err(e) => tracing::warn!(generation, error = %e, "Background sync stopped"),
            }
        }));
        generation
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Make the state visible. Returns false, changing nothing, once the run is stale.
    async fn publish(&self, state: &SyncState, loaded: Option<usize>) -> bool {
        let mut view = self.view.write().await;
        let generation = state.generation();
        if !self.is_current(generation) || view.generation != generation {
            tracing::debug!(generation, "Run superseded, dropping its update");
            return false;
        }

        if let Some(container) = loaded.and_then(|index| state.live_container(index)) {
            view.live.insert(container.position, container);
        }
        self.progress.send_replace(state.progress());
        true
    }

    async fn stop(&self, mut state: SyncState, failure: ApiFailure) -> Result<SyncReport, ApiFailure> {
        match failure {
            ApiFailure::Unauthorized => {
                tracing::warn!(generation = state.generation(), "Credential rejected, sync stopped");
                state.set_phase(SyncPhase::CredentialRejected);
                self.publish(&state, None).await;
                Err(ApiFailure::Unauthorized)
            }
            other => {
                tracing::error!(
                    generation = state.generation(),
                    listed = state.progress().descriptors_listed,
                    error = %other,
                    "Listing halted, a resync is required"
                );
                state.halt_listing(other);
                self.publish(&state, None).await;
                Ok(state.report())
            }
        }
    }

    async fn run_generation(&self, generation: u64, credential: &Credential) -> Result<SyncReport, ApiFailure> {
        let carried = {
            let mut view = self.view.write().await;
            if !self.is_current(generation) {
                return Ok(SyncState::new(generation, HashMap::new()).report());
            }
            view.restart(generation)
        };

        let mut state = SyncState::new(generation, carried);
        tracing::info!(generation, "Sync started");
        state.set_phase(SyncPhase::Listing);
        if !self.publish(&state, None).await {
            return Ok(state.report());
        }

        let user = match self
            .executor
            .execute("current_user", || self.api.current_user(credential))
            .await
        {
            Ok(user) => user,
            Err(failure) => return self.stop(state, failure).await,
        };

        let collector = PaginatedCollector::new(self.api.as_ref(), &self.executor, credential);
        let mut pages = std::pin::pin!(collector.pages());
        loop {
            let page = match pages.try_next().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(failure) => return self.stop(state, failure).await,
            };
            state.apply_listing_page(page);
            if !self.publish(&state, None).await {
                return Ok(state.report());
            }
        }
        tracing::info!(
            generation,
            playlists = state.descriptors().len(),
            "Listing complete"
        );

        state.set_phase(SyncPhase::Loading);
        if !self.publish(&state, None).await {
            return Ok(state.report());
        }

        let loader = ContentLoader::new(
            self.api.as_ref(),
            &self.executor,
            &self.cache,
            credential,
            &user.id,
        );
        loop {
            match loader.load_next(&mut state).await {
                Ok(LoadStep::Exhausted) => break,
                Ok(step) => {
                    let loaded = match step {
                        LoadStep::Loaded { index, .. } => Some(index),
                        _ => None,
                    };
                    if !self.publish(&state, loaded).await {
                        return Ok(state.report());
                    }
                }
                Err(failure) => return self.stop(state, failure).await,
            }
        }

        state.set_phase(SyncPhase::Done);
        self.publish(&state, None).await;

        let report = state.report();
        tracing::info!(
            generation,
            loaded = report.progress.containers_loaded,
            failed = report.failures.len(),
            persistence_degraded = report.advisory.is_some(),
            "Sync finished"
        );
        Ok(report)
    }
}
