//! State of one sync run.
//!
//! A `SyncState` belongs to exactly one run and is threaded through every step of it.
//! Listing only ever fills slots, loading only ever moves forward; a resync builds a
//! fresh state instead of rewinding this one.

use std::collections::HashMap;
use std::sync::Arc;

use super::api::{ApiFailure, ListingPage};
use super::cache::CacheAdvisory;
use super::content::LiveContainer;
use super::types::{ContainerContents, ContainerDescriptor};

/// Upper bound on how far a reported total may pre-size the listing. Pages beyond it
/// still grow the sequence slot by slot.
const MAX_PRESIZED_TOTAL: usize = 10_000;

/// Where the run currently is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Listing,
    Loading,
    Done,
    /// Listing stopped on an unrecoverable error, a resync is required
    ListingHalted,
    /// The credential was rejected, a fresh one is required
    CredentialRejected,
}

/// Where loaded contents came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadSource {
    /// Same version already materialized by the previous run
    Carried,
    Cache,
    Network,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Pending,
    Loaded {
        contents: Arc<ContainerContents>,
        source: LoadSource,
    },
    /// The fetch failed for a reason other than throttling. Distinct from a playlist
    /// that loaded with zero tracks.
    Failed { reason: String },
    /// The listing reported a slot that never received a descriptor
    Missing,
}

/// Counters for progress display
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub generation: u64,
    pub phase: SyncPhase,
    pub descriptors_total: usize,
    pub descriptors_listed: usize,
    pub containers_loaded: usize,
    pub listing_complete: bool,
    pub load_complete: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedLoad {
    pub position: usize,
    pub container_id: String,
    pub name: String,
    pub reason: String,
}

/// Summary handed back when a run ends
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub progress: SyncProgress,
    pub live: Vec<LiveContainer>,
    pub failures: Vec<FailedLoad>,
    pub advisory: Option<CacheAdvisory>,
    pub listing_error: Option<ApiFailure>,
}

#[derive(Debug)]
pub struct SyncState {
    generation: u64,
    phase: SyncPhase,
    descriptors: Vec<Option<ContainerDescriptor>>,
    outcomes: Vec<LoadOutcome>,
    /// Container id -> version id currently materialized
    loaded_versions: HashMap<String, String>,
    contents: HashMap<String, Arc<ContainerContents>>,
    cursor: Option<String>,
    listing_complete: bool,
    listing_error: Option<ApiFailure>,
    next_to_load_index: usize,
    advisory: Option<CacheAdvisory>,
}

impl SyncState {
    /// Fresh state for run `generation`. `carried` holds contents materialized by the
    /// previous run; they short-circuit unchanged versions before the persistent cache.
    pub fn new(generation: u64, carried: HashMap<String, Arc<ContainerContents>>) -> Self {
        let loaded_versions = carried
            .iter()
            .map(|(id, contents)| (id.clone(), contents.version_id.clone()))
            .collect();
        Self {
            generation,
            phase: SyncPhase::Idle,
            descriptors: Vec::new(),
            outcomes: Vec::new(),
            loaded_versions,
            contents: carried,
            cursor: None,
            listing_complete: false,
            listing_error: None,
            next_to_load_index: 0,
            advisory: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_phase(&mut self, phase: SyncPhase) {
        self.phase = phase;
    }

    pub fn descriptors(&self) -> &[Option<ContainerDescriptor>] {
        &self.descriptors
    }

    pub fn descriptor(&self, index: usize) -> Option<&Option<ContainerDescriptor>> {
        self.descriptors.get(index)
    }

    pub fn outcome(&self, index: usize) -> Option<&LoadOutcome> {
        self.outcomes.get(index)
    }

    pub fn listing_complete(&self) -> bool {
        self.listing_complete
    }

    pub fn next_to_load_index(&self) -> usize {
        self.next_to_load_index
    }

    pub fn loaded_version(&self, container_id: &str) -> Option<&str> {
        self.loaded_versions.get(container_id).map(String::as_str)
    }

    /// Contents already materialized for exactly this descriptor's version
    pub fn materialized(&self, descriptor: &ContainerDescriptor) -> Option<Arc<ContainerContents>> {
        if self.loaded_version(&descriptor.id) != Some(descriptor.version_id.as_str()) {
            return None;
        }
        self.contents.get(&descriptor.id).cloned()
    }

    /// Write a listing page into its slots. The first page's total pre-sizes the
    /// sequence so every descriptor lands at its reported offset. Null entries keep
    /// their slot empty.
    pub fn apply_listing_page(&mut self, page: ListingPage) {
        if self.descriptors.is_empty() {
            if let Some(total) = page.total {
                let total = total as usize;
                if total > MAX_PRESIZED_TOTAL {
                    tracing::warn!(total, "Reported listing total is implausible, not pre-sizing past the limit");
                }
                self.descriptors.resize(total.min(MAX_PRESIZED_TOTAL), None);
            }
        }

        let offset = page.offset as usize;
        let end = offset + page.items.len();
        if end > self.descriptors.len() {
            self.descriptors.resize(end, None);
        }
        for (i, descriptor) in page.items.into_iter().enumerate() {
            if let Some(descriptor) = descriptor {
                self.descriptors[offset + i] = Some(descriptor);
            }
        }
        self.outcomes.resize(self.descriptors.len(), LoadOutcome::Pending);

        self.cursor = page.next;
        self.listing_complete = self.cursor.is_none();
    }

    pub fn halt_listing(&mut self, failure: ApiFailure) {
        self.listing_complete = false;
        self.listing_error = Some(failure);
        self.phase = SyncPhase::ListingHalted;
    }

    pub fn persistence_degraded(&self) -> bool {
        self.advisory.is_some()
    }

    pub fn degrade_persistence(&mut self, advisory: CacheAdvisory) {
        if self.advisory.is_none() {
            self.advisory = Some(advisory);
        }
    }

    fn advance(&mut self, index: usize, outcome: LoadOutcome) {
        debug_assert_eq!(index, self.next_to_load_index, "loads must complete in order");
        if let Some(slot) = self.outcomes.get_mut(index) {
            *slot = outcome;
        }
        self.next_to_load_index += 1;
    }

    pub fn record_loaded(&mut self, index: usize, contents: Arc<ContainerContents>, source: LoadSource) {
        self.loaded_versions
            .insert(contents.container_id.clone(), contents.version_id.clone());
        self.contents
            .insert(contents.container_id.clone(), contents.clone());
        self.advance(index, LoadOutcome::Loaded { contents, source });
    }

    pub fn record_failed(&mut self, index: usize, failure: &ApiFailure) {
        self.advance(index, LoadOutcome::Failed { reason: failure.to_string() });
    }

    pub fn record_missing(&mut self, index: usize) {
        self.advance(index, LoadOutcome::Missing);
    }

    pub fn containers_loaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LoadOutcome::Loaded { .. }))
            .count()
    }

    pub fn load_complete(&self) -> bool {
        self.listing_complete && self.next_to_load_index >= self.descriptors.len()
    }

    pub fn progress(&self) -> SyncProgress {
        SyncProgress {
            generation: self.generation,
            phase: self.phase,
            descriptors_total: self.descriptors.len(),
            descriptors_listed: self.descriptors.iter().filter(|d| d.is_some()).count(),
            containers_loaded: self.containers_loaded(),
            listing_complete: self.listing_complete,
            load_complete: self.load_complete(),
        }
    }

    /// The container at `index` if it has been materialized
    pub fn live_container(&self, index: usize) -> Option<LiveContainer> {
        let descriptor = self.descriptors.get(index)?.as_ref()?;
        match self.outcomes.get(index)? {
            LoadOutcome::Loaded { contents, .. } => Some(LiveContainer {
                position: index,
                descriptor: descriptor.clone(),
                contents: contents.clone(),
            }),
            _ => None,
        }
    }

    pub fn report(&self) -> SyncReport {
        let live = (0..self.descriptors.len())
            .filter_map(|i| self.live_container(i))
            .collect();
        let failures = self
            .outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, outcome)| match (outcome, self.descriptors.get(i)) {
                (LoadOutcome::Failed { reason }, Some(Some(d))) => Some(FailedLoad {
                    position: i,
                    container_id: d.id.clone(),
                    name: d.name.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect();

        SyncReport {
            progress: self.progress(),
            live,
            failures,
            advisory: self.advisory.clone(),
            listing_error: self.listing_error.clone(),
        }
    }
}
