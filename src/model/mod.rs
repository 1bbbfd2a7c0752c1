//! Model module - library data, persistence and the Web API ports
//!
//! - `types`: Core records (playlist descriptors, tracks, contents)
//! - `api`: Catalog and player port traits with their failure taxonomy
//! - `store`: Quota-bounded key-value stores
//! - `cache`: Snapshot cache of playlist versions with the eviction policy
//! - `sync_state`: Per-run sync state owned by the engine
//! - `content`: Live/remembered playlists and track search
//! - `spotify_client`: reqwest adapter for the Spotify Web API

mod types;
mod api;
mod store;
mod cache;
mod sync_state;
mod content;
mod spotify_client;

pub use types::{ContainerContents, ContainerDescriptor, ContentItem, DeviceInfo, UserProfile};

pub use api::{ApiFailure, CatalogApi, ListingPage, PlayOffset, PlaybackApi};
#[cfg(test)]
pub use api::{MockCatalogApi, MockPlaybackApi};

pub use store::{FileSnapshotStore, MemorySnapshotStore};

pub use cache::{CacheWrite, SnapshotCache};

pub use sync_state::{LoadOutcome, LoadSource, SyncPhase, SyncProgress, SyncReport, SyncState};

pub use content::{search_library, ContainerMatch, LiveContainer, SearchSource, TrackMatch};

pub use spotify_client::SpotifyClient;
