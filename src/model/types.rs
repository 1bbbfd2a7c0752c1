//! Core records exchanged between the catalog, the snapshot cache and the sync engine

use serde::{Deserialize, Serialize};

/// One playlist as reported by a listing page.
///
/// Immutable once received. A later descriptor with the same `id` and a different
/// `version_id` supersedes it wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub id: String,
    /// Snapshot id, changes whenever the playlist contents change
    pub version_id: String,
    pub name: String,
    pub owner_id: String,
    /// Locator of the playlist's track listing
    pub contents_uri: String,
    /// User-facing link
    pub external_uri: String,
}

/// A single track inside a playlist
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Index in the playlist as the player counts it, unplayable entries included
    pub position: usize,
    pub title: String,
    /// Playable identity (`spotify:track:...`)
    pub uri: String,
    pub artist_names: Vec<String>,
    pub album_name: String,
}

/// Ordered tracks of one playlist version. Never mutated, a version change produces a
/// new value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerContents {
    pub container_id: String,
    pub version_id: String,
    pub items: Vec<ContentItem>,
}

impl ContainerContents {
    pub fn new(container_id: impl Into<String>, version_id: impl Into<String>, items: Vec<ContentItem>) -> Self {
        Self {
            container_id: container_id.into(),
            version_id: version_id.into(),
            items,
        }
    }
}

/// The account the credential belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

/// Information about a Spotify playback device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}
