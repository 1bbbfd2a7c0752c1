//! Search across materialized playlists and remembered snapshots

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::cache::CacheEntry;
use super::types::{ContainerContents, ContainerDescriptor, ContentItem};

/// A playlist materialized by the current sync run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveContainer {
    /// Position in the user's playlist listing
    pub position: usize,
    pub descriptor: ContainerDescriptor,
    pub contents: Arc<ContainerContents>,
}

/// A cached snapshot that is not the version the current run materialized
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RememberedContainer {
    pub container_id: String,
    pub version_id: String,
    pub name: String,
    pub owner_id: String,
    pub remembered_at: DateTime<Utc>,
    pub items: Vec<ContentItem>,
}

impl From<CacheEntry> for RememberedContainer {
    fn from(entry: CacheEntry) -> Self {
        Self {
            container_id: entry.container_id,
            version_id: entry.version_id,
            name: entry.name,
            owner_id: entry.owner_id,
            remembered_at: entry.stored_at,
            items: entry.contents.items,
        }
    }
}

/// Where a search hit comes from, decided once when results are assembled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchSource {
    Live(LiveContainer),
    Remembered(RememberedContainer),
}

impl SearchSource {
    pub fn name(&self) -> &str {
        match self {
            SearchSource::Live(live) => &live.descriptor.name,
            SearchSource::Remembered(remembered) => &remembered.name,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            SearchSource::Live(live) => &live.descriptor.owner_id,
            SearchSource::Remembered(remembered) => &remembered.owner_id,
        }
    }

    fn items(&self) -> &[ContentItem] {
        match self {
            SearchSource::Live(live) => &live.contents.items,
            SearchSource::Remembered(remembered) => &remembered.items,
        }
    }

    /// Only the live version is known to the player
    pub fn is_playable(&self) -> bool {
        matches!(self, SearchSource::Live(_))
    }
}

/// A matching track and its position inside the playlist
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackMatch {
    pub position: usize,
    pub item: ContentItem,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerMatch {
    pub source: SearchSource,
    pub tracks: Vec<TrackMatch>,
}

/// Case-insensitive substring match over "title artists album"
pub fn track_matches(item: &ContentItem, query_lower: &str) -> bool {
    let haystack = format!(
        "{} {} {}",
        item.title,
        item.artist_names.join(" "),
        item.album_name
    );
    haystack.to_lowercase().contains(query_lower)
}

fn match_source(source: SearchSource, query_lower: &str) -> Option<ContainerMatch> {
    let tracks: Vec<TrackMatch> = source
        .items()
        .iter()
        .filter(|item| track_matches(item, query_lower))
        .map(|item| TrackMatch {
            position: item.position,
            item: item.clone(),
        })
        .collect();

    if tracks.is_empty() {
        None
    } else {
        Some(ContainerMatch { source, tracks })
    }
}

/// Find matching tracks, live playlists first in listing order, then remembered
/// snapshots newest first. A remembered snapshot of a version that is also live is
/// skipped.
pub fn search_library(
    query: &str,
    live: &[LiveContainer],
    remembered: Vec<CacheEntry>,
) -> Vec<ContainerMatch> {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return Vec::new();
    }

    let live_versions: HashSet<(&str, &str)> = live
        .iter()
        .map(|c| (c.contents.container_id.as_str(), c.contents.version_id.as_str()))
        .collect();

    let mut sorted_live: Vec<&LiveContainer> = live.iter().collect();
    sorted_live.sort_by_key(|c| c.position);

    let mut matches: Vec<ContainerMatch> = sorted_live
        .into_iter()
        .filter_map(|c| match_source(SearchSource::Live(c.clone()), &query_lower))
        .collect();

    let mut remembered = remembered;
    remembered.retain(|entry| {
        !live_versions.contains(&(entry.container_id.as_str(), entry.version_id.as_str()))
    });
    remembered.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));

    matches.extend(
        remembered
            .into_iter()
            .filter_map(|entry| match_source(SearchSource::Remembered(entry.into()), &query_lower)),
    );
    matches
}
