//! Spotify Web API adapter for the catalog and player ports

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use rspotify::model::{PlaylistId, TrackId};
use rspotify::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::auth::Credential;
use super::api::{ApiFailure, CatalogApi, ListingPage, PlayOffset, PlaybackApi};
use super::types::{ContainerContents, ContainerDescriptor, ContentItem, DeviceInfo, UserProfile};

/// Only the fields the engine reads are requested
const CONTENTS_FIELDS: &str = "items(track(uri,name,artists(name),album(name)))";

// --- wire types ---

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistPageDto {
    total: Option<u32>,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    items: Vec<Option<PlaylistDto>>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistDto {
    id: String,
    snapshot_id: String,
    name: String,
    owner: OwnerDto,
    tracks: TracksRefDto,
    #[serde(default)]
    external_urls: ExternalUrlsDto,
}

#[derive(Debug, Deserialize)]
struct OwnerDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TracksRefDto {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrlsDto {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsPageDto {
    #[serde(default)]
    items: Vec<PlaylistItemDto>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemDto {
    track: Option<TrackDto>,
}

#[derive(Debug, Deserialize)]
struct TrackDto {
    uri: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<NamedDto>,
    album: Option<NamedDto>,
}

#[derive(Debug, Deserialize)]
struct NamedDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlaybackStateDto {
    item: Option<PlayingItemDto>,
}

#[derive(Debug, Deserialize)]
struct PlayingItemDto {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesDto {
    #[serde(default)]
    devices: Vec<DeviceDto>,
}

#[derive(Debug, Deserialize)]
struct DeviceDto {
    id: Option<String>,
    name: String,
    is_active: bool,
}

impl From<PlaylistDto> for ContainerDescriptor {
    fn from(dto: PlaylistDto) -> Self {
        Self {
            id: dto.id,
            version_id: dto.snapshot_id,
            name: dto.name,
            owner_id: dto.owner.id,
            contents_uri: dto.tracks.href,
            external_uri: dto.external_urls.spotify.unwrap_or_default(),
        }
    }
}

fn listing_page_from(dto: PlaylistPageDto) -> ListingPage {
    ListingPage {
        total: dto.total,
        offset: dto.offset,
        items: dto
            .items
            .into_iter()
            .map(|item| item.map(ContainerDescriptor::from))
            .collect(),
        next: dto.next,
    }
}

fn contents_from(descriptor: &ContainerDescriptor, dto: ContentsPageDto) -> ContainerContents {
    let items = dto
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let track = item.track?;
            let uri = track.uri?;
            Some(ContentItem {
                position,
                title: track.name,
                uri,
                artist_names: track.artists.into_iter().map(|a| a.name).collect(),
                album_name: track.album.map(|a| a.name).unwrap_or_default(),
            })
        })
        .collect();
    ContainerContents::new(descriptor.id.clone(), descriptor.version_id.clone(), items)
}

/// `Retry-After` in whole seconds, the only form the Web API sends
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiFailure> {
    serde_json::from_str(body).map_err(|e| ApiFailure::Decode(e.to_string()))
}

/// reqwest-backed client for the Spotify Web API
#[derive(Clone)]
pub struct SpotifyClient {
    http: Client,
    base_url: String,
    page_size: u32,
}

impl SpotifyClient {
    pub fn new(base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send with the bearer credential and turn non-2xx statuses into failures
    async fn send(
        &self,
        request: RequestBuilder,
        credential: &Credential,
    ) -> Result<(StatusCode, String), ApiFailure> {
        let response = request
            .bearer_auth(credential.bearer())
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;

        if status.is_success() {
            Ok((status, body))
        } else {
            tracing::debug!(status = status.as_u16(), ?retry_after, "API returned error status");
            Err(ApiFailure::from_status(status.as_u16(), retry_after, body))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        credential: &Credential,
    ) -> Result<T, ApiFailure> {
        let (_, body) = self.send(request, credential).await?;
        decode(&body)
    }
}

#[async_trait::async_trait]
impl CatalogApi for SpotifyClient {
    async fn current_user(&self, credential: &Credential) -> Result<UserProfile, ApiFailure> {
        crate::log_api_request!("current_user");
        let dto: UserDto = self.get_json(self.http.get(self.url("/me")), credential).await?;
        Ok(UserProfile {
            id: dto.id,
            display_name: dto.display_name,
        })
    }

    async fn list_page(
        &self,
        credential: &Credential,
        cursor: Option<String>,
    ) -> Result<ListingPage, ApiFailure> {
        crate::log_api_request!("list_page", cursor = ?cursor);
        let request = match cursor {
            Some(next) => self.http.get(next),
            None => self
                .http
                .get(self.url("/me/playlists"))
                .query(&[("limit", self.page_size)]),
        };
        let dto: PlaylistPageDto = self.get_json(request, credential).await?;
        Ok(listing_page_from(dto))
    }

    async fn container_contents(
        &self,
        credential: &Credential,
        descriptor: &ContainerDescriptor,
    ) -> Result<ContainerContents, ApiFailure> {
        crate::log_api_request!("container_contents", playlist_id = %descriptor.id);
        let uri = if descriptor.contents_uri.is_empty() {
            self.url(&format!("/playlists/{}/tracks", descriptor.id))
        } else {
            descriptor.contents_uri.clone()
        };
        let request = self.http.get(uri).query(&[("fields", CONTENTS_FIELDS)]);
        let dto: ContentsPageDto = self.get_json(request, credential).await?;
        Ok(contents_from(descriptor, dto))
    }
}

#[async_trait::async_trait]
impl PlaybackApi for SpotifyClient {
    async fn play(
        &self,
        credential: &Credential,
        device_id: &str,
        container_id: &str,
        offset: PlayOffset,
    ) -> Result<(), ApiFailure> {
        crate::log_api_request!("play", device_id, playlist_id = container_id, offset = ?offset);

        let context = PlaylistId::from_id(container_id)
            .map_err(|e| ApiFailure::Other { status: 400, body: e.to_string() })?;
        let offset = match offset {
            PlayOffset::Position(position) => serde_json::json!({ "position": position }),
            PlayOffset::Track(uri) => {
                let track = TrackId::from_uri(&uri)
                    .map_err(|e| ApiFailure::Other { status: 400, body: e.to_string() })?;
                serde_json::json!({ "uri": track.uri() })
            }
        };
        let body = serde_json::json!({
            "context_uri": context.uri(),
            "offset": offset,
            "position_ms": 0,
        });

        let request = self
            .http
            .put(self.url("/me/player/play"))
            .query(&[("device_id", device_id)])
            .json(&body);
        self.send(request, credential).await?;
        Ok(())
    }

    async fn currently_playing(&self, credential: &Credential) -> Result<Option<String>, ApiFailure> {
        crate::log_api_request!("currently_playing");
        let (status, body) = self.send(self.http.get(self.url("/me/player")), credential).await?;
        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return Ok(None);
        }
        let dto: PlaybackStateDto = decode(&body)?;
        Ok(dto.item.and_then(|item| item.uri))
    }

    async fn devices(&self, credential: &Credential) -> Result<Vec<DeviceInfo>, ApiFailure> {
        crate::log_api_request!("devices");
        let dto: DevicesDto = self
            .get_json(self.http.get(self.url("/me/player/devices")), credential)
            .await?;
        let devices: Vec<DeviceInfo> = dto
            .devices
            .into_iter()
            .map(|d| DeviceInfo {
                id: d.id.unwrap_or_default(),
                name: d.name,
                is_active: d.is_active,
            })
            .collect();
        tracing::debug!(count = devices.len(), "Found devices");
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncState;
    use reqwest::header::HeaderValue;
    use std::collections::HashMap;

    fn playlist_json(id: &str, snapshot: &str) -> String {
        format!(
            r#"{{
                "id": "{id}",
                "snapshot_id": "{snapshot}",
                "name": "Playlist {id}",
                "owner": {{ "id": "spotify" }},
                "tracks": {{ "href": "https://api.spotify.com/v1/playlists/{id}/tracks", "total": 50 }},
                "external_urls": {{ "spotify": "https://open.spotify.com/playlist/{id}" }}
            }}"#
        )
    }

    #[test]
    fn listing_page_maps_descriptors() {
        let json = format!(
            r#"{{ "total": 3, "offset": 0, "next": "https://api.spotify.com/v1/me/playlists?offset=2&limit=2", "items": [{}] }}"#,
            playlist_json("37i9dQZF1DXcBWIGoYBM5M", "MTY4")
        );

        let page = listing_page_from(decode(&json).unwrap());

        assert_eq!(page.total, Some(3));
        assert!(page.next.is_some());
        let descriptor = page.items[0].as_ref().unwrap();
        assert_eq!(descriptor.version_id, "MTY4");
        assert_eq!(descriptor.owner_id, "spotify");
        assert!(descriptor.contents_uri.ends_with("/tracks"));
    }

    #[test]
    fn null_playlist_entries_do_not_shift_later_slots() {
        let json = format!(
            r#"{{ "total": 3, "offset": 0, "next": null, "items": [{}, null, {}] }}"#,
            playlist_json("A", "a1"),
            playlist_json("C", "c1")
        );

        let page = listing_page_from(decode(&json).unwrap());
        assert_eq!(page.items.len(), 3);
        assert!(page.items[1].is_none());

        let mut state = SyncState::new(1, HashMap::new());
        state.apply_listing_page(page);
        let ids: Vec<_> = state
            .descriptors()
            .iter()
            .map(|d| d.as_ref().map(|d| d.id.as_str()))
            .collect();
        assert_eq!(ids, vec![Some("A"), None, Some("C")]);
    }

    #[test]
    fn contents_skip_removed_tracks() {
        let descriptor = ContainerDescriptor {
            id: "p1".into(),
            version_id: "v9".into(),
            name: "Mix".into(),
            owner_id: "me".into(),
            contents_uri: String::new(),
            external_uri: String::new(),
        };
        let json = r#"{ "items": [
            { "track": { "uri": "spotify:track:1", "name": "One", "artists": [{"name": "A"}, {"name": "B"}], "album": {"name": "First"} } },
            { "track": null },
            { "track": { "uri": null, "name": "Local file", "artists": [], "album": null } },
            { "track": { "uri": "spotify:track:2", "name": "Two", "artists": [], "album": null } }
        ] }"#;

        let contents = contents_from(&descriptor, decode(json).unwrap());

        assert_eq!((contents.container_id.as_str(), contents.version_id.as_str()), ("p1", "v9"));
        assert_eq!(contents.items.len(), 2);
        assert_eq!(contents.items[0].artist_names, vec!["A", "B"]);
        assert_eq!(contents.items[0].album_name, "First");
        // Removed and local entries still count towards the player's position
        assert_eq!(contents.items[1].title, "Two");
        assert_eq!(contents.items[1].position, 3);
    }

    #[test]
    fn retry_after_is_read_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("4"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(4)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn garbage_body_is_a_decode_failure() {
        let result: Result<UserDto, ApiFailure> = decode("<html>");
        assert!(matches!(result, Err(ApiFailure::Decode(_))));
    }
}
