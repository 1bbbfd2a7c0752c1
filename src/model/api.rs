//! Port traits for the remote catalog and player, plus the failure taxonomy they share.
//!
//! The production implementation is [`super::SpotifyClient`]; tests use the generated
//! mocks.

use std::time::Duration;

use thiserror::Error;

use crate::auth::Credential;
use super::types::{ContainerContents, ContainerDescriptor, DeviceInfo, UserProfile};

/// Why a catalog or player call did not succeed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApiFailure {
    /// HTTP 429. Retryable, handled by the request executor.
    #[error("rate limited by the catalog")]
    Throttled { retry_after: Option<Duration> },
    /// HTTP 401. The credential must be refreshed and the operation resubmitted.
    #[error("credential rejected")]
    Unauthorized,
    /// HTTP 404
    #[error("not found")]
    NotFound,
    #[error("request failed with status {status}: {body}")]
    Other { status: u16, body: String },
    /// Connection, TLS or timeout problem below HTTP
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiFailure {
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: String) -> Self {
        match status {
            401 => ApiFailure::Unauthorized,
            404 => ApiFailure::NotFound,
            429 => ApiFailure::Throttled { retry_after },
            _ => ApiFailure::Other { status, body },
        }
    }
}

/// One page of the playlist listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingPage {
    /// Size of the whole collection. Only the first page's value is used.
    pub total: Option<u32>,
    /// Position of the first item of this page in the whole collection
    pub offset: u32,
    /// One entry per slot. `None` is a playlist the account can no longer see; it
    /// still occupies its position.
    pub items: Vec<Option<ContainerDescriptor>>,
    /// Locator of the following page, `None` on the last page
    pub next: Option<String>,
}

/// Where a play command should start inside the playlist
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayOffset {
    /// Zero-based index into the playlist as the device currently has it
    Position(usize),
    /// A specific track uri
    Track(String),
}

/// Library side of the Web API
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    async fn current_user(&self, credential: &Credential) -> Result<UserProfile, ApiFailure>;

    /// Fetch a listing page. `cursor` is `None` for the first page, otherwise the
    /// `next` locator of the previous page.
    async fn list_page(
        &self,
        credential: &Credential,
        cursor: Option<String>,
    ) -> Result<ListingPage, ApiFailure>;

    /// Fetch the full contents of one playlist in a single request
    async fn container_contents(
        &self,
        credential: &Credential,
        descriptor: &ContainerDescriptor,
    ) -> Result<ContainerContents, ApiFailure>;
}

/// Player side of the Web API
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaybackApi: Send + Sync {
    async fn play(
        &self,
        credential: &Credential,
        device_id: &str,
        container_id: &str,
        offset: PlayOffset,
    ) -> Result<(), ApiFailure>;

    /// Uri of the item currently playing, `None` when the player is idle
    async fn currently_playing(&self, credential: &Credential) -> Result<Option<String>, ApiFailure>;

    async fn devices(&self, credential: &Credential) -> Result<Vec<DeviceInfo>, ApiFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_failures() {
        assert_eq!(ApiFailure::from_status(401, None, String::new()), ApiFailure::Unauthorized);
        assert_eq!(ApiFailure::from_status(404, None, String::new()), ApiFailure::NotFound);
        assert_eq!(
            ApiFailure::from_status(429, Some(Duration::from_secs(7)), String::new()),
            ApiFailure::Throttled { retry_after: Some(Duration::from_secs(7)) }
        );
        assert_eq!(
            ApiFailure::from_status(502, None, "bad gateway".into()),
            ApiFailure::Other { status: 502, body: "bad gateway".into() }
        );
    }
}
