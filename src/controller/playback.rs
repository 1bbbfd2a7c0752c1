//! Play command with a bounded verify-and-retry ladder

use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credential;
use crate::config::EngineConfig;
use crate::model::{ApiFailure, DeviceInfo, LiveContainer, PlayOffset, PlaybackApi, TrackMatch};

/// Rounds of play-by-identity after the position-based attempt
const IDENTITY_ROUNDS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackTimings {
    /// Wait after a play command before checking what is playing
    pub settle: Duration,
    /// Extra wait before each identity-based attempt
    pub reverify: Duration,
}

impl From<&EngineConfig> for PlaybackTimings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            settle: config.playback_settle,
            reverify: config.playback_reverify,
        }
    }
}

/// Which track to start, where
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub device_id: String,
    pub container_id: String,
    pub position: usize,
    pub track_uri: String,
}

impl PlaybackRequest {
    pub fn for_match(container: &LiveContainer, track: &TrackMatch, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            container_id: container.descriptor.id.clone(),
            position: track.position,
            track_uri: track.item.uri.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Confirmed,
    /// The ladder ran out without seeing the track play
    Abandoned,
}

/// Pick the device to play on: the one asked for (by id or name), else the active one
pub fn resolve_device(devices: &[DeviceInfo], preferred: Option<&str>) -> Option<DeviceInfo> {
    if let Some(wanted) = preferred {
        return devices
            .iter()
            .find(|d| d.id == wanted || d.name.eq_ignore_ascii_case(wanted))
            .cloned();
    }
    devices.iter().find(|d| d.is_active).cloned()
}

pub struct PlaybackSequencer<P: ?Sized> {
    api: Arc<P>,
    timings: PlaybackTimings,
}

impl<P: PlaybackApi + ?Sized> PlaybackSequencer<P> {
    pub fn new(api: Arc<P>, timings: PlaybackTimings) -> Self {
        Self { api, timings }
    }

    /// Start the track and confirm it is actually playing.
    ///
    /// Position first, since that works even while the device holds a stale copy of
    /// the playlist, then the exact track identity. A not-found on the identity form
    /// falls back to the position form once. Only `Unauthorized` is an error; anything
    /// else that goes wrong ends in [`PlaybackOutcome::Abandoned`].
    pub async fn play(
        &self,
        credential: &Credential,
        request: &PlaybackRequest,
    ) -> Result<PlaybackOutcome, ApiFailure> {
        tracing::info!(
            device_id = %request.device_id,
            playlist_id = %request.container_id,
            position = request.position,
            track = %request.track_uri,
            "Starting playback"
        );

        let by_position = PlayOffset::Position(request.position);
        if let Err(e) = self.issue(credential, request, by_position.clone()).await {
            return give_up(e);
        }
        if self.confirm(credential, request).await? {
            return Ok(PlaybackOutcome::Confirmed);
        }

        let mut fell_back = false;
        for round in 1..=IDENTITY_ROUNDS {
            tokio::time::sleep(self.timings.reverify).await;
            tracing::debug!(round, "Retrying playback by track identity");

            match self
                .issue(credential, request, PlayOffset::Track(request.track_uri.clone()))
                .await
            {
                Ok(()) => {}
                Err(ApiFailure::NotFound) if !fell_back => {
                    fell_back = true;
                    tracing::debug!("Device does not know the track yet, falling back to position");
                    if let Err(e) = self.issue(credential, request, by_position.clone()).await {
                        return give_up(e);
                    }
                }
                Err(e) => return give_up(e),
            }

            if self.confirm(credential, request).await? {
                return Ok(PlaybackOutcome::Confirmed);
            }
        }

        tracing::info!(track = %request.track_uri, "Playback not confirmed, giving up");
        Ok(PlaybackOutcome::Abandoned)
    }

    async fn issue(
        &self,
        credential: &Credential,
        request: &PlaybackRequest,
        offset: PlayOffset,
    ) -> Result<(), ApiFailure> {
        let result = self
            .api
            .play(credential, &request.device_id, &request.container_id, offset)
            .await;
        crate::log_api_result!("play", result);
        result
    }

    /// Wait for the device to settle, then compare what it plays with the request.
    /// A failed query counts as not confirmed.
    async fn confirm(&self, credential: &Credential, request: &PlaybackRequest) -> Result<bool, ApiFailure> {
        tokio::time::sleep(self.timings.settle).await;
        match self.api.currently_playing(credential).await {
            Ok(Some(uri)) => {
                let matched = uri == request.track_uri;
                tracing::debug!(playing = %uri, matched, "Verified playback");
                Ok(matched)
            }
            Ok(None) => Ok(false),
            Err(ApiFailure::Unauthorized) => Err(ApiFailure::Unauthorized),
            Err(e) => {
                tracing::debug!(error = %e, "Could not read playback state");
                Ok(false)
            }
        }
    }
}

fn give_up(failure: ApiFailure) -> Result<PlaybackOutcome, ApiFailure> {
    match failure {
        ApiFailure::Unauthorized => Err(ApiFailure::Unauthorized),
        other => {
            tracing::warn!(error = %other, "Play command failed, abandoning");
            Ok(PlaybackOutcome::Abandoned)
        }
    }
}
