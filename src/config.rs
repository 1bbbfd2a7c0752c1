//! Engine settings and their defaults

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_CACHE_DIR: &str = ".cache/playlists";
pub const DEFAULT_CACHE_QUOTA: u64 = 5 * 1024 * 1024;
pub const DEFAULT_LOG_DIR: &str = ".logs";
pub const DEFAULT_SETTLE_MS: u64 = 1_000;
pub const DEFAULT_REVERIFY_MS: u64 = 2_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub api_base: String,
    /// Wait before retrying a throttled request when the response carries no hint
    pub cooldown: Duration,
    pub page_size: u32,
    pub cache_dir: PathBuf,
    pub cache_quota_bytes: u64,
    /// Keep snapshots in memory only
    pub ephemeral_cache: bool,
    /// Wait after a play command before checking what is playing
    pub playback_settle: Duration,
    /// Extra wait before each retry of the identity-based play command
    pub playback_reverify: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_quota_bytes: DEFAULT_CACHE_QUOTA,
            ephemeral_cache: false,
            playback_settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            playback_reverify: Duration::from_millis(DEFAULT_REVERIFY_MS),
        }
    }
}
