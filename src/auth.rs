//! Bearer credential handling.
//!
//! Token acquisition and renewal happen elsewhere; this module only picks up a
//! currently-valid access token and hands it to the engine.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const TOKEN_FILE: &str = ".cache/access_token";

/// A bearer access token for the Spotify Web API
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Resolve the credential: an explicit token wins, otherwise the token file.
pub fn load_credential(explicit: Option<String>, token_file: &Path) -> Result<Credential> {
    if let Some(token) = explicit.filter(|t| !t.trim().is_empty()) {
        tracing::debug!("Using access token supplied on the command line or environment");
        return Ok(Credential::new(token.trim()));
    }

    let token = fs::read_to_string(token_file).with_context(|| {
        format!(
            "No access token given and {} could not be read. Pass --token or set SPOTIFY_ACCESS_TOKEN",
            token_file.display()
        )
    })?;
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("{} is empty", token_file.display());
    }

    tracing::debug!(path = %token_file.display(), "Loaded access token from disk");
    Ok(Credential::new(token))
}
