//! Log setup for the CLI.
//!
//! stdout carries command output and stderr the progress line, so diagnostics go to a
//! daily file under the log directory instead.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "playlist-search";
const DEFAULT_FILTER: &str = "playlist_search=debug,reqwest=info,warn";

/// Pick the filter: an explicit level wins, then `RUST_LOG`, then the built-in default
fn build_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    match level {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Start writing `<dir>/playlist-search.YYYY-MM-DD`.
///
/// The returned guard flushes pending lines when dropped, so keep it alive until the
/// process is about to exit.
pub fn init_logging(dir: &Path, level: Option<&str>) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let filter = build_filter(level)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .try_init()?;

    tracing::info!(dir = %dir.display(), "Logging initialized");
    Ok(guard)
}

/// Record how a Web API call ended. Failures are warnings, the caller decides whether
/// they are fatal.
#[macro_export]
macro_rules! log_api_result {
    ($operation:expr, $result:expr) => {
        if let Err(e) = &$result {
            tracing::warn!(operation = $operation, error = %e, "Web API call failed");
        } else {
            tracing::debug!(operation = $operation, "Web API call succeeded");
        }
    };
}

#[macro_export]
macro_rules! log_api_request {
    ($operation:expr) => {
        tracing::trace!(operation = $operation, "Calling the Web API");
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::trace!(operation = $operation, $($field)*, "Calling the Web API");
    };
}
