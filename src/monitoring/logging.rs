//! Structured logging for fedsync.
//!
//! Installs the `tracing` subscriber and provides the small helpers the
//! sessions log through.

use crate::core::{ModelVersion, VersionCallback};
use std::future::Future;
use std::time::Instant;
use tracing::Level;

/// Whether verbose logging was requested, by flag or by the `VERBOSE`
/// environment variable.
pub fn verbose_requested(verbose: bool) -> bool {
    verbose || std::env::var_os("VERBOSE").is_some()
}

/// Install a fmt subscriber at DEBUG when verbose, INFO otherwise.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(verbose: bool) -> bool {
    let level = if verbose_requested(verbose) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Await `action` and log how long it took.
pub async fn timed<F, T>(label: &str, action: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = action.await;
    tracing::debug!("{} took {}ms", label, start.elapsed().as_millis());
    output
}

/// Render an optional version for log lines.
pub fn display_version(version: Option<&ModelVersion>) -> &str {
    version.map_or("none", ModelVersion::as_str)
}

/// The observer every session registers first: logs each version change.
pub fn version_logger(role: &'static str) -> VersionCallback {
    Box::new(move |old, new| {
        tracing::info!(role, "updated model: {} -> {}", display_version(old), new);
    })
}
