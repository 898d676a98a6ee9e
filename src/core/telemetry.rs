//! Operational logging and failure jitter.

use crate::core::config::ShellConfig;
use anyhow::{Context, Result};
use rand::Rng;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the log sinks described by `config`.
///
/// The file sink appends without ANSI colours. With `debug` set, the same
/// events are mirrored to stderr with source locations.
pub fn init_logging(config: &ShellConfig) -> Result<()> {
    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(filter_for(config)),
            )
        }
        None => None,
    };

    let stderr_layer = config.debug.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_filter(EnvFilter::new("debug"))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn filter_for(config: &ShellConfig) -> EnvFilter {
    if config.debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Pick the delay applied before a failed invocation exits.
pub fn jitter_duration<R: Rng>(config: &ShellConfig, rng: &mut R) -> Duration {
    let secs = rng.gen_range(config.jitter_min_secs..=config.jitter_max_secs);
    Duration::from_secs(secs)
}

/// Sleep a random whole number of seconds in the configured range.
pub fn jitter_sleep(config: &ShellConfig) {
    let delay = jitter_duration(config, &mut rand::thread_rng());
    if !delay.is_zero() {
        tracing::debug!("Delaying failure by {:?}", delay);
        std::thread::sleep(delay);
    }
}

/// Symbolic name of the OS error behind `err`, for log lines.
pub fn errno_name(err: &io::Error) -> &'static str {
    match err.raw_os_error() {
        Some(libc::EACCES) => "EACCES",
        Some(libc::EPERM) => "EPERM",
        Some(libc::EIO) => "EIO",
        Some(libc::ELOOP) => "ELOOP",
        Some(libc::ENAMETOOLONG) => "ENAMETOOLONG",
        Some(libc::ENOENT) => "ENOENT",
        Some(libc::ENOTDIR) => "ENOTDIR",
        Some(libc::EISDIR) => "EISDIR",
        Some(libc::EOVERFLOW) => "EOVERFLOW",
        Some(libc::EEXIST) => "EEXIST",
        Some(libc::EMLINK) => "EMLINK",
        Some(libc::ENOSPC) => "ENOSPC",
        Some(libc::EROFS) => "EROFS",
        Some(libc::EPIPE) => "EPIPE",
        _ => "UNKNOWN",
    }
}
