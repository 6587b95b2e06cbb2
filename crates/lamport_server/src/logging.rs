//! Log sinks: stdout plus one append-only file per node.

use anyhow::{Context, Result};
use lamport_core::PeerId;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "lamport_cluster=info,lamport_server=info,tower_http=warn";

/// Log file of `peer` inside `dir`
#[must_use]
pub fn log_file_path(dir: &Path, peer: PeerId) -> PathBuf {
    dir.join(format!("node_{}.log", peer))
}

/// Open (or create) the log file of `peer` for appending
///
/// # Errors
///
/// Fails if the directory cannot be created or the file cannot be opened.
pub fn open_log_file(dir: &Path, peer: PeerId) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let path = log_file_path(dir, peer);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(dir: &Path, peer: PeerId, json: bool) -> Result<()> {
    let file = open_log_file(dir, peer)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout_text = (!json).then(|| fmt::layer().with_target(false));
    let stdout_json = json.then(|| fmt::layer().json());
    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_text)
        .with(stdout_json)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")
}
