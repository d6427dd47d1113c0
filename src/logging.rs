use crate::storage_utils::AsyncStorageManager;
use anyhow::{Result, anyhow};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;

pub const LOG_FILE: &str = "growlio.log";

/// Sends tracing output to `storage/growlio.log`; stdout belongs to the terminal UI.
pub fn init(storage: &AsyncStorageManager) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(storage.path_for(LOG_FILE))?;

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}
