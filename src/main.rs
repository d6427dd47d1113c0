mod analysis;
mod combined;
mod comfy_table;
mod errors;
mod history;
mod indicators;
mod logging;
mod models;
mod news;
mod storage_utils;
mod tui;

use storage_utils::{AsyncStorageManager, load_config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Step 1: Storage directory next to the binary (config + log file)
    let storage = AsyncStorageManager::new_relative("storage").await?;
    logging::init(&storage)?;

    // Step 2: Load or create config.json
    let config = match load_config(&storage).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Config load error: {}", e);
            eprintln!("Error loading config: {}", e);
            return Err(e);
        }
    };
    info!(storage = %storage.base_dir.display(), "starting growlio");

    // Step 3: One-shot table report, or the interactive dashboard
    if std::env::args().skip(1).any(|arg| arg == "--report") {
        comfy_table::run(&config).await
    } else {
        tui::run_tui(config).await
    }
}
