use crate::models::{Period, validate_ticker};
use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

// CONFIGURATION STRUCTS

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MarketConfig {
    pub chart_url: String,  // daily history, ticker is appended as a path segment
    pub news_url: String,   // search endpoint, ticker goes into `q`
    pub user_agent: String,
    pub news_limit: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectionConfig {
    pub universe: Vec<String>,
    pub default_tickers: Vec<String>,
    #[serde(default)]
    pub default_period: Period,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub selection: SelectionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig {
                chart_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
                news_url: "https://query1.finance.yahoo.com/v1/finance/search".to_string(),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) growlio/0.1".to_string(),
                news_limit: 5,
            },
            selection: SelectionConfig {
                universe: ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                default_tickers: vec!["AAPL".to_string()],
                default_period: Period::SixMonths,
            },
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.selection.universe.is_empty() {
            bail!("config: selection.universe must list at least one ticker");
        }
        for ticker in &self.selection.universe {
            validate_ticker(ticker)?;
        }
        for ticker in &self.selection.default_tickers {
            if !self.selection.universe.contains(ticker) {
                bail!("config: default ticker {} is not in selection.universe", ticker);
            }
        }
        if self.market.news_limit == 0 {
            bail!("config: market.news_limit must be at least 1");
        }
        Ok(())
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::new_in(base_dir).await
    }

    /// Storage rooted at an explicit directory, created if missing.
    pub async fn new_in<P: Into<PathBuf>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// Writes `data` as pretty JSON through a `.tmp` file and a rename.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        // serde_json validates UTF-8 itself, so skip read_to_string.
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `filename`, first writing `init()` to disk when the file does not exist yet.
    pub async fn load_or_init<T, F>(&self, filename: &str, init: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let path = self.base_dir.join(format!("{}.json", filename));
        if fs::try_exists(&path).await? {
            return self.load(filename).await;
        }
        let value = init();
        self.save(filename, &value).await?;
        Ok(value)
    }
}

/// Reads `config.json` from storage, writing defaults on first run, and validates it.
pub async fn load_config(storage: &AsyncStorageManager) -> Result<AppConfig> {
    let config: AppConfig = storage.load_or_init("config", AppConfig::default).await?;
    config.validate()?;
    Ok(config)
}
