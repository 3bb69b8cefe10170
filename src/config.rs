use crate::downloader::DEFAULT_CONCURRENCY;
use crate::error::{ComicSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub api: ApiConfig,
    pub assemble: AssembleConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    /// Page fetches running at once inside one chapter.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub connect_retry_delay_ms: u64,
    pub default_download_limit: u32,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    pub version: String,
    pub platform: String,
    pub webp: String,
    pub region: String,
    /// Minimum spacing between outbound requests, 0 disables throttling.
    pub rate_limit_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssembleConfig {
    pub enabled: bool,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub database_url: String,
}

/// One tracked source as stored in the `[[sources]]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub last_chapter: u32,
    #[serde(default)]
    pub last_check_time: Option<DateTime<Utc>>,
    pub download_limit: u32,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config, or writes the default template when the file is
    /// missing and returns `None` so the caller can exit early.
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path).map(Some);
        }
        Self::default().save(path)?;
        Ok(None)
    }

    /// Writes the whole file through a sibling temp file so readers never see
    /// a truncated config.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(ComicSyncError::config("download.concurrency must be at least 1"));
        }
        if self.download.max_attempts == 0 {
            return Err(ComicSyncError::config("download.max_attempts must be at least 1"));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() || source.path.trim().is_empty() {
                return Err(ComicSyncError::config("every source needs a name and a path"));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(ComicSyncError::config(format!(
                    "source '{}' is listed more than once",
                    source.name
                )));
            }
        }
        Ok(())
    }

    pub fn get_source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn get_source_mut(&mut self, name: &str) -> Option<&mut SourceConfig> {
        self.sources.iter_mut().find(|s| s.name == name)
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                output_dir: "./out".to_string(),
            },
            download: DownloadConfig {
                concurrency: DEFAULT_CONCURRENCY,
                max_attempts: 5,
                timeout_secs: 30,
                retry_delay_ms: 1000,
                connect_retry_delay_ms: 100,
                default_download_limit: 10,
                show_progress: true,
            },
            api: ApiConfig {
                base_url: "https://api.2025copy.com/api/v3/".to_string(),
                user_agent: "COPY/3.0.0".to_string(),
                version: "2025.08.15".to_string(),
                platform: "1".to_string(),
                webp: "1".to_string(),
                region: "1".to_string(),
                rate_limit_ms: 0,
            },
            assemble: AssembleConfig {
                enabled: false,
                password: None,
            },
            state: StateConfig {
                backend: StateBackend::File,
                database_url: "sqlite:data/comicsync.db".to_string(),
            },
            sources: Vec::new(),
        }
    }
}
