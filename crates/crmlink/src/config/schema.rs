use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Folder;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub linking: LinkingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.crmlink/data/crmlink.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// How far back the watermark starts when the process boots.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_folders")]
    pub folders: Vec<Folder>,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_initial_delay_secs() -> u64 {
    10
}

fn default_grace_window_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

fn default_folders() -> Vec<Folder> {
    vec![Folder::Inbox, Folder::Sent]
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            grace_window_secs: default_grace_window_secs(),
            batch_size: default_batch_size(),
            folders: default_folders(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Load attachments when building history events.
    #[serde(default = "default_true")]
    pub load_attachments: bool,
    /// Drop resolved contacts the message owner cannot access.
    #[serde(default = "default_true")]
    pub check_access: bool,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            load_attachments: true,
            check_access: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}
