/// Configuration management
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_INBOX_BATCH: usize = 8;
const DEFAULT_AVATAR_URL: &str = "https://cdn.classline.app/avatars/default.png";

/// Runtime configuration for the chat core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for local databases (defaults to `.classline`)
    pub data_dir: PathBuf,

    /// Number of concurrent inbox row lookups per batch
    pub inbox_batch: usize,

    /// Fallback avatar for accounts without one
    pub default_avatar_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".classline"),
            inbox_batch: DEFAULT_INBOX_BATCH,
            default_avatar_url: DEFAULT_AVATAR_URL.to_string(),
        }
    }
}

impl Config {
    /// Create config with environment overrides (nice for scripts)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CLASSLINE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(n) = std::env::var("CLASSLINE_INBOX_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.inbox_batch = n.max(1);
        }
        if let Ok(url) = std::env::var("CLASSLINE_DEFAULT_AVATAR") {
            config.default_avatar_url = url;
        }

        config
    }
}
