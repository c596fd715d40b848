use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub user_agent: String,
    /// Per-request timeout. Unset means requests never time out.
    pub timeout_secs: Option<u64>,
    /// Write `challenge.json` next to each description.
    pub write_metadata: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: None,
            write_metadata: true,
        }
    }
}

impl UserConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

fn default_user_agent() -> String {
    format!("ctfd-dl/{}", env!("CARGO_PKG_VERSION"))
}

pub fn get_config_path() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("ctfd-dl").join("config.json")
}

pub fn load_config_from(path: &Path) -> UserConfig {
    if !path.exists() {
        return UserConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
            UserConfig::default()
        }),
        Err(_) => UserConfig::default(),
    }
}

pub fn save_config_to(path: &Path, config: &UserConfig) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)
}
