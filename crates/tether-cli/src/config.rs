//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Configuration for tether
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model name reported in system frames
    pub model: Option<String>,
    /// Model endpoint reported in system frames
    pub base_url: Option<String>,
    /// Maximum number of queued tasks
    pub queue_capacity: Option<usize>,
    /// Replay this script instead of echoing prompts
    pub script: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for TETHER_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("TETHER_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default path
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults with a warning
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some("echo".to_string()),
            base_url: None,
            queue_capacity: Some(tether_agent::config::DEFAULT_QUEUE_CAPACITY),
            script: None,
        };

        default_config.save_to(&path)?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tether configuration file
# Place at ~/.config/tether/config.toml (Linux/Mac) or %APPDATA%\tether\config.toml (Windows)
# or point TETHER_CONFIG_PATH at it.

# Model name reported in system frames
model = "echo"

# Model endpoint reported in system frames (optional)
# base_url = "http://localhost:11434"

# How many prompts may wait behind the running one
queue_capacity = 10

# Replay a JSON script of agent events instead of echoing (optional)
# script = "~/.config/tether/demo.json"
"#
}
