//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for sage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Completion endpoint base URL
    pub base_url: Option<String>,
    /// API key (alternative to the SAGE_API_KEY environment variable)
    pub api_key: Option<String>,
    /// Whether tool directives are stripped from displayed replies
    pub hide_directives: Option<bool>,
    /// Wall-clock ceiling for one tool execution, in seconds
    pub task_timeout_secs: Option<u64>,
    /// Working directory for batch pipeline stages
    pub pipeline_workdir: Option<String>,
    /// External task runner command
    #[serde(default)]
    pub runner: RunnerSettings,
}

/// Task runner command configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Program to invoke per tool request; the directive payload is
    /// appended as the final argument
    pub program: Option<String>,
    /// Fixed arguments placed before the payload
    pub args: Vec<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sage")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for SAGE_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("SAGE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
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

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        let dir = path.parent().unwrap();
        fs::create_dir_all(dir)?;

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some("deepseek-chat".to_string()),
            base_url: Some("https://api.deepseek.com/v1".to_string()),
            api_key: None,
            hide_directives: Some(true),
            task_timeout_secs: Some(300),
            pipeline_workdir: None,
            runner: RunnerSettings::default(),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        if self.api_key.is_some() {
            return self.api_key.clone();
        }
        std::env::var("SAGE_API_KEY").ok()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# sage configuration file
# Place at ~/.config/sage/config.toml (Linux/Mac) or %APPDATA%\sage\config.toml (Windows)

# Default model to use
model = "deepseek-chat"

# Completion endpoint base URL (OpenAI-compatible)
base_url = "https://api.deepseek.com/v1"

# API key (optional - it's recommended to use SAGE_API_KEY instead)
# api_key = "sk-..."

# Strip tool directives from displayed replies (true by default)
hide_directives = true

# Wall-clock ceiling for one tool execution, in seconds
task_timeout_secs = 300

# Working directory for batch pipeline stages (optional)
# pipeline_workdir = "/data/analysis"

# External task runner command; the directive payload is appended as
# the final argument
[runner]
# program = "my-agent"
# args = ["--quiet"]
"#
}
