//! Configuration management for GateClaw
//!
//! Configuration is loaded from `~/.gateclaw/config.json` with environment
//! variable overrides of the form `GATECLAW_SECTION_KEY`.

mod types;

pub use types::*;

use crate::error::{GateError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the GateClaw configuration directory path (~/.gateclaw)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gateclaw")
    }

    /// Returns the path to the config file (~/.gateclaw/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GATECLAW_ENGINE_MODEL") {
            self.engine.model = Some(val);
        }
        if let Ok(val) = std::env::var("GATECLAW_ENGINE_MAX_ITERATIONS") {
            if let Ok(v) = val.parse() {
                self.engine.max_iterations = v;
            }
        }
        if let Ok(val) = std::env::var("GATECLAW_ENGINE_LOOP_WINDOW") {
            if let Ok(v) = val.parse() {
                self.engine.loop_window = v;
            }
        }
        if let Ok(val) = std::env::var("GATECLAW_ENGINE_LOOP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.engine.loop_threshold = v;
            }
        }

        if let Ok(val) = std::env::var("GATECLAW_PROVIDER_API_KEY") {
            self.provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("GATECLAW_PROVIDER_API_BASE") {
            self.provider.api_base = Some(val);
        }

        if let Ok(val) = std::env::var("GATECLAW_STORAGE_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("GATECLAW_WORKSPACE_ROOT") {
            self.workspace.root = val;
        }
        if let Ok(val) = std::env::var("GATECLAW_GOVERNANCE_ENDPOINT") {
            self.governance.endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("GATECLAW_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            return Err(GateError::Config(
                "engine.max_iterations must be at least 1".into(),
            ));
        }
        if self.engine.loop_threshold < 2 {
            return Err(GateError::Config(
                "engine.loop_threshold must be at least 2".into(),
            ));
        }
        if self.engine.loop_window == 0 {
            return Err(GateError::Config("engine.loop_window must be at least 1".into()));
        }
        if self.engine.context_truncate_chars == 0 {
            return Err(GateError::Config(
                "engine.context_truncate_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Root data directory (checkpoints and registered tools live below it).
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::dir()
        } else {
            expand_home(&self.storage.data_dir)
        }
    }

    /// Directory holding one checkpoint file per session.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir().join("sessions")
    }

    /// Directory holding the tool registry index and generated tool sources.
    pub fn tools_dir(&self) -> PathBuf {
        self.data_dir().join("tools")
    }

    /// Returns the expanded workspace path (resolves ~ to home directory)
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.workspace.root)
    }
}

/// Expand ~ to home directory in a path string
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
