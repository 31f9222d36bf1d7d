use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::domain::{AppConfig, DomainError};
use crate::ports::ConfigStore;

const APP_DIR: &str = "WhisperSession";
const CONFIG_FILE: &str = "config.toml";

/// TOML-backed configuration store.
pub struct TomlConfigStore {
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl TomlConfigStore {
    /// Store rooted in the platform's per-user config directory.
    ///
    /// - macOS: ~/Library/Application Support/WhisperSession/
    /// - Windows: %APPDATA%\WhisperSession\
    /// - Linux: ~/.config/WhisperSession/
    ///
    /// Logs go to the local data directory where the platform has one.
    pub fn new() -> Result<Self, DomainError> {
        let data_dir = dirs::config_dir()
            .map(|p| p.join(APP_DIR))
            .ok_or_else(|| {
                DomainError::Config("Could not find application config directory".to_string())
            })?;

        let logs_dir = if cfg!(target_os = "macos") {
            data_dir.join("logs")
        } else {
            dirs::data_local_dir()
                .map(|p| p.join(APP_DIR).join("logs"))
                .unwrap_or_else(|| data_dir.join("logs"))
        };

        Self::with_dirs(data_dir, logs_dir)
    }

    /// Store rooted at an explicit directory, with logs under `<dir>/logs`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let data_dir = data_dir.into();
        let logs_dir = data_dir.join("logs");
        Self::with_dirs(data_dir, logs_dir)
    }

    fn with_dirs(data_dir: PathBuf, logs_dir: PathBuf) -> Result<Self, DomainError> {
        fs::create_dir_all(&data_dir)?;
        info!(data_dir = ?data_dir, "ConfigStore initialized");
        Ok(Self { data_dir, logs_dir })
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, DomainError> {
        let config_path = self.config_path();

        if !config_path.exists() {
            info!(path = ?config_path, "No configuration file, writing defaults");
            let config = AppConfig::new();
            self.save(&config)?;
            return Ok(config);
        }

        debug!(path = ?config_path, "Loading configuration");
        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        info!(
            path = ?config_path,
            model = ?config.engine.model_path,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<(), DomainError> {
        let config_path = self.config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&config_path, toml::to_string_pretty(config)?)?;

        info!(path = ?config_path, "Configuration saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.logs_dir.clone()
    }
}
