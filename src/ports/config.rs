use std::path::PathBuf;

use crate::domain::{AppConfig, DomainError};

/// Where the session's [`AppConfig`] lives between runs.
pub trait ConfigStore: Send + Sync {
    /// Read the stored configuration, persisting defaults on first use.
    fn load(&self) -> Result<AppConfig, DomainError>;

    fn save(&self, config: &AppConfig) -> Result<(), DomainError>;

    fn config_path(&self) -> PathBuf;

    fn data_dir(&self) -> PathBuf;

    /// Directory the rolling log files are written to.
    fn logs_dir(&self) -> PathBuf;
}
