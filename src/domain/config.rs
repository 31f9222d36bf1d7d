use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::params::ParamOverrides;
use crate::domain::transcription::OutputFormat;
use crate::domain::DomainError;

/// Engine context configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Use the accelerator when the engine was built with one.
    pub use_gpu: bool,
    /// Accelerator device forced when the caller does not pick one.
    pub gpu_device: Option<i32>,
    /// Silence the engine's own log output.
    pub quiet_engine: bool,
    /// Extra context fields, applied after the values above.
    pub overrides: toml::Table,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            use_gpu: true,
            gpu_device: Some(0),
            quiet_engine: true,
            overrides: toml::Table::new(),
        }
    }
}

impl EngineConfig {
    /// Context overrides implied by this section, in application order.
    pub fn context_overrides(&self) -> Result<ParamOverrides, DomainError> {
        let mut overrides = ParamOverrides::new().set("use_gpu", self.use_gpu);
        for (key, value) in ParamOverrides::from_toml(&self.overrides)?.iter() {
            overrides.push(key, value.clone());
        }
        Ok(overrides)
    }
}

/// Transcription defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Output format: "plaintext" or "srt".
    pub format: String,
    /// Language code (e.g., "en", "fr", "auto").
    pub language: String,
    /// Decoding threads (0 = auto: cores - 1).
    pub threads: u32,
    /// Engine-internal parallel processors (1 = serial).
    pub processors: u32,
    /// Decode on a dedicated state handle instead of the context's own.
    pub use_state: bool,
    /// Extra run fields, applied after `language`.
    pub overrides: toml::Table,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Plaintext.to_string(),
            language: "auto".to_string(),
            threads: 4,
            processors: 1,
            use_state: true,
            overrides: toml::Table::new(),
        }
    }
}

impl TranscriptionConfig {
    /// Run overrides implied by this section, in application order.
    pub fn run_overrides(&self) -> Result<ParamOverrides, DomainError> {
        let mut overrides = ParamOverrides::new();
        if !self.language.eq_ignore_ascii_case("auto") {
            overrides.push("language", self.language.clone());
        }
        for (key, value) in ParamOverrides::from_toml(&self.overrides)?.iter() {
            overrides.push(key, value.clone());
        }
        Ok(overrides)
    }

    /// Thread count to hand the engine, resolving 0 to `cores - 1`.
    pub fn effective_threads(&self) -> u32 {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|p| std::cmp::max(1, p.get() as u32 - 1))
                .unwrap_or(1)
        } else {
            self.threads
        }
    }
}

/// Audio ingestion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// Convert any format through an external ffmpeg process.
    Ffmpeg,
    /// Decode 16 kHz WAV in-process.
    Wav,
}

/// Audio ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: AudioBackend,
    /// ffmpeg executable name or path.
    pub ffmpeg_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackend::Ffmpeg,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            max_files: 7,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
