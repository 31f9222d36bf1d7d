use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::app::service::TranscriptionService;
use crate::domain::{AppConfig, AudioSource, DomainError, TranscriptionResult};
use crate::infrastructure::init_logging;
use crate::ports::{ConfigStore, Engine};

/// Owns the configuration, the logging guard and the transcription service.
pub struct AppController<E: Engine + 'static> {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    service: TranscriptionService<E>,
    _log_guard: Option<WorkerGuard>,
}

#[cfg(feature = "whisper-cpp")]
impl AppController<crate::adapters::WhisperCppEngine> {
    /// Bootstrap from the per-user config directory with the whisper.cpp engine.
    pub fn new() -> Result<Self, DomainError> {
        let store = Arc::new(crate::adapters::TomlConfigStore::new()?);
        Self::with_store(store, |config| {
            crate::adapters::WhisperCppEngine::new(config.engine.quiet_engine)
        })
    }
}

impl<E: Engine + 'static> AppController<E> {
    /// Load the configuration from `store`, start logging and build the
    /// service around the engine `make_engine` returns.
    pub fn with_store<F>(store: Arc<dyn ConfigStore>, make_engine: F) -> Result<Self, DomainError>
    where
        F: FnOnce(&AppConfig) -> E,
    {
        let config = store.load()?;

        let log_guard = init_logging(&store.logs_dir(), &config.logging)?;

        info!("whisper-session starting up");

        let engine = make_engine(&config);
        info!(engine = engine.name(), model = ?config.engine.model_path, "Engine selected");

        let service = TranscriptionService::from_config(engine, &config)?;

        Ok(Self {
            config: RwLock::new(config),
            config_store: store,
            service,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Persist `config` and make its transcription settings the new defaults.
    ///
    /// Engine settings (model path, context fields, ingestor backend) apply
    /// from the next start.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        let defaults = TranscriptionService::<E>::options_from_config(&config)?;

        {
            let current = self.config.read();
            if current.engine.model_path != config.engine.model_path
                || current.audio.backend != config.audio.backend
            {
                warn!("Engine or audio settings changed; restart to apply them");
            }
        }

        self.config_store.save(&config)?;
        self.service.set_defaults(defaults);
        *self.config.write() = config;

        info!("Configuration updated");
        Ok(())
    }

    pub fn service(&self) -> &TranscriptionService<E> {
        &self.service
    }

    /// Transcribe `source` with the configured defaults.
    pub async fn transcribe(&self, source: AudioSource) -> Result<TranscriptionResult, DomainError> {
        self.service.transcribe(source, None).await
    }

    pub fn data_dir(&self) -> String {
        self.config_store.data_dir().to_string_lossy().to_string()
    }

    pub fn logs_dir(&self) -> String {
        self.config_store.logs_dir().to_string_lossy().to_string()
    }

    pub fn config_path(&self) -> String {
        self.config_store.config_path().to_string_lossy().to_string()
    }
}
