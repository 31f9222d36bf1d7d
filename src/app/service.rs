use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::adapters::{FfmpegIngestor, WavIngestor};
use crate::app::resolver::ParameterResolver;
use crate::app::session::{Session, TranscribeOptions};
use crate::domain::{AppConfig, AudioBackend, AudioSource, DomainError, SampleBuffer, TranscriptionResult};
use crate::ports::{AudioIngestor, Engine};

/// Async facade over a [`Session`].
///
/// Engine calls block, so each one runs on tokio's blocking pool while the
/// session mutex is held. Concurrent callers are served one pass at a time.
pub struct TranscriptionService<E: Engine + 'static> {
    session: Arc<Mutex<Session<E>>>,
    ingestor: Arc<dyn AudioIngestor>,
    defaults: RwLock<TranscribeOptions>,
}

impl<E: Engine + 'static> TranscriptionService<E> {
    pub fn new(session: Session<E>, ingestor: Arc<dyn AudioIngestor>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            ingestor,
            defaults: RwLock::new(TranscribeOptions::default()),
        }
    }

    /// Wire a service from configuration: resolver, ingestor backend and the
    /// default per-call options.
    pub fn from_config(engine: E, config: &AppConfig) -> Result<Self, DomainError> {
        let session = Session::with_resolver(
            engine,
            config.engine.model_path.clone(),
            ParameterResolver::from_config(config),
        );

        let ingestor: Arc<dyn AudioIngestor> = match config.audio.backend {
            AudioBackend::Ffmpeg => Arc::new(FfmpegIngestor::new(config.audio.ffmpeg_path.clone())),
            AudioBackend::Wav => Arc::new(WavIngestor::new()),
        };

        let defaults = Self::options_from_config(config)?;

        info!(
            model = ?config.engine.model_path,
            ingestor = ingestor.name(),
            format = %defaults.format,
            processors = defaults.processors,
            "TranscriptionService configured"
        );

        Ok(Self::new(session, ingestor).with_defaults(defaults))
    }

    /// Per-call options implied by `[engine]` and `[transcription]`.
    pub fn options_from_config(config: &AppConfig) -> Result<TranscribeOptions, DomainError> {
        Ok(TranscribeOptions::default()
            .with_format(config.transcription.format.clone())
            .with_processors(config.transcription.processors.max(1) as usize)
            .with_state(config.transcription.use_state)
            .with_context_overrides(config.engine.context_overrides()?)
            .with_run_overrides(config.transcription.run_overrides()?))
    }

    pub fn with_defaults(self, defaults: TranscribeOptions) -> Self {
        self.set_defaults(defaults);
        self
    }

    /// Options used when a call passes none. Takes effect for the next call.
    pub fn set_defaults(&self, defaults: TranscribeOptions) {
        *self.defaults.write() = defaults;
    }

    pub fn default_options(&self) -> TranscribeOptions {
        self.defaults.read().clone()
    }

    pub fn ingestor(&self) -> &dyn AudioIngestor {
        self.ingestor.as_ref()
    }

    /// Load the model now instead of on the first transcription.
    pub async fn load_model(&self) -> Result<(), DomainError> {
        let overrides = self.defaults.read().context_overrides.clone();
        self.with_session(move |session| {
            let path: PathBuf = session.model_path().to_path_buf();
            session.ensure_context(&path, &overrides).map(|_| ())
        })
        .await
    }

    /// Ingest `source` and transcribe it. `None` uses the default options.
    pub async fn transcribe(
        &self,
        source: AudioSource,
        options: Option<TranscribeOptions>,
    ) -> Result<TranscriptionResult, DomainError> {
        debug!(source = %source.describe(), ingestor = self.ingestor.name(), "Ingesting audio");
        let samples = self.ingestor.ingest(source).await?;
        self.transcribe_samples(samples, options).await
    }

    /// Transcribe samples that are already 16 kHz mono.
    pub async fn transcribe_samples(
        &self,
        samples: SampleBuffer,
        options: Option<TranscribeOptions>,
    ) -> Result<TranscriptionResult, DomainError> {
        let options = options.unwrap_or_else(|| self.default_options());
        self.with_session(move |session| session.transcribe(&samples, &options))
            .await
    }

    /// Waits for a running pass to finish.
    pub async fn is_model_loaded(&self) -> Result<bool, DomainError> {
        self.with_session(|session| Ok(session.is_loaded())).await
    }

    /// Free the engine handles. The next transcription reloads the model.
    pub async fn release(&self) -> Result<(), DomainError> {
        self.with_session(|session| {
            session.release();
            Ok(())
        })
        .await
    }

    async fn with_session<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<E>) -> Result<T, DomainError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || f(&mut session.lock()))
            .await
            .map_err(|e| DomainError::Engine(format!("Task join error: {}", e)))?
    }
}
