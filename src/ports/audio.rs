use async_trait::async_trait;

use crate::domain::{AudioSource, DomainError, SampleBuffer};

/// Port for turning an audio source into engine-ready samples.
///
/// Implementations produce 16 kHz mono `f32` samples in `[-1.0, 1.0)`.
/// Conversion happens before any engine call, so a failure here never
/// touches the session.
#[async_trait]
pub trait AudioIngestor: Send + Sync {
    async fn ingest(&self, source: AudioSource) -> Result<SampleBuffer, DomainError>;

    /// Ingestor name for logging.
    fn name(&self) -> &'static str;
}
