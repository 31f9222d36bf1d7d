pub mod audio;
pub mod config;
pub mod error;
pub mod params;
pub mod transcription;

pub use audio::{AudioSource, SampleBuffer, ENGINE_SAMPLE_RATE};
pub use config::{AppConfig, AudioBackend, AudioConfig, EngineConfig, LoggingConfig, TranscriptionConfig};
pub use error::DomainError;
pub use params::{
    BeamSearchParams, ContextConfiguration, FieldUpdate, GreedyParams, ParamOverrides,
    RunConfiguration, SamplingKind,
};
pub use transcription::{OutputFormat, Segment, TranscriptionResult, TICKS_PER_SECOND};
