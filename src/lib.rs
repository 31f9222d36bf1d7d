//! Session management for whisper.cpp speech recognition.
//!
//! A [`Session`] owns the engine's context and decoding-state handles,
//! merges caller parameters over the engine defaults, runs inference and
//! renders the segments as plain text or SRT. [`TranscriptionService`] puts
//! an async face on it, with audio ingestion through ffmpeg or an in-process
//! WAV reader.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use app::{
    AppController, InvocationMode, ParameterResolver, SegmentFormatter, Session,
    TranscribeOptions, TranscriptionService,
};
pub use domain::{
    AppConfig, AudioSource, DomainError, OutputFormat, ParamOverrides, SampleBuffer, Segment,
    TranscriptionResult,
};
pub use ports::{AudioIngestor, ConfigStore, Engine, RunTarget, SegmentSource};
