pub mod audio;
pub mod config;
pub mod engine;

pub use audio::AudioIngestor;
pub use config::ConfigStore;
pub use engine::{Engine, RunTarget, SegmentSource};
