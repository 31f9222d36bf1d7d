pub mod config_store;
pub mod ffmpeg;
pub mod wav;
#[cfg(feature = "whisper-cpp")]
pub mod whisper_cpp;

pub use config_store::TomlConfigStore;
pub use ffmpeg::FfmpegIngestor;
pub use wav::{wav_pcm_payload, WavIngestor};
#[cfg(feature = "whisper-cpp")]
pub use whisper_cpp::WhisperCppEngine;
