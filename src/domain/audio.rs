use std::path::PathBuf;

use zeroize::Zeroize;

/// Sample rate the engine expects, in Hz.
pub const ENGINE_SAMPLE_RATE: u32 = 16_000;

/// Normalized mono audio handed to the engine.
///
/// Samples are 32-bit floats in `[-1.0, 1.0)` at [`ENGINE_SAMPLE_RATE`].
/// The buffer is read-only once built and is zeroed on drop.
#[derive(Debug, Clone, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct SampleBuffer {
    samples: Vec<f32>,
}

impl SampleBuffer {
    /// Wrap already-normalized samples.
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Build a buffer from signed 16-bit PCM, dividing each sample by 32768.
    pub fn from_pcm_i16(pcm: &[i16]) -> Self {
        Self {
            samples: pcm.iter().map(|&s| f32::from(s) / 32768.0).collect(),
        }
    }

    /// Decode little-endian signed 16-bit PCM bytes.
    ///
    /// A trailing odd byte is ignored.
    pub fn from_pcm_le_bytes(bytes: &[u8]) -> Self {
        Self {
            samples: bytes
                .chunks_exact(2)
                .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
                .collect(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds at the engine sample rate.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / ENGINE_SAMPLE_RATE as f32
    }
}

/// Where audio comes from before ingestion.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// A file on disk in any format the ingestor understands.
    Path(PathBuf),
    /// Encoded audio held in memory.
    Bytes(Vec<u8>),
}

impl AudioSource {
    /// Short description for log fields.
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Path(path) => path.display().to_string(),
            AudioSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        AudioSource::Path(path)
    }
}

impl From<Vec<u8>> for AudioSource {
    fn from(bytes: Vec<u8>) -> Self {
        AudioSource::Bytes(bytes)
    }
}
