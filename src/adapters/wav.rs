use std::io::{Cursor, Read};

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use tracing::debug;

use crate::domain::{AudioSource, DomainError, SampleBuffer, ENGINE_SAMPLE_RATE};
use crate::ports::AudioIngestor;

/// Return the PCM payload of a 16 kHz mono 16-bit WAV byte stream.
///
/// Walks the RIFF chunks to the `data` chunk, so a canonical 44-byte header
/// and headers with extra chunks (e.g. ffmpeg's `LIST`) are both stripped.
/// A `data` size that overruns the stream, as written by encoders piping to
/// a non-seekable output, is taken to mean "until end of stream".
pub fn wav_pcm_payload(bytes: &[u8]) -> Result<&[u8], DomainError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(DomainError::Audio("not a RIFF/WAVE stream".to_string()));
    }

    let mut offset = 12usize;
    while offset.saturating_add(8) <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body = offset + 8;

        match id {
            b"fmt " => check_format(&bytes[body..bytes.len().min(body.saturating_add(size))])?,
            b"data" => {
                let end = body.saturating_add(size).min(bytes.len());
                debug!(header_len = body, payload_len = end - body, "WAV payload located");
                return Ok(&bytes[body..end]);
            }
            _ => {}
        }

        // Chunks are word-aligned.
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    Err(DomainError::Audio("WAV stream has no data chunk".to_string()))
}

fn check_format(fmt: &[u8]) -> Result<(), DomainError> {
    if fmt.len() < 16 {
        return Err(DomainError::Audio("truncated WAV fmt chunk".to_string()));
    }

    let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
    let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
    let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
    let bits = u16::from_le_bytes([fmt[14], fmt[15]]);

    // 0xFFFE is WAVE_FORMAT_EXTENSIBLE, which still carries plain PCM here.
    if !matches!(audio_format, 1 | 0xFFFE) || channels != 1 || sample_rate != ENGINE_SAMPLE_RATE || bits != 16 {
        return Err(DomainError::Audio(format!(
            "expected 16-bit PCM mono at {ENGINE_SAMPLE_RATE} Hz, got format {audio_format}, \
             {channels} channel(s), {sample_rate} Hz, {bits} bits"
        )));
    }

    Ok(())
}

/// In-process ingestor for WAV input already sampled at 16 kHz.
///
/// Integer and float WAV files are accepted; multi-channel audio is averaged
/// down to mono. No resampling is done.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavIngestor;

impl WavIngestor {
    pub fn new() -> Self {
        Self
    }

    fn decode(source: AudioSource) -> Result<SampleBuffer, DomainError> {
        match source {
            AudioSource::Path(path) => Self::read(WavReader::open(path)?),
            AudioSource::Bytes(bytes) => Self::read(WavReader::new(Cursor::new(bytes))?),
        }
    }

    fn read<R: Read>(mut reader: WavReader<R>) -> Result<SampleBuffer, DomainError> {
        let spec = reader.spec();

        if spec.sample_rate != ENGINE_SAMPLE_RATE {
            return Err(DomainError::Audio(format!(
                "expected {}Hz audio, got {}Hz",
                ENGINE_SAMPLE_RATE, spec.sample_rate
            )));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        };

        let channels = spec.channels.max(1) as usize;
        let mono = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        debug!(
            channels,
            bits = spec.bits_per_sample,
            samples = mono.len(),
            "WAV decoded"
        );

        Ok(SampleBuffer::new(mono))
    }
}

#[async_trait]
impl AudioIngestor for WavIngestor {
    async fn ingest(&self, source: AudioSource) -> Result<SampleBuffer, DomainError> {
        tokio::task::spawn_blocking(move || Self::decode(source))
            .await
            .map_err(|e| DomainError::Audio(format!("Task join error: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}
