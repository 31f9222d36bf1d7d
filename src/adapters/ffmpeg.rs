use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::adapters::wav::wav_pcm_payload;
use crate::domain::{AudioSource, DomainError, SampleBuffer, ENGINE_SAMPLE_RATE};
use crate::ports::AudioIngestor;

/// Ingestor that converts any input ffmpeg understands to 16 kHz mono PCM.
///
/// ffmpeg writes a WAV stream to stdout; the header is stripped and the
/// 16-bit payload normalized to `[-1, 1)`. Byte input is piped on stdin.
#[derive(Debug, Clone)]
pub struct FfmpegIngestor {
    program: String,
}

impl FfmpegIngestor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn arguments(input: &str) -> Vec<String> {
        let rate = ENGINE_SAMPLE_RATE.to_string();
        [
            "-nostdin",
            "-hide_banner",
            "-i",
            input,
            "-ar",
            rate.as_str(),
            "-ac",
            "1",
            "-acodec",
            "pcm_s16le",
            "-f",
            "wav",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn conversion_error(&self, err: std::io::Error) -> DomainError {
        DomainError::AudioConversion {
            status: "not started".to_string(),
            stderr: format!("failed to run {}: {}", self.program, err),
        }
    }
}

impl Default for FfmpegIngestor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl AudioIngestor for FfmpegIngestor {
    async fn ingest(&self, source: AudioSource) -> Result<SampleBuffer, DomainError> {
        let description = source.describe();
        let (input, stdin_bytes) = match source {
            AudioSource::Path(path) => (path.to_string_lossy().into_owned(), None),
            // -nostdin only stops interactive reads; pipe:0 is still read.
            AudioSource::Bytes(bytes) => ("pipe:0".to_string(), Some(bytes)),
        };

        debug!(program = %self.program, source = %description, "Starting audio conversion");

        let mut child = Command::new(&self.program)
            .args(Self::arguments(&input))
            .stdin(if stdin_bytes.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.conversion_error(e))?;

        // Feed stdin from a separate task so a full stdout pipe cannot deadlock us.
        let writer = match (child.stdin.take(), stdin_bytes) {
            (Some(mut stdin), Some(bytes)) => Some(tokio::spawn(async move {
                let result = stdin.write_all(&bytes).await;
                drop(stdin);
                match result {
                    // ffmpeg may stop reading once it has what it needs.
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.conversion_error(e))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to write audio to ffmpeg stdin"),
                Err(e) => warn!(error = %e, "ffmpeg stdin writer panicked"),
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, source = %description, "Audio conversion failed");
            return Err(DomainError::AudioConversion {
                status: output.status.to_string(),
                stderr,
            });
        }

        let buffer = SampleBuffer::from_pcm_le_bytes(wav_pcm_payload(&output.stdout)?);

        debug!(
            samples = buffer.len(),
            duration_secs = buffer.duration_secs(),
            "Audio conversion complete"
        );

        Ok(buffer)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
