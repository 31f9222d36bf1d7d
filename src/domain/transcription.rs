use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Engine time unit: one centisecond.
pub const TICKS_PER_SECOND: i64 = 100;

/// One contiguous span of recognized speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Start time in ticks since audio start.
    pub start_tick: i64,
    /// End time in ticks since audio start.
    pub end_tick: i64,
}

impl Segment {
    pub fn new(text: impl Into<String>, start_tick: i64, end_tick: i64) -> Self {
        Self {
            text: text.into(),
            start_tick,
            end_tick,
        }
    }

    /// This segment moved later by `ticks`.
    pub fn shifted(mut self, ticks: i64) -> Self {
        self.start_tick += ticks;
        self.end_tick += ticks;
        self
    }
}

/// Transcript rendering selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plaintext,
    Srt,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Plaintext => "plaintext",
            OutputFormat::Srt => "srt",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("plaintext") {
            Ok(OutputFormat::Plaintext)
        } else if s.eq_ignore_ascii_case("srt") {
            Ok(OutputFormat::Srt)
        } else {
            Err(DomainError::UnsupportedFormat(s.to_string()))
        }
    }
}

/// Result of a successful transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Detected or caller-forced language code.
    pub language: String,
    /// Transcript rendered in the requested format.
    pub output: String,
    /// Number of segments the engine reported.
    pub segment_count: usize,
    /// Wall-clock time spent in the engine, in milliseconds.
    pub duration_ms: u64,
}
