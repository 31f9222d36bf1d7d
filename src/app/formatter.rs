use std::fmt::Write as _;

use crate::domain::{DomainError, OutputFormat, TICKS_PER_SECOND};
use crate::ports::{Engine, SegmentSource};

/// Language reported when the engine cannot name the detected id.
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Renders engine segments as a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFormatter {
    format: OutputFormat,
}

impl SegmentFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Build a formatter from a selector string, failing on anything other
    /// than `plaintext` or `srt`.
    pub fn parse(format: &str) -> Result<Self, DomainError> {
        Ok(Self::new(format.parse()?))
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render every segment `source` holds, in engine order.
    pub fn render<S: SegmentSource + ?Sized>(&self, source: &S) -> Result<String, DomainError> {
        match self.format {
            OutputFormat::Plaintext => render_plaintext(source),
            OutputFormat::Srt => render_srt(source),
        }
    }
}

fn render_plaintext<S: SegmentSource + ?Sized>(source: &S) -> Result<String, DomainError> {
    let mut output = String::new();
    for i in 0..source.segment_count()? {
        output.push_str(&source.segment_text(i)?);
    }
    Ok(output)
}

fn render_srt<S: SegmentSource + ?Sized>(source: &S) -> Result<String, DomainError> {
    let mut output = String::new();
    for i in 0..source.segment_count()? {
        let segment = source.segment(i)?;
        // Writing to a String cannot fail.
        let _ = write!(
            output,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_tick_timestamp(segment.start_tick),
            format_tick_timestamp(segment.end_tick),
            segment.text.trim()
        );
    }
    Ok(output)
}

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`).
///
/// Every component is truncated, never rounded, so a value just below a
/// boundary stays on the earlier millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    format_millis((seconds.max(0.0) * 1000.0).floor() as i64)
}

/// Format an engine tick (centisecond) value as an SRT timestamp.
pub fn format_tick_timestamp(ticks: i64) -> String {
    format_millis(ticks.max(0) * (1000 / TICKS_PER_SECOND))
}

fn format_millis(total_ms: i64) -> String {
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Language code of the last pass on `source`.
pub fn detected_language<E, S>(engine: &E, source: &S) -> String
where
    E: Engine,
    S: SegmentSource + ?Sized,
{
    source
        .detected_language_id()
        .and_then(|id| engine.language_code(id))
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| UNDETERMINED_LANGUAGE.to_string())
}
