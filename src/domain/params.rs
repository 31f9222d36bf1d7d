//! Engine configuration records and the free-form overrides that adjust them.
//!
//! Each record exposes a fixed field table through `apply`, which is the only
//! place a string key can reach a record field. Unknown keys are reported back
//! to the caller and never touch the record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainError;

/// Outcome of applying one override pair to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    Applied,
    UnknownField,
}

/// Options fixed when the engine context is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfiguration {
    pub use_gpu: bool,
    pub flash_attn: bool,
    pub gpu_device: i32,
}

impl ContextConfiguration {
    pub const FIELDS: &'static [&'static str] = &["use_gpu", "flash_attn", "gpu_device"];

    pub fn apply(&mut self, key: &str, value: &Value) -> Result<FieldUpdate, DomainError> {
        match key {
            "use_gpu" => self.use_gpu = as_bool(key, value)?,
            "flash_attn" => self.flash_attn = as_bool(key, value)?,
            "gpu_device" => self.gpu_device = as_i32(key, value)?,
            _ => return Ok(FieldUpdate::UnknownField),
        }
        Ok(FieldUpdate::Applied)
    }
}

/// Decoding algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingKind {
    #[default]
    Greedy,
    BeamSearch,
}

impl SamplingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingKind::Greedy => "greedy",
            SamplingKind::BeamSearch => "beam_search",
        }
    }

    /// Parse an override value: a name, or the engine's numeric constant.
    pub fn from_value(key: &str, value: &Value) -> Result<Self, DomainError> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(SamplingKind::Greedy),
                Some(1) => Ok(SamplingKind::BeamSearch),
                _ => Err(invalid(key, format!("unknown strategy id {n}"))),
            },
            other => Err(invalid(key, format!("expected a strategy name, got {other}"))),
        }
    }
}

impl fmt::Display for SamplingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" => Ok(SamplingKind::Greedy),
            "beam_search" | "beam-search" | "beamsearch" => Ok(SamplingKind::BeamSearch),
            _ => Err(invalid("strategy", format!("unknown strategy '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GreedyParams {
    pub best_of: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamSearchParams {
    pub beam_size: i32,
    pub patience: f32,
}

/// Per-invocation decoding options.
///
/// `language == None` means the engine auto-detects the spoken language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub strategy: SamplingKind,
    pub greedy: GreedyParams,
    pub beam_search: BeamSearchParams,

    pub n_threads: i32,
    pub n_max_text_ctx: i32,
    pub offset_ms: i32,
    pub duration_ms: i32,

    pub translate: bool,
    pub no_context: bool,
    pub no_timestamps: bool,
    pub single_segment: bool,
    pub print_special: bool,
    pub print_progress: bool,
    pub print_realtime: bool,
    pub print_timestamps: bool,

    pub token_timestamps: bool,
    pub thold_pt: f32,
    pub thold_ptsum: f32,
    pub max_len: i32,
    pub split_on_word: bool,
    pub max_tokens: i32,

    pub audio_ctx: i32,
    pub tdrz_enable: bool,
    pub initial_prompt: Option<String>,
    pub language: Option<String>,

    pub suppress_blank: bool,
    pub suppress_non_speech_tokens: bool,

    pub temperature: f32,
    pub max_initial_ts: f32,
    pub length_penalty: f32,
    pub temperature_inc: f32,
    pub entropy_thold: f32,
    pub logprob_thold: f32,
    pub no_speech_thold: f32,
}

impl RunConfiguration {
    pub const FIELDS: &'static [&'static str] = &[
        "strategy",
        "best_of",
        "beam_size",
        "patience",
        "n_threads",
        "n_max_text_ctx",
        "offset_ms",
        "duration_ms",
        "translate",
        "no_context",
        "no_timestamps",
        "single_segment",
        "print_special",
        "print_progress",
        "print_realtime",
        "print_timestamps",
        "token_timestamps",
        "thold_pt",
        "thold_ptsum",
        "max_len",
        "split_on_word",
        "max_tokens",
        "audio_ctx",
        "tdrz_enable",
        "initial_prompt",
        "language",
        "suppress_blank",
        "suppress_non_speech_tokens",
        "temperature",
        "max_initial_ts",
        "length_penalty",
        "temperature_inc",
        "entropy_thold",
        "logprob_thold",
        "no_speech_thold",
    ];

    /// Defaults whisper.cpp's `whisper_full_default_params` reports.
    pub fn engine_defaults(strategy: SamplingKind) -> Self {
        let n_threads = std::thread::available_parallelism()
            .map(|p| p.get().min(4) as i32)
            .unwrap_or(4);

        let (greedy, beam_search) = match strategy {
            SamplingKind::Greedy => (
                GreedyParams { best_of: 5 },
                BeamSearchParams { beam_size: -1, patience: -1.0 },
            ),
            SamplingKind::BeamSearch => (
                GreedyParams { best_of: -1 },
                BeamSearchParams { beam_size: 5, patience: -1.0 },
            ),
        };

        Self {
            strategy,
            greedy,
            beam_search,
            n_threads,
            n_max_text_ctx: 16384,
            offset_ms: 0,
            duration_ms: 0,
            translate: false,
            no_context: true,
            no_timestamps: false,
            single_segment: false,
            print_special: false,
            print_progress: true,
            print_realtime: false,
            print_timestamps: true,
            token_timestamps: false,
            thold_pt: 0.01,
            thold_ptsum: 0.01,
            max_len: 0,
            split_on_word: false,
            max_tokens: 0,
            audio_ctx: 0,
            tdrz_enable: false,
            initial_prompt: None,
            language: Some("en".to_string()),
            suppress_blank: true,
            suppress_non_speech_tokens: false,
            temperature: 0.0,
            max_initial_ts: 1.0,
            length_penalty: -1.0,
            temperature_inc: 0.2,
            entropy_thold: 2.4,
            logprob_thold: -1.0,
            no_speech_thold: 0.6,
        }
    }

    pub fn apply(&mut self, key: &str, value: &Value) -> Result<FieldUpdate, DomainError> {
        match key {
            "strategy" => self.strategy = SamplingKind::from_value(key, value)?,
            "best_of" => self.greedy.best_of = as_i32(key, value)?,
            "beam_size" => self.beam_search.beam_size = as_i32(key, value)?,
            "patience" => self.beam_search.patience = as_f32(key, value)?,
            "n_threads" => self.n_threads = as_i32(key, value)?,
            "n_max_text_ctx" => self.n_max_text_ctx = as_i32(key, value)?,
            "offset_ms" => self.offset_ms = as_i32(key, value)?,
            "duration_ms" => self.duration_ms = as_i32(key, value)?,
            "translate" => self.translate = as_bool(key, value)?,
            "no_context" => self.no_context = as_bool(key, value)?,
            "no_timestamps" => self.no_timestamps = as_bool(key, value)?,
            "single_segment" => self.single_segment = as_bool(key, value)?,
            "print_special" => self.print_special = as_bool(key, value)?,
            "print_progress" => self.print_progress = as_bool(key, value)?,
            "print_realtime" => self.print_realtime = as_bool(key, value)?,
            "print_timestamps" => self.print_timestamps = as_bool(key, value)?,
            "token_timestamps" => self.token_timestamps = as_bool(key, value)?,
            "thold_pt" => self.thold_pt = as_f32(key, value)?,
            "thold_ptsum" => self.thold_ptsum = as_f32(key, value)?,
            "max_len" => self.max_len = as_i32(key, value)?,
            "split_on_word" => self.split_on_word = as_bool(key, value)?,
            "max_tokens" => self.max_tokens = as_i32(key, value)?,
            "audio_ctx" => self.audio_ctx = as_i32(key, value)?,
            "tdrz_enable" => self.tdrz_enable = as_bool(key, value)?,
            "initial_prompt" => self.initial_prompt = as_opt_string(key, value)?,
            "language" => {
                self.language = as_opt_string(key, value)?
                    .filter(|lang| !lang.is_empty() && !lang.eq_ignore_ascii_case("auto"))
            }
            "suppress_blank" => self.suppress_blank = as_bool(key, value)?,
            "suppress_non_speech_tokens" => {
                self.suppress_non_speech_tokens = as_bool(key, value)?
            }
            "temperature" => self.temperature = as_f32(key, value)?,
            "max_initial_ts" => self.max_initial_ts = as_f32(key, value)?,
            "length_penalty" => self.length_penalty = as_f32(key, value)?,
            "temperature_inc" => self.temperature_inc = as_f32(key, value)?,
            "entropy_thold" => self.entropy_thold = as_f32(key, value)?,
            "logprob_thold" => self.logprob_thold = as_f32(key, value)?,
            "no_speech_thold" => self.no_speech_thold = as_f32(key, value)?,
            _ => return Ok(FieldUpdate::UnknownField),
        }
        Ok(FieldUpdate::Applied)
    }
}

/// Ordered caller-supplied `(key, value)` pairs.
///
/// This is the free-form boundary: keys are validated only when applied to a
/// record, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamOverrides {
    pairs: Vec<(String, Value)>,
}

impl ParamOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Last value given for `key`, if any.
    pub fn last(&self, key: &str) -> Option<&Value> {
        self.pairs.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Convert a TOML table (e.g. a config file section) into overrides.
    ///
    /// TOML tables are key-sorted, so the resulting order is alphabetical.
    pub fn from_toml(table: &toml::Table) -> Result<Self, DomainError> {
        let mut overrides = Self::new();
        for (key, value) in table {
            overrides.push(key.clone(), serde_json::to_value(value)?);
        }
        Ok(overrides)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParamOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn invalid(key: &str, reason: String) -> DomainError {
    DomainError::InvalidParameter {
        key: key.to_string(),
        reason,
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, DomainError> {
    value
        .as_bool()
        .ok_or_else(|| invalid(key, format!("expected a boolean, got {value}")))
}

fn as_i32(key: &str, value: &Value) -> Result<i32, DomainError> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| invalid(key, format!("expected a 32-bit integer, got {value}")))
}

fn as_f32(key: &str, value: &Value) -> Result<f32, DomainError> {
    value
        .as_f64()
        .map(|n| n as f32)
        .ok_or_else(|| invalid(key, format!("expected a number, got {value}")))
}

fn as_opt_string(key: &str, value: &Value) -> Result<Option<String>, DomainError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(invalid(key, format!("expected a string or null, got {other}"))),
    }
}
