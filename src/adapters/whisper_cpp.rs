use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperError,
    WhisperState,
};

use crate::domain::{
    ContextConfiguration, DomainError, RunConfiguration, SamplingKind, Segment,
    ENGINE_SAMPLE_RATE, TICKS_PER_SECOND,
};
use crate::ports::{Engine, RunTarget, SegmentSource};

/// Shortest chunk handed to one parallel worker: one second of audio.
const MIN_PARALLEL_SAMPLES: usize = ENGINE_SAMPLE_RATE as usize;

/// Status reported when a pass fails before whisper.cpp returns a code.
const STATUS_FAILED: i32 = -1;

static QUIET_HOOKS: OnceCell<()> = OnceCell::new();

/// Engine implementation using whisper.cpp via whisper-rs.
pub struct WhisperCppEngine {
    quiet: bool,
}

impl WhisperCppEngine {
    /// Create the engine.
    ///
    /// With `quiet`, whisper.cpp and GGML log output is redirected into
    /// whisper-rs' hooks, which drop it. The hooks are process-wide and
    /// installed at most once.
    pub fn new(quiet: bool) -> Self {
        if quiet {
            QUIET_HOOKS.get_or_init(|| {
                whisper_rs::install_logging_hooks();
                debug!("whisper.cpp logging hooks installed");
            });
        }

        Self { quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

/// A loaded whisper model.
///
/// whisper.cpp keeps a default decoding state inside each context; `scratch`
/// plays that role for passes bound to the context alone.
pub struct WhisperModel {
    // Declared first so the scratch state is dropped before the context.
    scratch: Option<WhisperDecodeState>,
    context: WhisperContext,
}

/// A decoding state created from a [`WhisperModel`].
pub struct WhisperDecodeState {
    state: WhisperState,
    /// Output of the last parallel pass, which is assembled from several
    /// worker states rather than read from `state`.
    merged: Option<Transcript>,
}

#[derive(Debug, Clone, Default)]
struct Transcript {
    segments: Vec<Segment>,
    language_id: Option<i32>,
}

impl WhisperDecodeState {
    fn new(state: WhisperState) -> Self {
        Self {
            state,
            merged: None,
        }
    }

    fn merged_segment(&self, index: usize) -> Option<Result<&Segment, DomainError>> {
        self.merged.as_ref().map(|merged| {
            merged
                .segments
                .get(index)
                .ok_or_else(|| DomainError::Engine(format!("segment {index} out of range")))
        })
    }
}

impl SegmentSource for WhisperDecodeState {
    fn segment_count(&self) -> Result<usize, DomainError> {
        match &self.merged {
            Some(merged) => Ok(merged.segments.len()),
            None => Ok(self.state.full_n_segments().map_err(engine_fault)?.max(0) as usize),
        }
    }

    fn segment_text(&self, index: usize) -> Result<String, DomainError> {
        match self.merged_segment(index) {
            Some(segment) => Ok(segment?.text.clone()),
            None => self
                .state
                .full_get_segment_text(segment_index(index)?)
                .map_err(engine_fault),
        }
    }

    fn segment_start_tick(&self, index: usize) -> Result<i64, DomainError> {
        match self.merged_segment(index) {
            Some(segment) => Ok(segment?.start_tick),
            None => self
                .state
                .full_get_segment_t0(segment_index(index)?)
                .map_err(engine_fault),
        }
    }

    fn segment_end_tick(&self, index: usize) -> Result<i64, DomainError> {
        match self.merged_segment(index) {
            Some(segment) => Ok(segment?.end_tick),
            None => self
                .state
                .full_get_segment_t1(segment_index(index)?)
                .map_err(engine_fault),
        }
    }

    fn detected_language_id(&self) -> Option<i32> {
        match &self.merged {
            Some(merged) => merged.language_id,
            None => self.state.full_lang_id_from_state().ok().filter(|id| *id >= 0),
        }
    }
}

impl SegmentSource for WhisperModel {
    fn segment_count(&self) -> Result<usize, DomainError> {
        match &self.scratch {
            Some(scratch) => scratch.segment_count(),
            None => Ok(0),
        }
    }

    fn segment_text(&self, index: usize) -> Result<String, DomainError> {
        self.scratch()?.segment_text(index)
    }

    fn segment_start_tick(&self, index: usize) -> Result<i64, DomainError> {
        self.scratch()?.segment_start_tick(index)
    }

    fn segment_end_tick(&self, index: usize) -> Result<i64, DomainError> {
        self.scratch()?.segment_end_tick(index)
    }

    fn detected_language_id(&self) -> Option<i32> {
        self.scratch.as_ref().and_then(|s| s.detected_language_id())
    }
}

impl WhisperModel {
    fn scratch(&self) -> Result<&WhisperDecodeState, DomainError> {
        self.scratch
            .as_ref()
            .ok_or_else(|| DomainError::Engine("no inference has run on this context".to_string()))
    }

    fn scratch_mut(&mut self) -> Result<&mut WhisperDecodeState, WhisperError> {
        match self.scratch {
            Some(ref mut scratch) => Ok(scratch),
            None => {
                let state = self.context.create_state()?;
                Ok(self.scratch.insert(WhisperDecodeState::new(state)))
            }
        }
    }
}

impl Engine for WhisperCppEngine {
    type Context = WhisperModel;
    type State = WhisperDecodeState;

    fn name(&self) -> &str {
        "whisper.cpp"
    }

    fn default_context_config(&self) -> ContextConfiguration {
        // whisper_context_default_params()
        ContextConfiguration {
            use_gpu: true,
            flash_attn: false,
            gpu_device: 0,
        }
    }

    fn load_model(
        &self,
        path: &Path,
        config: &ContextConfiguration,
    ) -> Result<WhisperModel, DomainError> {
        if !path.exists() {
            return Err(DomainError::ModelNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let path_str = path.to_str().ok_or_else(|| {
            DomainError::Initialization(format!("model path is not valid UTF-8: {path:?}"))
        })?;

        let mut params = WhisperContextParameters::default();
        params
            .use_gpu(config.use_gpu)
            .flash_attn(config.flash_attn)
            .gpu_device(config.gpu_device);

        let context = WhisperContext::new_with_params(path_str, params).map_err(|e| {
            DomainError::Initialization(format!("Failed to load model: {}", e))
        })?;

        info!(path = ?path, "Whisper model loaded successfully");

        Ok(WhisperModel {
            scratch: None,
            context,
        })
    }

    fn create_state(&self, context: &WhisperModel) -> Result<WhisperDecodeState, DomainError> {
        let state = context.context.create_state().map_err(|e| {
            DomainError::Initialization(format!("Failed to create whisper state: {}", e))
        })?;
        Ok(WhisperDecodeState::new(state))
    }

    fn default_run_config(&self, strategy: SamplingKind) -> RunConfiguration {
        RunConfiguration::engine_defaults(strategy)
    }

    fn run(
        &self,
        target: RunTarget<'_, WhisperModel, WhisperDecodeState>,
        config: &RunConfiguration,
        samples: &[f32],
        processors: usize,
    ) -> i32 {
        let workers = worker_count(samples.len(), processors);

        let result = match target {
            RunTarget::Context(model) => {
                if workers > 1 {
                    decode_parallel(&model.context, config, samples, workers).and_then(|merged| {
                        model.scratch_mut()?.merged = Some(merged);
                        Ok(0)
                    })
                } else {
                    model
                        .scratch_mut()
                        .and_then(|scratch| decode(scratch, config, samples))
                }
            }
            RunTarget::State { context, state } => {
                if workers > 1 {
                    decode_parallel(&context.context, config, samples, workers).map(|merged| {
                        state.merged = Some(merged);
                        0
                    })
                } else {
                    decode(state, config, samples)
                }
            }
        };

        match result {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "whisper.cpp inference failed");
                status_of(&err)
            }
        }
    }

    fn language_code(&self, id: i32) -> Option<String> {
        whisper_rs::get_lang_str(id).map(|code| code.to_string())
    }
}

fn decode(
    target: &mut WhisperDecodeState,
    config: &RunConfiguration,
    samples: &[f32],
) -> Result<i32, WhisperError> {
    target.merged = None;
    target.state.full(full_params(config), samples)
}

/// Split `samples` into `workers` contiguous chunks, decode each on its own
/// state and merge the segments on one timeline.
fn decode_parallel(
    context: &WhisperContext,
    config: &RunConfiguration,
    samples: &[f32],
    workers: usize,
) -> Result<Transcript, WhisperError> {
    let mut worker_config = config.clone();
    worker_config.print_progress = false;
    worker_config.print_realtime = false;

    let chunks: Vec<(usize, &[f32])> = chunk_bounds(samples.len(), workers)
        .into_iter()
        .map(|(start, end)| (start, &samples[start..end]))
        .collect();

    debug!(workers, chunk_len = samples.len() / workers, "Decoding in parallel");

    let results: Vec<Result<Transcript, WhisperError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .iter()
            .map(|&(offset, chunk)| {
                let worker_config = &worker_config;
                scope.spawn(move || decode_chunk(context, worker_config, chunk, offset))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or(Err(WhisperError::GenericError(STATUS_FAILED)))
            })
            .collect()
    });

    let mut merged = Transcript::default();
    for result in results {
        let chunk = result?;
        merged.language_id = merged.language_id.or(chunk.language_id);
        merged.segments.extend(chunk.segments);
    }
    merged.segments.sort_by_key(|segment| segment.start_tick);

    Ok(merged)
}

fn decode_chunk(
    context: &WhisperContext,
    config: &RunConfiguration,
    chunk: &[f32],
    offset_samples: usize,
) -> Result<Transcript, WhisperError> {
    let mut state = context.create_state()?;
    let status = state.full(full_params(config), chunk)?;
    if status != 0 {
        return Err(WhisperError::GenericError(status));
    }

    let offset_ticks = samples_to_ticks(offset_samples);
    let count = state.full_n_segments()?;
    let mut segments = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count {
        let segment = Segment::new(
            state.full_get_segment_text(i)?,
            state.full_get_segment_t0(i)?,
            state.full_get_segment_t1(i)?,
        );
        segments.push(segment.shifted(offset_ticks));
    }

    Ok(Transcript {
        segments,
        language_id: state.full_lang_id_from_state().ok().filter(|id| *id >= 0),
    })
}

fn full_params(config: &RunConfiguration) -> FullParams<'_, '_> {
    let strategy = match config.strategy {
        SamplingKind::Greedy => SamplingStrategy::Greedy {
            best_of: config.greedy.best_of,
        },
        SamplingKind::BeamSearch => SamplingStrategy::BeamSearch {
            beam_size: config.beam_search.beam_size,
            patience: config.beam_search.patience,
        },
    };

    let mut params = FullParams::new(strategy);

    params.set_n_threads(config.n_threads);
    params.set_n_max_text_ctx(config.n_max_text_ctx);
    params.set_offset_ms(config.offset_ms);
    params.set_duration_ms(config.duration_ms);

    params.set_translate(config.translate);
    params.set_no_context(config.no_context);
    params.set_no_timestamps(config.no_timestamps);
    params.set_single_segment(config.single_segment);
    params.set_print_special(config.print_special);
    params.set_print_progress(config.print_progress);
    params.set_print_realtime(config.print_realtime);
    params.set_print_timestamps(config.print_timestamps);

    params.set_token_timestamps(config.token_timestamps);
    params.set_thold_pt(config.thold_pt);
    params.set_thold_ptsum(config.thold_ptsum);
    params.set_max_len(config.max_len);
    params.set_split_on_word(config.split_on_word);
    params.set_max_tokens(config.max_tokens);

    params.set_audio_ctx(config.audio_ctx);
    params.set_tdrz_enable(config.tdrz_enable);
    if let Some(prompt) = config.initial_prompt.as_deref() {
        params.set_initial_prompt(prompt);
    }
    params.set_language(Some(config.language.as_deref().unwrap_or("auto")));

    params.set_suppress_blank(config.suppress_blank);
    params.set_suppress_non_speech_tokens(config.suppress_non_speech_tokens);

    params.set_temperature(config.temperature);
    params.set_max_initial_ts(config.max_initial_ts);
    params.set_length_penalty(config.length_penalty);
    params.set_temperature_inc(config.temperature_inc);
    params.set_entropy_thold(config.entropy_thold);
    params.set_logprob_thold(config.logprob_thold);
    params.set_no_speech_thold(config.no_speech_thold);

    params
}

/// `[start, end)` sample ranges of `workers` contiguous chunks covering
/// `len` samples. The last chunk takes the remainder.
fn chunk_bounds(len: usize, workers: usize) -> Vec<(usize, usize)> {
    let workers = workers.max(1);
    let chunk_len = len / workers;
    (0..workers)
        .map(|i| {
            let start = i * chunk_len;
            let end = if i + 1 == workers { len } else { start + chunk_len };
            (start, end)
        })
        .collect()
}

/// Position of sample `offset` on the engine's tick timeline.
fn samples_to_ticks(offset: usize) -> i64 {
    offset as i64 * TICKS_PER_SECOND / i64::from(ENGINE_SAMPLE_RATE)
}

/// Number of parallel workers actually used: never more than one per second
/// of audio.
fn worker_count(samples: usize, processors: usize) -> usize {
    processors.clamp(1, (samples / MIN_PARALLEL_SAMPLES).max(1))
}

fn segment_index(index: usize) -> Result<i32, DomainError> {
    i32::try_from(index).map_err(|_| DomainError::Engine(format!("segment {index} out of range")))
}

fn status_of(err: &WhisperError) -> i32 {
    match err {
        WhisperError::GenericError(code) => *code,
        // whisper-rs turns these whisper_full statuses into dedicated variants.
        WhisperError::FailedToEncode => 7,
        WhisperError::FailedToDecode => 8,
        _ => STATUS_FAILED,
    }
}

fn engine_fault(err: WhisperError) -> DomainError {
    DomainError::Engine(err.to_string())
}
