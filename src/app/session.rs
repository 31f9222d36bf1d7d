use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::app::formatter::{detected_language, SegmentFormatter};
use crate::app::resolver::ParameterResolver;
use crate::domain::{
    DomainError, OutputFormat, ParamOverrides, RunConfiguration, SampleBuffer,
    TranscriptionResult,
};
use crate::ports::{Engine, RunTarget, SegmentSource};

/// How an inference pass was bound to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Bound to the context handle alone.
    ContextOnly,
    /// Bound to the session's decoding state.
    Stateful,
    /// Split across `processors` engine-internal workers.
    Parallel { processors: usize },
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationMode::ContextOnly => f.write_str("context-only"),
            InvocationMode::Stateful => f.write_str("stateful"),
            InvocationMode::Parallel { processors } => write!(f, "parallel({processors})"),
        }
    }
}

/// Per-call options for [`Session::transcribe`].
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Output format selector, `plaintext` or `srt` (case-insensitive).
    pub format: String,
    /// Context fields; only used by the call that loads the model.
    pub context_overrides: ParamOverrides,
    /// Run fields, applied after the forced defaults.
    pub run_overrides: ParamOverrides,
    /// Engine-internal parallelism (values below 2 run serially).
    pub processors: usize,
    /// Decode on a dedicated state handle.
    pub use_state: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Plaintext.to_string(),
            context_overrides: ParamOverrides::new(),
            run_overrides: ParamOverrides::new(),
            processors: 1,
            use_state: true,
        }
    }
}

impl TranscribeOptions {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_processors(mut self, processors: usize) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_state(mut self, use_state: bool) -> Self {
        self.use_state = use_state;
        self
    }

    pub fn with_run_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.run_overrides = overrides;
        self
    }

    pub fn with_context_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.context_overrides = overrides;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Context,
    State,
}

/// One engine session: owns the context and decoding-state handles, runs
/// inference passes against them and formats the result.
///
/// Every mutating call takes `&mut self`, so a pass always completes before
/// the next one starts. Handles are released on [`Session::release`] or when
/// the session is dropped, state before context.
pub struct Session<E: Engine> {
    engine: E,
    resolver: ParameterResolver,
    model_path: PathBuf,
    context: Option<E::Context>,
    state: Option<E::State>,
    last_bound: Option<Bound>,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E, model_path: impl Into<PathBuf>) -> Self {
        Self::with_resolver(engine, model_path, ParameterResolver::new())
    }

    pub fn with_resolver(
        engine: E,
        model_path: impl Into<PathBuf>,
        resolver: ParameterResolver,
    ) -> Self {
        Self {
            engine,
            resolver,
            model_path: model_path.into(),
            context: None,
            state: None,
            last_bound: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn resolver(&self) -> &ParameterResolver {
        &self.resolver
    }

    /// Model this session loads on first use.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_loaded(&self) -> bool {
        self.context.is_some()
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Load the model unless a context already exists.
    ///
    /// An existing context is returned as is; `overrides` only take effect on
    /// the call that actually loads.
    pub fn ensure_context(
        &mut self,
        model_path: &Path,
        overrides: &ParamOverrides,
    ) -> Result<&E::Context, DomainError> {
        if self.context.is_none() {
            let resolved = self.resolver.resolve_context(&self.engine, overrides)?;

            info!(
                engine = self.engine.name(),
                path = ?model_path,
                use_gpu = resolved.config.use_gpu,
                gpu_device = resolved.config.gpu_device,
                "Loading model"
            );

            let context = self
                .engine
                .load_model(model_path, &resolved.config)
                .map_err(into_initialization)?;

            self.model_path = model_path.to_path_buf();
            self.context = Some(context);
            info!(path = ?model_path, "Model loaded");
        } else if !overrides.is_empty() || model_path != self.model_path.as_path() {
            debug!(
                loaded = ?self.model_path,
                requested = ?model_path,
                "Context already loaded, ignoring new context parameters"
            );
        }

        self.context
            .as_ref()
            .ok_or_else(|| DomainError::Initialization("model context missing".to_string()))
    }

    /// Create the decoding state unless one exists. Requires a loaded model.
    pub fn ensure_state(&mut self) -> Result<&E::State, DomainError> {
        if self.state.is_none() {
            let context = self.context.as_ref().ok_or_else(|| {
                DomainError::Initialization(
                    "cannot create a decoding state before the model is loaded".to_string(),
                )
            })?;

            let state = self
                .engine
                .create_state(context)
                .map_err(into_initialization)?;

            self.state = Some(state);
            debug!("Decoding state created");
        }

        self.state
            .as_ref()
            .ok_or_else(|| DomainError::Initialization("decoding state missing".to_string()))
    }

    /// Run one inference pass.
    ///
    /// The mode follows from what is available: more than one processor runs
    /// in parallel, otherwise an existing state is used, otherwise the context
    /// alone. A non-zero engine status fails the whole pass.
    pub fn invoke(
        &mut self,
        config: &RunConfiguration,
        samples: &SampleBuffer,
        processors: usize,
    ) -> Result<InvocationMode, DomainError> {
        let processors = processors.max(1);

        let context = self.context.as_mut().ok_or_else(|| {
            DomainError::Initialization("no model loaded; call ensure_context first".to_string())
        })?;

        let mode = if processors > 1 {
            InvocationMode::Parallel { processors }
        } else if self.state.is_some() {
            InvocationMode::Stateful
        } else {
            InvocationMode::ContextOnly
        };

        let (target, bound) = match self.state.as_mut() {
            Some(state) => (
                RunTarget::State {
                    context: &*context,
                    state,
                },
                Bound::State,
            ),
            None => (RunTarget::Context(context), Bound::Context),
        };

        debug!(
            %mode,
            samples = samples.len(),
            duration_secs = samples.duration_secs(),
            threads = config.n_threads,
            strategy = %config.strategy,
            "Starting inference"
        );

        // Results of an earlier pass are stale from here on.
        self.last_bound = None;

        let status = self.engine.run(target, config, samples.samples(), processors);
        if status != 0 {
            error!(status, %mode, "Inference failed");
            return Err(DomainError::Transcription { code: status });
        }

        self.last_bound = Some(bound);
        Ok(mode)
    }

    /// Handle holding the segments of the last successful pass.
    pub fn output(&self) -> Option<&dyn SegmentSource> {
        match self.last_bound? {
            Bound::Context => self.context.as_ref().map(|c| c as &dyn SegmentSource),
            Bound::State => self.state.as_ref().map(|s| s as &dyn SegmentSource),
        }
    }

    /// Full pipeline: validate the format, ensure handles, resolve the run
    /// configuration, run inference and format the segments.
    pub fn transcribe(
        &mut self,
        samples: &SampleBuffer,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, DomainError> {
        let formatter = SegmentFormatter::parse(&options.format)?;

        let model_path = self.model_path.clone();
        self.ensure_context(&model_path, &options.context_overrides)?;
        if options.use_state {
            self.ensure_state()?;
        }

        let run = self.resolver.resolve_run(&self.engine, &options.run_overrides)?;
        if !run.ignored.is_empty() {
            warn!(ignored = ?run.ignored, "Some run parameters were not recognized");
        }

        let start = Instant::now();
        let mode = self.invoke(&run.config, samples, options.processors)?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let source = self.output().ok_or_else(|| {
            DomainError::Engine("inference finished without an output handle".to_string())
        })?;

        let output = formatter.render(source)?;
        let language = detected_language(&self.engine, source);
        let segment_count = source.segment_count()?;

        info!(
            %mode,
            format = %formatter.format(),
            segments = segment_count,
            language = %language,
            duration_ms,
            "Transcription complete"
        );

        Ok(TranscriptionResult {
            language,
            output,
            segment_count,
            duration_ms,
        })
    }

    /// Free the state, then the context. Safe to call any number of times.
    pub fn release(&mut self) {
        self.last_bound = None;

        if let Some(state) = self.state.take() {
            self.engine.free_state(state);
            debug!("Decoding state released");
        }

        if let Some(context) = self.context.take() {
            self.engine.free_context(context);
            info!(path = ?self.model_path, "Model context released");
        }
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.release();
    }
}

fn into_initialization(err: DomainError) -> DomainError {
    match err {
        DomainError::Initialization(_) | DomainError::ModelNotFound(_) => err,
        other => DomainError::Initialization(other.to_string()),
    }
}
