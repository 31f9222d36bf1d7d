use std::path::Path;

use crate::domain::{ContextConfiguration, DomainError, RunConfiguration, SamplingKind, Segment};

/// Read access to the segments the engine produced on its last pass.
///
/// Both context and state handles implement this, since results live on
/// whichever handle the pass was bound to.
pub trait SegmentSource {
    fn segment_count(&self) -> Result<usize, DomainError>;

    fn segment_text(&self, index: usize) -> Result<String, DomainError>;

    /// Segment start in ticks (centiseconds).
    fn segment_start_tick(&self, index: usize) -> Result<i64, DomainError>;

    /// Segment end in ticks (centiseconds).
    fn segment_end_tick(&self, index: usize) -> Result<i64, DomainError>;

    /// Language id detected (or forced) during the last pass, if any.
    fn detected_language_id(&self) -> Option<i32>;

    fn segment(&self, index: usize) -> Result<Segment, DomainError> {
        Ok(Segment {
            text: self.segment_text(index)?,
            start_tick: self.segment_start_tick(index)?,
            end_tick: self.segment_end_tick(index)?,
        })
    }
}

/// Handle an inference pass is bound to.
pub enum RunTarget<'a, C, S> {
    /// Decode on the context's own scratch state.
    Context(&'a mut C),
    /// Decode on a dedicated state created from `context`.
    State { context: &'a C, state: &'a mut S },
}

/// Port for the native inference engine.
///
/// This is the complete call contract the session relies on. Handles are
/// owned values: freeing consumes them, so a freed handle cannot be reused.
pub trait Engine: Send + Sync {
    /// Loaded-model handle.
    type Context: SegmentSource + Send + 'static;
    /// Per-session decoding state bound to a context.
    type State: SegmentSource + Send + 'static;

    /// Backend name for display.
    fn name(&self) -> &str;

    fn default_context_config(&self) -> ContextConfiguration;

    /// Load a model. An error plays the role of the engine's null handle.
    fn load_model(
        &self,
        path: &Path,
        config: &ContextConfiguration,
    ) -> Result<Self::Context, DomainError>;

    fn create_state(&self, context: &Self::Context) -> Result<Self::State, DomainError>;

    fn default_run_config(&self, strategy: SamplingKind) -> RunConfiguration;

    /// Run one inference pass and return the engine status (0 = success).
    ///
    /// With `processors > 1` the engine splits the work internally; the
    /// resulting segments are chronological once the call returns.
    fn run(
        &self,
        target: RunTarget<'_, Self::Context, Self::State>,
        config: &RunConfiguration,
        samples: &[f32],
        processors: usize,
    ) -> i32;

    /// Language code for an engine language id.
    fn language_code(&self, id: i32) -> Option<String>;

    fn free_state(&self, state: Self::State) {
        drop(state);
    }

    fn free_context(&self, context: Self::Context) {
        drop(context);
    }
}
