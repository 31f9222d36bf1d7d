//! End-to-end session tests against a scripted in-memory engine.
//!
//! The engine replays a fixed timeline of segments. With more than one
//! processor it decodes per-window and returns the windows out of order, so
//! the merge step is exercised.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use whisper_session::adapters::TomlConfigStore;
use whisper_session::domain::{ContextConfiguration, RunConfiguration, SamplingKind};
use whisper_session::{
    AppController, AudioIngestor, AudioSource, DomainError, Engine, InvocationMode,
    ParamOverrides, RunTarget, SampleBuffer, Segment, SegmentSource, Session, TranscribeOptions,
    TranscriptionService,
};

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Default)]
struct Handle {
    segments: Vec<Segment>,
    language_id: Option<i32>,
}

impl SegmentSource for Handle {
    fn segment_count(&self) -> Result<usize, DomainError> {
        Ok(self.segments.len())
    }
    fn segment_text(&self, index: usize) -> Result<String, DomainError> {
        Ok(self.segments[index].text.clone())
    }
    fn segment_start_tick(&self, index: usize) -> Result<i64, DomainError> {
        Ok(self.segments[index].start_tick)
    }
    fn segment_end_tick(&self, index: usize) -> Result<i64, DomainError> {
        Ok(self.segments[index].end_tick)
    }
    fn detected_language_id(&self) -> Option<i32> {
        self.language_id
    }
}

#[derive(Clone)]
struct ScriptedEngine {
    timeline: Vec<Segment>,
    language_id: Option<i32>,
    status: Arc<Mutex<i32>>,
    journal: Journal,
}

impl ScriptedEngine {
    fn new(timeline: Vec<Segment>) -> Self {
        Self {
            timeline,
            language_id: Some(0),
            status: Arc::new(Mutex::new(0)),
            journal: Journal::default(),
        }
    }

    fn speaking(language_id: Option<i32>) -> Self {
        let mut engine = Self::new(vec![
            Segment::new(" And so my fellow Americans,", 0, 320),
            Segment::new(" ask not what your country can do for you,", 320, 780),
            Segment::new(" ask what you can do for your country.", 780, 1100),
        ]);
        engine.language_id = language_id;
        engine
    }

    fn fail_with(&self, status: i32) {
        *self.status.lock() = status;
    }

    fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.journal.lock().push(call.into());
    }

    fn decode(&self, processors: usize) -> Vec<Segment> {
        if processors <= 1 {
            return self.timeline.clone();
        }

        let end = self.timeline.iter().map(|s| s.end_tick).max().unwrap_or(0) + 1;
        let window = end / processors as i64 + 1;
        let mut merged = Vec::new();
        for worker in (0..processors as i64).rev() {
            merged.extend(
                self.timeline
                    .iter()
                    .filter(|s| s.start_tick / window == worker)
                    .cloned(),
            );
        }
        merged.sort_by_key(|s| s.start_tick);
        merged
    }
}

impl Engine for ScriptedEngine {
    type Context = Handle;
    type State = Handle;

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_context_config(&self) -> ContextConfiguration {
        ContextConfiguration {
            use_gpu: true,
            flash_attn: false,
            gpu_device: 0,
        }
    }

    fn load_model(&self, path: &Path, config: &ContextConfiguration) -> Result<Handle, DomainError> {
        self.record(format!("load {} gpu={}", path.display(), config.use_gpu));
        Ok(Handle::default())
    }

    fn create_state(&self, _: &Handle) -> Result<Handle, DomainError> {
        self.record("create state");
        Ok(Handle::default())
    }

    fn default_run_config(&self, strategy: SamplingKind) -> RunConfiguration {
        RunConfiguration::engine_defaults(strategy)
    }

    fn run(
        &self,
        target: RunTarget<'_, Handle, Handle>,
        config: &RunConfiguration,
        _: &[f32],
        processors: usize,
    ) -> i32 {
        self.record(format!("run processors={} threads={}", processors, config.n_threads));

        let handle = match target {
            RunTarget::Context(context) => context,
            RunTarget::State { state, .. } => state,
        };
        handle.segments.clear();
        handle.language_id = None;

        let status = *self.status.lock();
        if status != 0 {
            return status;
        }

        handle.segments = self.decode(processors);
        handle.language_id = self.language_id;
        0
    }

    fn language_code(&self, id: i32) -> Option<String> {
        match id {
            0 => Some("en".to_string()),
            2 => Some("de".to_string()),
            _ => None,
        }
    }

    fn free_state(&self, _: Handle) {
        self.record("free state");
    }

    fn free_context(&self, _: Handle) {
        self.record("free context");
    }
}

fn one_second() -> SampleBuffer {
    SampleBuffer::new(vec![0.0; 16_000])
}

// =============================================================================
// Session
// =============================================================================

mod session {
    use super::*;

    #[test]
    fn test_plaintext_is_raw_concatenation() {
        let engine = ScriptedEngine::speaking(Some(0));
        let mut session = Session::new(engine, "models/ggml-tiny.bin");

        let result = session
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();

        assert_eq!(
            result.output,
            " And so my fellow Americans, ask not what your country can do for you, \
             ask what you can do for your country."
        );
        assert_eq!(result.language, "en");
        assert_eq!(result.segment_count, 3);
    }

    #[test]
    fn test_srt_has_one_block_per_segment() {
        let engine = ScriptedEngine::speaking(Some(2));
        let mut session = Session::new(engine, "model.bin");

        let result = session
            .transcribe(&one_second(), &TranscribeOptions::default().with_format("srt"))
            .unwrap();

        let blocks: Vec<&str> = result.output.split_terminator("\n\n").collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[1],
            "2\n00:00:03,200 --> 00:00:07,800\nask not what your country can do for you,"
        );
        assert_eq!(result.language, "de");
    }

    #[test]
    fn test_parallel_matches_serial() {
        let serial = ScriptedEngine::speaking(Some(0));
        let parallel = serial.clone();

        let mut one = Session::new(serial, "model.bin");
        let mut four = Session::new(parallel, "model.bin");

        let a = one
            .transcribe(&one_second(), &TranscribeOptions::default().with_format("srt"))
            .unwrap();
        let b = four
            .transcribe(
                &one_second(),
                &TranscribeOptions::default().with_format("srt").with_processors(4),
            )
            .unwrap();

        assert_eq!(a.output, b.output);
        assert_eq!(a.segment_count, b.segment_count);
    }

    #[test]
    fn test_invocation_modes() {
        let engine = ScriptedEngine::speaking(Some(0));
        let mut session = Session::new(engine, "model.bin");
        session
            .ensure_context(Path::new("model.bin"), &ParamOverrides::new())
            .unwrap();

        let run = session
            .resolver()
            .resolve_run(session.engine(), &ParamOverrides::new())
            .unwrap()
            .config;

        assert_eq!(
            session.invoke(&run, &one_second(), 1).unwrap(),
            InvocationMode::ContextOnly
        );
        assert_eq!(
            session.invoke(&run, &one_second(), 0).unwrap(),
            InvocationMode::ContextOnly
        );

        session.ensure_state().unwrap();
        assert_eq!(
            session.invoke(&run, &one_second(), 1).unwrap(),
            InvocationMode::Stateful
        );
        assert_eq!(
            session.invoke(&run, &one_second(), 3).unwrap(),
            InvocationMode::Parallel { processors: 3 }
        );
        assert_eq!(session.output().unwrap().segment_count().unwrap(), 3);
    }

    #[test]
    fn test_unknown_run_parameter_is_not_fatal() {
        let engine = ScriptedEngine::speaking(Some(0));
        let mut session = Session::new(engine, "model.bin");

        let options = TranscribeOptions::default().with_run_overrides(
            ParamOverrides::new()
                .set("definitely_not_a_knob", 42)
                .set("n_threads", 2),
        );

        let result = session.transcribe(&one_second(), &options).unwrap();
        assert!(!result.output.is_empty());
        assert!(session
            .engine()
            .calls()
            .contains(&"run processors=1 threads=2".to_string()));
    }

    #[test]
    fn test_wrong_value_type_is_rejected() {
        let engine = ScriptedEngine::speaking(Some(0));
        let mut session = Session::new(engine, "model.bin");

        let options = TranscribeOptions::default()
            .with_run_overrides(ParamOverrides::new().set("n_threads", json!("many")));

        let err = session.transcribe(&one_second(), &options).unwrap_err();
        assert!(matches!(err, DomainError::InvalidParameter { ref key, .. } if key == "n_threads"));
    }

    #[test]
    fn test_unsupported_format_fails_before_engine() {
        let engine = ScriptedEngine::speaking(Some(0));
        let mut session = Session::new(engine, "model.bin");

        let err = session
            .transcribe(&one_second(), &TranscribeOptions::default().with_format("xml"))
            .unwrap_err();

        assert!(matches!(err, DomainError::UnsupportedFormat(ref f) if f == "xml"));
        assert!(session.engine().calls().is_empty());
        assert!(!session.is_loaded());
    }

    #[test]
    fn test_engine_failure_surfaces_status() {
        let engine = ScriptedEngine::speaking(Some(0));
        let control = engine.clone();
        let mut session = Session::new(engine, "model.bin");

        control.fail_with(-7);
        let err = session
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::Transcription { code: -7 }));
        assert!(session.output().is_none());

        // The session stays usable.
        control.fail_with(0);
        let result = session
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();
        assert_eq!(result.segment_count, 3);
    }

    #[test]
    fn test_unknown_language_is_undetermined() {
        let engine = ScriptedEngine::speaking(Some(99));
        let mut session = Session::new(engine, "model.bin");

        let result = session
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();
        assert_eq!(result.language, "und");
    }

    #[test]
    fn test_model_loads_once_and_releases_once() {
        let engine = ScriptedEngine::speaking(Some(0));
        let journal = engine.clone();
        let mut session = Session::new(engine, "model.bin");

        for _ in 0..3 {
            session
                .transcribe(&one_second(), &TranscribeOptions::default())
                .unwrap();
        }
        session.release();
        session.release();
        drop(session);

        let calls = journal.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("load")).count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "create state").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "free context").count(), 1);

        let state = calls.iter().position(|c| c == "free state").unwrap();
        let context = calls.iter().position(|c| c == "free context").unwrap();
        assert!(state < context);
    }

    #[test]
    fn test_empty_timeline() {
        let mut session = Session::new(ScriptedEngine::new(Vec::new()), "model.bin");

        let result = session
            .transcribe(&SampleBuffer::new(Vec::new()), &TranscribeOptions::default().with_format("srt"))
            .unwrap();
        assert_eq!(result.output, "");
        assert_eq!(result.segment_count, 0);
    }
}

// =============================================================================
// Service
// =============================================================================

mod service {
    use super::*;

    /// Ingestor that hands back a fixed buffer, or fails like a broken
    /// converter would.
    struct Canned {
        fail: bool,
    }

    #[async_trait]
    impl AudioIngestor for Canned {
        async fn ingest(&self, _: AudioSource) -> Result<SampleBuffer, DomainError> {
            if self.fail {
                return Err(DomainError::AudioConversion {
                    status: "exit status: 1".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            Ok(one_second())
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_transcribe_source() {
        let engine = ScriptedEngine::speaking(Some(0));
        let session = Session::new(engine, "model.bin");
        let service = TranscriptionService::new(session, Arc::new(Canned { fail: false }));

        let result = service
            .transcribe(AudioSource::Bytes(vec![1, 2, 3]), None)
            .await
            .unwrap();
        assert_eq!(result.segment_count, 3);
        assert!(service.is_model_loaded().await.unwrap());

        service.release().await.unwrap();
        assert!(!service.is_model_loaded().await.unwrap());
    }

    #[tokio::test]
    async fn test_conversion_failure_never_reaches_engine() {
        let engine = ScriptedEngine::speaking(Some(0));
        let journal = engine.clone();
        let service = TranscriptionService::new(
            Session::new(engine, "model.bin"),
            Arc::new(Canned { fail: true }),
        );

        let err = service
            .transcribe(AudioSource::Path("broken.mp3".into()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::AudioConversion { .. }));
        assert!(journal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let engine = ScriptedEngine::speaking(Some(0));
        let journal = engine.clone();
        let service = Arc::new(TranscriptionService::new(
            Session::new(engine, "model.bin"),
            Arc::new(Canned { fail: false }),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                service.transcribe_samples(one_second(), None).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().segment_count, 3);
        }

        let calls = journal.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("load")).count(), 1);
        assert_eq!(calls.iter().filter(|c| c.starts_with("run")).count(), 4);
    }
}

// =============================================================================
// Controller
// =============================================================================

mod controller {
    use super::*;
    use tempfile::tempdir;
    use whisper_session::ConfigStore;

    #[tokio::test]
    async fn test_bootstrap_from_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TomlConfigStore::at(dir.path()).unwrap());
        std::fs::write(
            store.config_path(),
            r#"
            [engine]
            model_path = "models/ggml-small.bin"
            use_gpu = false

            [transcription]
            format = "srt"
            threads = 3

            [audio]
            backend = "wav"
            "#,
        )
        .unwrap();

        let engine = ScriptedEngine::speaking(Some(0));
        let journal = engine.clone();
        let controller = AppController::with_store(store, move |_| engine).unwrap();

        assert_eq!(controller.service().ingestor().name(), "wav");

        let result = controller
            .service()
            .transcribe_samples(one_second(), None)
            .await
            .unwrap();
        assert!(result.output.starts_with("1\n00:00:00,000 --> 00:00:03,200\n"));

        let calls = journal.calls();
        assert_eq!(calls[0], "load models/ggml-small.bin gpu=false");
        assert!(calls.contains(&"run processors=1 threads=3".to_string()));
    }

    #[test]
    fn test_update_config_changes_defaults() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TomlConfigStore::at(dir.path()).unwrap());
        let controller =
            AppController::with_store(store.clone(), |_| ScriptedEngine::speaking(Some(0))).unwrap();
        assert_eq!(controller.service().default_options().format, "plaintext");

        let mut config = controller.config();
        config.transcription.format = "srt".to_string();
        config.transcription.processors = 2;
        controller.update_config(config).unwrap();

        let defaults = controller.service().default_options();
        assert_eq!(defaults.format, "srt");
        assert_eq!(defaults.processors, 2);
        assert_eq!(store.load().unwrap().transcription.format, "srt");
    }
}
