use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{
    AppConfig, ContextConfiguration, DomainError, FieldUpdate, ParamOverrides, RunConfiguration,
    SamplingKind,
};
use crate::ports::Engine;

/// A resolved configuration record plus the override keys that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub config: T,
    /// Unrecognized keys, in the order the caller supplied them.
    pub ignored: Vec<String>,
}

/// Builds context and run configurations from engine defaults and caller
/// overrides.
///
/// Session-level defaults (accelerator device, thread count) sit between the
/// engine defaults and the caller's overrides.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    gpu_device: Option<i32>,
    n_threads: Option<i32>,
}

impl ParameterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device forced when the caller does not set `gpu_device`.
    pub fn with_gpu_device(mut self, device: Option<i32>) -> Self {
        self.gpu_device = device;
        self
    }

    /// Thread count applied before the caller's overrides.
    pub fn with_threads(mut self, threads: Option<i32>) -> Self {
        self.n_threads = threads;
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let threads = i32::try_from(config.transcription.effective_threads()).unwrap_or(i32::MAX);
        Self::new()
            .with_gpu_device(config.engine.gpu_device)
            .with_threads(Some(threads))
    }

    pub fn resolve_context<E: Engine>(
        &self,
        engine: &E,
        overrides: &ParamOverrides,
    ) -> Result<Resolved<ContextConfiguration>, DomainError> {
        let mut config = engine.default_context_config();

        if let Some(device) = self.gpu_device {
            if !overrides.contains("gpu_device") {
                config.gpu_device = device;
            }
        }

        let ignored = apply_overrides("context", overrides, |key, value| config.apply(key, value))?;

        debug!(
            use_gpu = config.use_gpu,
            gpu_device = config.gpu_device,
            flash_attn = config.flash_attn,
            "Context configuration resolved"
        );

        Ok(Resolved { config, ignored })
    }

    /// Resolve a run configuration.
    ///
    /// The `strategy` override (last one wins) selects which engine defaults
    /// are fetched. Translation is then switched off and the language set to
    /// auto-detect, before any caller override is applied, so both can still
    /// be overridden explicitly.
    pub fn resolve_run<E: Engine>(
        &self,
        engine: &E,
        overrides: &ParamOverrides,
    ) -> Result<Resolved<RunConfiguration>, DomainError> {
        let strategy = match overrides.last("strategy") {
            Some(value) => SamplingKind::from_value("strategy", value)?,
            None => SamplingKind::default(),
        };

        let mut config = engine.default_run_config(strategy);

        if let Some(threads) = self.n_threads {
            config.n_threads = threads;
        }

        config.translate = false;
        config.language = None;

        let ignored = apply_overrides("run", overrides, |key, value| config.apply(key, value))?;

        debug!(
            strategy = %config.strategy,
            n_threads = config.n_threads,
            translate = config.translate,
            language = config.language.as_deref().unwrap_or("auto"),
            "Run configuration resolved"
        );

        Ok(Resolved { config, ignored })
    }
}

fn apply_overrides<F>(
    record: &'static str,
    overrides: &ParamOverrides,
    mut apply: F,
) -> Result<Vec<String>, DomainError>
where
    F: FnMut(&str, &Value) -> Result<FieldUpdate, DomainError>,
{
    let mut ignored = Vec::new();

    for (key, value) in overrides.iter() {
        match apply(key, value)? {
            FieldUpdate::Applied => debug!(record, key, %value, "Override applied"),
            FieldUpdate::UnknownField => {
                warn!(record, key, "Unknown configuration field, ignoring");
                ignored.push(key.to_string());
            }
        }
    }

    Ok(ignored)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::ports::{RunTarget, SegmentSource};
    use serde_json::json;

    struct Nothing;

    impl SegmentSource for Nothing {
        fn segment_count(&self) -> Result<usize, DomainError> {
            Ok(0)
        }
        fn segment_text(&self, _: usize) -> Result<String, DomainError> {
            Ok(String::new())
        }
        fn segment_start_tick(&self, _: usize) -> Result<i64, DomainError> {
            Ok(0)
        }
        fn segment_end_tick(&self, _: usize) -> Result<i64, DomainError> {
            Ok(0)
        }
        fn detected_language_id(&self) -> Option<i32> {
            None
        }
    }

    /// Engine whose defaults translate into English, to prove the forced
    /// invariants win over engine defaults.
    struct DefaultsOnly;

    impl Engine for DefaultsOnly {
        type Context = Nothing;
        type State = Nothing;

        fn name(&self) -> &str {
            "defaults-only"
        }
        fn default_context_config(&self) -> ContextConfiguration {
            ContextConfiguration {
                use_gpu: true,
                flash_attn: false,
                gpu_device: 3,
            }
        }
        fn load_model(&self, _: &Path, _: &ContextConfiguration) -> Result<Nothing, DomainError> {
            Ok(Nothing)
        }
        fn create_state(&self, _: &Nothing) -> Result<Nothing, DomainError> {
            Ok(Nothing)
        }
        fn default_run_config(&self, strategy: SamplingKind) -> RunConfiguration {
            let mut config = RunConfiguration::engine_defaults(strategy);
            config.translate = true;
            config.language = Some("en".to_string());
            config
        }
        fn run(&self, _: RunTarget<'_, Nothing, Nothing>, _: &RunConfiguration, _: &[f32], _: usize) -> i32 {
            0
        }
        fn language_code(&self, _: i32) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_forced_run_defaults() {
        let resolved = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &ParamOverrides::new())
            .unwrap();

        assert!(!resolved.config.translate);
        assert!(resolved.config.language.is_none());
        assert_eq!(resolved.config.strategy, SamplingKind::Greedy);
        assert!(resolved.ignored.is_empty());
    }

    #[test]
    fn test_caller_can_override_forced_defaults() {
        let overrides = ParamOverrides::new()
            .set("translate", true)
            .set("language", "ja");

        let resolved = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &overrides)
            .unwrap();

        assert!(resolved.config.translate);
        assert_eq!(resolved.config.language.as_deref(), Some("ja"));
    }

    #[test]
    fn test_unknown_keys_are_reported_and_skipped() {
        let overrides = ParamOverrides::new()
            .set("n_threads", 2)
            .set("speed_up", true)
            .set("temprature", 0.5)
            .set("entropy_thold", 2.0);

        let resolved = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &overrides)
            .unwrap();

        let mut expected = DefaultsOnly.default_run_config(SamplingKind::Greedy);
        expected.translate = false;
        expected.language = None;
        expected.n_threads = 2;
        expected.entropy_thold = 2.0;

        assert_eq!(resolved.config, expected);
        assert_eq!(resolved.ignored, ["speed_up", "temprature"]);
    }

    #[test]
    fn test_strategy_selects_defaults() {
        let overrides = ParamOverrides::new()
            .set("patience", 1.5)
            .set("strategy", "beam_search");

        let resolved = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &overrides)
            .unwrap();

        assert_eq!(resolved.config.strategy, SamplingKind::BeamSearch);
        assert_eq!(resolved.config.beam_search.beam_size, 5);
        assert_eq!(resolved.config.beam_search.patience, 1.5);
    }

    #[test]
    fn test_overrides_apply_in_caller_order() {
        let overrides = ParamOverrides::new()
            .set("temperature", 0.2)
            .set("temperature", 0.7);

        let resolved = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &overrides)
            .unwrap();

        assert!((resolved.config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_value_is_fatal() {
        let overrides = ParamOverrides::new().set("beam_size", "wide");
        let err = ParameterResolver::new()
            .resolve_run(&DefaultsOnly, &overrides)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidParameter { ref key, .. } if key == "beam_size"));
    }

    #[test]
    fn test_session_threads_precede_overrides() {
        let resolver = ParameterResolver::new().with_threads(Some(6));

        let resolved = resolver
            .resolve_run(&DefaultsOnly, &ParamOverrides::new())
            .unwrap();
        assert_eq!(resolved.config.n_threads, 6);

        let resolved = resolver
            .resolve_run(&DefaultsOnly, &ParamOverrides::new().set("n_threads", 1))
            .unwrap();
        assert_eq!(resolved.config.n_threads, 1);
    }

    #[test]
    fn test_context_device_default() {
        let resolver = ParameterResolver::new().with_gpu_device(Some(0));

        let resolved = resolver
            .resolve_context(&DefaultsOnly, &ParamOverrides::new())
            .unwrap();
        assert_eq!(resolved.config.gpu_device, 0);

        let resolved = resolver
            .resolve_context(&DefaultsOnly, &ParamOverrides::new().set("gpu_device", 1))
            .unwrap();
        assert_eq!(resolved.config.gpu_device, 1);

        let resolved = ParameterResolver::new()
            .resolve_context(&DefaultsOnly, &ParamOverrides::new())
            .unwrap();
        assert_eq!(resolved.config.gpu_device, 3);
    }

    #[test]
    fn test_context_unknown_key() {
        let overrides = ParamOverrides::new()
            .set("use_gpu", false)
            .set("dtw_token_timestamps", json!(true));

        let resolved = ParameterResolver::new()
            .resolve_context(&DefaultsOnly, &overrides)
            .unwrap();

        assert!(!resolved.config.use_gpu);
        assert_eq!(resolved.ignored, ["dtw_token_timestamps"]);
    }

    #[test]
    fn test_from_config() {
        let mut config = AppConfig::new();
        config.transcription.threads = 3;
        config.engine.gpu_device = Some(2);

        let resolver = ParameterResolver::from_config(&config);
        let run = resolver.resolve_run(&DefaultsOnly, &ParamOverrides::new()).unwrap();
        let context = resolver.resolve_context(&DefaultsOnly, &ParamOverrides::new()).unwrap();

        assert_eq!(run.config.n_threads, 3);
        assert_eq!(context.config.gpu_device, 2);
    }
}
