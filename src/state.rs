//! Application state: the pipeline components, wired once per process.
//!
//! This module owns:
//!   - the pipeline config (from TOML or defaults)
//!   - the single circuit breaker shared by every request
//!   - the error recorder, fallback provider and challenge store
//!   - optional OpenAI backend
//!   - the orchestrator that ties them together
//!
//! If OpenAI is unavailable every request is served from the fallback chain.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::breaker::{CircuitBreaker, RetryController};
use crate::config::{load_pipeline_config_from_env, PipelineConfig};
use crate::fallback::FallbackProvider;
use crate::memory::MemoryGuard;
use crate::openai::{ChallengeBackend, OpenAI};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::recorder::ErrorRecorder;
use crate::schema::SchemaValidator;
use crate::store::{ChallengeStore, InMemoryStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Build state from env: load config, build the fallback table, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_pipeline_config_from_env();
        let timeout = config.generation.call_timeout();
        let backend = OpenAI::from_env(timeout).map(|oa| {
            info!(target: "codeprac_backend", base_url = %oa.base_url, models = ?config.generation.models, "OpenAI enabled.");
            Arc::new(oa) as Arc<dyn ChallengeBackend>
        });
        if backend.is_none() {
            info!(target: "codeprac_backend", "OpenAI disabled (no OPENAI_API_KEY). Serving fallback challenges only.");
        }
        Self::with_backend(config, backend)
    }

    /// Wire the components around an explicit backend.
    pub fn with_backend(config: PipelineConfig, backend: Option<Arc<dyn ChallengeBackend>>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.to_breaker_config()));
        let recorder = Arc::new(ErrorRecorder::new(config.recorder.capacity));
        let validator = SchemaValidator::new(config.generation.confidence_threshold);
        let guard = MemoryGuard::with_max_response_bytes(config.generation.max_response_bytes);
        let fallback = Arc::new(FallbackProvider::from_seeds(config.fallback.to_settings(), &validator));
        let store: Arc<dyn ChallengeStore> = Arc::new(InMemoryStore::with_capacity(config.fallback.cached_capacity));

        let orchestrator = Orchestrator::new(
            backend,
            store,
            RetryController::new(breaker),
            recorder,
            fallback,
            validator,
            guard,
            config.prompts.clone(),
            OrchestratorSettings::from_config(&config),
        );

        info!(
            target: "codeprac_backend",
            models = config.generation.models.len(),
            fallback_threshold = config.generation.fallback_threshold,
            breaker_threshold = config.breaker.failure_threshold,
            "Pipeline ready"
        );

        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
        }
    }
}
