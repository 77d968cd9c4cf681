//! Loading pipeline configuration (prompts + tuning knobs) from TOML.
//!
//! Every field has a default and the file itself is optional; see
//! `PipelineConfig` for the expected schema. A broken file is logged and
//! ignored so the service still starts.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::breaker::{BreakerConfig, RetryConfig};
use crate::domain::Difficulty;
use crate::fallback::FallbackSettings;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
  pub prompts: Prompts,
  pub generation: GenerationCfg,
  pub retry: RetryCfg,
  pub breaker: BreakerCfg,
  pub recorder: RecorderCfg,
  pub fallback: FallbackCfg,
}

/// Prompts used by the generation backend. Placeholders: `{difficulty}`,
/// `{language}`, `{topics}`, `{title}`, `{description}`, `{starter_code}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub challenge_system: String,
  pub challenge_user_template: String,
  pub answer_system: String,
  pub answer_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      challenge_system: "You are a programming instructor who writes coding practice challenges. Respond ONLY with a single strict JSON object.".into(),
      challenge_user_template: "Create one {difficulty} coding challenge in {language} about {topics}. Return JSON with fields: title, language, difficulty (one of Beginner, Intermediate, Advanced, Expert), description, starterCode, solution, testCases (array of {\"input\": object mapping parameter names to values, \"expected\": string}). Keep the starter code compilable and the solution correct.".into(),
      answer_system: "You are an expert programmer. Respond ONLY with a JSON object {\"solutionCode\": string}.".into(),
      answer_user_template: "Write a complete, correct {language} solution for this {difficulty} challenge.\nTitle: {title}\nDescription: {description}\nStarter code:\n{starter_code}".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationCfg {
  /// Tried in order; the first that yields a valid challenge wins.
  pub models: Vec<String>,
  pub per_model_attempts: u32,
  pub call_timeout_secs: u64,
  /// Consecutive failed requests after which generation is skipped.
  pub fallback_threshold: u32,
  pub failure_cooldown_secs: u64,
  pub max_response_bytes: usize,
  pub confidence_threshold: f32,
}

impl Default for GenerationCfg {
  fn default() -> Self {
    Self {
      models: vec!["gpt-4o-mini".into(), "gpt-4.1-mini".into(), "gpt-4o".into()],
      per_model_attempts: 2,
      call_timeout_secs: 30,
      fallback_threshold: 2,
      failure_cooldown_secs: 60,
      max_response_bytes: crate::memory::MAX_RESPONSE_BYTES,
      confidence_threshold: crate::schema::DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }
}

impl GenerationCfg {
  pub fn call_timeout(&self) -> Duration {
    Duration::from_secs(self.call_timeout_secs.max(1))
  }

  pub fn failure_cooldown(&self) -> Duration {
    Duration::from_secs(self.failure_cooldown_secs)
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
/// Backoff shape only. The attempt budget is `generation.per_model_attempts`.
pub struct RetryCfg {
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
  pub backoff_multiplier: f64,
  pub jitter: bool,
}

impl Default for RetryCfg {
  fn default() -> Self {
    Self { base_delay_ms: 1000, max_delay_ms: 10_000, backoff_multiplier: 2.0, jitter: true }
  }
}

impl RetryCfg {
  pub fn to_retry_config(&self, max_attempts: u32) -> RetryConfig {
    RetryConfig {
      max_attempts: max_attempts.max(1),
      base_delay: Duration::from_millis(self.base_delay_ms),
      max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
      backoff_multiplier: self.backoff_multiplier,
      jitter: self.jitter,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BreakerCfg {
  pub failure_threshold: u32,
  pub cooldown_secs: u64,
  pub half_open_successes: u32,
}

impl Default for BreakerCfg {
  fn default() -> Self {
    Self { failure_threshold: 5, cooldown_secs: 30, half_open_successes: 2 }
  }
}

impl BreakerCfg {
  pub fn to_breaker_config(&self) -> BreakerConfig {
    BreakerConfig {
      failure_threshold: self.failure_threshold,
      cooldown: Duration::from_secs(self.cooldown_secs),
      half_open_successes: self.half_open_successes,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecorderCfg {
  pub capacity: usize,
  pub alert_threshold: usize,
  pub alert_window_secs: u64,
}

impl Default for RecorderCfg {
  fn default() -> Self {
    Self { capacity: crate::recorder::DEFAULT_CAPACITY, alert_threshold: 10, alert_window_secs: 300 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FallbackCfg {
  pub recent_window: usize,
  pub prefer_cached: bool,
  /// Upper bound on stored AI challenges kept for cached fallback.
  pub cached_capacity: usize,
  pub default_language: String,
  pub default_difficulty: String,
}

impl Default for FallbackCfg {
  fn default() -> Self {
    Self {
      recent_window: crate::fallback::DEFAULT_RECENT_WINDOW,
      prefer_cached: true,
      cached_capacity: crate::store::DEFAULT_STORE_CAPACITY,
      default_language: "JavaScript".into(),
      default_difficulty: "Beginner".into(),
    }
  }
}

impl FallbackCfg {
  pub fn to_settings(&self) -> FallbackSettings {
    let default_difficulty = Difficulty::parse_loose(&self.default_difficulty).unwrap_or_else(|| {
      error!(target: "codeprac_backend", value = %self.default_difficulty, "Unknown fallback.default_difficulty; using Beginner");
      Difficulty::Beginner
    });
    FallbackSettings {
      recent_window: self.recent_window,
      default_language: self.default_language.clone(),
      default_difficulty,
    }
  }
}

impl PipelineConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, String> {
    toml::from_str::<PipelineConfig>(s).map_err(|e| e.to_string())
  }

  /// OPENAI_MODELS (comma separated) replaces the configured model list.
  pub fn apply_env_overrides(&mut self) {
    if let Ok(raw) = std::env::var("OPENAI_MODELS") {
      let models = parse_model_list(&raw);
      if !models.is_empty() {
        info!(target: "codeprac_backend", ?models, "Model list overridden by OPENAI_MODELS");
        self.generation.models = models;
      }
    }
  }
}

fn parse_model_list(raw: &str) -> Vec<String> {
  raw.split(',').map(str::trim).filter(|m| !m.is_empty()).map(String::from).collect()
}

/// Load `PipelineConfig` from PIPELINE_CONFIG_PATH, falling back to defaults
/// on any IO or parse error, then apply environment overrides.
pub fn load_pipeline_config_from_env() -> PipelineConfig {
  let mut cfg = match std::env::var("PIPELINE_CONFIG_PATH") {
    Err(_) => PipelineConfig::default(),
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match PipelineConfig::from_toml_str(&s) {
        Ok(cfg) => {
          info!(target: "codeprac_backend", %path, "Loaded pipeline config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "codeprac_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
          PipelineConfig::default()
        }
      },
      Err(e) => {
        error!(target: "codeprac_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
        PipelineConfig::default()
      }
    },
  };
  cfg.apply_env_overrides();
  cfg
}
