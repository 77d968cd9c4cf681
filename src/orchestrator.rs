//! Generation orchestrator.
//!
//! `generate_challenge` never fails: it returns an AI challenge that passed the
//! sanitize -> parse -> validate pipeline, or a fallback (cached, static, or
//! emergency) with the reason attached in `metadata.fallbackReason`.
//!
//! Flow per request:
//!   1. pre-flight: skip generation while recent requests keep failing
//!   2. for each model in priority order, run the retry controller with a small
//!      per-model budget; each attempt calls the backend under a timeout, checks
//!      the response size and runs the text pipeline
//!   3. first valid challenge wins and resets the failure counter
//!   4. otherwise the counter goes up by one and the fallback provider answers

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::breaker::{BreakerSnapshot, RetryConfig, RetryController};
use crate::config::{PipelineConfig, Prompts};
use crate::domain::{AnswerRequest, Challenge, ChallengeSource, Difficulty, Filters};
use crate::error::GenerationError;
use crate::fallback::FallbackProvider;
use crate::memory::MemoryGuard;
use crate::openai::{ChallengeBackend, Prompt, ResponseShape};
use crate::parse::{ParseMethod, ProgressiveParser};
use crate::recorder::{ErrorRecord, ErrorRecorder, ErrorStats};
use crate::sanitize::sanitize;
use crate::schema::{apply_defaults, into_challenge, normalize_types, SchemaValidator, ValidationResult};
use crate::store::{content_hash, ChallengeStore};
use crate::util::{fill_template, trunc_for_log};

const SNIPPET_CHARS: usize = 200;
const RECENT_ERRORS_IN_STATS: usize = 10;

/// Knobs the orchestrator reads on every request.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
  pub models: Vec<String>,
  pub call_timeout: Duration,
  pub fallback_threshold: u32,
  pub failure_cooldown: Duration,
  pub prefer_cached: bool,
  pub default_difficulty: Difficulty,
  pub default_language: String,
  pub alert_threshold: usize,
  pub alert_window: Duration,
  pub retry: RetryConfig,
}

impl OrchestratorSettings {
  pub fn from_config(cfg: &PipelineConfig) -> Self {
    let fallback = cfg.fallback.to_settings();
    Self {
      models: cfg.generation.models.clone(),
      call_timeout: cfg.generation.call_timeout(),
      fallback_threshold: cfg.generation.fallback_threshold,
      failure_cooldown: cfg.generation.failure_cooldown(),
      prefer_cached: cfg.fallback.prefer_cached,
      default_difficulty: fallback.default_difficulty,
      default_language: fallback.default_language,
      alert_threshold: cfg.recorder.alert_threshold,
      alert_window: Duration::from_secs(cfg.recorder.alert_window_secs),
      retry: cfg.retry.to_retry_config(cfg.generation.per_model_attempts),
    }
  }
}

impl Default for OrchestratorSettings {
  fn default() -> Self {
    Self::from_config(&PipelineConfig::default())
  }
}

/// A response that made it through the text pipeline.
#[derive(Clone, Debug)]
pub struct Processed {
  pub challenge: Challenge,
  pub method: ParseMethod,
  pub validation: ValidationResult,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
  pub solution_code: String,
  /// "ai", "provided" or "stub".
  pub source: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
  pub breaker: BreakerSnapshot,
  pub consecutive_failures: u32,
  pub generation_enabled: bool,
  pub stored_challenges: usize,
  pub errors: ErrorStats,
  pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Default)]
struct GenerationHealth {
  consecutive_failures: u32,
  last_failure: Option<Instant>,
}

pub struct Orchestrator {
  backend: Option<Arc<dyn ChallengeBackend>>,
  store: Arc<dyn ChallengeStore>,
  retry: RetryController,
  recorder: Arc<ErrorRecorder>,
  fallback: Arc<FallbackProvider>,
  parser: ProgressiveParser,
  validator: SchemaValidator,
  guard: MemoryGuard,
  prompts: Prompts,
  settings: OrchestratorSettings,
  health: Mutex<GenerationHealth>,
}

impl Orchestrator {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    backend: Option<Arc<dyn ChallengeBackend>>,
    store: Arc<dyn ChallengeStore>,
    retry: RetryController,
    recorder: Arc<ErrorRecorder>,
    fallback: Arc<FallbackProvider>,
    validator: SchemaValidator,
    guard: MemoryGuard,
    prompts: Prompts,
    settings: OrchestratorSettings,
  ) -> Self {
    Self {
      backend,
      store,
      retry,
      recorder,
      fallback,
      parser: ProgressiveParser::new(guard),
      validator,
      guard,
      prompts,
      settings,
      health: Mutex::new(GenerationHealth::default()),
    }
  }

  pub fn generation_enabled(&self) -> bool {
    self.backend.is_some()
  }

  fn lock_health(&self) -> MutexGuard<'_, GenerationHealth> {
    self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.lock_health().consecutive_failures
  }

  /// Some(count) when generation should be skipped for this request.
  fn preflight_skip(&self) -> Option<u32> {
    let h = self.lock_health();
    let threshold = self.settings.fallback_threshold;
    let recent = h.last_failure.map_or(false, |t| t.elapsed() < self.settings.failure_cooldown);
    (threshold > 0 && h.consecutive_failures >= threshold && recent).then_some(h.consecutive_failures)
  }

  fn mark_success(&self) {
    let mut h = self.lock_health();
    h.consecutive_failures = 0;
    h.last_failure = None;
  }

  fn mark_failure(&self) -> u32 {
    let mut h = self.lock_health();
    h.consecutive_failures = h.consecutive_failures.saturating_add(1);
    h.last_failure = Some(Instant::now());
    h.consecutive_failures
  }

  #[instrument(
    level = "info",
    skip(self, filters),
    fields(request_id = %Uuid::new_v4(), difficulty = %filters.difficulty_label(), language = ?filters.primary_language())
  )]
  pub async fn generate_challenge(&self, filters: &Filters) -> Challenge {
    let Some(backend) = self.backend.as_deref() else {
      info!(target: "challenge", "No generation backend configured; serving fallback");
      return self.serve_fallback(filters, "generation backend not configured", 0).await;
    };

    if let Some(failures) = self.preflight_skip() {
      warn!(target: "challenge", failures, threshold = self.settings.fallback_threshold, "Skipping generation; backend recently unhealthy");
      let reason = format!("generation skipped after {failures} consecutive failed requests");
      return self.serve_fallback(filters, &reason, 0).await;
    }

    let prompt = self.challenge_prompt(filters);
    let mut total_attempts = 0u32;
    let mut last_error: Option<String> = None;

    for model in &self.settings.models {
      let label = format!("challenge:{model}");
      let outcome = self
        .retry
        .retry_with_backoff(&label, &self.settings.retry, |attempt| {
          self.attempt_challenge(backend, model, &prompt, filters, attempt)
        })
        .await;

      match outcome {
        Ok((processed, attempts)) => {
          total_attempts += attempts;
          self.mark_success();
          let ch = processed.challenge.stamped(ChallengeSource::Ai, processed.method.as_str(), total_attempts, None);
          info!(
            target: "challenge",
            %model,
            title = %ch.title,
            method = processed.method.as_str(),
            confidence = processed.validation.confidence,
            attempts = total_attempts,
            "Generated challenge accepted"
          );
          self.persist(&ch).await;
          return ch;
        }
        Err(e) => {
          total_attempts += e.attempts;
          warn!(
            target: "pipeline",
            %model,
            backend = backend.name(),
            attempts = e.attempts,
            history = ?e.history,
            error = %e.last,
            "Model gave no usable challenge"
          );
          let circuit_open = e.is_circuit_open();
          last_error = Some(e.last.to_string());
          if circuit_open {
            info!(target: "pipeline", breaker = self.retry.breaker().state().as_str(), "Circuit open; not trying further models");
            break;
          }
        }
      }
    }

    let failures = self.mark_failure();
    self.alert_if_needed();
    let reason = format!(
      "generation failed after {total_attempts} attempt(s): {}",
      last_error.as_deref().unwrap_or("no models configured")
    );
    warn!(target: "challenge", consecutive_failures = failures, %reason, "Falling back");
    self.serve_fallback(filters, &reason, total_attempts).await
  }

  async fn attempt_challenge(
    &self,
    backend: &dyn ChallengeBackend,
    model: &str,
    prompt: &Prompt,
    filters: &Filters,
    attempt: u32,
  ) -> Result<Processed, GenerationError> {
    let raw = self.call_backend(backend, model, prompt, ResponseShape::Challenge).await;
    let raw = raw.map_err(|e| {
      self.record(&e, "generate", model, attempt, None, filters);
      e
    })?;

    if let Err(e) = self.guard.check_response_size(&raw) {
      self.record(&e, "size_check", model, attempt, None, filters);
      return Err(e);
    }

    self.process_response(&raw).map_err(|e| {
      self.record(&e, "pipeline", model, attempt, Some(&raw), filters);
      e
    })
  }

  async fn call_backend(
    &self,
    backend: &dyn ChallengeBackend,
    model: &str,
    prompt: &Prompt,
    shape: ResponseShape,
  ) -> Result<String, GenerationError> {
    let timeout = self.settings.call_timeout;
    match tokio::time::timeout(timeout, backend.generate(model, prompt, shape)).await {
      Ok(result) => result,
      Err(_) => Err(GenerationError::Timeout(timeout)),
    }
  }

  /// Sanitize, parse, validate, repair once, re-validate. Synchronous and pure
  /// apart from parse-method bookkeeping.
  pub fn process_response(&self, raw: &str) -> Result<Processed, GenerationError> {
    let clean = sanitize(raw);
    if clean.is_empty() {
      return Err(GenerationError::Parsing("response is empty after sanitizing".into()));
    }

    let parsed = self.parser.parse(&clean);
    self.recorder.record_parse(parsed.method);
    let method = parsed.method;
    let data = match (parsed.success, parsed.data) {
      (true, Some(data)) => data,
      _ => {
        let detail = parsed.error.unwrap_or_else(|| "no strategy produced an object".into());
        return Err(GenerationError::Parsing(detail));
      }
    };

    let first = self.validator.validate(&data);
    let (repaired, report) = apply_defaults(normalize_types(data));
    let verdict = self.validator.validate_repaired(&repaired, &report);
    debug!(
      target: "pipeline",
      method = method.as_str(),
      first_confidence = first.confidence,
      confidence = verdict.confidence,
      defaulted = ?report.filled,
      "Validated parsed response"
    );
    if !verdict.is_valid {
      return Err(GenerationError::Validation(format!(
        "confidence {:.2} below {:.2}: {}",
        verdict.confidence,
        self.validator.threshold(),
        verdict.issues.join("; ")
      )));
    }
    if !first.is_valid {
      info!(target: "pipeline", first_confidence = first.confidence, confidence = verdict.confidence, "Repair pass rescued response");
    }

    let challenge = into_challenge(repaired).map_err(GenerationError::Validation)?;
    Ok(Processed { challenge, method, validation: verdict })
  }

  async fn serve_fallback(&self, filters: &Filters, reason: &str, attempts: u32) -> Challenge {
    if self.settings.prefer_cached {
      let language = filters.primary_language().unwrap_or(&self.settings.default_language);
      let difficulty = filters.difficulty.unwrap_or(self.settings.default_difficulty);
      match self.store.cached_for(language, difficulty).await {
        Ok(pool) => {
          if let Some(ch) = self.fallback.pick_cached(&pool, reason, attempts) {
            info!(target: "challenge", title = %ch.title, pool = pool.len(), "Serving cached challenge");
            return ch;
          }
        }
        Err(e) => warn!(target: "challenge", error = %e, "Cached lookup failed; using static fallback"),
      }
    }
    let ch = self.fallback.get_fallback_challenge(filters, reason, attempts);
    info!(target: "challenge", title = %ch.title, source = ch.metadata.source.as_str(), "Serving fallback challenge");
    ch
  }

  async fn persist(&self, ch: &Challenge) {
    let hash = content_hash(ch);
    if let Err(e) = self.store.upsert_if_absent(&hash, ch).await {
      warn!(target: "challenge", %hash, error = %e, "Failed to store generated challenge");
    }
  }

  fn record(&self, err: &GenerationError, stage: &str, model: &str, attempt: u32, raw: Option<&str>, filters: &Filters) {
    let mut ctx = Map::new();
    ctx.insert("stage".into(), json!(stage));
    ctx.insert("model".into(), json!(model));
    ctx.insert("attempt".into(), json!(attempt));
    ctx.insert("kind".into(), json!(err.kind().as_str()));
    ctx.insert("filters".into(), serde_json::to_value(filters).unwrap_or(Value::Null));
    if let Some(raw) = raw {
      ctx.insert("snippet".into(), json!(trunc_for_log(raw, SNIPPET_CHARS)));
      ctx.insert("responseBytes".into(), json!(raw.len()));
    }
    debug!(target: "pipeline", %stage, %model, attempt, error = %err, "Attempt failed");
    self.recorder.record_error(err, Value::Object(ctx));
  }

  fn alert_if_needed(&self) {
    let window = self.settings.alert_window;
    if self.recorder.exceeds_threshold(self.settings.alert_threshold, window) {
      let stats = self.recorder.stats(window);
      error!(
        target: "alert",
        errors = stats.total,
        window_secs = window.as_secs(),
        by_type = ?stats.by_type,
        "Generation error rate above threshold"
      );
    }
  }

  fn challenge_prompt(&self, filters: &Filters) -> Prompt {
    let difficulty = filters.difficulty_label();
    let language = filters.primary_language().unwrap_or(&self.settings.default_language).to_string();
    let topics = if filters.topics.is_empty() { "any topic".to_string() } else { filters.topics.join(", ") };
    let pairs = [
      ("difficulty", difficulty.as_str()),
      ("language", language.as_str()),
      ("topics", topics.as_str()),
    ];
    Prompt {
      system: fill_template(&self.prompts.challenge_system, &pairs),
      user: fill_template(&self.prompts.challenge_user_template, &pairs),
    }
  }

  // --- answers ---

  /// Reference solution for an existing challenge. Same model loop and retry
  /// policy as challenges; falls back to the supplied solution, then a stub.
  #[instrument(level = "info", skip(self, req), fields(request_id = %Uuid::new_v4(), title = %req.title))]
  pub async fn generate_answer(&self, req: &AnswerRequest) -> AnswerOutcome {
    let backend = self.backend.as_deref().filter(|_| !req.is_blank());
    if req.is_blank() {
      warn!(target: "challenge", "Answer request names no challenge; skipping generation");
    }
    if let Some(backend) = backend {
      let prompt = self.answer_prompt(req);
        let filters = Filters { languages: vec![req.language_or_default().to_string()], ..Filters::default() };

      for model in &self.settings.models {
        let label = format!("answer:{model}");
        let outcome = self
          .retry
          .retry_with_backoff(&label, &self.settings.retry, |attempt| self.attempt_answer(backend, model, &prompt, &filters, attempt))
          .await;
        match outcome {
          Ok((code, attempts)) => {
            info!(target: "challenge", %model, attempts, code_len = code.len(), "Generated answer accepted");
            return AnswerOutcome { solution_code: code, source: "ai" };
          }
          Err(e) => {
            warn!(target: "pipeline", %model, attempts = e.attempts, error = %e.last, "Model gave no usable answer");
            if e.is_circuit_open() {
              break;
            }
          }
        }
      }
    }

    if let Some(solution) = req.solution.as_deref().filter(|s| !s.trim().is_empty()) {
      info!(target: "challenge", "Serving provided solution as answer");
      return AnswerOutcome { solution_code: solution.to_string(), source: "provided" };
    }
    warn!(target: "challenge", "Serving answer stub");
    AnswerOutcome { solution_code: answer_stub(req), source: "stub" }
  }

  async fn attempt_answer(
    &self,
    backend: &dyn ChallengeBackend,
    model: &str,
    prompt: &Prompt,
    filters: &Filters,
    attempt: u32,
  ) -> Result<String, GenerationError> {
    let raw = self.call_backend(backend, model, prompt, ResponseShape::Answer).await;
    let raw = raw.map_err(|e| {
      self.record(&e, "generate_answer", model, attempt, None, filters);
      e
    })?;
    if let Err(e) = self.guard.check_response_size(&raw) {
      self.record(&e, "size_check", model, attempt, None, filters);
      return Err(e);
    }
    self.process_answer(&raw).map_err(|e| {
      self.record(&e, "answer_pipeline", model, attempt, Some(&raw), filters);
      e
    })
  }

  pub fn process_answer(&self, raw: &str) -> Result<String, GenerationError> {
    let clean = sanitize(raw);
    let parsed = self.parser.parse_with(&clean, looks_like_answer);
    self.recorder.record_parse(parsed.method);
    let data = match (parsed.success, parsed.data) {
      (true, Some(data)) => data,
      _ => return Err(GenerationError::Parsing(parsed.error.unwrap_or_else(|| "no answer object".into()))),
    };
    ANSWER_KEYS
      .iter()
      .find_map(|k| data.get(*k).and_then(code_text))
      .filter(|code| !code.trim().is_empty())
      .ok_or_else(|| GenerationError::Validation("answer has no solution code".into()))
  }

  fn answer_prompt(&self, req: &AnswerRequest) -> Prompt {
    let difficulty = req.difficulty.clone().unwrap_or_else(|| self.settings.default_difficulty.as_str().to_string());
    let pairs = [
      ("title", req.title.as_str()),
      ("description", req.description.as_str()),
      ("language", req.language_or_default()),
      ("difficulty", difficulty.as_str()),
      ("starter_code", req.starter_code.as_deref().unwrap_or("")),
    ];
    Prompt {
      system: fill_template(&self.prompts.answer_system, &pairs),
      user: fill_template(&self.prompts.answer_user_template, &pairs),
    }
  }

  pub async fn stats(&self, window: Duration) -> PipelineStats {
    PipelineStats {
      breaker: self.retry.breaker().snapshot(),
      consecutive_failures: self.consecutive_failures(),
      generation_enabled: self.generation_enabled(),
      stored_challenges: self.store.len().await,
      errors: self.recorder.stats(window),
      recent_errors: self.recorder.recent(RECENT_ERRORS_IN_STATS),
    }
  }
}

const ANSWER_KEYS: &[&str] = &["solutionCode", "solution_code", "solution", "code"];

fn looks_like_answer(obj: &Map<String, Value>) -> bool {
  ANSWER_KEYS.iter().any(|k| obj.contains_key(*k))
}

fn code_text(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.clone()),
    Value::Array(lines) => lines.iter().map(|l| l.as_str().map(str::to_string)).collect::<Option<Vec<_>>>().map(|l| l.join("\n")),
    _ => None,
  }
}

fn answer_stub(req: &AnswerRequest) -> String {
  let language = req.language_or_default();
  let comment = if language == "Python" { "#" } else { "//" };
  let starter = req.starter_code.as_deref().unwrap_or("");
  let title = req.title.trim();
  let subject = if title.is_empty() { "this challenge".to_string() } else { format!("\"{title}\"") };
  format!(
    "{comment} Reference solution for {subject} is temporarily unavailable.\n{comment} Start from the starter code below.\n{starter}"
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
  use crate::fallback::FallbackSettings;
  use crate::store::InMemoryStore;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicU32, Ordering};

  const SCENARIO_A: &str = "```json\n{title:\"Two Sum\", language:'JavaScript', difficulty:\"Beginner\", description:\"Return the indices of the two numbers that add up to target.\", starterCode:\"function twoSum(nums, target) {\\n}\", solution:\"function twoSum(nums, target) { const m = new Map(); for (let i = 0; i < nums.length; i++) { if (m.has(target - nums[i])) return [m.get(target - nums[i]), i]; m.set(nums[i], i); } }\", testCases:[{input:{nums:[2,7],target:9}, expected:[0,1]},]}\n```";

  enum Step {
    Text(String),
    Fail(GenerationError),
    Hang,
  }

  /// Replays scripted responses; repeats the last one when the script runs out.
  struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
  }

  impl ScriptedBackend {
    fn new(steps: Vec<Step>) -> Arc<Self> {
      Arc::new(Self { steps: Mutex::new(steps.into()), calls: AtomicU32::new(0) })
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl ChallengeBackend for ScriptedBackend {
    fn name(&self) -> &str {
      "scripted"
    }

    async fn generate(&self, _model: &str, _prompt: &Prompt, _shape: ResponseShape) -> Result<String, GenerationError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let step = {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 { steps.pop_front() } else { steps.front().map(clone_step) }
      };
      match step {
        Some(Step::Text(t)) => Ok(t),
        Some(Step::Fail(e)) => Err(e),
        Some(Step::Hang) => {
          tokio::time::sleep(Duration::from_secs(3600)).await;
          Ok(String::new())
        }
        None => Err(GenerationError::Other("script exhausted".into())),
      }
    }
  }

  fn clone_step(s: &Step) -> Step {
    match s {
      Step::Text(t) => Step::Text(t.clone()),
      Step::Fail(e) => Step::Fail(e.clone()),
      Step::Hang => Step::Hang,
    }
  }

  struct Harness {
    orch: Orchestrator,
    breaker: Arc<CircuitBreaker>,
    recorder: Arc<ErrorRecorder>,
    store: Arc<InMemoryStore>,
  }

  fn harness(backend: Option<Arc<ScriptedBackend>>, models: &[&str]) -> Harness {
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let recorder = Arc::new(ErrorRecorder::default());
    let store = Arc::new(InMemoryStore::default());
    let validator = SchemaValidator::default();
    let fallback = Arc::new(FallbackProvider::from_seeds(FallbackSettings::default(), &validator));
    let settings = OrchestratorSettings {
      models: models.iter().map(|m| m.to_string()).collect(),
      retry: RetryConfig { max_attempts: 2, jitter: false, ..RetryConfig::default() },
      ..OrchestratorSettings::default()
    };
    let orch = Orchestrator::new(
      backend.map(|b| b as Arc<dyn ChallengeBackend>),
      store.clone(),
      RetryController::new(breaker.clone()),
      recorder.clone(),
      fallback,
      validator,
      MemoryGuard::default(),
      Prompts::default(),
      settings,
    );
    Harness { orch, breaker, recorder, store }
  }

  fn js_beginner() -> Filters {
    Filters { difficulty: Some(Difficulty::Beginner), languages: vec!["JavaScript".into()], ..Filters::default() }
  }

  fn timeout() -> GenerationError {
    GenerationError::Timeout(Duration::from_secs(30))
  }

  #[test]
  fn messy_response_is_repaired_and_coerced() {
    let h = harness(None, &[]);
    let p = h.orch.process_response(SCENARIO_A).unwrap();
    assert!(p.validation.is_valid);
    assert_eq!(p.challenge.title, "Two Sum");
    assert_eq!(p.challenge.difficulty, Difficulty::Beginner);
    assert_eq!(p.challenge.test_cases[0].expected, "[0,1]");
    assert_eq!(p.challenge.test_cases[0].input["target"], json!(9));
    assert_eq!(p.method, ParseMethod::Repaired);
  }

  const QUOTED_DESCRIPTION: &str = r#"{"title": "Echo Hello", "language": "JavaScript", "difficulty": "Beginner", "description": "Return the word “hello” when the input is “hi”, otherwise return the input.", "starterCode": "function echo(s) {\n}\n", "solution": "function echo(s) {\n  return s === 'hi' ? 'hello' : s;\n}\n", "testCases": [{"input": {"s": "hi"}, "expected": "hello"}]}"#;

  #[test]
  fn typographic_quotes_in_content_keep_direct_parse() {
    let h = harness(None, &[]);
    let p = h.orch.process_response(QUOTED_DESCRIPTION).unwrap();
    assert_eq!(p.method, ParseMethod::Direct);
    assert!(p.validation.is_valid);
    assert_eq!(
      p.challenge.description,
      "Return the word \"hello\" when the input is \"hi\", otherwise return the input."
    );
  }

  #[test]
  fn retry_budget_follows_per_model_attempts() {
    let mut cfg = PipelineConfig::default();
    cfg.generation.per_model_attempts = 4;
    assert_eq!(OrchestratorSettings::from_config(&cfg).retry.max_attempts, 4);
    cfg.generation.per_model_attempts = 0;
    assert_eq!(OrchestratorSettings::from_config(&cfg).retry.max_attempts, 1);
  }

  #[test]
  fn prose_and_empty_objects_are_rejected() {
    let h = harness(None, &[]);
    assert!(matches!(h.orch.process_response("Sorry, I cannot help with that."), Err(GenerationError::Parsing(_))));
    assert!(matches!(h.orch.process_response("{\"title\": \"x\"}"), Err(GenerationError::Validation(_))));
    assert!(matches!(h.orch.process_response("   "), Err(GenerationError::Parsing(_))));
  }

  #[tokio::test(start_paused = true)]
  async fn scenario_a_generates_ai_challenge() {
    let backend = ScriptedBackend::new(vec![Step::Text(SCENARIO_A.into())]);
    let h = harness(Some(backend.clone()), &["m1", "m2"]);
    let ch = h.orch.generate_challenge(&js_beginner()).await;

    assert_eq!(ch.metadata.source, ChallengeSource::Ai);
    assert_eq!(ch.metadata.generation_attempts, 1);
    assert_eq!(ch.metadata.parsing_method, "repaired");
    assert_eq!(ch.test_cases[0].expected, "[0,1]");
    assert_eq!(backend.calls(), 1);
    assert_eq!(h.orch.consecutive_failures(), 0);
    assert_eq!(h.store.len().await, 1);

    let v = serde_json::to_value(&ch).unwrap();
    assert!(SchemaValidator::default().validate(&v).is_valid);
  }

  #[tokio::test(start_paused = true)]
  async fn scenario_b_all_models_time_out() {
    let backend = ScriptedBackend::new(vec![Step::Fail(timeout())]);
    let h = harness(Some(backend.clone()), &["m1", "m2"]);
    let ch = h.orch.generate_challenge(&js_beginner()).await;

    assert!(matches!(ch.metadata.source, ChallengeSource::Fallback | ChallengeSource::EmergencyFallback));
    assert!(ch.metadata.fallback_reason.is_some());
    // Two models, two attempts each.
    assert_eq!(backend.calls(), 4);
    assert_eq!(ch.metadata.generation_attempts, 4);
    assert_eq!(h.orch.consecutive_failures(), 1);
    assert_eq!(h.recorder.stats(Duration::from_secs(60)).by_type.get("timeout"), Some(&4));
  }

  #[tokio::test(start_paused = true)]
  async fn hanging_backend_hits_call_timeout() {
    let backend = ScriptedBackend::new(vec![Step::Hang]);
    let h = harness(Some(backend.clone()), &["m1"]);
    let started = Instant::now();
    let ch = h.orch.generate_challenge(&js_beginner()).await;

    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_eq!(backend.calls(), 2);
    // Two 30s timeouts plus one backoff, nowhere near the hour the backend sleeps.
    assert!(started.elapsed() < Duration::from_secs(120));
    assert_eq!(h.recorder.stats(Duration::from_secs(600)).by_type.get("timeout"), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn scenario_c_preflight_skips_models() {
    let backend = ScriptedBackend::new(vec![Step::Fail(GenerationError::Network("connection refused".into()))]);
    let h = harness(Some(backend.clone()), &["m1"]);

    let first = h.orch.generate_challenge(&js_beginner()).await;
    let second = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(first.metadata.source, ChallengeSource::Fallback);
    assert_eq!(second.metadata.source, ChallengeSource::Fallback);
    assert_eq!(h.orch.consecutive_failures(), 2);
    let calls = backend.calls();
    assert_eq!(calls, 4);

    let third = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(backend.calls(), calls);
    assert_eq!(third.metadata.source, ChallengeSource::Fallback);
    assert_eq!(third.metadata.generation_attempts, 0);
    assert!(third.metadata.fallback_reason.unwrap().contains("skipped"));
  }

  #[tokio::test(start_paused = true)]
  async fn preflight_expires_after_cooldown() {
    let backend = ScriptedBackend::new(vec![
      Step::Fail(timeout()),
      Step::Fail(timeout()),
      Step::Fail(timeout()),
      Step::Fail(timeout()),
      Step::Text(SCENARIO_A.into()),
    ]);
    let h = harness(Some(backend.clone()), &["m1"]);
    h.orch.generate_challenge(&js_beginner()).await;
    h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(h.orch.consecutive_failures(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    let ch = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(ch.metadata.source, ChallengeSource::Ai);
    assert_eq!(h.orch.consecutive_failures(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn garbage_from_first_model_moves_to_next() {
    let backend = ScriptedBackend::new(vec![
      Step::Text("{\"title\": \"x\"}".into()),
      Step::Text(SCENARIO_A.into()),
    ]);
    let h = harness(Some(backend.clone()), &["m1", "m2"]);
    let ch = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(ch.metadata.source, ChallengeSource::Ai);
    // Validation failures are not retried on the same model.
    assert_eq!(backend.calls(), 2);
    assert_eq!(ch.metadata.generation_attempts, 2);
    assert_eq!(h.recorder.stats(Duration::from_secs(60)).by_type.get("validation"), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn oversized_response_counts_as_failure() {
    let huge = format!("{{\"title\": \"{}\"}}", "x".repeat(crate::memory::MAX_RESPONSE_BYTES));
    let backend = ScriptedBackend::new(vec![Step::Text(huge)]);
    let h = harness(Some(backend.clone()), &["m1"]);
    let ch = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_eq!(h.recorder.stats(Duration::from_secs(60)).by_type.get("parsing"), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn open_breaker_stops_the_model_loop() {
    let backend = ScriptedBackend::new(vec![Step::Fail(timeout())]);
    let h = harness(Some(backend.clone()), &["m1", "m2", "m3", "m4"]);
    let ch = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_eq!(h.breaker.state(), CircuitState::Open);
    // m1, m2 use two attempts each, m3 trips the breaker on its first, m4 never runs.
    assert_eq!(backend.calls(), 5);
    assert_eq!(h.orch.consecutive_failures(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cached_challenge_is_served_before_static_table() {
    let backend = ScriptedBackend::new(vec![Step::Text(SCENARIO_A.into()), Step::Fail(timeout())]);
    let h = harness(Some(backend.clone()), &["m1"]);
    let generated = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(generated.metadata.source, ChallengeSource::Ai);

    let served = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(served.metadata.source, ChallengeSource::FallbackCached);
    assert_eq!(served.title, "Two Sum");

    // The only cached item is now in the recent window.
    let next = h.orch.generate_challenge(&js_beginner()).await;
    assert_eq!(next.metadata.source, ChallengeSource::Fallback);
  }

  #[tokio::test]
  async fn no_backend_serves_fallback_without_counting() {
    let h = harness(None, &["m1"]);
    let ch = h.orch.generate_challenge(&Filters::default()).await;
    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_eq!(h.orch.consecutive_failures(), 0);
    assert!(h.recorder.recent(1).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn answer_is_generated_then_falls_back() {
    let backend = ScriptedBackend::new(vec![Step::Text("```json\n{\"solutionCode\": \"def f():\\n    return 1\"}\n```".into())]);
    let h = harness(Some(backend), &["m1"]);
    let req = AnswerRequest { title: "F".into(), description: "Return one.".into(), language: Some("py".into()), ..AnswerRequest::default() };
    let out = h.orch.generate_answer(&req).await;
    assert_eq!(out.source, "ai");
    assert_eq!(out.solution_code, "def f():\n    return 1");

    let h = harness(None, &[]);
    let with_solution = AnswerRequest { solution: Some("return 1".into()), ..req.clone() };
    assert_eq!(h.orch.generate_answer(&with_solution).await.source, "provided");
    let stub = h.orch.generate_answer(&req).await;
    assert_eq!(stub.source, "stub");
    assert!(stub.solution_code.starts_with('#'));
  }

  #[tokio::test(start_paused = true)]
  async fn blank_answer_request_gets_stub_without_model_call() {
    let backend = ScriptedBackend::new(vec![Step::Text("{\"solutionCode\": \"return 1;\"}".into())]);
    let h = harness(Some(backend.clone()), &["m1"]);
    let out = h.orch.generate_answer(&AnswerRequest::default()).await;
    assert_eq!(out.source, "stub");
    assert!(out.solution_code.starts_with("// Reference solution for this challenge"));
    assert_eq!(backend.calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn alert_threshold_reads_recorder() {
    let backend = ScriptedBackend::new(vec![Step::Fail(timeout())]);
    let h = harness(Some(backend), &["m1"]);
    h.orch.generate_challenge(&js_beginner()).await;
    assert!(h.recorder.exceeds_threshold(1, Duration::from_secs(300)));
    let stats = h.orch.stats(Duration::from_secs(300)).await;
    assert_eq!(stats.consecutive_failures, 1);
    assert_eq!(stats.errors.total, 2);
    assert!(stats.generation_enabled);
  }
}
