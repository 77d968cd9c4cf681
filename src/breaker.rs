//! Circuit breaker and the retry controller that feeds it.
//!
//! One `CircuitBreaker` is built per process and shared by reference; tests
//! build their own. Every attempt made through `RetryController` asks the
//! breaker for permission first and reports its outcome afterwards, so the
//! breaker sees exactly the traffic the pipeline sends upstream.
//!
//! States:
//!   closed    -> attempts pass; failures add to the counter, successes subtract
//!   open      -> attempts rejected until the cooldown elapses
//!   half_open -> attempts pass; N consecutive successes close, any failure reopens

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::GenerationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

impl CircuitState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CircuitState::Closed => "closed",
      CircuitState::Open => "open",
      CircuitState::HalfOpen => "half_open",
    }
  }
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
  pub failure_threshold: u32,
  pub cooldown: Duration,
  pub half_open_successes: u32,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      cooldown: Duration::from_secs(30),
      half_open_successes: 2,
    }
  }
}

/// Point-in-time view, as exposed on the stats endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
  pub state: CircuitState,
  pub failure_count: u32,
  pub success_count: u32,
  pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
  state: CircuitState,
  failure_count: u32,
  success_count: u32,
  opened_at: Option<Instant>,
  last_failure_time: Option<DateTime<Utc>>,
}

impl BreakerInner {
  fn closed() -> Self {
    Self {
      state: CircuitState::Closed,
      failure_count: 0,
      success_count: 0,
      opened_at: None,
      last_failure_time: None,
    }
  }
}

#[derive(Debug)]
pub struct CircuitBreaker {
  config: BreakerConfig,
  inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    Self::new(BreakerConfig::default())
  }
}

impl CircuitBreaker {
  pub fn new(config: BreakerConfig) -> Self {
    let config = BreakerConfig {
      failure_threshold: config.failure_threshold.max(1),
      half_open_successes: config.half_open_successes.max(1),
      ..config
    };
    Self { config, inner: Mutex::new(BreakerInner::closed()) }
  }

  // Bookkeeping only; a poisoned lock still holds usable counters.
  fn lock(&self) -> MutexGuard<'_, BreakerInner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Permission to make one attempt. Moves open -> half_open once the cooldown is over.
  pub fn try_acquire(&self) -> Result<(), GenerationError> {
    let mut s = self.lock();
    if s.state != CircuitState::Open {
      return Ok(());
    }
    let elapsed = s.opened_at.map(|t| t.elapsed()).unwrap_or(self.config.cooldown);
    if elapsed < self.config.cooldown {
      return Err(GenerationError::CircuitOpen(self.config.cooldown - elapsed));
    }
    s.state = CircuitState::HalfOpen;
    s.success_count = 0;
    info!(target: "pipeline", failure_count = s.failure_count, "Circuit breaker half-open; probing upstream");
    Ok(())
  }

  pub fn record_success(&self) {
    let mut s = self.lock();
    match s.state {
      CircuitState::Closed => {
        s.failure_count = s.failure_count.saturating_sub(1);
      }
      CircuitState::HalfOpen => {
        s.success_count += 1;
        if s.success_count >= self.config.half_open_successes {
          s.state = CircuitState::Closed;
          s.failure_count = 0;
          s.success_count = 0;
          s.opened_at = None;
          info!(target: "pipeline", "Circuit breaker closed");
        }
      }
      // A call admitted before the breaker tripped; it does not change the verdict.
      CircuitState::Open => {}
    }
  }

  pub fn record_failure(&self) {
    let mut s = self.lock();
    s.failure_count = s.failure_count.saturating_add(1);
    s.last_failure_time = Some(Utc::now());
    match s.state {
      CircuitState::Closed if s.failure_count >= self.config.failure_threshold => {
        Self::trip(&mut s, self.config.cooldown);
      }
      CircuitState::HalfOpen => {
        Self::trip(&mut s, self.config.cooldown);
      }
      _ => {}
    }
  }

  fn trip(s: &mut BreakerInner, cooldown: Duration) {
    s.state = CircuitState::Open;
    s.success_count = 0;
    s.opened_at = Some(Instant::now());
    warn!(target: "pipeline", failure_count = s.failure_count, cooldown_secs = cooldown.as_secs(), "Circuit breaker opened");
  }

  pub fn state(&self) -> CircuitState {
    self.lock().state
  }

  pub fn snapshot(&self) -> BreakerSnapshot {
    let s = self.lock();
    BreakerSnapshot {
      state: s.state,
      failure_count: s.failure_count,
      success_count: s.success_count,
      last_failure_time: s.last_failure_time,
    }
  }

  /// Back to a fresh closed breaker. Tests build one breaker and reuse it.
  #[cfg(test)]
  pub fn reset(&self) {
    *self.lock() = BreakerInner::closed();
    debug!(target: "pipeline", "Circuit breaker reset");
  }
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  pub backoff_multiplier: f64,
  pub jitter: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(1000),
      max_delay: Duration::from_millis(10_000),
      backoff_multiplier: 2.0,
      jitter: true,
    }
  }
}

impl RetryConfig {
  /// `min(max_delay, base_delay * multiplier^(attempt-1))`, before jitter.
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exp);
    let capped = raw.min(self.max_delay.as_secs_f64());
    if capped.is_finite() && capped >= 0.0 {
      Duration::from_secs_f64(capped)
    } else {
      self.max_delay
    }
  }

  /// Backoff delay with optional uniform +/-25% jitter.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let delay = self.backoff_delay(attempt);
    if !self.jitter {
      return delay;
    }
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    delay.mul_f64(factor)
  }
}

/// All attempts failed, or the breaker refused to let one through.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{label}: gave up after {attempts} attempt(s); last error: {last}")]
pub struct RetryError {
  pub label: String,
  /// Attempts that actually reached the attempt function.
  pub attempts: u32,
  pub last: GenerationError,
  pub history: Vec<String>,
}

impl RetryError {
  pub fn is_circuit_open(&self) -> bool {
    self.last.is_circuit_open()
  }
}

#[derive(Clone, Debug)]
pub struct RetryController {
  breaker: Arc<CircuitBreaker>,
}

impl RetryController {
  pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
    Self { breaker }
  }

  pub fn breaker(&self) -> &Arc<CircuitBreaker> {
    &self.breaker
  }

  /// Run `attempt_fn` until it succeeds or the budget for its failure kind is spent.
  ///
  /// The closure receives the 1-based attempt number. On success the value is
  /// returned with the number of attempts it took.
  pub async fn retry_with_backoff<T, F, Fut>(
    &self,
    label: &str,
    config: &RetryConfig,
    mut attempt_fn: F,
  ) -> Result<(T, u32), RetryError>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
  {
    let max_attempts = config.max_attempts.max(1);
    let mut history = Vec::new();
    let mut attempt = 0u32;

    loop {
      if let Err(rejected) = self.breaker.try_acquire() {
        debug!(target: "pipeline", %label, attempts = attempt, error = %rejected, "Attempt rejected by circuit breaker");
        history.push(rejected.to_string());
        return Err(RetryError { label: label.to_string(), attempts: attempt, last: rejected, history });
      }
      attempt += 1;

      match attempt_fn(attempt).await {
        Ok(value) => {
          self.breaker.record_success();
          if attempt > 1 {
            info!(target: "pipeline", %label, attempt, "Attempt succeeded after retries");
          }
          return Ok((value, attempt));
        }
        Err(e) => {
          self.breaker.record_failure();
          let kind = e.kind();
          history.push(format!("attempt {attempt}: {e}"));

          let budget = kind.attempt_budget(max_attempts);
          if attempt >= budget {
            debug!(target: "pipeline", %label, attempt, budget, kind = kind.as_str(), "Retry budget exhausted");
            return Err(RetryError { label: label.to_string(), attempts: attempt, last: e, history });
          }

          let delay = config.delay_for(attempt);
          warn!(
            target: "pipeline",
            %label,
            attempt,
            kind = kind.as_str(),
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Attempt failed; backing off before retry"
          );
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
}
