//! Error and parse-outcome recorder.
//!
//! A bounded in-memory ring of structured failure records plus a parallel ring
//! of parse outcomes. Everything here is best-effort observability: no method
//! returns an error or panics, and a poisoned lock is simply reused.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::GenerationError;
use crate::parse::ParseMethod;
use crate::util::trunc_for_log;

pub const DEFAULT_CAPACITY: usize = 1000;
const MESSAGE_LIMIT: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
  Parsing,
  Api,
  Validation,
  Network,
  Timeout,
}

impl ErrorType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorType::Parsing => "parsing",
      ErrorType::Api => "api",
      ErrorType::Validation => "validation",
      ErrorType::Network => "network",
      ErrorType::Timeout => "timeout",
    }
  }
}

impl From<&GenerationError> for ErrorType {
  fn from(e: &GenerationError) -> Self {
    match e {
      GenerationError::Timeout(_) => ErrorType::Timeout,
      GenerationError::Network(_) => ErrorType::Network,
      GenerationError::Parsing(_) | GenerationError::ResponseTooLarge { .. } => ErrorType::Parsing,
      GenerationError::Validation(_) => ErrorType::Validation,
      GenerationError::RateLimited(_)
      | GenerationError::Upstream { .. }
      | GenerationError::CircuitOpen(_)
      | GenerationError::Other(_) => ErrorType::Api,
    }
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
  pub timestamp: DateTime<Utc>,
  pub error_type: ErrorType,
  pub message: String,
  pub context: Value,
  #[serde(skip)]
  at: Instant,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
  pub window_secs: u64,
  pub total: usize,
  pub by_type: BTreeMap<&'static str, usize>,
  pub by_parsing_method: BTreeMap<&'static str, usize>,
}

#[derive(Default)]
struct Rings {
  errors: VecDeque<ErrorRecord>,
  parses: VecDeque<(Instant, ParseMethod)>,
}

pub struct ErrorRecorder {
  capacity: usize,
  rings: Mutex<Rings>,
}

impl Default for ErrorRecorder {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl ErrorRecorder {
  pub fn new(capacity: usize) -> Self {
    Self { capacity: capacity.max(1), rings: Mutex::new(Rings::default()) }
  }

  fn lock(&self) -> MutexGuard<'_, Rings> {
    self.rings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn record(&self, error_type: ErrorType, message: &str, context: Value) {
    let rec = ErrorRecord {
      timestamp: Utc::now(),
      error_type,
      message: trunc_for_log(message, MESSAGE_LIMIT),
      context,
      at: Instant::now(),
    };
    let mut rings = self.lock();
    if rings.errors.len() >= self.capacity {
      rings.errors.pop_front();
    }
    rings.errors.push_back(rec);
  }

  pub fn record_error(&self, err: &GenerationError, context: Value) {
    self.record(ErrorType::from(err), &err.to_string(), context);
  }

  pub fn record_parse(&self, method: ParseMethod) {
    let mut rings = self.lock();
    if rings.parses.len() >= self.capacity {
      rings.parses.pop_front();
    }
    rings.parses.push_back((Instant::now(), method));
  }

  /// Counts over records younger than `window`.
  pub fn stats(&self, window: Duration) -> ErrorStats {
    let rings = self.lock();
    let mut stats = ErrorStats { window_secs: window.as_secs(), ..ErrorStats::default() };
    for rec in rings.errors.iter().filter(|r| r.at.elapsed() <= window) {
      stats.total += 1;
      *stats.by_type.entry(rec.error_type.as_str()).or_default() += 1;
    }
    for (_, method) in rings.parses.iter().filter(|(at, _)| at.elapsed() <= window) {
      *stats.by_parsing_method.entry(method.as_str()).or_default() += 1;
    }
    stats
  }

  /// True when more than `n` errors were recorded within `window`.
  pub fn exceeds_threshold(&self, n: usize, window: Duration) -> bool {
    let rings = self.lock();
    rings.errors.iter().rev().take_while(|r| r.at.elapsed() <= window).count() > n
  }

  /// Most recent records, newest first.
  pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
    self.lock().errors.iter().rev().take(limit).cloned().collect()
  }

}
