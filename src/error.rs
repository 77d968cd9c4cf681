//! Failure taxonomy for the generation pipeline.
//!
//! `GenerationError` is what a single attempt can fail with; `ErrorKind` is the
//! coarse classification that drives retry budgets and the error recorder.

use std::time::Duration;

use serde::Serialize;

/// Retry-relevant classification of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Timeouts and connection failures. Always retryable.
  Network,
  /// Quota / rate limiting. Retryable with backoff.
  ApiLimit,
  /// Malformed text no repair strategy fixed. One retry.
  Parsing,
  /// Data that can never satisfy the schema. Never retried.
  Validation,
  Unknown,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::Network => "network",
      ErrorKind::ApiLimit => "api_limit",
      ErrorKind::Parsing => "parsing",
      ErrorKind::Validation => "validation",
      ErrorKind::Unknown => "unknown",
    }
  }

  /// Total attempts allowed for a failure of this kind, given the configured maximum.
  pub fn attempt_budget(&self, max_attempts: u32) -> u32 {
    match self {
      ErrorKind::Network | ErrorKind::ApiLimit => max_attempts,
      ErrorKind::Parsing | ErrorKind::Unknown => max_attempts.min(2),
      ErrorKind::Validation => 1,
    }
  }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GenerationError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("network error: {0}")]
  Network(String),

  #[error("rate limited: {0}")]
  RateLimited(String),

  #[error("upstream HTTP {status}: {message}")]
  Upstream { status: u16, message: String },

  #[error("parsing failed: {0}")]
  Parsing(String),

  #[error("validation failed: {0}")]
  Validation(String),

  #[error("response too large: {size} bytes (limit {limit})")]
  ResponseTooLarge { size: usize, limit: usize },

  #[error("circuit breaker is open; retry in {0:?}")]
  CircuitOpen(Duration),

  #[error("{0}")]
  Other(String),
}

impl GenerationError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      GenerationError::Timeout(_) | GenerationError::Network(_) => ErrorKind::Network,
      GenerationError::RateLimited(_) => ErrorKind::ApiLimit,
      GenerationError::Upstream { status, message } => match status {
        429 => ErrorKind::ApiLimit,
        408 | 500..=599 => ErrorKind::Network,
        _ => classify_message(message),
      },
      GenerationError::Parsing(_) => ErrorKind::Parsing,
      GenerationError::Validation(_) => ErrorKind::Validation,
      GenerationError::ResponseTooLarge { .. } => ErrorKind::Parsing,
      GenerationError::CircuitOpen(_) => ErrorKind::Unknown,
      GenerationError::Other(msg) => classify_message(msg),
    }
  }

  pub fn is_circuit_open(&self) -> bool {
    matches!(self, GenerationError::CircuitOpen(_))
  }
}

/// Keyword classification for errors that only carry free text.
pub fn classify_message(msg: &str) -> ErrorKind {
  let m = msg.to_lowercase();
  let any = |keys: &[&str]| keys.iter().any(|k| m.contains(k));

  if any(&["timeout", "timed out", "network", "connection", "econnreset", "econnrefused", "socket", "dns", "fetch failed"]) {
    ErrorKind::Network
  } else if any(&["rate limit", "rate-limit", "quota", "429", "too many requests", "resource exhausted"]) {
    ErrorKind::ApiLimit
  } else if any(&["json", "parse", "unexpected token", "syntax", "unterminated"]) {
    ErrorKind::Parsing
  } else if any(&["schema", "validation", "invalid", "required field"]) {
    ErrorKind::Validation
  } else {
    ErrorKind::Unknown
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_typed_errors() {
    assert_eq!(GenerationError::Timeout(Duration::from_secs(30)).kind(), ErrorKind::Network);
    assert_eq!(GenerationError::Upstream { status: 429, message: "slow down".into() }.kind(), ErrorKind::ApiLimit);
    assert_eq!(GenerationError::Upstream { status: 503, message: "unavailable".into() }.kind(), ErrorKind::Network);
    assert_eq!(GenerationError::Upstream { status: 400, message: "bad".into() }.kind(), ErrorKind::Unknown);
    assert_eq!(GenerationError::Validation("missing title".into()).kind(), ErrorKind::Validation);
  }

  #[test]
  fn classifies_free_text() {
    assert_eq!(classify_message("Request Timed Out"), ErrorKind::Network);
    assert_eq!(classify_message("Quota exceeded for project"), ErrorKind::ApiLimit);
    assert_eq!(classify_message("Unexpected token } in JSON at position 3"), ErrorKind::Parsing);
    assert_eq!(classify_message("schema mismatch"), ErrorKind::Validation);
    assert_eq!(classify_message("something odd"), ErrorKind::Unknown);
  }

  #[test]
  fn attempt_budgets_follow_classification() {
    assert_eq!(ErrorKind::Network.attempt_budget(5), 5);
    assert_eq!(ErrorKind::ApiLimit.attempt_budget(5), 5);
    assert_eq!(ErrorKind::Parsing.attempt_budget(5), 2);
    assert_eq!(ErrorKind::Unknown.attempt_budget(1), 1);
    assert_eq!(ErrorKind::Validation.attempt_budget(5), 1);
  }
}
