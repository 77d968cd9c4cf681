//! Domain models produced by the generation pipeline: challenge, test cases,
//! provenance metadata, difficulty levels and request filters.
//!
//! The JSON field names (camelCase) are the contract other components rely on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Languages a challenge may be written in. Matching is case-insensitive and
/// accepts a few common aliases (see `canonical_language`).
pub const SUPPORTED_LANGUAGES: &[&str] = &[
  "JavaScript", "TypeScript", "Python", "Java", "C++", "C#", "Go", "Rust",
];

/// Map a user/model supplied language name onto the canonical spelling.
pub fn canonical_language(raw: &str) -> Option<&'static str> {
  let key = raw.trim().to_lowercase();
  let found = match key.as_str() {
    "js" | "node" | "nodejs" | "javascript" => "JavaScript",
    "ts" | "typescript" => "TypeScript",
    "py" | "python" | "python3" => "Python",
    "java" => "Java",
    "cpp" | "c++" | "cplusplus" => "C++",
    "cs" | "c#" | "csharp" => "C#",
    "go" | "golang" => "Go",
    "rs" | "rust" => "Rust",
    _ => return None,
  };
  Some(found)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Difficulty {
  Beginner,
  Intermediate,
  Advanced,
  Expert,
}

impl Difficulty {
  pub const ALL: [Difficulty; 4] = [
    Difficulty::Beginner,
    Difficulty::Intermediate,
    Difficulty::Advanced,
    Difficulty::Expert,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Beginner => "Beginner",
      Difficulty::Intermediate => "Intermediate",
      Difficulty::Advanced => "Advanced",
      Difficulty::Expert => "Expert",
    }
  }

  /// Exact enum spelling only. Used by the validator.
  pub fn from_exact(s: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|d| d.as_str() == s)
  }

  /// Best-effort parse: case-insensitive, accepts easy/medium/hard style levels.
  pub fn parse_loose(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "beginner" | "easy" | "basic" | "novice" => Some(Difficulty::Beginner),
      "intermediate" | "medium" | "moderate" => Some(Difficulty::Intermediate),
      "advanced" | "hard" | "difficult" => Some(Difficulty::Advanced),
      "expert" | "very hard" | "extreme" => Some(Difficulty::Expert),
      _ => None,
    }
  }
}

impl Default for Difficulty {
  fn default() -> Self { Difficulty::Intermediate }
}

/// Where did the served challenge come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSource {
  Ai,              // generated and accepted by the pipeline
  Fallback,        // static embedded table
  FallbackCached,  // previously generated challenge served again
  EmergencyFallback,
}

impl ChallengeSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChallengeSource::Ai => "ai",
      ChallengeSource::Fallback => "fallback",
      ChallengeSource::FallbackCached => "fallback_cached",
      ChallengeSource::EmergencyFallback => "emergency_fallback",
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
  pub input: Map<String, Value>,
  pub expected: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeMetadata {
  pub source: ChallengeSource,
  pub timestamp: DateTime<Utc>,
  pub generation_attempts: u32,
  pub parsing_method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fallback_reason: Option<String>,
}

impl Default for ChallengeMetadata {
  fn default() -> Self {
    Self {
      source: ChallengeSource::Ai,
      timestamp: Utc::now(),
      generation_attempts: 0,
      parsing_method: "none".into(),
      fallback_reason: None,
    }
  }
}

/// Canonical coding-exercise record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  pub title: String,
  pub language: String,
  pub difficulty: Difficulty,
  pub description: String,
  pub starter_code: String,
  pub solution: String,
  #[serde(default)]
  pub test_cases: Vec<TestCase>,
  #[serde(default)]
  pub metadata: ChallengeMetadata,
}

impl Challenge {
  /// Restamp provenance. Used by every serving path right before returning.
  pub fn stamped(mut self, source: ChallengeSource, parsing_method: &str, attempts: u32, reason: Option<String>) -> Self {
    self.metadata = ChallengeMetadata {
      source,
      timestamp: Utc::now(),
      generation_attempts: attempts,
      parsing_method: parsing_method.to_string(),
      fallback_reason: reason,
    };
    self
  }
}

/// `languages` arrives either as a single string or as a list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

/// Filters exactly as callers send them. Normalized once into `Filters`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawFilters {
  #[serde(default)] pub level: Option<String>,
  #[serde(default)] pub difficulty: Option<String>,
  #[serde(default)] pub languages: Option<OneOrMany>,
  #[serde(default)] pub language: Option<String>,
  #[serde(default)] pub topics: Option<OneOrMany>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filters {
  /// Parsed difficulty when the caller's value was recognized.
  pub difficulty: Option<Difficulty>,
  /// Caller's difficulty text, kept for prompting even when unrecognized.
  pub difficulty_raw: Option<String>,
  pub languages: Vec<String>,
  pub topics: Vec<String>,
}

impl Filters {
  pub fn primary_language(&self) -> Option<&str> {
    self.languages.first().map(|s| s.as_str())
  }

  pub fn difficulty_label(&self) -> String {
    match (&self.difficulty, &self.difficulty_raw) {
      (Some(d), _) => d.as_str().to_string(),
      (None, Some(raw)) => raw.clone(),
      (None, None) => Difficulty::default().as_str().to_string(),
    }
  }
}

impl From<RawFilters> for Filters {
  fn from(raw: RawFilters) -> Self {
    // `level` is the legacy spelling of `difficulty`; an explicit difficulty wins.
    let difficulty_raw = raw
      .difficulty
      .or(raw.level)
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty());
    let difficulty = difficulty_raw.as_deref().and_then(Difficulty::parse_loose);

    let mut languages = match raw.languages {
      Some(OneOrMany::One(s)) => vec![s],
      Some(OneOrMany::Many(v)) => v,
      None => vec![],
    };
    if let Some(l) = raw.language {
      languages.insert(0, l);
    }
    let mut seen = Vec::<String>::new();
    for l in languages {
      let l = l.trim();
      if l.is_empty() { continue; }
      let l = canonical_language(l).map(str::to_string).unwrap_or_else(|| l.to_string());
      if !seen.contains(&l) { seen.push(l); }
    }

    let topics = match raw.topics {
      Some(OneOrMany::One(s)) => s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
      Some(OneOrMany::Many(v)) => v.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
      None => vec![],
    };

    Filters { difficulty, difficulty_raw, languages: seen, topics }
  }
}

/// Input for reference-solution generation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
  #[serde(default)] pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub language: Option<String>,
  #[serde(default)] pub starter_code: Option<String>,
  #[serde(default)] pub difficulty: Option<String>,
  /// Solution already attached to the challenge, served if generation fails.
  #[serde(default)] pub solution: Option<String>,
}

impl AnswerRequest {
  pub fn language_or_default(&self) -> &str {
    self.language
      .as_deref()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(|l| canonical_language(l).unwrap_or(l))
      .unwrap_or("JavaScript")
  }

  /// Nothing to prompt a model with.
  pub fn is_blank(&self) -> bool {
    self.title.trim().is_empty() && self.description.trim().is_empty()
  }
}
