//! Persistence collaborator.
//!
//! The pipeline only supplies the final challenge and its content hash; what a
//! store does with them is its own business. `InMemoryStore` backs the service
//! when nothing else is configured and doubles as the cached-fallback pool; it
//! holds at most `capacity` challenges and evicts the oldest first.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Challenge, Difficulty};

/// Stable hash over the content that identifies a challenge.
///
/// Input: title, language, difficulty, description, starterCode, testCases
/// (compact JSON) and the SHA-256 of the solution, joined by `\n`.
/// Metadata never participates.
pub fn content_hash(ch: &Challenge) -> String {
  let solution_hash = hex::encode(Sha256::digest(ch.solution.as_bytes()));
  let tests = serde_json::to_string(&ch.test_cases).unwrap_or_default();
  let mut hasher = Sha256::new();
  for part in [
    ch.title.as_str(),
    ch.language.as_str(),
    ch.difficulty.as_str(),
    ch.description.as_str(),
    ch.starter_code.as_str(),
    tests.as_str(),
    solution_hash.as_str(),
  ] {
    hasher.update(part.as_bytes());
    hasher.update(b"\n");
  }
  hex::encode(hasher.finalize())
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
  /// Insert keyed by `hash` unless already present. Returns true when inserted.
  async fn upsert_if_absent(&self, hash: &str, challenge: &Challenge) -> Result<bool, String>;

  /// Stored challenges for a language/difficulty pair.
  async fn cached_for(&self, language: &str, difficulty: Difficulty) -> Result<Vec<Challenge>, String>;

  async fn len(&self) -> usize;
}

pub const DEFAULT_STORE_CAPACITY: usize = 500;

#[derive(Default)]
struct Entries {
  by_hash: HashMap<String, Challenge>,
  // Insertion order, oldest at the front.
  order: VecDeque<String>,
}

pub struct InMemoryStore {
  capacity: usize,
  entries: RwLock<Entries>,
}

impl Default for InMemoryStore {
  fn default() -> Self {
    Self::with_capacity(DEFAULT_STORE_CAPACITY)
  }
}

impl InMemoryStore {
  pub fn with_capacity(capacity: usize) -> Self {
    Self { capacity: capacity.max(1), entries: RwLock::new(Entries::default()) }
  }
}

#[async_trait]
impl ChallengeStore for InMemoryStore {
  async fn upsert_if_absent(&self, hash: &str, challenge: &Challenge) -> Result<bool, String> {
    let mut entries = self.entries.write().await;
    if entries.by_hash.contains_key(hash) {
      debug!(target: "challenge", %hash, "Challenge already stored");
      return Ok(false);
    }
    while entries.order.len() >= self.capacity {
      let Some(oldest) = entries.order.pop_front() else { break };
      entries.by_hash.remove(&oldest);
      debug!(target: "challenge", hash = %oldest, "Evicted oldest stored challenge");
    }
    entries.by_hash.insert(hash.to_string(), challenge.clone());
    entries.order.push_back(hash.to_string());
    debug!(target: "challenge", %hash, title = %challenge.title, "Challenge stored");
    Ok(true)
  }

  async fn cached_for(&self, language: &str, difficulty: Difficulty) -> Result<Vec<Challenge>, String> {
    let entries = self.entries.read().await;
    Ok(entries
      .by_hash
      .values()
      .filter(|c| c.difficulty == difficulty && c.language.eq_ignore_ascii_case(language))
      .cloned()
      .collect())
  }

  async fn len(&self) -> usize {
    self.entries.read().await.by_hash.len()
  }
}
