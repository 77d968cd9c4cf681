//! Fallback provider: serves curated challenges when generation fails.
//!
//! Lookup order: requested language+difficulty, the language at the default
//! difficulty, any bucket of the language, then the configured default pair.
//! A short window of recently served titles keeps consecutive requests from
//! getting the same item. If nothing can be served the emergency challenge is
//! returned, which cannot fail.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use rand::seq::SliceRandom;
use tracing::{debug, error, warn};

use crate::domain::{canonical_language, Challenge, ChallengeSource, Difficulty, Filters};
use crate::schema::SchemaValidator;
use crate::seeds::{emergency_challenge, fallback_templates};

pub const DEFAULT_RECENT_WINDOW: usize = 5;

// language (lowercase) -> difficulty -> templates
type Table = HashMap<String, BTreeMap<Difficulty, Vec<Challenge>>>;

#[derive(Clone, Debug)]
pub struct FallbackSettings {
  pub recent_window: usize,
  pub default_language: String,
  pub default_difficulty: Difficulty,
}

impl Default for FallbackSettings {
  fn default() -> Self {
    Self {
      recent_window: DEFAULT_RECENT_WINDOW,
      default_language: "JavaScript".into(),
      default_difficulty: Difficulty::Beginner,
    }
  }
}

pub struct FallbackProvider {
  table: Table,
  settings: FallbackSettings,
  recent: Mutex<VecDeque<String>>,
}

fn table_key(language: &str) -> String {
  canonical_language(language).unwrap_or(language.trim()).to_lowercase()
}

impl FallbackProvider {
  /// Build the table from the embedded seed templates.
  pub fn from_seeds(settings: FallbackSettings, validator: &SchemaValidator) -> Self {
    Self::new(fallback_templates(), settings, validator)
  }

  /// Templates that do not validate are logged and left out of the table.
  pub fn new(templates: Vec<Challenge>, settings: FallbackSettings, validator: &SchemaValidator) -> Self {
    let mut table = Table::new();
    let mut rejected = 0usize;
    for t in templates {
      let verdict = match serde_json::to_value(&t) {
        Ok(v) => validator.validate(&v),
        Err(e) => {
          error!(target: "challenge", title = %t.title, error = %e, "Fallback template is not serializable");
          rejected += 1;
          continue;
        }
      };
      if !verdict.is_valid {
        error!(target: "challenge", title = %t.title, issues = ?verdict.issues, "Skipping malformed fallback template");
        rejected += 1;
        continue;
      }
      table.entry(table_key(&t.language)).or_default().entry(t.difficulty).or_default().push(t);
    }

    let total: usize = table.values().flat_map(|b| b.values()).map(Vec::len).sum();
    if total == 0 {
      error!(target: "challenge", rejected, "Fallback table is empty; only the emergency challenge is available");
    } else {
      debug!(target: "challenge", templates = total, languages = table.len(), rejected, "Fallback table loaded");
    }

    let settings = FallbackSettings { recent_window: settings.recent_window.max(1), ..settings };
    Self { table, settings, recent: Mutex::new(VecDeque::new()) }
  }

  fn lock_recent(&self) -> MutexGuard<'_, VecDeque<String>> {
    self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Never fails: a table miss ends in the emergency challenge.
  pub fn get_fallback_challenge(&self, filters: &Filters, reason: &str, attempts: u32) -> Challenge {
    match self.pick(filters) {
      Ok((ch, bucket)) => {
        debug!(target: "challenge", title = %ch.title, %bucket, %reason, "Serving fallback challenge");
        ch.stamped(ChallengeSource::Fallback, "fallback", attempts, Some(reason.to_string()))
      }
      Err(e) => {
        warn!(target: "challenge", error = %e, %reason, "Fallback lookup failed; serving emergency challenge");
        self.emergency(reason, attempts)
      }
    }
  }

  /// Serve a previously generated challenge not in the recent window, if any.
  pub fn pick_cached(&self, cached: &[Challenge], reason: &str, attempts: u32) -> Option<Challenge> {
    let mut recent = self.lock_recent();
    let eligible: Vec<&Challenge> = cached.iter().filter(|c| !recent.contains(&c.title)).collect();
    let chosen = (*eligible.choose(&mut rand::thread_rng())?).clone();
    Self::remember(&mut recent, self.settings.recent_window, &chosen.title);
    Some(chosen.stamped(ChallengeSource::FallbackCached, "cached", attempts, Some(reason.to_string())))
  }

  pub fn emergency(&self, reason: &str, attempts: u32) -> Challenge {
    emergency_challenge().stamped(ChallengeSource::EmergencyFallback, "emergency", attempts, Some(reason.to_string()))
  }

  fn pick(&self, filters: &Filters) -> Result<(Challenge, String), String> {
    let (candidates, bucket) = self.bucket(filters)?;
    let mut recent = self.lock_recent();

    let mut eligible: Vec<&Challenge> = candidates.iter().filter(|c| !recent.contains(&c.title)).collect();
    if eligible.is_empty() {
      // Bucket smaller than the window; start over rather than starve.
      recent.clear();
      eligible = candidates.iter().collect();
    }
    let chosen = eligible
      .choose(&mut rand::thread_rng())
      .map(|c| (*c).clone())
      .ok_or_else(|| format!("bucket {bucket} is empty"))?;
    Self::remember(&mut recent, self.settings.recent_window, &chosen.title);
    Ok((chosen, bucket))
  }

  fn bucket(&self, filters: &Filters) -> Result<(&[Challenge], String), String> {
    let default_lang = table_key(&self.settings.default_language);
    let lang = filters.primary_language().map(table_key).unwrap_or_else(|| default_lang.clone());
    let difficulty = filters.difficulty.unwrap_or(self.settings.default_difficulty);

    if let Some(c) = self.non_empty(&lang, difficulty) {
      return Ok((c, format!("{lang}/{}", difficulty.as_str())));
    }
    if let Some(c) = self.non_empty(&lang, self.settings.default_difficulty) {
      return Ok((c, format!("{lang}/{}", self.settings.default_difficulty.as_str())));
    }
    if let Some((d, c)) = self.table.get(&lang).and_then(|b| b.iter().find(|(_, v)| !v.is_empty())) {
      return Ok((c.as_slice(), format!("{lang}/{}", d.as_str())));
    }
    if let Some(c) = self.non_empty(&default_lang, self.settings.default_difficulty) {
      return Ok((c, format!("{default_lang}/{}", self.settings.default_difficulty.as_str())));
    }
    Err(format!("no fallback templates for {lang}/{} or the default bucket", difficulty.as_str()))
  }

  fn non_empty(&self, lang: &str, difficulty: Difficulty) -> Option<&[Challenge]> {
    self.table.get(lang)?.get(&difficulty).filter(|v| !v.is_empty()).map(Vec::as_slice)
  }

  fn remember(recent: &mut VecDeque<String>, window: usize, title: &str) {
    recent.retain(|t| t != title);
    recent.push_back(title.to_string());
    while recent.len() > window {
      recent.pop_front();
    }
  }

  #[cfg(test)]
  fn recent_titles(&self) -> Vec<String> {
    self.lock_recent().iter().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  fn provider() -> FallbackProvider {
    FallbackProvider::from_seeds(FallbackSettings::default(), &SchemaValidator::default())
  }

  fn filters(lang: &str, d: Option<Difficulty>) -> Filters {
    Filters { difficulty: d, languages: vec![lang.to_string()], ..Filters::default() }
  }

  fn assert_valid(ch: &Challenge) {
    let v = serde_json::to_value(ch).unwrap();
    let res = SchemaValidator::default().validate(&v);
    assert!(res.is_valid, "{:?}", res.issues);
  }

  #[test]
  fn exact_bucket_is_preferred() {
    let p = provider();
    let ch = p.get_fallback_challenge(&filters("python", Some(Difficulty::Advanced)), "test", 2);
    assert_eq!(ch.language, "Python");
    assert_eq!(ch.difficulty, Difficulty::Advanced);
    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_eq!(ch.metadata.generation_attempts, 2);
    assert_eq!(ch.metadata.fallback_reason.as_deref(), Some("test"));
  }

  #[test]
  fn unknown_pair_uses_default_bucket() {
    let p = provider();
    let ch = p.get_fallback_challenge(&filters("COBOL", Some(Difficulty::Expert)), "no match", 0);
    assert_eq!(ch.language, "JavaScript");
    assert_eq!(ch.difficulty, Difficulty::Beginner);
    assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    assert_valid(&ch);
  }

  #[test]
  fn language_without_requested_difficulty_stays_in_language() {
    let p = provider();
    let ch = p.get_fallback_challenge(&filters("C++", Some(Difficulty::Expert)), "r", 0);
    assert_eq!(ch.language, "C++");
  }

  #[test]
  fn every_supported_language_has_a_beginner_template() {
    let p = provider();
    for lang in crate::domain::SUPPORTED_LANGUAGES {
      let ch = p.get_fallback_challenge(&filters(lang, Some(Difficulty::Beginner)), "r", 0);
      assert_eq!(ch.language, *lang);
      assert_eq!(ch.difficulty, Difficulty::Beginner);
      assert_valid(&ch);
    }
  }

  #[test]
  fn empty_table_serves_emergency() {
    let p = FallbackProvider::new(vec![], FallbackSettings::default(), &SchemaValidator::default());
    let ch = p.get_fallback_challenge(&Filters::default(), "empty", 1);
    assert_eq!(ch.metadata.source, ChallengeSource::EmergencyFallback);
    assert_valid(&ch);
  }

  #[test]
  fn malformed_templates_are_dropped() {
    let mut broken = fallback_templates().remove(0);
    broken.title.clear();
    broken.description = "short".into();
    broken.solution.clear();
    broken.starter_code.clear();
    let p = FallbackProvider::new(vec![broken], FallbackSettings::default(), &SchemaValidator::new(0.9));
    let ch = p.get_fallback_challenge(&Filters::default(), "bad table", 0);
    assert_eq!(ch.metadata.source, ChallengeSource::EmergencyFallback);
  }

  #[test]
  fn recent_window_avoids_repeats_then_resets() {
    let p = provider();
    let f = filters("JavaScript", Some(Difficulty::Beginner));
    let bucket_size = fallback_templates()
      .iter()
      .filter(|c| c.language == "JavaScript" && c.difficulty == Difficulty::Beginner)
      .count();

    let titles: HashSet<String> = (0..bucket_size).map(|_| p.get_fallback_challenge(&f, "r", 0).title).collect();
    assert_eq!(titles.len(), bucket_size);

    // Window now covers the whole bucket; the next pick must still succeed.
    for _ in 0..10 {
      let ch = p.get_fallback_challenge(&f, "r", 0);
      assert_eq!(ch.metadata.source, ChallengeSource::Fallback);
    }
    assert!(p.recent_titles().len() <= DEFAULT_RECENT_WINDOW);
  }

  #[test]
  fn cached_pick_skips_recent_titles() {
    let p = provider();
    let mut a = fallback_templates().remove(3);
    a.title = "Cached A".into();
    let mut b = a.clone();
    b.title = "Cached B".into();
    let pool = vec![a, b];

    let first = p.pick_cached(&pool, "r", 1).unwrap();
    let second = p.pick_cached(&pool, "r", 1).unwrap();
    assert_ne!(first.title, second.title);
    assert_eq!(second.metadata.source, ChallengeSource::FallbackCached);
    assert!(p.pick_cached(&pool, "r", 1).is_none());
  }
}
