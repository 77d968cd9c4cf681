//! Schema validation and repair for decoded challenge objects.
//!
//! `validate` scores how well a value matches the challenge shape; the score
//! starts at 1.0 and every defect subtracts a fixed penalty. `normalize_types`
//! and `apply_defaults` form the single repair pass the pipeline runs before
//! giving up on a response.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{canonical_language, Challenge, Difficulty, SUPPORTED_LANGUAGES};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

pub const REQUIRED_FIELDS: [&str; 7] = [
  "title", "language", "difficulty", "description", "starterCode", "solution", "testCases",
];

const STRING_FIELDS: [&str; 6] = ["title", "language", "difficulty", "description", "starterCode", "solution"];

// (field, minimum chars)
const MIN_LENGTHS: [(&str, usize); 4] = [
  ("title", 3),
  ("description", 20),
  ("starterCode", 10),
  ("solution", 20),
];

const PENALTY_MISSING: f32 = 0.1;
const PENALTY_WRONG_TYPE: f32 = 0.1;
const PENALTY_BAD_DIFFICULTY: f32 = 0.1;
const PENALTY_TESTS_NOT_LIST: f32 = 0.2;
const PENALTY_BAD_TEST_CASE: f32 = 0.05;
const PENALTY_TOO_SHORT: f32 = 0.05;
const PENALTY_UNSUPPORTED_LANGUAGE: f32 = 0.05;
/// Content the model never supplied costs more than a cosmetic defect.
const PENALTY_DEFAULTED_CONTENT: f32 = 0.15;

const CONTENT_FIELDS: [&str; 4] = ["title", "description", "starterCode", "solution"];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
  pub is_valid: bool,
  pub issues: Vec<String>,
  pub confidence: f32,
}

/// Fields filled in by `apply_defaults`, in `REQUIRED_FIELDS` order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DefaultsReport {
  pub filled: Vec<&'static str>,
}

#[derive(Clone, Copy, Debug)]
pub struct SchemaValidator {
  threshold: f32,
}

impl Default for SchemaValidator {
  fn default() -> Self {
    Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
  }
}

impl SchemaValidator {
  pub fn new(threshold: f32) -> Self {
    Self { threshold: threshold.clamp(0.0, 1.0) }
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn validate(&self, data: &Value) -> ValidationResult {
    let Some(obj) = data.as_object() else {
      return ValidationResult {
        is_valid: false,
        issues: vec!["data is not an object".into()],
        confidence: 0.0,
      };
    };

    let mut confidence = 1.0_f32;
    let mut issues = Vec::new();

    for field in REQUIRED_FIELDS {
      if matches!(obj.get(field), None | Some(Value::Null)) {
        confidence -= PENALTY_MISSING;
        issues.push(format!("missing required field '{field}'"));
      }
    }

    for field in STRING_FIELDS {
      match obj.get(field) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(other) => {
          confidence -= PENALTY_WRONG_TYPE;
          issues.push(format!("field '{field}' should be a string, got {}", type_name(other)));
        }
      }
    }

    if let Some(Value::String(d)) = obj.get("difficulty") {
      if Difficulty::from_exact(d).is_none() {
        confidence -= PENALTY_BAD_DIFFICULTY;
        issues.push(format!("invalid difficulty '{d}'"));
      }
    }

    if let Some(Value::String(lang)) = obj.get("language") {
      if !SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
        confidence -= PENALTY_UNSUPPORTED_LANGUAGE;
        issues.push(format!("unsupported language '{lang}'"));
      }
    }

    match obj.get("testCases") {
      None | Some(Value::Null) => {}
      Some(Value::Array(cases)) => {
        for (i, case) in cases.iter().enumerate() {
          if let Some(problem) = test_case_problem(case) {
            confidence -= PENALTY_BAD_TEST_CASE;
            issues.push(format!("testCases[{i}] {problem}"));
          }
        }
      }
      Some(other) => {
        confidence -= PENALTY_TESTS_NOT_LIST;
        issues.push(format!("testCases should be a list, got {}", type_name(other)));
      }
    }

    for (field, min) in MIN_LENGTHS {
      if let Some(Value::String(s)) = obj.get(field) {
        if s.trim().chars().count() < min {
          confidence -= PENALTY_TOO_SHORT;
          issues.push(format!("field '{field}' is shorter than {min} characters"));
        }
      }
    }

    self.finish(confidence, issues)
  }

  /// Re-validation after the repair pass. Content fields that had to be
  /// defaulted are penalized so an empty response cannot pass as generated.
  pub fn validate_repaired(&self, data: &Value, report: &DefaultsReport) -> ValidationResult {
    let base = self.validate(data);
    let mut confidence = base.confidence;
    let mut issues = base.issues;
    for field in report.filled.iter().filter(|f| CONTENT_FIELDS.contains(*f)) {
      confidence -= PENALTY_DEFAULTED_CONTENT;
      issues.push(format!("field '{field}' was defaulted"));
    }
    self.finish(confidence, issues)
  }

  fn finish(&self, confidence: f32, issues: Vec<String>) -> ValidationResult {
    let confidence = confidence.clamp(0.0, 1.0);
    ValidationResult { is_valid: confidence >= self.threshold, issues, confidence }
  }
}

fn test_case_problem(case: &Value) -> Option<&'static str> {
  let Some(obj) = case.as_object() else {
    return Some("is not an object");
  };
  if !matches!(obj.get("input"), Some(Value::Object(_))) {
    return Some("has no input mapping");
  }
  match obj.get("expected") {
    None | Some(Value::Null) => Some("has no expected value"),
    Some(Value::String(_)) => None,
    Some(_) => Some("expected is not a string"),
  }
}

fn type_name(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// Coerce values to their declared types. Never fails; values it cannot make
/// sense of are left for the validator to report.
pub fn normalize_types(data: Value) -> Value {
  let mut obj = match data {
    Value::Object(m) => m,
    other => return other,
  };

  for (alias, canonical) in [
    ("starter_code", "starterCode"),
    ("test_cases", "testCases"),
    ("tests", "testCases"),
    ("examples", "testCases"),
  ] {
    if !obj.contains_key(canonical) {
      if let Some(v) = obj.remove(alias) {
        obj.insert(canonical.to_string(), v);
      }
    }
  }

  for field in STRING_FIELDS {
    if let Some(v) = obj.remove(field) {
      obj.insert(field.to_string(), coerce_string(v));
    }
  }

  if let Some(Value::String(t)) = obj.get_mut("title") {
    *t = t.trim().to_string();
  }
  if let Some(Value::String(lang)) = obj.get_mut("language") {
    if let Some(canon) = canonical_language(lang) {
      *lang = canon.to_string();
    }
  }
  if let Some(Value::String(d)) = obj.get_mut("difficulty") {
    if let Some(parsed) = Difficulty::parse_loose(d) {
      *d = parsed.as_str().to_string();
    }
  }

  if let Some(tc) = obj.remove("testCases") {
    obj.insert("testCases".into(), normalize_test_cases(tc));
  }

  Value::Object(obj)
}

fn coerce_string(v: Value) -> Value {
  match v {
    Value::String(_) | Value::Null => v,
    Value::Number(n) => Value::String(n.to_string()),
    Value::Bool(b) => Value::String(b.to_string()),
    // Code sometimes arrives as a list of lines.
    Value::Array(items) if items.iter().all(Value::is_string) => Value::String(
      items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("\n"),
    ),
    other => other,
  }
}

fn normalize_test_cases(tc: Value) -> Value {
  let tc = match tc {
    Value::String(s) => match serde_json::from_str::<Value>(&s) {
      Ok(v) => v,
      Err(_) => return Value::String(s),
    },
    other => other,
  };
  match tc {
    Value::Array(items) => Value::Array(items.into_iter().map(normalize_test_case).collect()),
    Value::Object(_) => Value::Array(vec![normalize_test_case(tc)]),
    other => other,
  }
}

fn normalize_test_case(case: Value) -> Value {
  let mut obj = match case {
    Value::Object(m) => m,
    other => return other,
  };
  if !obj.contains_key("expected") {
    for alias in ["output", "expectedOutput", "expected_output"] {
      if let Some(v) = obj.remove(alias) {
        obj.insert("expected".into(), v);
        break;
      }
    }
  }

  let input = match obj.remove("input") {
    Some(Value::Object(m)) => Value::Object(m),
    Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
      Ok(Value::Object(m)) => Value::Object(m),
      _ => single_input("value", Value::String(s)),
    },
    Some(Value::Null) | None => Value::Null,
    Some(other) => single_input("args", other),
  };
  if !input.is_null() {
    obj.insert("input".into(), input);
  }

  if let Some(expected) = obj.remove("expected") {
    obj.insert("expected".into(), expected_to_string(expected));
  }
  Value::Object(obj)
}

fn single_input(key: &str, v: Value) -> Value {
  let mut m = Map::new();
  m.insert(key.to_string(), v);
  Value::Object(m)
}

/// `expected` always leaves the pipeline as a string: strings stay verbatim,
/// everything else becomes its compact JSON text (`[0,1]`, `true`, `42`).
pub fn expected_to_string(v: Value) -> Value {
  match v {
    Value::String(_) | Value::Null => v,
    other => Value::String(other.to_string()),
  }
}

/// Fill missing (or null) required fields with safe defaults.
pub fn apply_defaults(data: Value) -> (Value, DefaultsReport) {
  let mut obj = match data {
    Value::Object(m) => m,
    _ => Map::new(),
  };
  let mut report = DefaultsReport::default();

  for field in REQUIRED_FIELDS {
    if matches!(obj.get(field), None | Some(Value::Null)) {
      obj.insert(field.to_string(), default_for(field));
      report.filled.push(field);
    }
  }

  // Entries that cannot be repaired are dropped rather than failing the whole challenge.
  if let Some(Value::Array(cases)) = obj.get_mut("testCases") {
    cases.retain(|c| test_case_problem(c).is_none());
  }

  (Value::Object(obj), report)
}

fn default_for(field: &str) -> Value {
  match field {
    "title" => Value::String("Untitled Challenge".into()),
    "language" => Value::String("JavaScript".into()),
    "difficulty" => Value::String(Difficulty::Intermediate.as_str().into()),
    "description" => Value::String("Solve the programming problem described by the title.".into()),
    "starterCode" => Value::String("// Write your solution here\n".into()),
    "solution" => Value::String("// Reference solution is not available for this challenge.".into()),
    "testCases" => Value::Array(vec![]),
    _ => Value::Null,
  }
}

/// Convert a validated, normalized value into the typed record.
pub fn into_challenge(data: Value) -> Result<Challenge, String> {
  let mut data = data;
  if let Some(obj) = data.as_object_mut() {
    obj.remove("metadata");
  }
  serde_json::from_value::<Challenge>(data).map_err(|e| format!("challenge conversion failed: {e}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn good() -> Value {
    json!({
      "title": "Two Sum",
      "language": "JavaScript",
      "difficulty": "Beginner",
      "description": "Return indices of the two numbers that add up to target.",
      "starterCode": "function twoSum(nums, target) {\n}",
      "solution": "function twoSum(nums, target) { const m = new Map(); for (let i = 0; i < nums.length; i++) { if (m.has(target - nums[i])) return [m.get(target - nums[i]), i]; m.set(nums[i], i); } }",
      "testCases": [{"input": {"nums": [2, 7], "target": 9}, "expected": "[0,1]"}]
    })
  }

  #[test]
  fn well_formed_challenge_has_full_confidence() {
    let r = SchemaValidator::default().validate(&good());
    assert!(r.is_valid);
    assert!(r.issues.is_empty(), "{:?}", r.issues);
    assert!((r.confidence - 1.0).abs() < 1e-6);
  }

  #[test]
  fn missing_every_field_is_invalid() {
    let r = SchemaValidator::default().validate(&json!({}));
    assert!(!r.is_valid);
    assert!(r.confidence <= 1.0 - 0.1 * 7.0 + 1e-6);
    assert!(r.confidence >= 0.0);
    assert_eq!(r.issues.len(), 7);
  }

  #[test]
  fn non_object_scores_zero() {
    let r = SchemaValidator::default().validate(&json!([1, 2]));
    assert!(!r.is_valid);
    assert_eq!(r.confidence, 0.0);
  }

  #[test]
  fn penalties_accumulate_per_defect() {
    let mut v = good();
    v["difficulty"] = json!("Legendary");
    v["title"] = json!(42);
    v["testCases"] = json!([{"input": {"a": 1}}, "oops", {"input": {}, "expected": "1"}]);
    let r = SchemaValidator::default().validate(&v);
    // 0.1 difficulty + 0.1 title type + 2 * 0.05 bad cases
    assert!((r.confidence - 0.7).abs() < 1e-5, "{}", r.confidence);
    assert!(r.is_valid);
    assert_eq!(r.issues.len(), 4);
  }

  #[test]
  fn test_cases_not_a_list_costs_more() {
    let mut v = good();
    v["testCases"] = json!("[]");
    let r = SchemaValidator::default().validate(&v);
    assert!((r.confidence - 0.8).abs() < 1e-5);
  }

  #[test]
  fn short_content_is_flagged() {
    let mut v = good();
    v["description"] = json!("...");
    v["starterCode"] = json!("...");
    v["solution"] = json!("...");
    let r = SchemaValidator::default().validate(&v);
    assert!((r.confidence - 0.85).abs() < 1e-5);
    assert_eq!(r.issues.len(), 3);
  }

  #[test]
  fn normalize_coerces_types_and_aliases() {
    let v = normalize_types(json!({
      "title": "  Reverse  ",
      "language": "py",
      "difficulty": "hard",
      "starter_code": ["def rev(s):", "    pass"],
      "test_cases": "[{\"input\": {\"s\": \"ab\"}, \"output\": \"ba\"}, {\"input\": \"{\\\"s\\\": \\\"\\\"}\", \"expected\": [0, 1]}]"
    }));
    assert_eq!(v["title"], "Reverse");
    assert_eq!(v["language"], "Python");
    assert_eq!(v["difficulty"], "Advanced");
    assert_eq!(v["starterCode"], "def rev(s):\n    pass");
    assert_eq!(v["testCases"][0]["expected"], "ba");
    assert_eq!(v["testCases"][1]["input"], json!({"s": ""}));
    assert_eq!(v["testCases"][1]["expected"], "[0,1]");
  }

  #[test]
  fn defaults_fill_missing_fields_and_report_them() {
    let (v, report) = apply_defaults(json!({"title": "Only a title", "testCases": null}));
    assert_eq!(v["difficulty"], "Intermediate");
    assert_eq!(v["testCases"], json!([]));
    assert_eq!(report.filled, vec!["language", "difficulty", "description", "starterCode", "solution", "testCases"]);
  }

  #[test]
  fn repaired_validation_penalizes_defaulted_content() {
    let validator = SchemaValidator::default();
    let (v, report) = apply_defaults(normalize_types(json!({"title": "Only a title"})));
    let r = validator.validate_repaired(&v, &report);
    assert!(!r.is_valid, "confidence {}", r.confidence);

    let mut partial = good();
    if let Some(obj) = partial.as_object_mut() {
      obj.remove("solution");
    }
    let (v, report) = apply_defaults(normalize_types(partial));
    let r = validator.validate_repaired(&v, &report);
    assert!(r.is_valid);
    assert!((r.confidence - 0.85).abs() < 1e-5);
  }

  #[test]
  fn converts_to_typed_challenge() {
    let c = into_challenge(good()).expect("challenge");
    assert_eq!(c.difficulty, Difficulty::Beginner);
    assert_eq!(c.test_cases[0].expected, "[0,1]");
  }
}
