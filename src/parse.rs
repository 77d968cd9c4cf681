//! Progressive parsing of sanitized model output.
//!
//! Strategies run in a fixed order and stop at the first success:
//!   1. direct decode of the whole text
//!   2. extraction of the first balanced `{...}` object
//!   3. structural repair, then direct decode
//!   4. structural repair, then extraction
//!
//! Extraction uses `BraceScanner`, an explicit Normal/InString/Escaped state
//! machine. Above the streaming threshold the scanner is fed fixed-size chunks
//! and carries its state across chunk boundaries, which yields the same span as
//! a single pass.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::memory::MemoryGuard;

/// Keys recognized as the challenge shape (canonical and common aliases).
const CHALLENGE_KEYS: &[&str] = &[
  "title", "language", "difficulty", "description",
  "starterCode", "starter_code", "solution", "testCases", "test_cases",
];

/// Envelope keys some models wrap the payload in.
const ENVELOPE_KEYS: &[&str] = &["challenge", "data", "question", "result"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseMethod {
  Direct,
  Extracted,
  Repaired,
  ExtractedRepaired,
  Streaming,
  Failed,
}

impl ParseMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      ParseMethod::Direct => "direct",
      ParseMethod::Extracted => "extracted",
      ParseMethod::Repaired => "repaired",
      ParseMethod::ExtractedRepaired => "extracted-repaired",
      ParseMethod::Streaming => "streaming",
      ParseMethod::Failed => "failed",
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParseResult {
  pub success: bool,
  pub data: Option<Value>,
  pub method: ParseMethod,
  pub error: Option<String>,
}

impl ParseResult {
  fn parsed(data: Value, method: ParseMethod) -> Self {
    Self { success: true, data: Some(data), method, error: None }
  }

  fn failed(error: String) -> Self {
    Self { success: false, data: None, method: ParseMethod::Failed, error: Some(error) }
  }
}

/// Shape predicate used by the decode strategies.
pub type ShapeCheck = fn(&Map<String, Value>) -> bool;

pub fn looks_like_challenge(obj: &Map<String, Value>) -> bool {
  obj.contains_key("title") || CHALLENGE_KEYS.iter().filter(|k| obj.contains_key(**k)).count() >= 2
}

#[derive(Clone, Copy, Debug)]
pub struct ProgressiveParser {
  guard: MemoryGuard,
}

impl Default for ProgressiveParser {
  fn default() -> Self {
    Self::new(MemoryGuard::default())
  }
}

impl ProgressiveParser {
  pub fn new(guard: MemoryGuard) -> Self {
    Self { guard }
  }

  pub fn parse(&self, text: &str) -> ParseResult {
    self.parse_with(text, looks_like_challenge)
  }

  pub fn parse_with(&self, text: &str, accept: ShapeCheck) -> ParseResult {
    if text.trim().is_empty() {
      return ParseResult::failed("empty input".into());
    }
    let mut errors: Vec<String> = Vec::with_capacity(4);

    match decode(text, accept) {
      Ok(v) => return ParseResult::parsed(v, ParseMethod::Direct),
      Err(e) => errors.push(format!("direct: {e}")),
    }

    match self.extract(text, accept) {
      Ok((v, streamed)) => {
        let method = if streamed { ParseMethod::Streaming } else { ParseMethod::Extracted };
        return ParseResult::parsed(v, method);
      }
      Err(e) => errors.push(format!("extract: {e}")),
    }

    let repaired = repair_common_issues(text);

    match decode(&repaired, accept) {
      Ok(v) => return ParseResult::parsed(v, ParseMethod::Repaired),
      Err(e) => errors.push(format!("repair: {e}")),
    }

    match self.extract(&repaired, accept) {
      Ok((v, _)) => return ParseResult::parsed(v, ParseMethod::ExtractedRepaired),
      Err(e) => errors.push(format!("repair+extract: {e}")),
    }

    ParseResult::failed(errors.join("; "))
  }

  /// Decode the first balanced object. The flag reports chunked scanning.
  fn extract(&self, text: &str, accept: ShapeCheck) -> Result<(Value, bool), String> {
    let streamed = self.guard.should_stream(text.len());
    let span = if streamed {
      let mut scanner = BraceScanner::new();
      self.guard.chunks(text).find_map(|chunk| scanner.feed(chunk))
    } else {
      BraceScanner::new().feed(text)
    };
    let (start, end) = span.ok_or_else(|| "no balanced object found".to_string())?;
    decode(&text[start..end], accept).map(|v| (v, streamed))
  }
}

fn decode(text: &str, accept: ShapeCheck) -> Result<Value, String> {
  let value: Value = serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
  unwrap_envelope(value, accept).ok_or_else(|| "decoded value does not have the expected shape".to_string())
}

fn unwrap_envelope(value: Value, accept: ShapeCheck) -> Option<Value> {
  let Value::Object(mut map) = value else {
    return None;
  };
  if accept(&map) {
    return Some(Value::Object(map));
  }
  for key in ENVELOPE_KEYS {
    if let Some(Value::Object(inner)) = map.remove(*key) {
      if accept(&inner) {
        return Some(Value::Object(inner));
      }
    }
  }
  None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
  Normal,
  InString,
  Escaped,
}

/// Finds the byte span of the first balanced `{...}` object.
#[derive(Clone, Debug)]
pub struct BraceScanner {
  state: ScanState,
  depth: usize,
  start: Option<usize>,
  consumed: usize,
}

impl Default for BraceScanner {
  fn default() -> Self {
    Self::new()
  }
}

impl BraceScanner {
  pub fn new() -> Self {
    Self { state: ScanState::Normal, depth: 0, start: None, consumed: 0 }
  }

  #[cfg(test)]
  fn state(&self) -> ScanState {
    self.state
  }

  /// Feed the next chunk. Returns the absolute `(start, end)` span as soon as
  /// the first object closes; `end` is exclusive.
  pub fn feed(&mut self, chunk: &str) -> Option<(usize, usize)> {
    for (i, ch) in chunk.char_indices() {
      let pos = self.consumed + i;
      let Some(start) = self.start else {
        if ch == '{' {
          self.start = Some(pos);
          self.depth = 1;
        }
        continue;
      };
      match self.state {
        ScanState::Escaped => self.state = ScanState::InString,
        ScanState::InString => match ch {
          '\\' => self.state = ScanState::Escaped,
          '"' => self.state = ScanState::Normal,
          _ => {}
        },
        ScanState::Normal => match ch {
          '"' => self.state = ScanState::InString,
          '{' => self.depth += 1,
          '}' => {
            self.depth -= 1;
            if self.depth == 0 {
              self.consumed += chunk.len();
              return Some((start, pos + 1));
            }
          }
          _ => {}
        },
      }
    }
    self.consumed += chunk.len();
    None
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RepairMode {
  Normal,
  InDouble,
  InSingle,
}

/// Structural repairs for the malformations models actually produce.
///
/// Drops trailing commas, quotes bare object keys, turns single-quoted literals
/// into double-quoted ones, escapes raw control characters inside strings,
/// closes an unterminated trailing string and appends one closer per
/// still-open `{`/`[`. Idempotent.
pub fn repair_common_issues(text: &str) -> String {
  let b = text.as_bytes();
  let mut out: Vec<u8> = Vec::with_capacity(b.len() + 16);
  let mut closers: Vec<u8> = Vec::new();
  let mut mode = RepairMode::Normal;
  let mut escaped = false;
  let mut string_is_key = false;

  let mut i = 0;
  while i < b.len() {
    let c = b[i];
    match mode {
      RepairMode::InDouble => {
        if escaped {
          out.push(c);
          escaped = false;
        } else if c == b'\\' {
          out.push(c);
          escaped = true;
        } else if c == b'"' {
          out.push(c);
          mode = RepairMode::Normal;
        } else if c < 0x20 {
          push_escaped_control(&mut out, c);
        } else {
          out.push(c);
        }
      }
      RepairMode::InSingle => {
        if escaped {
          if c == b'\'' {
            // `\'` needs no escape inside a double-quoted literal.
            out.pop();
          }
          out.push(c);
          escaped = false;
        } else if c == b'\\' {
          out.push(c);
          escaped = true;
        } else if c == b'\'' && closes_single(b, i + 1) {
          out.push(b'"');
          mode = RepairMode::Normal;
        } else if c == b'"' {
          out.extend_from_slice(b"\\\"");
        } else if c < 0x20 {
          push_escaped_control(&mut out, c);
        } else {
          out.push(c);
        }
      }
      RepairMode::Normal => match c {
        b'"' => {
          string_is_key = at_key_position(&out, &closers);
          out.push(c);
          mode = RepairMode::InDouble;
        }
        b'\'' if at_value_position(&out) => {
          string_is_key = at_key_position(&out, &closers);
          out.push(b'"');
          mode = RepairMode::InSingle;
        }
        b'{' => {
          closers.push(b'}');
          out.push(c);
        }
        b'[' => {
          closers.push(b']');
          out.push(c);
        }
        b'}' | b']' => {
          if closers.last() == Some(&c) {
            closers.pop();
          }
          out.push(c);
        }
        b',' => {
          if !matches!(next_significant(b, i + 1), Some(b'}') | Some(b']')) {
            out.push(c);
          }
        }
        c if is_ident_start(c) && matches!(last_significant(&out), Some(b'{') | Some(b',')) => {
          let end = ident_end(b, i);
          let is_key = next_significant(b, end) == Some(b':');
          if is_key {
            out.push(b'"');
          }
          out.extend_from_slice(&b[i..end]);
          if is_key {
            out.push(b'"');
          }
          i = end;
          continue;
        }
        _ => out.push(c),
      },
    }
    i += 1;
  }

  if mode != RepairMode::Normal {
    if escaped {
      out.pop();
    }
    out.push(b'"');
    if string_is_key {
      out.extend_from_slice(b": null");
    }
  }

  if !closers.is_empty() {
    match last_significant(&out) {
      Some(b',') => {
        if let Some(pos) = out.iter().rposition(|c| !c.is_ascii_whitespace()) {
          out.truncate(pos);
        }
      }
      Some(b':') => out.extend_from_slice(b" null"),
      _ => {}
    }
    while let Some(closer) = closers.pop() {
      out.push(closer);
    }
  }

  String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn push_escaped_control(out: &mut Vec<u8>, c: u8) {
  match c {
    b'\n' => out.extend_from_slice(b"\\n"),
    b'\r' => out.extend_from_slice(b"\\r"),
    b'\t' => out.extend_from_slice(b"\\t"),
    _ => out.extend_from_slice(format!("\\u{:04x}", c).as_bytes()),
  }
}

fn next_significant(b: &[u8], from: usize) -> Option<u8> {
  b.get(from..)?.iter().copied().find(|c| !c.is_ascii_whitespace())
}

fn last_significant(out: &[u8]) -> Option<u8> {
  out.iter().rev().copied().find(|c| !c.is_ascii_whitespace())
}

fn at_value_position(out: &[u8]) -> bool {
  matches!(last_significant(out), Some(b'{') | Some(b'[') | Some(b',') | Some(b':'))
}

fn at_key_position(out: &[u8], closers: &[u8]) -> bool {
  closers.last() == Some(&b'}') && matches!(last_significant(out), Some(b'{') | Some(b','))
}

/// A quote closes a single-quoted literal only when structure follows it;
/// otherwise it is an apostrophe inside the text.
fn closes_single(b: &[u8], from: usize) -> bool {
  matches!(next_significant(b, from), None | Some(b',') | Some(b'}') | Some(b']') | Some(b':'))
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn ident_end(b: &[u8], from: usize) -> usize {
  let mut end = from;
  while end < b.len() && (b[end].is_ascii_alphanumeric() || b[end] == b'_' || b[end] == b'$') {
    end += 1;
  }
  end
}
