//! Normalization of raw model text before structural parsing.
//!
//! Only noise around the JSON payload is touched: fences, typographic
//! punctuation, mis-decoded UTF-8, stray whitespace. Braces, straight quotes,
//! colons and commas always survive unchanged.
//!
//! Typographic double quotes depend on where they sit. Between tokens they
//! stand in for JSON delimiters and become `"`. Inside a string opened by a
//! straight quote they are content and become `\"`, so the literal stays
//! well formed.

use std::sync::OnceLock;

use regex::Regex;

/// Inputs above this size take the single-pass variant.
pub const LARGE_INPUT_THRESHOLD: usize = 1024 * 1024;

// UTF-8 punctuation decoded as Windows-1252 ("â€œ", "â€™", ...). Longest first;
// dashes before quotes so a repaired quote never completes another sequence.
// Double quotes map back to their typographic form and are placed by
// `normalize_chars`.
const MOJIBAKE: &[(&str, &str)] = &[
  ("\u{e2}\u{20ac}\u{201d}", "-"),
  ("\u{e2}\u{20ac}\u{201c}", "-"),
  ("\u{e2}\u{20ac}\u{153}", "\u{201C}"),
  ("\u{e2}\u{20ac}\u{9d}", "\u{201D}"),
  ("\u{e2}\u{20ac}\u{2dc}", "'"),
  ("\u{e2}\u{20ac}\u{2122}", "'"),
  ("\u{e2}\u{20ac}\u{a6}", "..."),
  ("\u{c2}\u{a0}", " "),
  ("\u{e2}\u{20ac}", "\u{201D}"),
];

const FENCE_TAG_CHARS: &str = "+#.-_";

pub fn sanitize(raw: &str) -> String {
  if raw.trim().is_empty() {
    return String::new();
  }
  if raw.len() > LARGE_INPUT_THRESHOLD {
    return sanitize_large(raw);
  }

  let text = strip_fences(raw);
  let text = fix_mojibake(&text);
  let text = normalize_chars(&text);
  let text = strip_inline_backticks(&text);
  collapse_blank_lines(&text)
}

/// Single pass over characters plus one precompiled regex.
/// Skips the blank-line and inline-backtick passes of the full pipeline.
pub fn sanitize_large(raw: &str) -> String {
  static NOISE: OnceLock<Option<Regex>> = OnceLock::new();
  let re = NOISE.get_or_init(|| {
    let mojibake = MOJIBAKE.iter().map(|(from, _)| regex::escape(from)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"```[A-Za-z0-9+#._-]*|{mojibake}")).ok()
  });
  let Some(re) = re else {
    return normalize_chars(&fix_mojibake(&strip_fences(raw))).trim().to_string();
  };

  let text = re.replace_all(raw, |caps: &regex::Captures| {
    let m = &caps[0];
    if m.starts_with("```") {
      return String::new();
    }
    MOJIBAKE
      .iter()
      .find(|(from, _)| *from == m)
      .map(|(_, to)| to.to_string())
      .unwrap_or_default()
  });
  normalize_chars(&text).trim().to_string()
}

fn is_smart_double_quote(ch: char) -> bool {
  matches!(ch, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}')
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteState {
  Outside,
  /// Opened by a straight quote; only a straight quote closes it.
  Straight,
  /// Opened by a typographic quote; either kind closes it.
  Smart,
}

/// Smart punctuation, invisible characters and CR/CRLF line endings.
fn normalize_chars(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars().peekable();
  let mut quote = QuoteState::Outside;
  let mut escaped = false;
  while let Some(ch) = chars.next() {
    if quote != QuoteState::Outside {
      if escaped {
        escaped = false;
        if is_smart_double_quote(ch) {
          out.push('"');
          continue;
        }
      } else if ch == '\\' {
        escaped = true;
        out.push(ch);
        continue;
      } else if ch == '"' {
        quote = QuoteState::Outside;
        out.push(ch);
        continue;
      } else if is_smart_double_quote(ch) {
        if quote == QuoteState::Smart {
          quote = QuoteState::Outside;
          out.push('"');
        } else {
          out.push_str("\\\"");
        }
        continue;
      }
    } else if ch == '"' {
      quote = QuoteState::Straight;
      out.push(ch);
      continue;
    } else if is_smart_double_quote(ch) {
      quote = QuoteState::Smart;
      out.push('"');
      continue;
    }

    match ch {
      '\r' => {
        if chars.peek() != Some(&'\n') {
          out.push('\n');
        }
      }
      '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => out.push('\''),
      '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}' => out.push('-'),
      '\u{2026}' => out.push_str("..."),
      '\u{00A0}' | '\u{2007}' | '\u{2009}' | '\u{202F}' => out.push(' '),
      '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
      _ => out.push(ch),
    }
  }
  out
}

fn fix_mojibake(s: &str) -> String {
  if !s.contains('\u{e2}') && !s.contains('\u{c2}') {
    return s.to_string();
  }
  let mut out = s.to_string();
  for (from, to) in MOJIBAKE {
    if out.contains(from) {
      out = out.replace(from, to);
    }
  }
  out
}

/// Remove ``` markers; an opening fence also loses its language tag.
fn strip_fences(s: &str) -> String {
  if !s.contains("```") {
    return s.to_string();
  }
  let mut out = String::with_capacity(s.len());
  let mut rest = s;
  let mut opening = true;
  while let Some(pos) = rest.find("```") {
    out.push_str(&rest[..pos]);
    rest = &rest[pos + 3..];
    if opening {
      let tag_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || FENCE_TAG_CHARS.contains(*c)))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
      rest = &rest[tag_len..];
    }
    opening = !opening;
  }
  out.push_str(rest);
  out
}

/// Backticks outside double-quoted strings are markdown, not payload.
fn strip_inline_backticks(s: &str) -> String {
  if !s.contains('`') {
    return s.to_string();
  }
  let mut out = String::with_capacity(s.len());
  let mut in_string = false;
  let mut escaped = false;
  for ch in s.chars() {
    if in_string {
      out.push(ch);
      if escaped {
        escaped = false;
      } else if ch == '\\' {
        escaped = true;
      } else if ch == '"' {
        in_string = false;
      }
      continue;
    }
    match ch {
      '`' => {}
      '"' => {
        in_string = true;
        out.push(ch);
      }
      _ => out.push(ch),
    }
  }
  out
}

fn collapse_blank_lines(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut blank_run = 0usize;
  for line in s.split('\n') {
    let line = line.trim_end();
    if line.is_empty() {
      blank_run += 1;
      if blank_run > 1 {
        continue;
      }
    } else {
      blank_run = 0;
    }
    out.push_str(line);
    out.push('\n');
  }
  out.trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  const FIXTURES: &[&str] = &[
    "```json\n{\"title\": \"Two Sum\"}\n```",
    "Here you go:\r\n\r\n\r\n```javascript\r\n{ “title”: “Sum”, ‘a’: 1 }\r\n```\r\nEnjoy…",
    "{\"description\": \"Use `map` here\"} and `inline` noise",
    "\u{e2}\u{20ac}\u{153}quoted\u{e2}\u{20ac}\u{9d} and it\u{e2}\u{20ac}\u{2122}s a \u{e2}\u{20ac}\u{201d}dash\u{c2}\u{a0}text",
    "\u{FEFF}{\"a\":\u{00A0}1,\u{200B}\"b\": 2}",
    "   \n\t  ",
    "plain text",
  ];

  #[test]
  fn strips_fences_and_language_tags() {
    assert_eq!(sanitize("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(sanitize("```{\"a\": 1}```"), "{\"a\": 1}");
  }

  #[test]
  fn normalizes_typographic_punctuation() {
    let out = sanitize("{ “title”: ‘x’ — y… }");
    assert_eq!(out, "{ \"title\": 'x' - y... }");
  }

  #[test]
  fn typographic_quotes_inside_strings_stay_content() {
    let input = "{\"title\": \"Echo\", \"description\": \"Return the word “hello” when asked.\"}";
    let out = sanitize(input);
    let v: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(v["description"], "Return the word \"hello\" when asked.");
    assert_eq!(sanitize(&out), out);

    let mis_decoded = "{\"description\": \"Say \u{e2}\u{20ac}\u{153}hi\u{e2}\u{20ac}\u{9d} back\"}";
    let v: serde_json::Value = serde_json::from_str(&sanitize(mis_decoded)).unwrap();
    assert_eq!(v["description"], "Say \"hi\" back");
  }

  #[test]
  fn smart_quoted_delimiters_become_json() {
    let v: serde_json::Value = serde_json::from_str(&sanitize("{“a”: “b”, \"c\": \"it’s “d”\"}")).unwrap();
    assert_eq!(v["a"], "b");
    assert_eq!(v["c"], "it's \"d\"");
  }

  #[test]
  fn fixes_mojibake_quotes_and_dashes() {
    let out = sanitize("\u{e2}\u{20ac}\u{153}hi\u{e2}\u{20ac}\u{9d} it\u{e2}\u{20ac}\u{2122}s \u{e2}\u{20ac}\u{201d} \u{e2}\u{20ac}\u{201c}");
    assert_eq!(out, "\"hi\" it's - -");
  }

  #[test]
  fn keeps_backticks_inside_strings() {
    let out = sanitize("`{\"code\": \"const s = `x`;\"}`");
    assert_eq!(out, "{\"code\": \"const s = `x`;\"}");
  }

  #[test]
  fn normalizes_newlines_and_collapses_blank_runs() {
    assert_eq!(sanitize("a\r\n\r\n\r\n\rb  \n"), "a\n\nb");
  }

  #[test]
  fn empty_or_blank_input_yields_empty() {
    assert_eq!(sanitize(""), "");
    assert_eq!(sanitize(" \n\t "), "");
  }

  #[test]
  fn sanitize_is_idempotent() {
    for fx in FIXTURES {
      let once = sanitize(fx);
      assert_eq!(sanitize(&once), once, "fixture {fx:?}");
    }
  }

  #[test]
  fn json_significant_characters_survive() {
    let input = "{\"a\": [1, 2], \"b\": {\"c\": \"d\"}}";
    assert_eq!(sanitize(input), input);
  }

  #[test]
  fn large_variant_handles_fences_and_quotes() {
    let body = format!("```json\n{{\"title\": “Big”, \"pad\": \"{}\"}}\n```", "x".repeat(64));
    let out = sanitize_large(&body);
    assert!(out.starts_with("{\"title\": \"Big\""));
    assert!(out.ends_with('}'));
    assert!(!out.contains("```"));

    let quoted = format!("{{\"description\": \"the “{}” word\"}}", "z".repeat(16));
    let v: serde_json::Value = serde_json::from_str(&sanitize_large(&quoted)).unwrap();
    assert_eq!(v["description"], format!("the \"{}\" word", "z".repeat(16)));
  }

  #[test]
  fn oversized_input_uses_single_pass_variant() {
    let body = format!("```json\n{{\"pad\": \"{}\"}}\n```", "y".repeat(LARGE_INPUT_THRESHOLD));
    let out = sanitize(&body);
    assert!(out.starts_with("{\"pad\""));
    assert!(out.ends_with("\"}"));
  }
}
