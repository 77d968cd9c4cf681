//! Resource bounds for untrusted model output.
//!
//! Oversized responses are rejected before any parsing. Large-but-acceptable
//! text is walked in fixed-size chunks so scanners never need a second copy.

use crate::error::GenerationError;

pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
pub const STREAMING_THRESHOLD: usize = 64 * 1024;
pub const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct MemoryGuard {
  pub max_response_bytes: usize,
  pub streaming_threshold: usize,
  pub chunk_size: usize,
}

impl Default for MemoryGuard {
  fn default() -> Self {
    Self {
      max_response_bytes: MAX_RESPONSE_BYTES,
      streaming_threshold: STREAMING_THRESHOLD,
      chunk_size: CHUNK_SIZE,
    }
  }
}

impl MemoryGuard {
  pub fn with_max_response_bytes(max_response_bytes: usize) -> Self {
    Self { max_response_bytes, ..Self::default() }
  }

  pub fn check_response_size(&self, text: &str) -> Result<(), GenerationError> {
    if text.len() > self.max_response_bytes {
      return Err(GenerationError::ResponseTooLarge { size: text.len(), limit: self.max_response_bytes });
    }
    Ok(())
  }

  pub fn should_stream(&self, len: usize) -> bool {
    len > self.streaming_threshold
  }

  /// Borrowed chunks of at most `chunk_size` bytes, split on char boundaries.
  pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
    Chunks { rest: text, size: self.chunk_size.max(4) }
  }
}

pub struct Chunks<'a> {
  rest: &'a str,
  size: usize,
}

impl<'a> Iterator for Chunks<'a> {
  type Item = &'a str;

  fn next(&mut self) -> Option<&'a str> {
    if self.rest.is_empty() {
      return None;
    }
    let mut cut = self.size.min(self.rest.len());
    while !self.rest.is_char_boundary(cut) {
      cut += 1;
    }
    let (head, tail) = self.rest.split_at(cut);
    self.rest = tail;
    Some(head)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_oversized_responses() {
    let guard = MemoryGuard::with_max_response_bytes(8);
    assert!(guard.check_response_size("12345678").is_ok());
    let err = guard.check_response_size("123456789").unwrap_err();
    assert_eq!(err, GenerationError::ResponseTooLarge { size: 9, limit: 8 });
  }

  #[test]
  fn chunks_cover_text_without_splitting_chars() {
    let guard = MemoryGuard { chunk_size: 5, ..MemoryGuard::default() };
    let text = "abc“def”ghi€jk";
    let parts: Vec<&str> = guard.chunks(text).collect();
    assert!(parts.len() > 1);
    assert_eq!(parts.concat(), text);
  }
}
