use std::env;

use crate::{
  align,
  block::{MIN_BLOCK, WSIZE},
};

/// Bytes requested from the arena when no free block fits a small request.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 8;

/// Largest chunk no arena could ever hand out.
const MAX_CHUNK_SIZE: usize = isize::MAX as usize & !(WSIZE - 1);

/// Heap tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum arena extension, in bytes.
  pub chunk_size: usize,
  /// Run the validator after every mutating operation and abort on corruption.
  pub check_each_op: bool,
  /// Emit a tracing event per allocate/release/reallocate/extend.
  pub log_events: bool,
}

impl HeapConfig {
  pub const fn new() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      check_each_op: false,
      log_events: true,
    }
  }

  /// Reads overrides from the environment:
  ///
  /// - `SEGFIT_CHUNK_SIZE`: chunk size in bytes
  /// - `SEGFIT_CHECK_HEAP`: `1`/`true` to validate after every operation
  /// - `SEGFIT_LOG_EVENTS`: `0`/`false` to silence per-operation events
  ///
  /// Unset or unparsable variables keep their defaults.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::new();

    if let Some(chunk_size) = lookup("SEGFIT_CHUNK_SIZE").and_then(|v| v.trim().parse().ok()) {
      config.chunk_size = chunk_size;
    }

    if let Some(check) = lookup("SEGFIT_CHECK_HEAP").as_deref().and_then(parse_flag) {
      config.check_each_op = check;
    }

    if let Some(log) = lookup("SEGFIT_LOG_EVENTS").as_deref().and_then(parse_flag) {
      config.log_events = log;
    }

    config
  }

  pub const fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub const fn with_check_each_op(
    mut self,
    check_each_op: bool,
  ) -> Self {
    self.check_each_op = check_each_op;
    self
  }

  pub const fn with_log_events(
    mut self,
    log_events: bool,
  ) -> Self {
    self.log_events = log_events;
    self
  }

  /// Chunk size in words, word aligned, never below one minimum block and
  /// never above `isize::MAX` bytes.
  pub(crate) fn chunk_words(&self) -> usize {
    align!(self.chunk_size.min(MAX_CHUNK_SIZE)).max(MIN_BLOCK) / WSIZE
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}

fn parse_flag(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = HeapConfig::default();

    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    assert!(!config.check_each_op);
    assert!(config.log_events);
  }

  #[test]
  fn test_chunk_words_rounding() {
    assert_eq!(HeapConfig::new().chunk_words(), DEFAULT_CHUNK_SIZE / WSIZE);
    assert_eq!(HeapConfig::new().with_chunk_size(1).chunk_words(), MIN_BLOCK / WSIZE);
    assert_eq!(HeapConfig::new().with_chunk_size(4097).chunk_words(), align!(4097) / WSIZE);
  }

  #[test]
  fn test_chunk_words_saturates() {
    let words = HeapConfig::new().with_chunk_size(usize::MAX).chunk_words();

    assert_eq!(words, MAX_CHUNK_SIZE / WSIZE);
    assert!(words.checked_mul(WSIZE).is_some());
  }

  #[test]
  fn test_from_lookup() {
    let vars = [
      ("SEGFIT_CHUNK_SIZE", " 4096 "),
      ("SEGFIT_CHECK_HEAP", "yes"),
      ("SEGFIT_LOG_EVENTS", "OFF"),
    ];
    let config = HeapConfig::from_lookup(|key| {
      vars
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
    });

    assert_eq!(
      config,
      HeapConfig {
        chunk_size: 4096,
        check_each_op: true,
        log_events: false,
      }
    );
  }

  #[test]
  fn test_from_lookup_keeps_defaults_on_bad_values() {
    let config = HeapConfig::from_lookup(|key| match key {
      "SEGFIT_CHUNK_SIZE" => Some("lots".to_string()),
      "SEGFIT_CHECK_HEAP" => Some("maybe".to_string()),
      _ => None,
    });

    assert_eq!(config, HeapConfig::default());
  }

  #[test]
  fn test_parse_flag() {
    assert_eq!(parse_flag("1"), Some(true));
    assert_eq!(parse_flag(" TRUE "), Some(true));
    assert_eq!(parse_flag("off"), Some(false));
    assert_eq!(parse_flag("maybe"), None);
  }
}
