//! Allocator events on top of `tracing`.
//!
//! Nothing here prints on its own; install a subscriber (for instance with
//! [`init_logging`]) to see the events. Keep per-operation events off
//! ([`HeapConfig::log_events`](crate::HeapConfig::log_events)) when the heap
//! is the global allocator and the subscriber allocates.

use tracing::{debug, error, trace, warn};

use crate::error::{AddressFault, Corruption};

/// Installs a compact fmt subscriber filtered by `RUST_LOG`
/// (default `segfit=info`). Later calls are no-ops.
pub fn init_logging() {
  use tracing_subscriber::{EnvFilter, fmt};

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("segfit=info"));

  fmt()
    .with_env_filter(filter)
    .compact()
    .try_init()
    .ok();
}

#[inline]
pub fn log_allocation(
  requested: usize,
  block_size: usize,
  addr: *const u8,
) {
  trace!(
    target: "segfit::heap",
    requested,
    block_size,
    addr = ?addr,
    "allocated"
  );
}

#[inline]
pub fn log_release(
  block_size: usize,
  addr: *const u8,
) {
  trace!(target: "segfit::heap", block_size, addr = ?addr, "released");
}

#[inline]
pub fn log_reallocation(
  old: *const u8,
  new: *const u8,
  requested: usize,
  in_place: bool,
) {
  trace!(
    target: "segfit::heap",
    old = ?old,
    new = ?new,
    requested,
    in_place,
    "reallocated"
  );
}

#[inline]
pub fn log_extension(
  bytes: usize,
  high: usize,
) {
  trace!(target: "segfit::heap", bytes, high = format_args!("{high:#x}"), "arena extended");
}

#[inline]
pub fn log_ignored_address(
  op: &'static str,
  addr: usize,
  fault: AddressFault,
) {
  debug!(target: "segfit::heap", op, addr = format_args!("{addr:#x}"), ?fault, "ignored invalid address");
}

#[inline]
pub fn log_exhausted(requested: usize) {
  warn!(target: "segfit::heap", requested, "arena cannot grow");
}

#[inline]
pub fn log_overflow(
  count: usize,
  elem_size: usize,
) {
  warn!(target: "segfit::heap", count, elem_size, "zero_allocate size overflows");
}

#[inline]
pub fn log_corruption(
  op: &'static str,
  corruption: &Corruption,
) {
  error!(target: "segfit::check", op, %corruption, "heap corrupted");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_logging_functions() {
    init_logging();
    init_logging();

    log_allocation(40, 48, std::ptr::null());
    log_release(48, std::ptr::null());
    log_reallocation(std::ptr::null(), std::ptr::null(), 80, true);
    log_extension(256, 0x1000);
    log_ignored_address("release", 0x10, AddressFault::Misaligned);
    log_exhausted(4096);
    log_overflow(usize::MAX, 2);
    log_corruption("release", &Corruption::FreeCount { in_heap: 1, in_index: 0 });
  }
}
