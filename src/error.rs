use std::io;

use thiserror::Error;

/// Failure to grow the backing arena.
#[derive(Debug, Error)]
pub enum ArenaError {
  #[error("failed to reserve arena memory: {0}")]
  Reserve(#[source] io::Error),

  #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
  Exhausted { requested: usize, remaining: usize },

  #[error("arena break moved by a third party: expected {expected:#x}, found {found:#x}")]
  Discontiguous { expected: usize, found: usize },

  #[error("extension of {requested} bytes does not fit the platform break increment")]
  TooLarge { requested: usize },
}

/// Why an address handed to `release`/`reallocate` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFault {
  OutOfBounds,
  Misaligned,
  NotAllocated,
}

#[derive(Debug, Error)]
pub enum HeapError {
  #[error(transparent)]
  Arena(#[from] ArenaError),

  #[error("invalid block address {addr:#x}: {fault:?}")]
  InvalidAddress { addr: usize, fault: AddressFault },

  #[error("allocation of {count} x {elem_size} bytes overflows usize")]
  SizeOverflow { count: usize, elem_size: usize },

  #[error("request of {size} bytes exceeds the largest representable block")]
  RequestTooLarge { size: usize },
}

/// A structural invariant the heap validator found broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("prologue block corrupted: header {header:#x}, footer {footer:#x}")]
  Prologue { header: usize, footer: usize },

  #[error("epilogue header corrupted at {addr:#x}: {header:#x}")]
  Epilogue { addr: usize, header: usize },

  #[error("block {addr:#x} is not word aligned")]
  Misaligned { addr: usize },

  #[error("block {addr:#x} with size {size} runs past the arena end")]
  OutOfBounds { addr: usize, size: usize },

  #[error("block {addr:#x} has size {size}, below the minimum block")]
  Undersized { addr: usize, size: usize },

  #[error("free block {addr:#x}: header {header:#x} disagrees with footer {footer:#x}")]
  TagMismatch { addr: usize, header: usize, footer: usize },

  #[error("block {addr:#x}: prev_alloc bit is {recorded} but predecessor allocation is {actual}")]
  PrevAlloc { addr: usize, recorded: bool, actual: bool },

  #[error("free blocks {first:#x} and {second:#x} are adjacent and were not coalesced")]
  Uncoalesced { first: usize, second: usize },

  #[error("bucket {bucket}: link to {addr:#x} leaves the heap")]
  LinkOutOfBounds { bucket: usize, addr: usize },

  #[error("bucket {bucket}: list node {addr:#x} is allocated")]
  AllocatedInList { bucket: usize, addr: usize },

  #[error("bucket {bucket}: links around {addr:#x} are not symmetric")]
  LinkAsymmetry { bucket: usize, addr: usize },

  #[error("block {addr:#x} of size {size} is filed under bucket {bucket}, expected {expected}")]
  WrongBucket { addr: usize, size: usize, bucket: usize, expected: usize },

  #[error("bucket {bucket} is not sorted by size at {addr:#x}")]
  Unsorted { bucket: usize, addr: usize },

  #[error("{in_heap} free blocks in the heap but {in_index} in the free lists")]
  FreeCount { in_heap: usize, in_index: usize },
}
