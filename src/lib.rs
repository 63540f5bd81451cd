//! # segfit - A Segregated-Fit Memory Allocator
//!
//! This crate provides a general purpose **boundary-tag allocator** with
//! segregated free lists, managing one contiguous region of memory that
//! grows at its high end (the process data segment via `sbrk`, or a
//! reserved `mmap` region).
//!
//! ## Overview
//!
//! The heap is a sequence of blocks that exactly tile the arena, bounded by
//! two permanently allocated sentinels:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            ARENA                                     │
//!   │                                                                      │
//!   │   ┌─────┬──────┬──────────┬────────┬──────────────┬────────┬─────┐   │
//!   │   │ pad │ PRO  │  alloc   │  free  │    alloc     │  free  │ EPI │   │
//!   │   └─────┴──────┴──────────┴────────┴──────────────┴────────┴─────┘   │
//!   │   ▲                                                              ▲   │
//!   │   │                                                              │   │
//!   │  low                                                       high  │   │
//!   │                                                     (grows here) │   │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   PRO = prologue (zero payload), EPI = epilogue (zero size header).
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segfit
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── arena      - Arena trait, MemArena (mmap) and SbrkArena (sbrk)
//!   ├── block      - Boundary tags and raw block access
//!   ├── freelist   - Size classes and the segregated free lists
//!   ├── heap       - Heap: allocate, release, reallocate, zero_allocate
//!   ├── check      - Heap validator
//!   ├── config     - HeapConfig
//!   ├── error      - Error types
//!   ├── logging    - tracing events
//!   └── global     - GlobalHeap, a GlobalAlloc adapter
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segfit::{Heap, HeapConfig, MemArena};
//!
//! let arena = MemArena::with_capacity(1 << 20).unwrap();
//! let mut heap = Heap::new(arena, HeapConfig::default()).unwrap();
//!
//! let ptr = heap.allocate(40).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 40);
//!
//!     let ptr = heap.reallocate(ptr.as_ptr(), 200).unwrap();
//!     assert_eq!(*ptr.as_ptr().add(39), 0xAB);
//!
//!     heap.release(ptr.as_ptr());
//! }
//!
//! assert!(heap.check_heap(true).is_ok());
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a one-word header packing its size and two flag
//! bits. Free blocks also carry a footer (so the block after them can find
//! their start) and two links threading them into a free list:
//!
//! ```text
//!   Allocated Block:
//!   ┌──────────────────┬────────────────────────────────────────┐
//!   │ size | p | 1     │           payload (caller owned)       │
//!   └──────────────────┴────────────────────────────────────────┘
//!                      ▲
//!                      └── Pointer returned to user
//!
//!   Free Block:
//!   ┌──────────────────┬────────┬────────┬─────────┬───────────┐
//!   │ size | p | 0     │  next  │  prev  │  ...    │ size|p|0  │
//!   └──────────────────┴────────┴────────┴─────────┴───────────┘
//!     header            links (arena offsets)       footer
//!
//!   p = previous block allocated
//! ```
//!
//! Free blocks are filed by size into buckets:
//!
//! ```text
//!   Buckets:
//!
//!   [ 32 ][ 40 ][ 48 ] ... [ 256 ]   exact sizes, one size per bucket
//!   [ 257-512 ][ 513-1K ] ... [ >64K ]   powers of two, sorted ascending
//! ```
//!
//! An allocation searches from its own bucket upward and takes the first
//! block that fits, which within a sorted bucket is the best fit. Leftovers
//! of at least one minimum block are split off and filed again; releasing a
//! block merges it with free neighbours on both sides.
//!
//! ## Limitations
//!
//! - **Single-threaded core**: [`Heap`] needs `&mut self`; share it through
//!   a lock such as [`GlobalHeap`]
//! - **Word alignment**: payloads are aligned to `usize`; larger alignments
//!   go through [`GlobalHeap`]'s over-allocation
//! - **Never shrinks**: memory is never handed back to the arena
//! - **Unix-only**: arenas use `libc` (`mmap`, `sbrk`)
//!
//! ## Safety
//!
//! Releasing or reallocating takes raw addresses, so those operations are
//! `unsafe`: an address inside the heap that was not returned by it is not
//! always detectable.

pub mod align;
pub mod arena;
mod block;
mod check;
pub mod config;
pub mod error;
mod freelist;
pub mod global;
mod heap;
pub mod logging;

pub use arena::{Arena, MemArena, SbrkArena};
pub use block::{MIN_BLOCK, WSIZE};
pub use config::{DEFAULT_CHUNK_SIZE, HeapConfig};
pub use error::{AddressFault, ArenaError, Corruption, HeapError};
pub use global::GlobalHeap;
pub use heap::{Heap, HeapStats, METADATA_OVERHEAD};
