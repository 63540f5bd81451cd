use std::ptr::{self, NonNull};

use crate::{
  align,
  align::is_aligned,
  arena::Arena,
  block::{BlockPtr, DSIZE, MIN_BLOCK, RawHeap, WSIZE, pack},
  config::HeapConfig,
  error::{AddressFault, HeapError},
  freelist::FreeIndex,
  logging,
};

/// Bytes of the arena that never belong to a block: alignment padding,
/// prologue header and footer, epilogue header.
pub const METADATA_OVERHEAD: usize = 4 * WSIZE;

/// Block and byte accounting from one walk over the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
}

/// Segregated-fit heap over one growable arena.
///
/// ```text
///   low                                                              high
///   ┌─────┬──────────┬────────────┬──────────┬─────────┬───────┬───────┐
///   │ pad │ prologue │  block ... │  block   │   ...   │ block │ epi-  │
///   │     │  hdr ftr │ hdr payload│ hdr  ftr │         │       │ logue │
///   └─────┴──────────┴────────────┴──────────┴─────────┴───────┴───────┘
/// ```
///
/// Not thread safe; wrap it in a lock (see [`GlobalHeap`](crate::GlobalHeap))
/// to share it.
pub struct Heap<A: Arena> {
  arena: A,
  pub(crate) index: FreeIndex,
  pub(crate) prologue: BlockPtr,
  config: HeapConfig,
}

impl<A: Arena> Heap<A> {
  /// Lays out the prologue and epilogue at the arena's current high end and
  /// extends it by one chunk.
  pub fn new(
    mut arena: A,
    config: HeapConfig,
  ) -> Result<Self, HeapError> {
    let start = arena.extend(METADATA_OVERHEAD)?.as_ptr() as usize;
    debug_assert!(is_aligned(start), "arena start {start:#x} is not word aligned");

    let mut heap = Self {
      arena,
      index: FreeIndex::new(),
      prologue: BlockPtr::new(start + DSIZE),
      config,
    };

    let raw = heap.raw();
    raw.write(start, 0);
    raw.write(start + WSIZE, pack(DSIZE, true, true));
    raw.write(start + DSIZE, pack(DSIZE, true, true));
    raw.write(start + 3 * WSIZE, pack(0, true, true));

    heap.extend(heap.config.chunk_words())?;
    heap.check_after("init");

    Ok(heap)
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  pub fn into_arena(self) -> A {
    self.arena
  }

  pub(crate) fn raw(&self) -> RawHeap {
    // SAFETY: the arena owns `[low, high)` for as long as `self` lives.
    unsafe { RawHeap::new(self.arena.low(), self.arena.high()) }
  }

  pub(crate) fn first_block(&self) -> BlockPtr {
    BlockPtr::new(self.prologue.addr() + DSIZE)
  }

  /// Returns `size` bytes of word-aligned memory, or `None` for a zero size
  /// or when the arena cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size == 0 {
      return None;
    }

    let bp = self.allocate_block(size).ok()?;
    self.check_after("allocate");

    NonNull::new(bp.as_ptr())
  }

  /// Returns a block previously handed out by this heap.
  ///
  /// Null, out-of-heap, misaligned and already-free addresses are ignored.
  ///
  /// # Safety
  ///
  /// A non-null `ptr` inside the heap must be an address returned by this
  /// heap, and must not be used after this call.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if let Err(HeapError::InvalidAddress { addr, fault }) = unsafe { self.try_release(ptr) } {
      if self.config.log_events {
        logging::log_ignored_address("release", addr, fault);
      }
    }
  }

  /// Like [`release`](Self::release), but reports rejected addresses.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](Self::release).
  pub unsafe fn try_release(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), HeapError> {
    if ptr.is_null() {
      return Ok(());
    }

    let bp = self.validate_address(ptr)?;
    let raw = self.raw();
    let size = raw.size(bp);

    self.free_block(&raw, bp);

    if self.config.log_events {
      logging::log_release(size, ptr);
    }
    self.check_after("release");

    Ok(())
  }

  /// Resizes a block, in place when possible.
  ///
  /// A zero `new_size` releases `ptr` and returns `None`; a null `ptr`
  /// allocates. On failure the original block is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](Self::release); on success the old
  /// address must no longer be used unless it is the one returned.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Option<NonNull<u8>> {
    match unsafe { self.try_reallocate(ptr, new_size) } {
      Ok(new) => new,
      Err(HeapError::InvalidAddress { addr, fault }) => {
        if self.config.log_events {
          logging::log_ignored_address("reallocate", addr, fault);
        }
        None
      }
      Err(_) => None,
    }
  }

  /// Like [`reallocate`](Self::reallocate), but reports why it failed.
  ///
  /// # Safety
  ///
  /// Same contract as [`reallocate`](Self::reallocate).
  pub unsafe fn try_reallocate(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<Option<NonNull<u8>>, HeapError> {
    if new_size == 0 {
      unsafe { self.try_release(ptr)? };
      return Ok(None);
    }

    if ptr.is_null() {
      let bp = self.allocate_block(new_size)?;
      self.check_after("reallocate");
      return Ok(NonNull::new(bp.as_ptr()));
    }

    let bp = self.validate_address(ptr)?;
    let asize = adjusted_size(new_size)?;
    let raw = self.raw();
    let size = raw.size(bp);

    let new_bp = if asize <= size {
      self.split(&raw, bp, asize);
      bp
    } else if let Some(merged) = self.grow_in_place(&raw, bp, asize) {
      merged
    } else {
      let new_bp = self.allocate_block(new_size)?;
      let raw = self.raw();

      // SAFETY: both blocks are live, distinct and at least this long.
      unsafe {
        ptr::copy_nonoverlapping(bp.as_ptr(), new_bp.as_ptr(), (size - WSIZE).min(new_size));
      }
      self.free_block(&raw, bp);
      new_bp
    };

    if self.config.log_events {
      logging::log_reallocation(ptr, new_bp.as_ptr(), new_size, new_bp == bp);
    }
    self.check_after("reallocate");

    Ok(NonNull::new(new_bp.as_ptr()))
  }

  /// Allocates `count * elem_size` zeroed bytes; `None` on overflow, a zero
  /// total, or exhaustion.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Option<NonNull<u8>> {
    self.try_zero_allocate(count, elem_size).ok().flatten()
  }

  pub fn try_zero_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<Option<NonNull<u8>>, HeapError> {
    let Some(bytes) = count.checked_mul(elem_size) else {
      if self.config.log_events {
        logging::log_overflow(count, elem_size);
      }
      return Err(HeapError::SizeOverflow { count, elem_size });
    };

    if bytes == 0 {
      return Ok(None);
    }

    let bp = self.allocate_block(bytes)?;
    // SAFETY: the block's payload holds at least `bytes` bytes.
    unsafe { bp.as_ptr().write_bytes(0, bytes) };
    self.check_after("zero_allocate");

    Ok(NonNull::new(bp.as_ptr()))
  }

  /// Payload bytes available behind a live allocation.
  ///
  /// # Safety
  ///
  /// A non-null `ptr` inside the heap must be an address returned by this
  /// heap and not yet released.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> Option<usize> {
    let bp = self.validate_address(ptr).ok()?;
    Some(self.raw().size(bp) - WSIZE)
  }

  /// Walks the heap and tallies blocks. Does not validate anything; use
  /// [`check_heap`](Self::check_heap) for that.
  pub fn stats(&self) -> HeapStats {
    let raw = self.raw();
    let mut stats = HeapStats {
      arena_bytes: self.arena.len(),
      ..HeapStats::default()
    };

    let mut bp = self.first_block();
    while bp.addr() < raw.high() {
      let tag = raw.tag(bp);
      if tag.size == 0 {
        break;
      }

      if tag.alloc {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += tag.size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += tag.size;
      }
      bp = raw.next_physical(bp);
    }

    stats
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<BlockPtr, HeapError> {
    let asize = adjusted_size(size)?;

    let bp = match self.index.find_fit(&self.raw(), asize) {
      Some(bp) => bp,
      None => self.extend(asize.max(self.config.chunk_words() * WSIZE) / WSIZE)?,
    };

    let raw = self.raw();
    self.place(&raw, bp, asize);

    if self.config.log_events {
      logging::log_allocation(size, raw.size(bp), bp.as_ptr());
    }

    Ok(bp)
  }

  /// Grows the arena by `words` (rounded up to even) and returns the
  /// resulting free block, already coalesced and indexed.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<BlockPtr, HeapError> {
    let words = words + words % 2;
    let size = words.checked_mul(WSIZE).ok_or(HeapError::RequestTooLarge { size: words })?;

    let bp = match self.arena.extend(size) {
      Ok(old_high) => BlockPtr::new(old_high.as_ptr() as usize),
      Err(err) => {
        if self.config.log_events {
          logging::log_exhausted(size);
        }
        return Err(err.into());
      }
    };

    let raw = self.raw();
    // The old epilogue header becomes the new block's header.
    let prev_alloc = raw.tag(bp).prev_alloc;
    raw.encode_free(bp, size, prev_alloc);
    raw.encode_allocated(raw.next_physical(bp), 0, false);

    if self.config.log_events {
      logging::log_extension(size, raw.high());
    }

    Ok(self.coalesce(&raw, bp))
  }

  /// Merges the free block `bp` with free physical neighbours, indexes the
  /// result exactly once and returns it.
  fn coalesce(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
  ) -> BlockPtr {
    let tag = raw.tag(bp);
    let next = raw.next_physical(bp);
    let next_tag = raw.tag(next);

    let (bp, size, prev_alloc) = match (tag.prev_alloc, next_tag.alloc) {
      (true, true) => (bp, tag.size, tag.prev_alloc),
      (true, false) => {
        self.index.remove(raw, next);
        (bp, tag.size + next_tag.size, tag.prev_alloc)
      }
      (false, true) => {
        let prev = raw.prev_physical(bp);
        let prev_tag = raw.tag(prev);
        self.index.remove(raw, prev);
        (prev, prev_tag.size + tag.size, prev_tag.prev_alloc)
      }
      (false, false) => {
        let prev = raw.prev_physical(bp);
        let prev_tag = raw.tag(prev);
        self.index.remove(raw, prev);
        self.index.remove(raw, next);
        (prev, prev_tag.size + tag.size + next_tag.size, prev_tag.prev_alloc)
      }
    };

    raw.encode_free(bp, size, prev_alloc);
    self.index.insert(raw, bp);

    bp
  }

  /// Takes an indexed free block and allocates `asize` bytes of it.
  fn place(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
    asize: usize,
  ) {
    self.index.remove(raw, bp);
    self.split(raw, bp, asize);
  }

  /// Marks the unindexed block `bp` allocated at `asize` bytes. A tail of at
  /// least one minimum block goes back to the free lists; anything shorter
  /// stays with the allocation.
  fn split(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
    asize: usize,
  ) {
    let tag = raw.tag(bp);
    debug_assert!(asize <= tag.size);

    let remainder = tag.size - asize;
    if remainder >= MIN_BLOCK {
      raw.encode_allocated(bp, asize, tag.prev_alloc);

      let rest = raw.next_physical(bp);
      raw.encode_free(rest, remainder, true);
      raw.set_prev_alloc(raw.next_physical(rest), false);
      self.coalesce(raw, rest);
    } else {
      raw.encode_allocated(bp, tag.size, tag.prev_alloc);
      raw.set_prev_alloc(raw.next_physical(bp), true);
    }
  }

  /// Absorbs a free physical successor when that makes `bp` big enough.
  fn grow_in_place(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
    asize: usize,
  ) -> Option<BlockPtr> {
    let tag = raw.tag(bp);
    let next = raw.next_physical(bp);
    let next_tag = raw.tag(next);

    if next_tag.alloc || tag.size + next_tag.size < asize {
      return None;
    }

    self.index.remove(raw, next);
    raw.encode_allocated(bp, tag.size + next_tag.size, tag.prev_alloc);
    self.split(raw, bp, asize);

    Some(bp)
  }

  fn free_block(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
  ) {
    let tag = raw.tag(bp);
    raw.encode_free(bp, tag.size, tag.prev_alloc);
    raw.set_prev_alloc(raw.next_physical(bp), false);
    self.coalesce(raw, bp);
  }

  /// Accepts only the payload address of a live block inside the heap.
  fn validate_address(
    &self,
    ptr: *mut u8,
  ) -> Result<BlockPtr, HeapError> {
    let addr = ptr as usize;
    let raw = self.raw();

    let fault = if addr < self.first_block().addr() || addr >= raw.high() {
      AddressFault::OutOfBounds
    } else if !is_aligned(addr) {
      AddressFault::Misaligned
    } else {
      let bp = BlockPtr::new(addr);
      let tag = raw.tag(bp);
      let fits = tag.size >= MIN_BLOCK
        && addr
          .checked_add(tag.size - WSIZE)
          .is_some_and(|end| end <= raw.high());
      if tag.alloc && fits {
        return Ok(bp);
      }
      AddressFault::NotAllocated
    };

    Err(HeapError::InvalidAddress { addr, fault })
  }

  fn check_after(
    &self,
    op: &'static str,
  ) {
    if !self.config.check_each_op {
      return;
    }

    if let Err(corruption) = self.validate() {
      logging::log_corruption(op, &corruption);
      eprintln!("segfit: heap corrupted after {op}: {corruption}");
      std::process::abort();
    }
  }
}

/// Block size for a request: payload plus header, word aligned, at least one
/// minimum block.
pub(crate) fn adjusted_size(size: usize) -> Result<usize, HeapError> {
  if size > isize::MAX as usize - DSIZE {
    return Err(HeapError::RequestTooLarge { size });
  }

  Ok(align!(size + WSIZE).max(MIN_BLOCK))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    arena::MemArena,
    config::DEFAULT_CHUNK_SIZE,
    error::ArenaError,
    freelist::{EXACT_CLASSES, class_of},
  };

  fn heap_with_capacity(capacity: usize) -> Heap<MemArena> {
    let arena = MemArena::with_capacity(capacity).unwrap();
    Heap::new(arena, HeapConfig::new().with_check_each_op(true)).unwrap()
  }

  fn heap() -> Heap<MemArena> {
    heap_with_capacity(1 << 20)
  }

  fn block_size(
    heap: &Heap<MemArena>,
    ptr: NonNull<u8>,
  ) -> usize {
    heap.raw().size(BlockPtr::new(ptr.as_ptr() as usize))
  }

  /// Counts arena extensions and their sizes.
  struct CountingArena {
    inner: MemArena,
    extensions: Vec<usize>,
  }

  impl Arena for CountingArena {
    fn extend(
      &mut self,
      bytes: usize,
    ) -> Result<NonNull<u8>, ArenaError> {
      self.extensions.push(bytes);
      self.inner.extend(bytes)
    }

    fn low(&self) -> usize {
      self.inner.low()
    }

    fn high(&self) -> usize {
      self.inner.high()
    }
  }

  #[test]
  fn test_adjusted_size() {
    assert_eq!(adjusted_size(1).unwrap(), MIN_BLOCK);
    assert_eq!(adjusted_size(MIN_BLOCK - WSIZE).unwrap(), MIN_BLOCK);
    assert_eq!(adjusted_size(40).unwrap(), 48);
    assert_eq!(adjusted_size(41).unwrap(), 56);
    assert!(matches!(adjusted_size(usize::MAX), Err(HeapError::RequestTooLarge { .. })));
  }

  #[test]
  fn test_init_layout() {
    let heap = heap();
    let stats = heap.stats();

    assert_eq!(stats.arena_bytes, METADATA_OVERHEAD + DEFAULT_CHUNK_SIZE);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, DEFAULT_CHUNK_SIZE);
    assert_eq!(stats.allocated_blocks, 0);
    heap.check_heap(true).unwrap();
  }

  #[test]
  fn test_zero_size_is_none() {
    let mut heap = heap();

    assert!(heap.allocate(0).is_none());
    assert!(heap.zero_allocate(0, 8).is_none());
    assert!(heap.zero_allocate(8, 0).is_none());
  }

  #[test]
  fn test_reuse_after_release() {
    let mut heap = heap();

    let p1 = heap.allocate(40).unwrap();
    let p2 = heap.allocate(40).unwrap();
    assert_ne!(p1, p2);
    assert!(p2.as_ptr() as usize >= p1.as_ptr() as usize + block_size(&heap, p1));

    unsafe { heap.release(p1.as_ptr()) };

    let p3 = heap.allocate(40).unwrap();
    assert_eq!(p1, p3);
    heap.check_heap(true).unwrap();
  }

  #[test]
  fn test_allocations_are_aligned_and_writable() {
    let mut heap = heap();
    let mut live = Vec::new();

    for size in [1, 7, 8, 9, 24, 100, 255, 256, 257, 1000, 5000] {
      let ptr = heap.allocate(size).unwrap();
      assert!(is_aligned(ptr.as_ptr() as usize));
      unsafe {
        ptr.as_ptr().write_bytes(size as u8, size);
        assert!(heap.usable_size(ptr.as_ptr()).unwrap() >= size);
      }
      live.push((ptr, size));
    }

    for (ptr, size) in &live {
      let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *size) };
      assert!(bytes.iter().all(|&b| b == *size as u8));
    }
  }

  #[test]
  fn test_shrink_in_place_frees_tail() {
    let mut heap = heap();

    let p = heap.allocate(100).unwrap();
    let before = heap.stats();

    let q = unsafe { heap.reallocate(p.as_ptr(), 50) }.unwrap();
    assert_eq!(p, q);
    assert_eq!(block_size(&heap, q), adjusted_size(50).unwrap());

    let after = heap.stats();
    assert_eq!(after.free_bytes, before.free_bytes + adjusted_size(100).unwrap() - adjusted_size(50).unwrap());
    assert_eq!(after.free_blocks, 1);
    heap.check_heap(true).unwrap();
  }

  #[test]
  fn test_grow_in_place_absorbs_free_successor() {
    let mut heap = heap();

    let p = heap.allocate(40).unwrap();
    let q = heap.allocate(40).unwrap();
    let _guard = heap.allocate(40).unwrap();

    unsafe {
      p.as_ptr().write_bytes(0x5A, 40);
      heap.release(q.as_ptr());
    }

    let grown = unsafe { heap.reallocate(p.as_ptr(), 80) }.unwrap();
    assert_eq!(grown, p);

    let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 40) };
    assert!(bytes.iter().all(|&b| b == 0x5A));
    heap.check_heap(true).unwrap();
  }

  #[test]
  fn test_grow_in_place_splits_remainder() {
    let mut heap = heap();

    let p = heap.allocate(40).unwrap();
    let q = heap.allocate(400).unwrap();
    let _guard = heap.allocate(40).unwrap();
    assert_eq!(q.as_ptr() as usize, p.as_ptr() as usize + block_size(&heap, p));

    let merged = block_size(&heap, p) + block_size(&heap, q);
    unsafe {
      p.as_ptr().write_bytes(0x3C, 40);
      heap.release(q.as_ptr());
    }

    let grown = unsafe { heap.reallocate(p.as_ptr(), 100) }.unwrap();
    assert_eq!(grown, p);
    assert_eq!(block_size(&heap, grown), adjusted_size(100).unwrap());

    let raw = heap.raw();
    let rest = raw.next_physical(BlockPtr::new(grown.as_ptr() as usize));
    let tag = raw.tag(rest);
    assert!(!tag.alloc);
    assert!(tag.prev_alloc);
    assert_eq!(tag.size, merged - adjusted_size(100).unwrap());

    let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 40) };
    assert!(bytes.iter().all(|&b| b == 0x3C));
    heap.validate().unwrap();
  }

  #[test]
  fn test_huge_chunk_size_fails_cleanly() {
    let arena = MemArena::with_capacity(1 << 16).unwrap();
    let config = HeapConfig::new().with_chunk_size(usize::MAX);

    assert!(matches!(
      Heap::new(arena, config),
      Err(HeapError::Arena(ArenaError::Exhausted { .. }))
    ));
  }

  #[test]
  fn test_grow_by_moving_copies_payload() {
    let mut heap = heap();

    let p = heap.allocate(32).unwrap();
    let _blocker = heap.allocate(32).unwrap();

    unsafe {
      for i in 0..32 {
        p.as_ptr().add(i).write(i as u8);
      }
    }

    let moved = unsafe { heap.reallocate(p.as_ptr(), 600) }.unwrap();
    assert_ne!(moved, p);

    let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 32) };
    assert!(bytes.iter().enumerate().all(|(i, &b)| b == i as u8));

    let old = unsafe { heap.try_release(p.as_ptr()) };
    assert!(matches!(
      old,
      Err(HeapError::InvalidAddress {
        fault: AddressFault::NotAllocated,
        ..
      })
    ));
  }

  #[test]
  fn test_reallocate_null_and_zero() {
    let mut heap = heap();

    let p = unsafe { heap.reallocate(ptr::null_mut(), 64) }.unwrap();
    assert!(unsafe { heap.usable_size(p.as_ptr()) }.unwrap() >= 64);

    assert!(unsafe { heap.reallocate(p.as_ptr(), 0) }.is_none());
    assert_eq!(heap.stats().allocated_blocks, 0);
  }

  #[test]
  fn test_reallocate_failure_keeps_old_block() {
    let mut heap = heap_with_capacity(1024);

    let p = heap.allocate(64).unwrap();
    let _blocker = heap.allocate(64).unwrap();
    unsafe { p.as_ptr().write_bytes(0x11, 64) };

    let result = unsafe { heap.try_reallocate(p.as_ptr(), 4096) };
    assert!(matches!(result, Err(HeapError::Arena(ArenaError::Exhausted { .. }))));

    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
    assert!(bytes.iter().all(|&b| b == 0x11));
    assert!(unsafe { heap.usable_size(p.as_ptr()) }.is_some());
  }

  #[test]
  fn test_invalid_releases_are_ignored() {
    let mut heap = heap();
    let p = heap.allocate(64).unwrap();
    let before = heap.stats();

    unsafe {
      heap.release(ptr::null_mut());
      heap.release(p.as_ptr().add(1));
      heap.release(0x10 as *mut u8);
      heap.release(p.as_ptr());
      heap.release(p.as_ptr());
    }

    assert_eq!(heap.stats().allocated_blocks, before.allocated_blocks - 1);

    let faults = unsafe {
      [
        heap.try_release(p.as_ptr().add(1)),
        heap.try_release(0x10 as *mut u8),
        heap.try_release(p.as_ptr()),
      ]
    };
    let faults: Vec<_> = faults
      .into_iter()
      .map(|r| match r {
        Err(HeapError::InvalidAddress { fault, .. }) => fault,
        other => panic!("expected invalid address, got {other:?}"),
      })
      .collect();
    assert_eq!(faults, vec![AddressFault::Misaligned, AddressFault::OutOfBounds, AddressFault::NotAllocated]);

    assert!(unsafe { heap.reallocate(p.as_ptr().add(1), 10) }.is_none());
  }

  #[test]
  fn test_coalesce_two_in_either_order() {
    for reverse in [false, true] {
      let mut heap = heap();
      let a = heap.allocate(40).unwrap();
      let b = heap.allocate(40).unwrap();
      let _c = heap.allocate(40).unwrap();

      unsafe {
        if reverse {
          heap.release(b.as_ptr());
          heap.release(a.as_ptr());
        } else {
          heap.release(a.as_ptr());
          heap.release(b.as_ptr());
        }
      }

      let raw = heap.raw();
      let merged = BlockPtr::new(a.as_ptr() as usize);
      assert!(!raw.tag(merged).alloc);
      assert_eq!(raw.size(merged), 2 * adjusted_size(40).unwrap());
    }
  }

  #[test]
  fn test_coalesce_three_in_any_order() {
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
      let mut heap = heap();
      let blocks: Vec<_> = (0..3).map(|_| heap.allocate(40).unwrap()).collect();
      let _guard = heap.allocate(40).unwrap();

      for i in order {
        unsafe { heap.release(blocks[i].as_ptr()) };
      }

      let raw = heap.raw();
      let merged = BlockPtr::new(blocks[0].as_ptr() as usize);
      assert_eq!(raw.size(merged), 3 * adjusted_size(40).unwrap(), "order {order:?}");
      assert!(!raw.tag(merged).alloc);
    }
  }

  #[test]
  fn test_large_request_extends_once_by_request() {
    let arena = CountingArena {
      inner: MemArena::with_capacity(1 << 16).unwrap(),
      extensions: Vec::new(),
    };
    let mut heap = Heap::new(arena, HeapConfig::new().with_check_each_op(true)).unwrap();
    let before = heap.arena().extensions.len();

    let p = heap.allocate(DEFAULT_CHUNK_SIZE * 2).unwrap();

    let extensions = &heap.arena().extensions[before..];
    assert_eq!(extensions.len(), 1);
    let asize = adjusted_size(DEFAULT_CHUNK_SIZE * 2).unwrap();
    assert!(extensions[0] >= asize && extensions[0] < asize + DSIZE);
    assert!(unsafe { heap.usable_size(p.as_ptr()) }.unwrap() >= DEFAULT_CHUNK_SIZE * 2);
  }

  #[test]
  fn test_zero_allocate() {
    let mut heap = heap();

    let dirty = heap.allocate(80).unwrap();
    unsafe {
      dirty.as_ptr().write_bytes(0xFF, 80);
      heap.release(dirty.as_ptr());
    }

    let p = heap.zero_allocate(10, 8).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 80) };
    assert!(bytes.iter().all(|&b| b == 0));
  }

  #[test]
  fn test_zero_allocate_overflow() {
    let mut heap = heap();

    assert!(heap.zero_allocate(usize::MAX, 2).is_none());
    assert!(matches!(heap.try_zero_allocate(usize::MAX / 2 + 1, 2), Err(HeapError::SizeOverflow { .. })));
  }

  #[test]
  fn test_exhaustion_returns_none() {
    let mut heap = heap_with_capacity(1024);

    assert!(heap.allocate(4096).is_none());

    let p = heap.allocate(64);
    assert!(p.is_some());
  }

  #[test]
  fn test_free_bytes_conserved() {
    let mut heap = heap();
    let mut live = Vec::new();

    for i in 0..40usize {
      live.push(heap.allocate(8 + i * 13).unwrap());
      if i % 3 == 0 {
        let victim = live.remove(live.len() / 2);
        unsafe { heap.release(victim.as_ptr()) };
      }
    }

    let stats = heap.stats();
    assert_eq!(stats.free_bytes + stats.allocated_bytes + METADATA_OVERHEAD, stats.arena_bytes);
    assert_eq!(stats.allocated_blocks, live.len());
  }

  #[test]
  fn test_large_blocks_use_exponential_buckets() {
    let mut heap = heap();

    let big = heap.allocate(2000).unwrap();
    let _guard = heap.allocate(16).unwrap();
    unsafe { heap.release(big.as_ptr()) };

    let class = class_of(adjusted_size(2000).unwrap());
    assert!(class >= EXACT_CLASSES);
    assert_eq!(heap.index.head(class), Some(BlockPtr::new(big.as_ptr() as usize)));
  }
}
