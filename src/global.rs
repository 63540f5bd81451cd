use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{
  align_to,
  arena::{Arena, SbrkArena},
  block::WSIZE,
  config::HeapConfig,
  error::{ArenaError, Corruption},
  heap::Heap,
};

/// A [`Heap`] usable as `#[global_allocator]`.
///
/// The heap is built on first use from `make_arena` and lives behind a spin
/// lock, which never allocates and so cannot re-enter the allocator.
///
/// ```rust,ignore
/// use segfit::GlobalHeap;
///
/// #[global_allocator]
/// static HEAP: GlobalHeap<segfit::SbrkArena> = GlobalHeap::sbrk();
/// ```
///
/// Requests aligned beyond one word are over-allocated; the block address is
/// stored in the word just below the pointer handed out.
pub struct GlobalHeap<A: Arena> {
  heap: Mutex<Option<Heap<A>>>,
  make_arena: fn() -> Result<A, ArenaError>,
  config: HeapConfig,
}

fn sbrk_arena() -> Result<SbrkArena, ArenaError> {
  Ok(SbrkArena::new())
}

impl GlobalHeap<SbrkArena> {
  /// Heap on the process data segment, with per-operation events off.
  pub const fn sbrk() -> Self {
    Self::new(sbrk_arena)
  }
}

impl<A: Arena> GlobalHeap<A> {
  pub const fn new(make_arena: fn() -> Result<A, ArenaError>) -> Self {
    Self::with_config(make_arena, HeapConfig::new().with_log_events(false))
  }

  pub const fn with_config(
    make_arena: fn() -> Result<A, ArenaError>,
    config: HeapConfig,
  ) -> Self {
    Self {
      heap: Mutex::new(None),
      make_arena,
      config,
    }
  }

  /// Runs `f` on the heap, building it first if needed. `None` when the
  /// arena or the heap cannot be set up.
  pub fn with_heap<R>(
    &self,
    f: impl FnOnce(&mut Heap<A>) -> R,
  ) -> Option<R> {
    let mut guard = self.heap.lock();

    if guard.is_none() {
      let arena = (self.make_arena)().ok()?;
      *guard = Some(Heap::new(arena, self.config).ok()?);
    }

    guard.as_mut().map(f)
  }

  pub fn check_heap(
    &self,
    verbose: bool,
  ) -> Result<(), Corruption> {
    self.with_heap(|heap| heap.check_heap(verbose)).unwrap_or(Ok(()))
  }

  fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    self
      .with_heap(|heap| heap.allocate(size.max(1)))
      .flatten()
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn release(
    &self,
    ptr: *mut u8,
  ) {
    self.with_heap(|heap| unsafe { heap.release(ptr) });
  }

  fn allocate_aligned(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    let Some(padded) = layout.size().checked_add(layout.align()) else {
      return ptr::null_mut();
    };

    let block = self.allocate(padded);
    if block.is_null() {
      return block;
    }

    let aligned = align_to!(block as usize + WSIZE, layout.align());
    // SAFETY: `aligned - WSIZE` lies inside the block, which spans at least
    // `align` bytes before `aligned` plus `size` bytes after it.
    unsafe { ((aligned - WSIZE) as *mut usize).write(block as usize) };

    aligned as *mut u8
  }

  unsafe fn block_of(
    ptr: *mut u8,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() <= WSIZE {
      ptr
    } else {
      unsafe { ((ptr as usize - WSIZE) as *const usize).read() as *mut u8 }
    }
  }
}

unsafe impl<A: Arena + Send> GlobalAlloc for GlobalHeap<A> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() <= WSIZE {
      self.allocate(layout.size())
    } else {
      self.allocate_aligned(layout)
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
  ) {
    unsafe { self.release(Self::block_of(ptr, layout)) };
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() <= WSIZE {
      return self
        .with_heap(|heap| heap.zero_allocate(1, layout.size().max(1)))
        .flatten()
        .map_or(ptr::null_mut(), NonNull::as_ptr);
    }

    let ptr = self.allocate_aligned(layout);
    if !ptr.is_null() {
      unsafe { ptr.write_bytes(0, layout.size()) };
    }
    ptr
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() <= WSIZE {
      return self
        .with_heap(|heap| unsafe { heap.reallocate(ptr, new_size.max(1)) })
        .flatten()
        .map_or(ptr::null_mut(), NonNull::as_ptr);
    }

    let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
      return ptr::null_mut();
    };

    let new = self.allocate_aligned(new_layout);
    if !new.is_null() {
      unsafe {
        ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size));
        self.dealloc(ptr, layout);
      }
    }
    new
  }
}
