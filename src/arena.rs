use std::{io, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{align, error::ArenaError};

/// A single contiguous byte region that only grows at its high end.
///
/// The heap never acquires memory on its own; every byte it manages comes
/// from `extend`. Implementations must never move bytes already handed out.
pub trait Arena {
  /// Grows the region by `bytes`, returning the previous high address.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError>;

  /// Lowest address of the region.
  fn low(&self) -> usize;

  /// One past the highest address of the region.
  fn high(&self) -> usize;

  fn len(&self) -> usize {
    self.high() - self.low()
  }
}

/// Fixed-capacity region reserved with `mmap` and handed out by moving a
/// private break, so behaviour does not depend on the process data segment.
pub struct MemArena {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

// SAFETY: the mapping is owned exclusively by this value and is only ever
// touched through `&mut self` or through a heap that owns the arena.
unsafe impl Send for MemArena {}

impl MemArena {
  pub fn with_capacity(capacity: usize) -> Result<Self, ArenaError> {
    let capacity = align!(capacity.max(1));

    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        capacity,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(ArenaError::Reserve(io::Error::last_os_error()));
    }

    let base = NonNull::new(addr as *mut u8)
      .ok_or_else(|| ArenaError::Reserve(io::Error::other("mmap returned null")))?;

    Ok(Self {
      base,
      capacity,
      brk: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.brk
  }
}

impl Arena for MemArena {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let remaining = self.remaining();
    if bytes > remaining {
      return Err(ArenaError::Exhausted {
        requested: bytes,
        remaining,
      });
    }

    // SAFETY: `brk <= capacity`, so the offset stays inside the mapping.
    let old = unsafe { self.base.add(self.brk) };
    self.brk += bytes;

    Ok(old)
  }

  fn low(&self) -> usize {
    self.base.as_ptr() as usize
  }

  fn high(&self) -> usize {
    self.low() + self.brk
  }
}

impl Drop for MemArena {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr() as *mut c_void, self.capacity);
    }
  }
}

/// The process data segment, grown with `sbrk(2)`.
///
/// The region starts at whatever the program break is on the first
/// extension, rounded up to a word. Anything else in the process that moves
/// the break (the platform `malloc`, for one) breaks contiguity; `extend`
/// detects that and fails rather than hand out memory it does not own.
pub struct SbrkArena {
  low: usize,
  high: usize,
}

impl SbrkArena {
  pub const fn new() -> Self {
    Self { low: 0, high: 0 }
  }

  unsafe fn claim_break(&mut self) -> Result<(), ArenaError> {
    unsafe {
      let brk = sbrk(0) as usize;
      let pad = align!(brk) - brk;

      if pad > 0 && sbrk(pad as intptr_t) as isize == -1 {
        return Err(ArenaError::Exhausted {
          requested: pad,
          remaining: 0,
        });
      }

      self.low = brk + pad;
      self.high = self.low;
    }

    Ok(())
  }
}

impl Default for SbrkArena {
  fn default() -> Self {
    Self::new()
  }
}

impl Arena for SbrkArena {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<NonNull<u8>, ArenaError> {
    let increment = intptr_t::try_from(bytes).map_err(|_| ArenaError::TooLarge { requested: bytes })?;

    unsafe {
      if self.high == 0 {
        self.claim_break()?;
      }

      let old = sbrk(increment);
      if old as isize == -1 {
        return Err(ArenaError::Exhausted {
          requested: bytes,
          remaining: 0,
        });
      }

      if old as usize != self.high {
        sbrk(-increment);
        return Err(ArenaError::Discontiguous {
          expected: self.high,
          found: old as usize,
        });
      }

      self.high += bytes;

      NonNull::new(old as *mut u8).ok_or(ArenaError::Exhausted {
        requested: bytes,
        remaining: 0,
      })
    }
  }

  fn low(&self) -> usize {
    self.low
  }

  fn high(&self) -> usize {
    self.high
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mem_arena_extend() {
    let mut arena = MemArena::with_capacity(4096).unwrap();
    let low = arena.low();

    assert_eq!(arena.high(), low);

    let first = arena.extend(64).unwrap();
    assert_eq!(first.as_ptr() as usize, low);
    assert_eq!(arena.high(), low + 64);

    let second = arena.extend(128).unwrap();
    assert_eq!(second.as_ptr() as usize, low + 64);
    assert_eq!(arena.len(), 192);
    assert_eq!(arena.remaining(), 4096 - 192);

    unsafe {
      second.as_ptr().write_bytes(0xAB, 128);
      assert_eq!(*second.as_ptr().add(127), 0xAB);
    }
  }

  #[test]
  fn test_mem_arena_exhausted() {
    let mut arena = MemArena::with_capacity(256).unwrap();

    arena.extend(200).unwrap();

    match arena.extend(100) {
      Err(ArenaError::Exhausted { requested, remaining }) => {
        assert_eq!(requested, 100);
        assert_eq!(remaining, 56);
      }
      other => panic!("expected exhaustion, got {:?}", other.map(|p| p.as_ptr())),
    }

    assert_eq!(arena.len(), 200);
  }

  #[test]
  fn test_mem_arena_is_word_aligned() {
    let arena = MemArena::with_capacity(100).unwrap();

    assert!(crate::align::is_aligned(arena.low()));
    assert_eq!(arena.capacity() % std::mem::size_of::<usize>(), 0);
  }
}
