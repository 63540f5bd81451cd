use tracing::debug;

use crate::{
  align::is_aligned,
  arena::Arena,
  block::{Block, BlockPtr, DSIZE, MIN_BLOCK, RawHeap, WSIZE, pack},
  error::Corruption,
  freelist::{BUCKET_COUNT, class_of, is_exact},
  heap::{Heap, HeapStats},
};

impl<A: Arena> Heap<A> {
  /// Diagnostic entry point. With `verbose` set, validates the whole heap
  /// and dumps every block at `debug` level; otherwise succeeds immediately.
  pub fn check_heap(
    &self,
    verbose: bool,
  ) -> Result<(), Corruption> {
    if !verbose {
      return Ok(());
    }

    self.walk(true).map(|_| ())
  }

  /// Validates every structural invariant and returns the block tallies.
  ///
  /// Physical walk, prologue to epilogue:
  /// - free blocks have matching header and footer
  /// - every prev_alloc bit matches its predecessor
  /// - no two free blocks are adjacent
  ///
  /// Free list walk, every bucket:
  /// - links stay in the heap and are symmetric
  /// - every member is free and filed under its own size class
  /// - power-of-two buckets are sorted ascending
  ///
  /// Both walks must see the same number of free blocks.
  pub fn validate(&self) -> Result<HeapStats, Corruption> {
    self.walk(false)
  }

  fn walk(
    &self,
    dump: bool,
  ) -> Result<HeapStats, Corruption> {
    let raw = self.raw();
    let stats = self.check_blocks(&raw, dump)?;
    self.check_free_lists(&raw, stats.free_blocks)?;

    Ok(stats)
  }

  fn check_blocks(
    &self,
    raw: &RawHeap,
    dump: bool,
  ) -> Result<HeapStats, Corruption> {
    let sentinel = pack(DSIZE, true, true);
    let header = raw.read(raw.header_of(self.prologue));
    let footer = raw.read(self.prologue.addr());
    if header != sentinel || footer != sentinel {
      return Err(Corruption::Prologue { header, footer });
    }

    let mut stats = HeapStats {
      arena_bytes: self.arena().len(),
      ..HeapStats::default()
    };
    let mut bp = self.first_block();
    let mut prev_alloc = true;
    let mut prev_free: Option<BlockPtr> = None;

    loop {
      let addr = bp.addr();
      if !is_aligned(addr) {
        return Err(Corruption::Misaligned { addr });
      }

      let tag = raw.tag(bp);
      if tag.size == 0 {
        break;
      }

      if tag.size < MIN_BLOCK {
        return Err(Corruption::Undersized { addr, size: tag.size });
      }

      if addr.checked_add(tag.size).is_none_or(|next| next > raw.high()) {
        return Err(Corruption::OutOfBounds { addr, size: tag.size });
      }

      if tag.prev_alloc != prev_alloc {
        return Err(Corruption::PrevAlloc {
          addr,
          recorded: tag.prev_alloc,
          actual: prev_alloc,
        });
      }

      // Size and bounds are known good, so the footer and links are readable.
      let block = raw.decode(bp);
      match block {
        Block::Allocated { .. } => {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += tag.size;
        }
        Block::Free { tag, footer, .. } => {
          if footer.size != tag.size || footer.alloc {
            return Err(Corruption::TagMismatch {
              addr,
              header: tag.pack(),
              footer: footer.pack(),
            });
          }

          if let Some(first) = prev_free {
            return Err(Corruption::Uncoalesced {
              first: first.addr(),
              second: addr,
            });
          }

          stats.free_blocks += 1;
          stats.free_bytes += tag.size;
        }
      }

      if dump {
        match block {
          Block::Allocated { tag, .. } => debug!(
            target: "segfit::check",
            addr = format_args!("{addr:#x}"),
            size = tag.size,
            prev_alloc = tag.prev_alloc,
            "allocated block"
          ),
          Block::Free { tag, links, .. } => debug!(
            target: "segfit::check",
            addr = format_args!("{addr:#x}"),
            size = tag.size,
            prev_alloc = tag.prev_alloc,
            next = ?links.next.map(BlockPtr::addr),
            prev = ?links.prev.map(BlockPtr::addr),
            "free block"
          ),
        }
      }

      prev_alloc = block.tag().alloc;
      prev_free = (!prev_alloc).then_some(bp);
      bp = raw.next_physical(bp);
    }

    let header = raw.read(raw.header_of(bp));
    if bp.addr() != raw.high() || header != pack(0, prev_alloc, true) {
      return Err(Corruption::Epilogue { addr: bp.addr(), header });
    }

    Ok(stats)
  }

  fn check_free_lists(
    &self,
    raw: &RawHeap,
    in_heap: usize,
  ) -> Result<(), Corruption> {
    let first = self.first_block().addr();
    let mut in_index = 0;

    for bucket in 0..BUCKET_COUNT {
      let mut prev: Option<BlockPtr> = None;
      let mut last_size = 0;
      let mut cur = self.index.head(bucket);

      while let Some(bp) = cur {
        in_index += 1;
        // A cycle would otherwise spin forever.
        if in_index > in_heap {
          return Err(Corruption::FreeCount { in_heap, in_index });
        }

        let addr = bp.addr();
        if addr < first || addr >= raw.high() || !is_aligned(addr) {
          return Err(Corruption::LinkOutOfBounds { bucket, addr });
        }

        let tag = raw.tag(bp);
        if tag.alloc {
          return Err(Corruption::AllocatedInList { bucket, addr });
        }

        let overruns = |size: usize| addr.checked_add(size - WSIZE).is_none_or(|end| end > raw.high());
        if tag.size < MIN_BLOCK || overruns(tag.size) {
          return Err(Corruption::LinkOutOfBounds { bucket, addr });
        }

        let expected = class_of(tag.size);
        if expected != bucket {
          return Err(Corruption::WrongBucket {
            addr,
            size: tag.size,
            bucket,
            expected,
          });
        }

        if !is_exact(bucket) && tag.size < last_size {
          return Err(Corruption::Unsorted { bucket, addr });
        }

        let links = raw.links(bp);
        if links.prev != prev {
          return Err(Corruption::LinkAsymmetry { bucket, addr });
        }

        last_size = tag.size;
        prev = Some(bp);
        cur = links.next;
      }
    }

    if in_index != in_heap {
      return Err(Corruption::FreeCount { in_heap, in_index });
    }

    Ok(())
  }
}
