use crate::block::{BlockPtr, Links, MIN_BLOCK, RawHeap, WSIZE};

/// Largest block size that gets a bucket of its own.
pub const EXACT_LIMIT: usize = 256;

/// Buckets holding exactly one block size each, `MIN_BLOCK..=EXACT_LIMIT`.
pub const EXACT_CLASSES: usize = (EXACT_LIMIT - MIN_BLOCK) / WSIZE + 1;

/// Exact classes followed by power-of-two classes; the last one is unbounded.
pub const BUCKET_COUNT: usize = EXACT_CLASSES + 9;

/// Maps a block size to its bucket.
///
/// Sizes up to `EXACT_LIMIT` map one-to-one. Larger sizes are halved until
/// they drop to `EXACT_LIMIT` or the last bucket is reached, one bucket per
/// halving.
pub fn class_of(size: usize) -> usize {
  debug_assert!(size >= MIN_BLOCK, "size {size} below minimum block");

  if size <= EXACT_LIMIT {
    return (size - MIN_BLOCK) / WSIZE;
  }

  let mut class = EXACT_CLASSES - 1;
  let mut size = size;
  while class < BUCKET_COUNT - 1 && size > EXACT_LIMIT {
    size /= 2;
    class += 1;
  }

  class
}

pub fn is_exact(class: usize) -> bool {
  class < EXACT_CLASSES
}

/// Segregated free lists. Each bucket is a doubly linked list threaded
/// through the free blocks themselves; power-of-two buckets are kept sorted
/// by ascending size so the first fit found in a bucket is its best fit.
pub struct FreeIndex {
  heads: [Option<BlockPtr>; BUCKET_COUNT],
}

impl FreeIndex {
  pub const fn new() -> Self {
    Self {
      heads: [None; BUCKET_COUNT],
    }
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<BlockPtr> {
    self.heads[class]
  }

  pub fn insert(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
  ) {
    let size = raw.size(bp);
    let class = class_of(size);

    let (prev, next) = if is_exact(class) {
      (None, self.heads[class])
    } else {
      let mut prev = None;
      let mut cur = self.heads[class];
      while let Some(candidate) = cur {
        if raw.size(candidate) >= size {
          break;
        }
        prev = Some(candidate);
        cur = raw.next_link(candidate);
      }
      (prev, cur)
    };

    raw.set_next(bp, next);
    raw.set_prev(bp, prev);

    if let Some(next) = next {
      raw.set_prev(next, Some(bp));
    }

    match prev {
      Some(prev) => raw.set_next(prev, Some(bp)),
      None => self.heads[class] = Some(bp),
    }
  }

  /// Unlinks `bp`. Must run while its header still holds the size it was
  /// inserted with.
  pub fn remove(
    &mut self,
    raw: &RawHeap,
    bp: BlockPtr,
  ) {
    let class = class_of(raw.size(bp));
    let Links { next, prev } = raw.links(bp);

    match prev {
      Some(prev) => raw.set_next(prev, next),
      None => {
        debug_assert_eq!(self.heads[class], Some(bp), "unlinking a block that heads no list");
        self.heads[class] = next;
      }
    }

    if let Some(next) = next {
      raw.set_prev(next, prev);
    }
  }

  /// First block of at least `asize` bytes, starting at `asize`'s bucket.
  ///
  /// The search stops at the first bucket that has a fit, so the result is
  /// the best fit within that bucket but not necessarily across all of them.
  pub fn find_fit(
    &self,
    raw: &RawHeap,
    asize: usize,
  ) -> Option<BlockPtr> {
    (class_of(asize)..BUCKET_COUNT).find_map(|class| self.bucket(raw, class).find(|&bp| raw.size(bp) >= asize))
  }

  pub fn bucket(
    &self,
    raw: &RawHeap,
    class: usize,
  ) -> Bucket {
    Bucket {
      raw: *raw,
      cur: self.heads[class],
    }
  }
}

impl Default for FreeIndex {
  fn default() -> Self {
    Self::new()
  }
}

/// Walks one bucket from its head.
pub struct Bucket {
  raw: RawHeap,
  cur: Option<BlockPtr>,
}

impl Iterator for Bucket {
  type Item = BlockPtr;

  fn next(&mut self) -> Option<Self::Item> {
    let bp = self.cur?;
    self.cur = self.raw.next_link(bp);
    Some(bp)
  }
}
