use std::mem;

/// Machine word; header, footer and each link field take exactly one.
pub const WSIZE: usize = mem::size_of::<usize>();
pub const DSIZE: usize = 2 * WSIZE;

/// Header, next link, prev link, footer.
pub const MIN_BLOCK: usize = 4 * WSIZE;

const SIZE_MASK: usize = !0x7;
const PREV_ALLOC: usize = 0x2;
const ALLOC: usize = 0x1;

/// Packs a block size and its two allocation bits into one word.
#[inline]
pub const fn pack(
  size: usize,
  prev_alloc: bool,
  alloc: bool,
) -> usize {
  size | ((prev_alloc as usize) << 1) | alloc as usize
}

/// Decoded boundary tag (header or footer word).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub prev_alloc: bool,
  pub alloc: bool,
}

impl Tag {
  pub const fn pack(self) -> usize {
    pack(self.size, self.prev_alloc, self.alloc)
  }

  pub const fn unpack(word: usize) -> Self {
    Self {
      size: word & SIZE_MASK,
      prev_alloc: word & PREV_ALLOC != 0,
      alloc: word & ALLOC != 0,
    }
  }
}

/// Payload address of a block. The header sits one word below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(usize);

impl BlockPtr {
  pub const fn new(addr: usize) -> Self {
    Self(addr)
  }

  pub const fn addr(self) -> usize {
    self.0
  }

  pub const fn as_ptr(self) -> *mut u8 {
    self.0 as *mut u8
  }
}

/// Free-list threading stored in the first two payload words of a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Links {
  pub next: Option<BlockPtr>,
  pub prev: Option<BlockPtr>,
}

/// One block, decoded according to its alloc bit.
///
/// Both variants occupy the same bytes; only a free block carries a footer
/// and links, so those are only ever read through the `Free` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Allocated { bp: BlockPtr, tag: Tag },
  Free { bp: BlockPtr, tag: Tag, footer: Tag, links: Links },
}

impl Block {
  pub fn tag(&self) -> Tag {
    match *self {
      Block::Allocated { tag, .. } | Block::Free { tag, .. } => tag,
    }
  }
}

/// Word-level view of the arena `[low, high)`.
///
/// All block metadata goes through here. Every access asserts (in debug
/// builds) that the word lies inside the arena; stepping outside it means the
/// block graph is already broken.
#[derive(Debug, Clone, Copy)]
pub struct RawHeap {
  low: usize,
  high: usize,
}

impl RawHeap {
  /// # Safety
  ///
  /// `[low, high)` must be readable and writable memory owned by the caller
  /// for as long as the view is used, and `low` must be word aligned.
  pub unsafe fn new(
    low: usize,
    high: usize,
  ) -> Self {
    debug_assert!(low <= high);
    debug_assert_eq!(low % WSIZE, 0);
    Self { low, high }
  }

  #[cfg(test)]
  pub fn low(&self) -> usize {
    self.low
  }

  pub fn high(&self) -> usize {
    self.high
  }

  #[inline]
  pub fn contains(
    &self,
    addr: usize,
  ) -> bool {
    addr >= self.low && addr <= self.high
  }

  #[inline]
  fn word_in_bounds(
    &self,
    addr: usize,
  ) -> bool {
    addr >= self.low && addr.checked_add(WSIZE).is_some_and(|end| end <= self.high)
  }

  #[inline]
  pub fn read(
    &self,
    addr: usize,
  ) -> usize {
    debug_assert!(self.word_in_bounds(addr), "read of {addr:#x} outside arena");
    unsafe { (addr as *const usize).read() }
  }

  #[inline]
  pub fn write(
    &self,
    addr: usize,
    value: usize,
  ) {
    debug_assert!(self.word_in_bounds(addr), "write of {addr:#x} outside arena");
    unsafe { (addr as *mut usize).write(value) }
  }

  #[inline]
  pub fn header_of(
    &self,
    bp: BlockPtr,
  ) -> usize {
    debug_assert!(self.contains(bp.0));
    bp.0 - WSIZE
  }

  #[inline]
  pub fn footer_of(
    &self,
    bp: BlockPtr,
  ) -> usize {
    bp.0 + self.tag(bp).size - DSIZE
  }

  #[inline]
  pub fn tag(
    &self,
    bp: BlockPtr,
  ) -> Tag {
    Tag::unpack(self.read(self.header_of(bp)))
  }

  #[inline]
  pub fn footer_tag(
    &self,
    bp: BlockPtr,
  ) -> Tag {
    Tag::unpack(self.read(self.footer_of(bp)))
  }

  #[inline]
  pub fn size(
    &self,
    bp: BlockPtr,
  ) -> usize {
    self.tag(bp).size
  }

  #[inline]
  pub fn next_physical(
    &self,
    bp: BlockPtr,
  ) -> BlockPtr {
    BlockPtr(bp.0 + self.size(bp))
  }

  /// Only meaningful when the predecessor is free, since allocated blocks
  /// carry no footer to read its size from.
  #[inline]
  pub fn prev_physical(
    &self,
    bp: BlockPtr,
  ) -> BlockPtr {
    debug_assert!(!self.tag(bp).prev_alloc, "predecessor of {:#x} has no footer", bp.0);
    BlockPtr(bp.0 - Tag::unpack(self.read(bp.0 - DSIZE)).size)
  }

  /// Writes an allocated block: header only.
  pub fn encode_allocated(
    &self,
    bp: BlockPtr,
    size: usize,
    prev_alloc: bool,
  ) {
    self.write(self.header_of(bp), pack(size, prev_alloc, true));
  }

  /// Writes a free block: header and matching footer. Links are left as is.
  pub fn encode_free(
    &self,
    bp: BlockPtr,
    size: usize,
    prev_alloc: bool,
  ) {
    let word = pack(size, prev_alloc, false);
    self.write(self.header_of(bp), word);
    self.write(bp.0 + size - DSIZE, word);
  }

  pub fn decode(
    &self,
    bp: BlockPtr,
  ) -> Block {
    let tag = self.tag(bp);
    if tag.alloc {
      Block::Allocated { bp, tag }
    } else {
      Block::Free {
        bp,
        tag,
        footer: self.footer_tag(bp),
        links: self.links(bp),
      }
    }
  }

  /// Rewrites the prev_alloc bit of `bp`, keeping a free block's footer in step.
  pub fn set_prev_alloc(
    &self,
    bp: BlockPtr,
    prev_alloc: bool,
  ) {
    let tag = self.tag(bp);
    if tag.prev_alloc == prev_alloc {
      return;
    }

    let word = pack(tag.size, prev_alloc, tag.alloc);
    self.write(self.header_of(bp), word);
    if !tag.alloc && tag.size > 0 {
      self.write(self.footer_of(bp), word);
    }
  }

  fn encode_link(
    &self,
    link: Option<BlockPtr>,
  ) -> usize {
    link.map_or(0, |bp| bp.0 - self.low)
  }

  fn decode_link(
    &self,
    offset: usize,
  ) -> Option<BlockPtr> {
    (offset != 0).then(|| BlockPtr(self.low + offset))
  }

  pub fn links(
    &self,
    bp: BlockPtr,
  ) -> Links {
    Links {
      next: self.decode_link(self.read(bp.0)),
      prev: self.decode_link(self.read(bp.0 + WSIZE)),
    }
  }

  pub fn next_link(
    &self,
    bp: BlockPtr,
  ) -> Option<BlockPtr> {
    self.decode_link(self.read(bp.0))
  }

  pub fn set_next(
    &self,
    bp: BlockPtr,
    next: Option<BlockPtr>,
  ) {
    self.write(bp.0, self.encode_link(next));
  }

  pub fn set_prev(
    &self,
    bp: BlockPtr,
    prev: Option<BlockPtr>,
  ) {
    self.write(bp.0 + WSIZE, self.encode_link(prev));
  }
}
