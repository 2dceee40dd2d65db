use tracing::{debug, trace, warn};

use crate::align;
use crate::arena::{Arena, VecArena};
use crate::block::{
  Address, BlockIter, BlockTag, DSIZE, MIN_BLOCK_SIZE, WSIZE, block_size_for, next_block,
  read_header, set_prev_allocated, write_footer, write_header, write_word,
};
use crate::class::{NUM_CLASSES, SegregatedIndex, SizeClass};
use crate::coalesce::coalesce;
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::fit;
use crate::validate::{HeapReport, HeapValidator};

/// Size of the prologue block: header, one root slot per class, footer.
pub const PROLOGUE_SIZE: usize = (2 * (NUM_CLASSES + 1) + 2) * WSIZE;

/// Bytes laid out by `init` before the first extension: pad, prologue and
/// epilogue header.
pub const LAYOUT_SIZE: usize = WSIZE + PROLOGUE_SIZE + WSIZE;

/// Offsets of the fixed parts of an initialised heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
  /// Block pointer of the prologue, which is also where the root table starts.
  prologue: usize,
  /// Header offset of the epilogue.
  epilogue: usize,
}

impl Layout {
  fn first_block(&self) -> usize {
    self.prologue + PROLOGUE_SIZE
  }
}

/// Segregated-fit allocator over a single growable arena.
///
/// ```text
///   pad  prologue                                        epilogue
///   +---+--------+------+------+-----+------+--------+--+--------+
///   | 0 | 96|p|a | root | root | ... | root | 96|p|a |..| 0|p|a  |
///   |   | header |  0   |  1   |     |  9   | footer |  | header |
///   +---+--------+------+------+-----+------+--------+--+--------+
///   0   4        8      16                  88       96 ^        ^
///                                                       blocks   break
/// ```
///
/// The allocator is the only owner of the arena and isn't meant to be shared
/// between threads; callers that need that must serialise every call.
pub struct Allocator<A: Arena> {
  arena: A,
  config: AllocatorConfig,
  index: SegregatedIndex,
  layout: Option<Layout>,
}

impl Allocator<VecArena> {
  /// Initialised allocator over a fresh [`VecArena`] of `capacity` bytes.
  pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
    let mut allocator = Self::new(VecArena::new(capacity)?, AllocatorConfig::default())?;
    allocator.init()?;
    Ok(allocator)
  }
}

impl<A: Arena> Allocator<A> {
  /// Wraps `arena` without touching it. Call [`Allocator::init`] before
  /// allocating.
  pub fn new(
    arena: A,
    config: AllocatorConfig,
  ) -> Result<Self, AllocError> {
    config.validate()?;

    Ok(Self {
      arena,
      config,
      index: SegregatedIndex::new(DSIZE),
      layout: None,
    })
  }

  /// Lays out the pad, prologue, root table and epilogue, then grows the heap
  /// by the configured initial size.
  pub fn init(&mut self) -> Result<(), AllocError> {
    if self.layout.is_some() {
      return Err(AllocError::AlreadyInitialized);
    }

    let start = self.arena.grow(LAYOUT_SIZE)?;
    let prologue = start + DSIZE;
    let epilogue = prologue + PROLOGUE_SIZE - WSIZE;
    self.index = SegregatedIndex::new(prologue);

    let bytes = self.arena.bytes_mut();
    let prologue_tag = BlockTag::new(PROLOGUE_SIZE, true, true);

    write_word(bytes, start, 0);
    write_header(bytes, prologue, prologue_tag);
    self.index.init(bytes);
    write_footer(bytes, prologue, prologue_tag);
    write_word(bytes, epilogue, BlockTag::new(0, true, true).pack());

    self.layout = Some(Layout { prologue, epilogue });

    debug!(start, prologue, epilogue, "heap laid out");

    self.extend(self.config.initial_size)?;

    Ok(())
  }

  /// Whether [`Allocator::init`] has completed.
  pub fn is_initialized(&self) -> bool {
    self.layout.is_some()
  }

  /// Grows the arena by at least `bytes`, turns the new space into a free
  /// block, merges it with a free block at the old end and returns the
  /// result.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError> {
    let layout = self.layout.ok_or(AllocError::NotInitialized)?;
    let size = align!(bytes);

    // New space starts right after the old epilogue header, which becomes
    // the header of the new block.
    let bp = self.arena.grow(size)?;
    let heap = self.arena.bytes_mut();
    let prev_allocated = read_header(heap, bp).prev_allocated;

    write_header(heap, bp, BlockTag::new(size, prev_allocated, false));
    write_footer(heap, bp, BlockTag::footer(size));

    let epilogue = bp + size - WSIZE;
    write_word(heap, epilogue, BlockTag::new(0, false, true).pack());

    self.layout = Some(Layout { epilogue, ..layout });

    debug!(bytes = size, brk = self.arena.len(), "arena extended");

    Ok(coalesce(self.arena.bytes_mut(), &self.index, bp))
  }

  /// Allocates a block with room for `size` bytes and returns its payload
  /// address, 8-byte aligned. Returns `None` for `size == 0` and when the
  /// arena is exhausted.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<Address> {
    if size == 0 {
      return None;
    }

    if self.layout.is_none() {
      warn!(size, "allocate called before init");
      return None;
    }

    let Some(asize) = block_size_for(size) else {
      warn!(size, "request too large for a block header");
      return None;
    };

    let bp = match fit::find(self.arena.bytes(), &self.index, asize) {
      Some(bp) => bp,
      None => match self.extend(asize.max(self.config.chunk_size)) {
        Ok(bp) => bp,
        Err(err) => {
          warn!(size, asize, %err, "allocation failed");
          return None;
        }
      },
    };

    self.place(bp, asize);

    trace!(size, asize, class = SizeClass::of(asize).index(), address = bp, "allocate");

    Some(Address::new(bp))
  }

  /// Marks the first `asize` bytes of the free block `bp` allocated and files
  /// whatever is left over as a new free block.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let heap = self.arena.bytes_mut();
    let tag = read_header(heap, bp);
    let remainder = tag.size - asize;

    self.index.remove(heap, bp);

    if remainder >= MIN_BLOCK_SIZE {
      write_header(heap, bp, BlockTag::new(asize, tag.prev_allocated, true));

      let rest = bp + asize;
      write_header(heap, rest, BlockTag::new(remainder, true, false));
      write_footer(heap, rest, BlockTag::footer(remainder));
      self.index.insert(heap, rest, SizeClass::of(remainder));

      let after = next_block(heap, rest);
      set_prev_allocated(heap, after, false);
    } else {
      write_header(heap, bp, BlockTag::new(tag.size, tag.prev_allocated, true));

      let after = next_block(heap, bp);
      set_prev_allocated(heap, after, true);
    }
  }

  /// Frees the block at `ptr` and merges it with free neighbours. Releasing
  /// [`Address::NULL`] does nothing.
  pub fn release(
    &mut self,
    ptr: Address,
  ) {
    if ptr.is_null() || self.layout.is_none() {
      return;
    }

    let bp = ptr.offset();
    let heap = self.arena.bytes_mut();
    let tag = read_header(heap, bp);

    write_header(heap, bp, BlockTag::new(tag.size, tag.prev_allocated, false));
    write_footer(heap, bp, BlockTag::footer(tag.size));

    let merged = coalesce(heap, &self.index, bp);

    trace!(address = bp, size = tag.size, merged, "release");
  }

  /// Moves the allocation at `ptr` to a block of `size` bytes, keeping the
  /// first `min(old, size)` payload bytes.
  ///
  /// `size == 0` releases `ptr` and returns `None`; a missing `ptr` makes this
  /// a plain [`Allocator::allocate`]. If the new block can't be allocated the
  /// old one is left untouched and `None` is returned.
  pub fn reallocate(
    &mut self,
    ptr: Option<Address>,
    size: usize,
  ) -> Option<Address> {
    if size == 0 {
      if let Some(ptr) = ptr {
        self.release(ptr);
      }
      return None;
    }

    let old = match ptr {
      Some(old) if !old.is_null() => old,
      _ => return self.allocate(size),
    };

    let new = self.allocate(size)?;
    let count = self.usable_size(old).min(size);
    let from = old.offset();

    self
      .arena
      .bytes_mut()
      .copy_within(from..from + count, new.offset());

    self.release(old);

    trace!(from, to = new.offset(), count, "reallocate");

    Some(new)
  }

  /// Allocates room for `count` elements of `size` bytes each, zero filled.
  /// Returns `None` if `count * size` overflows.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> Option<Address> {
    let Some(bytes) = count.checked_mul(size) else {
      warn!(count, size, "allocate_zeroed size overflows");
      return None;
    };

    let ptr = self.allocate(bytes)?;
    self.payload_mut(ptr, bytes).fill(0);

    Some(ptr)
  }

  /// Number of payload bytes the block at `ptr` can hold.
  pub fn usable_size(
    &self,
    ptr: Address,
  ) -> usize {
    read_header(self.arena.bytes(), ptr.offset()).size - WSIZE
  }

  /// The first `len` payload bytes at `ptr`.
  ///
  /// # Panics
  ///
  /// Panics if the range runs past the end of the arena.
  pub fn payload(
    &self,
    ptr: Address,
    len: usize,
  ) -> &[u8] {
    &self.arena.bytes()[ptr.offset()..ptr.offset() + len]
  }

  /// Mutable view of the first `len` payload bytes at `ptr`.
  ///
  /// # Panics
  ///
  /// Panics if the range runs past the end of the arena.
  pub fn payload_mut(
    &mut self,
    ptr: Address,
    len: usize,
  ) -> &mut [u8] {
    &mut self.arena.bytes_mut()[ptr.offset()..ptr.offset() + len]
  }

  /// Walks every block between the prologue and the epilogue in address
  /// order.
  pub fn blocks(&self) -> BlockIter<'_> {
    let first = self.layout.map_or(usize::MAX, |layout| layout.first_block());
    BlockIter::new(self.arena.bytes(), first)
  }

  /// Free blocks currently filed in `class`, head first.
  pub fn free_list(
    &self,
    class: SizeClass,
  ) -> impl Iterator<Item = Address> + '_ {
    self
      .layout
      .map(|_| self.index.iter(self.arena.bytes(), class).map(Address::new))
      .into_iter()
      .flatten()
  }

  /// Checks the whole heap and every free list. Never modifies the heap.
  pub fn check_heap(&self) -> HeapReport {
    match self.layout {
      Some(layout) => HeapValidator::new(
        self.arena.bytes(),
        &self.index,
        layout.prologue,
        layout.epilogue,
      )
      .check(),
      None => HeapReport::uninitialized(),
    }
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  /// Raw access to the arena. Writing through it can corrupt the heap; it is
  /// meant for inspection and fault injection in tests.
  pub fn arena_mut(&mut self) -> &mut A {
    &mut self.arena
  }

  /// Current arena size in bytes.
  pub fn heap_size(&self) -> usize {
    self.arena.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::read_word;

  fn allocator() -> Allocator<VecArena> {
    Allocator::with_capacity(1 << 20).unwrap()
  }

  #[test]
  fn test_init_layout_is_byte_exact() {
    let heap = allocator();
    let bytes = heap.arena().bytes();

    assert_eq!(PROLOGUE_SIZE, 96);
    assert_eq!(read_word(bytes, 0), 0);
    assert_eq!(read_word(bytes, 4), 96 | 0b11);
    for class in 0..NUM_CLASSES {
      let root = 8 + class * 8;
      assert_eq!(read_word(bytes, root) as usize, root);
      assert_eq!(read_word(bytes, root + 4) as usize, root);
    }
    assert_eq!(read_word(bytes, 96), 96 | 0b11);

    // one free block spanning the initial extension, then the epilogue
    assert_eq!(heap.heap_size(), LAYOUT_SIZE + 4096);
    assert_eq!(read_word(bytes, 100), 4096 | 0b10);
    assert_eq!(read_word(bytes, heap.heap_size() - 4), 1);
  }

  #[test]
  fn test_init_twice() {
    let mut heap = allocator();
    assert_eq!(heap.init(), Err(AllocError::AlreadyInitialized));
  }

  #[test]
  fn test_uninitialized() {
    let mut heap = Allocator::new(VecArena::default(), AllocatorConfig::default()).unwrap();
    assert!(!heap.is_initialized());
    assert_eq!(heap.allocate(8), None);
    heap.release(Address::new(104));
    assert_eq!(heap.blocks().count(), 0);
    assert_eq!(heap.free_list(SizeClass::of(16)).count(), 0);
    assert!(!heap.check_heap().is_consistent());
  }

  #[test]
  fn test_init_fails_without_room() {
    let arena = VecArena::new(LAYOUT_SIZE + 64).unwrap();
    let mut heap = Allocator::new(arena, AllocatorConfig::default()).unwrap();
    assert!(matches!(heap.init(), Err(AllocError::ArenaExhausted { .. })));
  }

  #[test]
  fn test_rejects_invalid_config() {
    let config = AllocatorConfig::new().with_chunk_size(10);
    assert!(Allocator::new(VecArena::default(), config).is_err());
  }

  #[test]
  fn test_smallest_sizes_keep_heap_consistent() {
    let config = AllocatorConfig::new()
      .with_initial_size(MIN_BLOCK_SIZE)
      .with_chunk_size(MIN_BLOCK_SIZE);
    let arena = VecArena::new(1 << 16).unwrap();
    let mut heap = Allocator::new(arena, config).unwrap();
    heap.init().unwrap();

    let report = heap.check_heap();
    assert!(report.is_consistent(), "{:?}", report.issues);
    assert_eq!(report.free_bytes, MIN_BLOCK_SIZE);
    assert_eq!(read_word(heap.arena().bytes(), heap.heap_size() - WSIZE), 0b01);

    let small = heap.allocate(12).unwrap();
    let large = heap.allocate(100).unwrap();
    assert_eq!(small.offset(), 104);
    assert_eq!(large.offset(), 120);
    assert!(heap.check_heap().is_consistent());

    heap.release(small);
    heap.release(large);
    let report = heap.check_heap();
    assert!(report.is_consistent(), "{:?}", report.issues);
    assert_eq!(report.free_blocks_physical, 1);
  }

  #[test]
  fn test_rejects_initial_size_below_a_block() {
    let config = AllocatorConfig::new().with_initial_size(DSIZE);
    assert!(matches!(
      Allocator::new(VecArena::default(), config),
      Err(AllocError::InvalidConfig(_))
    ));
  }

  #[test]
  fn test_request_rounding() {
    let mut heap = allocator();

    let tiny = heap.allocate(1).unwrap();
    let twelve = heap.allocate(12).unwrap();
    let thirteen = heap.allocate(13).unwrap();

    assert_eq!(heap.usable_size(tiny), 12);
    assert_eq!(heap.usable_size(twelve), 12);
    assert_eq!(heap.usable_size(thirteen), 20);
    assert_eq!(twelve.offset() - tiny.offset(), 16);
    assert_eq!(thirteen.offset() - twelve.offset(), 16);
  }

  #[test]
  fn test_first_allocation_splits_initial_block() {
    let mut heap = allocator();
    let ptr = heap.allocate(100).unwrap();

    assert_eq!(ptr.offset(), 104);
    let blocks: Vec<_> = heap.blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].size, 104);
    assert!(blocks[0].allocated && blocks[0].prev_allocated);
    assert_eq!(blocks[1].size, 4096 - 104);
    assert!(!blocks[1].allocated && blocks[1].prev_allocated);
  }

  #[test]
  fn test_exact_fit_sets_next_prev_allocated() {
    let mut heap = allocator();
    let a = heap.allocate(12).unwrap();
    let b = heap.allocate(12).unwrap();
    let _c = heap.allocate(12).unwrap();

    heap.release(b);
    let b2 = heap.allocate(12).unwrap();

    assert_eq!(b2, b);
    assert!(heap.blocks().all(|block| block.address == a || block.prev_allocated));
    assert!(heap.check_heap().is_consistent());
  }

  #[test]
  fn test_small_remainder_is_not_split() {
    let mut heap = allocator();
    let a = heap.allocate(20).unwrap();
    let _guard = heap.allocate(12).unwrap();
    heap.release(a);

    // a 24-byte hole; splitting off a 16-byte block would leave 8 bytes
    let b = heap.allocate(12).unwrap();
    assert_eq!(b, a);
    assert_eq!(heap.usable_size(b), 20);
  }

  #[test]
  fn test_extends_when_no_fit() {
    let mut heap = allocator();
    let before = heap.heap_size();

    let big = heap.allocate(10_000).unwrap();
    assert!(heap.heap_size() > before);
    assert!(heap.usable_size(big) >= 10_000);
    assert!(heap.check_heap().is_consistent());
  }

  #[test]
  fn test_extension_uses_chunk_size_minimum() {
    let mut heap = allocator();
    let _all = heap.allocate(4096 - WSIZE).unwrap();
    let before = heap.heap_size();

    heap.allocate(8).unwrap();
    assert_eq!(heap.heap_size() - before, AllocatorConfig::DEFAULT_CHUNK_SIZE);
  }

  #[test]
  fn test_exhaustion_returns_none() {
    let arena = VecArena::new(LAYOUT_SIZE + 4096 + 512).unwrap();
    let mut heap = Allocator::new(arena, AllocatorConfig::default()).unwrap();
    heap.init().unwrap();

    assert!(heap.allocate(8192).is_none());
    assert!(heap.allocate(4000).is_some());
    assert!(heap.check_heap().is_consistent());
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut heap = allocator();
    let before = heap.arena().bytes().to_vec();
    heap.release(Address::NULL);
    assert_eq!(heap.arena().bytes(), &before[..]);
  }

  #[test]
  fn test_reallocate_copies_and_frees() {
    let mut heap = allocator();
    let old = heap.allocate(16).unwrap();
    heap.payload_mut(old, 16).copy_from_slice(b"0123456789abcdef");

    let grown = heap.reallocate(Some(old), 64).unwrap();
    assert_ne!(grown, old);
    assert_eq!(heap.payload(grown, 16), b"0123456789abcdef");

    let shrunk = heap.reallocate(Some(grown), 4).unwrap();
    assert_eq!(heap.payload(shrunk, 4), b"0123");
    assert!(heap.check_heap().is_consistent());
  }

  #[test]
  fn test_reallocate_edge_cases() {
    let mut heap = allocator();

    let fresh = heap.reallocate(None, 24).unwrap();
    assert_eq!(heap.usable_size(fresh), 28);

    assert_eq!(heap.reallocate(Some(fresh), 0), None);
    assert_eq!(heap.check_heap().free_blocks_listed, 1);

    assert_eq!(heap.reallocate(None, 0), None);
  }

  #[test]
  fn test_reallocate_failure_keeps_old_block() {
    let arena = VecArena::new(LAYOUT_SIZE + 4096).unwrap();
    let mut heap = Allocator::new(arena, AllocatorConfig::default()).unwrap();
    heap.init().unwrap();

    let old = heap.allocate(100).unwrap();
    heap.payload_mut(old, 3).copy_from_slice(b"abc");

    assert_eq!(heap.reallocate(Some(old), 8000), None);
    assert_eq!(heap.payload(old, 3), b"abc");
    assert!(heap.blocks().any(|block| block.address == old && block.allocated));
  }

  #[test]
  fn test_allocate_zeroed() {
    let mut heap = allocator();
    let dirty = heap.allocate(64).unwrap();
    heap.payload_mut(dirty, 64).fill(0xFF);
    heap.release(dirty);

    let zeroed = heap.allocate_zeroed(8, 8).unwrap();
    assert_eq!(zeroed, dirty);
    assert!(heap.payload(zeroed, 64).iter().all(|&byte| byte == 0));

    assert_eq!(heap.allocate_zeroed(usize::MAX, 2), None);
    assert_eq!(heap.allocate_zeroed(0, 8), None);
  }

  #[test]
  fn test_zero_size_is_none() {
    let mut heap = allocator();
    assert_eq!(heap.allocate(0), None);
    assert_eq!(heap.allocate(usize::MAX), None);
  }
}
