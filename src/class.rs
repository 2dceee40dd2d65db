//! Segregated free lists.
//!
//! Free blocks are bucketed by size into [`NUM_CLASSES`] circular lists. The
//! list roots live inside the prologue block, one 8-byte slot per class:
//!
//! ```text
//!   class   sizes (bytes)
//!   -----   -------------
//!     0     16
//!     1     17 ..= 31
//!     2     32 ..= 63
//!     3     64 ..= 127
//!     4     128 ..= 255
//!     5     256 ..= 511
//!     6     512 ..= 1023
//!     7     1024 ..= 2055
//!     8     2056 ..= 4095
//!     9     4096 ..
//! ```

use std::fmt;

use crate::block::{DSIZE, MIN_BLOCK_SIZE, read_header};
use crate::list;

/// Number of size classes.
pub const NUM_CLASSES: usize = 10;

/// Inclusive upper bound of every class but the last.
const UPPER_BOUNDS: [usize; NUM_CLASSES - 1] = [16, 31, 63, 127, 255, 511, 1023, 2055, 4095];

/// One of the [`NUM_CLASSES`] size buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(usize);

impl SizeClass {
  /// Class holding blocks of `size` bytes.
  pub fn of(size: usize) -> Self {
    let index = UPPER_BOUNDS
      .iter()
      .position(|&upper| size <= upper)
      .unwrap_or(NUM_CLASSES - 1);

    Self(index)
  }

  /// Class at `index`, if there is one.
  pub fn from_index(index: usize) -> Option<Self> {
    (index < NUM_CLASSES).then_some(Self(index))
  }

  pub fn index(self) -> usize {
    self.0
  }

  /// Smallest block size the class holds.
  pub fn min_size(self) -> usize {
    match self.0 {
      0 => MIN_BLOCK_SIZE,
      i => UPPER_BOUNDS[i - 1] + 1,
    }
  }

  /// Largest block size the class holds, `None` for the unbounded last class.
  pub fn max_size(self) -> Option<usize> {
    UPPER_BOUNDS.get(self.0).copied()
  }

  pub fn contains(
    self,
    size: usize,
  ) -> bool {
    size >= self.min_size() && self.max_size().is_none_or(|max| size <= max)
  }

  /// Every class in ascending order.
  pub fn all() -> impl Iterator<Item = SizeClass> {
    (0..NUM_CLASSES).map(Self)
  }

  /// This class followed by every larger one.
  pub fn and_larger(self) -> impl Iterator<Item = SizeClass> {
    (self.0..NUM_CLASSES).map(Self)
  }
}

impl fmt::Display for SizeClass {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self.max_size() {
      Some(max) => write!(f, "class {} [{}, {}]", self.0, self.min_size(), max),
      None => write!(f, "class {} [{}, ..)", self.0, self.min_size()),
    }
  }
}

/// The table of list roots. Holds only the offset of the table; the lists
/// themselves live in the arena and are passed in on every call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegregatedIndex {
  roots: usize,
}

impl SegregatedIndex {
  /// Size of the root table in bytes.
  pub const TABLE_SIZE: usize = NUM_CLASSES * DSIZE;

  /// Index whose root table starts at offset `roots`.
  pub const fn new(roots: usize) -> Self {
    Self { roots }
  }

  /// Offset of the sentinel root of `class`.
  pub fn root(
    &self,
    class: SizeClass,
  ) -> usize {
    self.roots + class.index() * DSIZE
  }

  /// Returns `true` if `node` is one of the sentinel roots.
  pub fn is_root(
    &self,
    node: usize,
  ) -> bool {
    node >= self.roots && node < self.roots + Self::TABLE_SIZE && (node - self.roots) % DSIZE == 0
  }

  /// Writes an empty list into every root slot.
  pub fn init(
    &self,
    bytes: &mut [u8],
  ) {
    for class in SizeClass::all() {
      list::init(bytes, self.root(class));
    }
  }

  /// Pushes the free block `bp` at the head of `class`.
  pub fn insert(
    &self,
    bytes: &mut [u8],
    bp: usize,
    class: SizeClass,
  ) {
    list::push_front(bytes, self.root(class), bp);
  }

  /// Removes the free block `bp` from whichever list currently holds it.
  pub fn remove(
    &self,
    bytes: &mut [u8],
    bp: usize,
  ) {
    list::unlink(bytes, bp);
  }

  /// Pushes the free block `bp` into the class matching its current size.
  pub fn insert_by_size(
    &self,
    bytes: &mut [u8],
    bp: usize,
  ) {
    let class = SizeClass::of(read_header(bytes, bp).size);
    self.insert(bytes, bp, class);
  }

  pub fn is_empty(
    &self,
    bytes: &[u8],
    class: SizeClass,
  ) -> bool {
    list::is_empty(bytes, self.root(class))
  }

  /// Free blocks of `class`, most recently inserted first.
  pub fn iter<'a>(
    &self,
    bytes: &'a [u8],
    class: SizeClass,
  ) -> list::Iter<'a> {
    list::Iter::new(bytes, self.root(class))
  }
}
