//! Boundary-tag block layout.
//!
//! Every block starts with a one word header. Free blocks repeat their size in
//! a footer word so the following block can find their start; allocated blocks
//! don't, the following block records their state in its `prev_allocated` bit
//! instead.
//!
//! ```text
//!   Allocated block:                 Free block:
//!
//!   +--------------------+           +--------------------+
//!   | size | 0 | p | 1   | header    | size | 0 | p | 0   | header
//!   +--------------------+ <- bp     +--------------------+ <- bp
//!   |                    |           | next free (offset) |
//!   |      payload       |           +--------------------+
//!   |                    |           | prev free (offset) |
//!   |                    |           +--------------------+
//!   |                    |           |       unused       |
//!   |                    |           +--------------------+
//!   |                    |           | size | 0 | 0 | 0   | footer
//!   +--------------------+           +--------------------+
//!
//!   bits [31:3] size, bit 1 previous block allocated, bit 0 allocated.
//! ```
//!
//! All functions here take the arena bytes and a block pointer `bp`, which is
//! the offset of the first payload byte (the word right after the header).

use std::fmt;

use crate::align::ALIGNMENT;

/// Word size, also the size of a header or footer.
pub const WSIZE: usize = 4;

/// Double word size.
pub const DSIZE: usize = 8;

/// Smallest block the heap ever holds: header, two links and a footer.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Requests up to this many bytes are served by a [`MIN_BLOCK_SIZE`] block.
pub const MIN_ALLOC_PAYLOAD: usize = MIN_BLOCK_SIZE - WSIZE;

/// Largest size the header's size field can hold.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

const ALLOC_BIT: u32 = 0x1;
const PREV_ALLOC_BIT: u32 = 0x2;
const SIZE_MASK: u32 = !0x7;

/// Location of a payload inside the arena, as a byte offset from the arena
/// base. Offset zero is the alignment pad and never a payload, so it doubles
/// as the null address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
  /// The null address. Releasing it is a no-op.
  pub const NULL: Address = Address(0);

  pub const fn new(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }

  pub const fn is_null(self) -> bool {
    self.0 == 0
  }
}

impl fmt::Display for Address {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// Decoded header or footer word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTag {
  /// Block size in bytes, header and footer included.
  pub size: usize,
  /// Whether the physically preceding block is allocated.
  pub prev_allocated: bool,
  /// Whether this block is allocated.
  pub allocated: bool,
}

impl BlockTag {
  pub const fn new(
    size: usize,
    prev_allocated: bool,
    allocated: bool,
  ) -> Self {
    Self {
      size,
      prev_allocated,
      allocated,
    }
  }

  /// Tag written in a free block's footer: size only.
  pub const fn footer(size: usize) -> Self {
    Self::new(size, false, false)
  }

  /// Encodes the tag into a header word. The size must be a multiple of
  /// [`ALIGNMENT`] no larger than [`MAX_BLOCK_SIZE`].
  pub const fn pack(self) -> u32 {
    let mut word = self.size as u32 & SIZE_MASK;
    if self.prev_allocated {
      word |= PREV_ALLOC_BIT;
    }
    if self.allocated {
      word |= ALLOC_BIT;
    }
    word
  }

  pub const fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      prev_allocated: word & PREV_ALLOC_BIT != 0,
      allocated: word & ALLOC_BIT != 0,
    }
  }
}

/// Block size needed to serve a request of `size` payload bytes, or `None`
/// when the request can't be described by a header.
pub fn block_size_for(size: usize) -> Option<usize> {
  if size <= MIN_ALLOC_PAYLOAD {
    return Some(MIN_BLOCK_SIZE);
  }

  let padded = size.checked_add(WSIZE + ALIGNMENT - 1)?;
  let asize = padded & !(ALIGNMENT - 1);

  (asize <= MAX_BLOCK_SIZE).then_some(asize)
}

#[inline]
pub fn read_word(
  bytes: &[u8],
  offset: usize,
) -> u32 {
  let mut word = [0; WSIZE];
  word.copy_from_slice(&bytes[offset..offset + WSIZE]);
  u32::from_le_bytes(word)
}

/// Like [`read_word`] but returns `None` instead of panicking when the word
/// isn't inside `bytes`. Used where the heap may be corrupted.
#[inline]
pub fn try_read_word(
  bytes: &[u8],
  offset: usize,
) -> Option<u32> {
  let end = offset.checked_add(WSIZE)?;
  let word = bytes.get(offset..end)?;
  let mut buf = [0; WSIZE];
  buf.copy_from_slice(word);
  Some(u32::from_le_bytes(buf))
}

#[inline]
pub fn write_word(
  bytes: &mut [u8],
  offset: usize,
  value: u32,
) {
  bytes[offset..offset + WSIZE].copy_from_slice(&value.to_le_bytes());
}

/// Offset of the header of `bp`.
#[inline]
pub const fn header(bp: usize) -> usize {
  bp - WSIZE
}

/// Offset of the footer of `bp`, computed from its current header.
#[inline]
pub fn footer(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp + read_header(bytes, bp).size - DSIZE
}

#[inline]
pub fn read_header(
  bytes: &[u8],
  bp: usize,
) -> BlockTag {
  BlockTag::unpack(read_word(bytes, header(bp)))
}

#[inline]
pub fn write_header(
  bytes: &mut [u8],
  bp: usize,
  tag: BlockTag,
) {
  write_word(bytes, header(bp), tag.pack());
}

/// Writes `tag` into the last word of the block, located by `tag.size` so the
/// header and footer may be written in either order.
#[inline]
pub fn write_footer(
  bytes: &mut [u8],
  bp: usize,
  tag: BlockTag,
) {
  write_word(bytes, bp + tag.size - DSIZE, tag.pack());
}

/// Block pointer of the physically next block.
#[inline]
pub fn next_block(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp + read_header(bytes, bp).size
}

/// Block pointer of the physically previous block. Only meaningful when that
/// block is free, because only free blocks carry a footer.
#[inline]
pub fn prev_block(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp - BlockTag::unpack(read_word(bytes, bp - DSIZE)).size
}

/// Sets or clears the `prev_allocated` bit of `bp`'s header, leaving the rest
/// of the word untouched.
#[inline]
pub fn set_prev_allocated(
  bytes: &mut [u8],
  bp: usize,
  prev_allocated: bool,
) {
  let tag = read_header(bytes, bp);
  write_header(
    bytes,
    bp,
    BlockTag {
      prev_allocated,
      ..tag
    },
  );
}

/// One block seen by a heap walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub address: Address,
  pub size: usize,
  pub allocated: bool,
  pub prev_allocated: bool,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = |allocated: bool| if allocated { 'a' } else { 'f' };
    write!(
      f,
      "{}: {} header [{}, {}, {}]",
      self.address,
      if self.allocated { "ALLOCATED" } else { "FREE" },
      self.size,
      state(self.prev_allocated),
      state(self.allocated),
    )
  }
}

/// Walks blocks in address order until the epilogue. Stops early instead of
/// panicking if a header points outside the arena.
pub struct BlockIter<'a> {
  bytes: &'a [u8],
  cursor: usize,
}

impl<'a> BlockIter<'a> {
  pub(crate) fn new(
    bytes: &'a [u8],
    first: usize,
  ) -> Self {
    Self {
      bytes,
      cursor: first,
    }
  }
}

impl Iterator for BlockIter<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let tag = BlockTag::unpack(try_read_word(self.bytes, header(self.cursor))?);

    if tag.size == 0 || self.cursor + tag.size > self.bytes.len() {
      return None;
    }

    let info = BlockInfo {
      address: Address::new(self.cursor),
      size: tag.size,
      allocated: tag.allocated,
      prev_allocated: tag.prev_allocated,
    };
    self.cursor += tag.size;

    Some(info)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_pack_unpack() {
    let tags = [
      BlockTag::new(16, false, false),
      BlockTag::new(16, true, false),
      BlockTag::new(4096, true, true),
      BlockTag::new(0, true, true),
      BlockTag::new(MAX_BLOCK_SIZE, false, true),
    ];

    for tag in tags {
      assert_eq!(BlockTag::unpack(tag.pack()), tag);
    }

    assert_eq!(BlockTag::new(24, true, true).pack(), 24 | 0x2 | 0x1);
    assert_eq!(BlockTag::footer(32).pack(), 32);
  }

  #[test]
  fn test_block_size_for() {
    assert_eq!(block_size_for(1), Some(16));
    assert_eq!(block_size_for(12), Some(16));
    assert_eq!(block_size_for(13), Some(24));
    assert_eq!(block_size_for(20), Some(24));
    assert_eq!(block_size_for(21), Some(32));
    assert_eq!(block_size_for(176), Some(184));
    assert_eq!(block_size_for(usize::MAX), None);
    assert_eq!(block_size_for(MAX_BLOCK_SIZE), None);
  }

  #[test]
  fn test_neighbours() {
    let mut bytes = vec![0u8; 64];

    // [pad | A: 24 allocated | B: 16 free | epilogue]
    write_header(&mut bytes, 8, BlockTag::new(24, true, true));
    let b = next_block(&bytes, 8);
    assert_eq!(b, 32);

    let tag = BlockTag::new(16, true, false);
    write_header(&mut bytes, b, tag);
    write_footer(&mut bytes, b, BlockTag::footer(16));
    assert_eq!(footer(&bytes, b), 40);

    let end = next_block(&bytes, b);
    write_header(&mut bytes, end, BlockTag::new(0, false, true));
    assert_eq!(prev_block(&bytes, end), b);

    set_prev_allocated(&mut bytes, end, true);
    assert_eq!(read_header(&bytes, end), BlockTag::new(0, true, true));

    let walked: Vec<_> = BlockIter::new(&bytes, 8).collect();
    assert_eq!(walked.len(), 2);
    assert!(walked[0].allocated);
    assert!(!walked[1].allocated);
    assert_eq!(walked[1].to_string(), "0x20: FREE header [16, a, f]");
  }

  #[test]
  fn test_try_read_word_out_of_bounds() {
    let bytes = [1u8, 0, 0, 0, 2];
    assert_eq!(try_read_word(&bytes, 0), Some(1));
    assert_eq!(try_read_word(&bytes, 2), None);
    assert_eq!(try_read_word(&bytes, usize::MAX), None);
  }

  #[test]
  fn test_address() {
    assert!(Address::NULL.is_null());
    assert_eq!(Address::new(104).offset(), 104);
    assert_eq!(Address::new(104).to_string(), "0x68");
  }
}
