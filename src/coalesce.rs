//! Boundary-tag coalescing.
//!
//! A block that just became free is merged with whichever physical neighbours
//! are free, and the result is filed in the list matching its new size. The
//! state of the previous block comes from the `prev_allocated` bit in the
//! block's own header, so no footer is read unless that block really is free.
//!
//! ```text
//!   prev  next      result
//!   ----  ----      ------
//!   A     A         bp                      (isolated)
//!   A     F         bp + next               (merge_next)
//!   F     A         prev + bp               (merge_prev)
//!   F     F         prev + bp + next        (merge_both)
//! ```

use crate::block::{
  BlockTag, next_block, prev_block, read_header, set_prev_allocated, write_footer, write_header,
};
use crate::class::SegregatedIndex;

/// Merges the free block `bp` with its free neighbours and files the result.
/// Returns the block pointer of the merged block.
///
/// `bp` must already carry a free header and footer and must not be in any
/// list yet.
pub fn coalesce(
  bytes: &mut [u8],
  index: &SegregatedIndex,
  bp: usize,
) -> usize {
  let prev_free = !read_header(bytes, bp).prev_allocated;
  let next_free = !read_header(bytes, next_block(bytes, bp)).allocated;

  match (prev_free, next_free) {
    (false, false) => isolated(bytes, index, bp),
    (false, true) => merge_next(bytes, index, bp),
    (true, false) => merge_prev(bytes, index, bp),
    (true, true) => merge_both(bytes, index, bp),
  }
}

/// Both neighbours allocated: file `bp` as is and tell the next block.
pub fn isolated(
  bytes: &mut [u8],
  index: &SegregatedIndex,
  bp: usize,
) -> usize {
  index.insert_by_size(bytes, bp);

  let next = next_block(bytes, bp);
  set_prev_allocated(bytes, next, false);

  bp
}

/// Only the next block is free: absorb it into `bp`.
pub fn merge_next(
  bytes: &mut [u8],
  index: &SegregatedIndex,
  bp: usize,
) -> usize {
  let tag = read_header(bytes, bp);
  let next = next_block(bytes, bp);
  let size = tag.size + read_header(bytes, next).size;

  index.remove(bytes, next);
  write_free(bytes, bp, size, tag.prev_allocated);
  index.insert_by_size(bytes, bp);

  bp
}

/// Only the previous block is free: it absorbs `bp`.
pub fn merge_prev(
  bytes: &mut [u8],
  index: &SegregatedIndex,
  bp: usize,
) -> usize {
  let prev = prev_block(bytes, bp);
  let prev_tag = read_header(bytes, prev);
  let size = prev_tag.size + read_header(bytes, bp).size;

  index.remove(bytes, prev);
  write_free(bytes, prev, size, prev_tag.prev_allocated);

  let next = next_block(bytes, prev);
  set_prev_allocated(bytes, next, false);

  index.insert_by_size(bytes, prev);

  prev
}

/// Both neighbours free: the previous block absorbs `bp` and the next block.
pub fn merge_both(
  bytes: &mut [u8],
  index: &SegregatedIndex,
  bp: usize,
) -> usize {
  let prev = prev_block(bytes, bp);
  let next = next_block(bytes, bp);
  let prev_tag = read_header(bytes, prev);
  let size = prev_tag.size + read_header(bytes, bp).size + read_header(bytes, next).size;

  index.remove(bytes, next);
  index.remove(bytes, prev);
  write_free(bytes, prev, size, prev_tag.prev_allocated);
  index.insert_by_size(bytes, prev);

  prev
}

fn write_free(
  bytes: &mut [u8],
  bp: usize,
  size: usize,
  prev_allocated: bool,
) {
  write_header(bytes, bp, BlockTag::new(size, prev_allocated, false));
  write_footer(bytes, bp, BlockTag::footer(size));
}
