//! Circular doubly linked list threaded through the arena.
//!
//! A node is any 8-byte slot in the arena: the first word holds the offset of
//! the next node and the second word the offset of the previous one. Offsets
//! are relative to the arena base, so a link survives the arena buffer moving.
//! Links are always stored as little-endian `u32` words, which caps the arena
//! at 4 GiB.
//!
//! ```text
//!   +------+     +------+     +------+
//!   | root | --> |  A   | --> |  B   | --+
//!   |      | <-- |      | <-- |      |   |
//!   +------+     +------+     +------+   |
//!     ^  |                       ^       |
//!     |  +------- prev ----------+       |
//!     +------------- next ---------------+
//! ```
//!
//! Every list owns a sentinel root that is never removed. An empty list is a
//! root linked to itself, so insertion and removal never special-case the
//! ends.

use crate::block::{WSIZE, read_word, write_word};

#[inline]
fn store(
  bytes: &mut [u8],
  offset: usize,
  node: usize,
) {
  write_word(bytes, offset, node as u32);
}

/// Node following `node`.
#[inline]
pub fn next(
  bytes: &[u8],
  node: usize,
) -> usize {
  read_word(bytes, node) as usize
}

/// Node preceding `node`.
#[inline]
pub fn prev(
  bytes: &[u8],
  node: usize,
) -> usize {
  read_word(bytes, node + WSIZE) as usize
}

#[inline]
fn set_next(
  bytes: &mut [u8],
  node: usize,
  target: usize,
) {
  store(bytes, node, target);
}

#[inline]
fn set_prev(
  bytes: &mut [u8],
  node: usize,
  target: usize,
) {
  store(bytes, node + WSIZE, target);
}

/// Makes `root` an empty list.
pub fn init(
  bytes: &mut [u8],
  root: usize,
) {
  set_next(bytes, root, root);
  set_prev(bytes, root, root);
}

pub fn is_empty(
  bytes: &[u8],
  root: usize,
) -> bool {
  next(bytes, root) == root
}

/// Links `node` right after `root`.
pub fn push_front(
  bytes: &mut [u8],
  root: usize,
  node: usize,
) {
  let first = next(bytes, root);

  set_next(bytes, node, first);
  set_prev(bytes, node, root);
  set_prev(bytes, first, node);
  set_next(bytes, root, node);
}

/// Splices `node` out using its own links. The node's link words are left as
/// they were.
pub fn unlink(
  bytes: &mut [u8],
  node: usize,
) {
  let before = prev(bytes, node);
  let after = next(bytes, node);

  set_prev(bytes, after, before);
  set_next(bytes, before, after);
}

/// Iterates the nodes of the list anchored at `root`, front to back, not
/// including the root itself.
pub struct Iter<'a> {
  bytes: &'a [u8],
  root: usize,
  cursor: usize,
}

impl<'a> Iter<'a> {
  pub fn new(
    bytes: &'a [u8],
    root: usize,
  ) -> Self {
    Self {
      bytes,
      root,
      cursor: next(bytes, root),
    }
  }
}

impl Iterator for Iter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor == self.root {
      return None;
    }

    let node = self.cursor;
    self.cursor = next(self.bytes, node);

    Some(node)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ROOT: usize = 8;

  fn nodes(
    bytes: &[u8],
    root: usize,
  ) -> Vec<usize> {
    Iter::new(bytes, root).collect()
  }

  #[test]
  fn test_empty_list() {
    let mut bytes = vec![0u8; 64];
    init(&mut bytes, ROOT);

    assert!(is_empty(&bytes, ROOT));
    assert_eq!(next(&bytes, ROOT), ROOT);
    assert_eq!(prev(&bytes, ROOT), ROOT);
    assert!(nodes(&bytes, ROOT).is_empty());
  }

  #[test]
  fn test_push_front_is_lifo() {
    let mut bytes = vec![0u8; 64];
    init(&mut bytes, ROOT);

    push_front(&mut bytes, ROOT, 16);
    push_front(&mut bytes, ROOT, 24);
    push_front(&mut bytes, ROOT, 32);

    assert_eq!(nodes(&bytes, ROOT), vec![32, 24, 16]);
    assert_eq!(prev(&bytes, ROOT), 16);
    assert_eq!(next(&bytes, 16), ROOT);
  }

  #[test]
  fn test_unlink() {
    let mut bytes = vec![0u8; 64];
    init(&mut bytes, ROOT);

    for node in [16, 24, 32] {
      push_front(&mut bytes, ROOT, node);
    }

    unlink(&mut bytes, 24);
    assert_eq!(nodes(&bytes, ROOT), vec![32, 16]);
    assert_eq!(prev(&bytes, 16), 32);

    unlink(&mut bytes, 32);
    unlink(&mut bytes, 16);
    assert!(is_empty(&bytes, ROOT));
    assert_eq!(prev(&bytes, ROOT), ROOT);
  }

  #[test]
  fn test_independent_lists() {
    let mut bytes = vec![0u8; 64];
    init(&mut bytes, 0);
    init(&mut bytes, ROOT);

    push_front(&mut bytes, 0, 16);
    push_front(&mut bytes, ROOT, 24);

    assert_eq!(nodes(&bytes, 0), vec![16]);
    assert_eq!(nodes(&bytes, ROOT), vec![24]);
  }

  #[test]
  fn test_links_are_u32_words() {
    let mut bytes = vec![0u8; 64];
    init(&mut bytes, ROOT);
    push_front(&mut bytes, ROOT, 40);

    assert_eq!(&bytes[ROOT..ROOT + WSIZE], &40u32.to_le_bytes());
    assert_eq!(&bytes[40..40 + WSIZE], &(ROOT as u32).to_le_bytes());
    assert_eq!(&bytes[44..44 + WSIZE], &(ROOT as u32).to_le_bytes());
  }
}
