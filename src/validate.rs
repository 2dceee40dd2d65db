//! Heap consistency checker.
//!
//! Two independent passes over the same heap:
//!
//! 1. A physical walk from the prologue to the epilogue, following block
//!    sizes, that checks each block on its own and against its neighbour.
//! 2. A walk of every free list, following links, that checks the links agree
//!    with each other and that each block sits in the right class.
//!
//! Both passes count free blocks; the counts must agree. Every read is
//! bounds-checked and every list walk is bounded, so a corrupted heap yields
//! a report instead of a panic or a hang. Nothing is ever written.

use thiserror::Error;
use tracing::warn;

use crate::align::is_aligned;
use crate::allocator::PROLOGUE_SIZE;
use crate::block::{BlockTag, DSIZE, MIN_BLOCK_SIZE, WSIZE, header, try_read_word};
use crate::class::{SegregatedIndex, SizeClass};

/// One inconsistency found by [`HeapValidator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
  #[error("heap is not initialised")]
  Uninitialized,

  #[error("prologue at {block:#x} is not an allocated {}-byte block: {tag:?}", PROLOGUE_SIZE)]
  BadPrologue { block: usize, tag: BlockTag },

  #[error("epilogue at {at:#x} is not a zero-size allocated header: {tag:?}")]
  BadEpilogue { at: usize, tag: BlockTag },

  #[error("block walk ended at {at:#x}, epilogue is recorded at {expected:#x}")]
  WalkEndMismatch { at: usize, expected: usize },

  #[error("block at {block:#x} runs past the end of the heap")]
  OutOfBounds { block: usize },

  #[error("block at {block:#x} is not 8-byte aligned")]
  Misaligned { block: usize },

  #[error("block at {block:#x} has size {size}, below the minimum of {}", MIN_BLOCK_SIZE)]
  TooSmall { block: usize, size: usize },

  #[error("free block at {block:#x}: header {header:?} doesn't match footer {footer:?}")]
  FooterMismatch {
    block: usize,
    header: BlockTag,
    footer: Option<BlockTag>,
  },

  #[error("free blocks at {block:#x} and the block before it were not coalesced")]
  AdjacentFree { block: usize },

  #[error(
    "block at {block:#x} records prev_allocated={recorded}, previous block is allocated={actual}"
  )]
  PrevAllocMismatch {
    block: usize,
    recorded: bool,
    actual: bool,
  },

  #[error("{class}: link from {from:#x} to {to:#x} leaves the heap")]
  LinkOutOfHeap {
    class: SizeClass,
    from: usize,
    to: usize,
  },

  #[error("{class}: link from {from:#x} reaches the root of another class at {to:#x}")]
  CrossedRoot {
    class: SizeClass,
    from: usize,
    to: usize,
  },

  #[error("{class}: {block:#x}.prev is {back:#x}, expected {expected:#x}")]
  LinkMismatch {
    class: SizeClass,
    block: usize,
    back: usize,
    expected: usize,
  },

  #[error("{class}: list doesn't return to its root")]
  ListCycle { class: SizeClass },

  #[error("{class}: listed block at {block:#x} is allocated")]
  ListedAllocated { class: SizeClass, block: usize },

  #[error("{class}: block at {block:#x} of size {size} belongs to another class")]
  WrongClass {
    class: SizeClass,
    block: usize,
    size: usize,
  },

  #[error("{physical} free blocks in the heap but {listed} in the free lists")]
  CountMismatch { physical: usize, listed: usize },
}

/// Outcome of a heap check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapReport {
  /// Every inconsistency found, in discovery order.
  pub issues: Vec<Corruption>,
  /// Free blocks met walking the heap.
  pub free_blocks_physical: usize,
  /// Free blocks met walking the free lists.
  pub free_blocks_listed: usize,
  /// Total size of the free blocks met walking the heap.
  pub free_bytes: usize,
  /// Allocated blocks met walking the heap, sentinels excluded.
  pub allocated_blocks: usize,
}

impl HeapReport {
  pub(crate) fn uninitialized() -> Self {
    Self {
      issues: vec![Corruption::Uninitialized],
      ..Self::default()
    }
  }

  pub fn is_consistent(&self) -> bool {
    self.issues.is_empty()
  }
}

/// Read-only checker over one heap.
pub struct HeapValidator<'a> {
  bytes: &'a [u8],
  index: &'a SegregatedIndex,
  prologue: usize,
  epilogue: usize,
}

impl<'a> HeapValidator<'a> {
  /// `prologue` is the prologue's block pointer and `epilogue` the offset of
  /// the epilogue header as recorded by the allocator.
  pub fn new(
    bytes: &'a [u8],
    index: &'a SegregatedIndex,
    prologue: usize,
    epilogue: usize,
  ) -> Self {
    Self {
      bytes,
      index,
      prologue,
      epilogue,
    }
  }

  pub fn check(&self) -> HeapReport {
    let mut report = HeapReport::default();

    self.check_sentinels(&mut report);
    self.walk_blocks(&mut report);
    self.walk_lists(&mut report);

    if report.free_blocks_physical != report.free_blocks_listed {
      report.issues.push(Corruption::CountMismatch {
        physical: report.free_blocks_physical,
        listed: report.free_blocks_listed,
      });
    }

    for issue in &report.issues {
      warn!(%issue, "heap check failed");
    }

    report
  }

  fn tag_at(
    &self,
    offset: usize,
  ) -> Option<BlockTag> {
    try_read_word(self.bytes, offset).map(BlockTag::unpack)
  }

  fn first_block(&self) -> usize {
    self.prologue + PROLOGUE_SIZE
  }

  fn check_sentinels(
    &self,
    report: &mut HeapReport,
  ) {
    let expected = BlockTag::new(PROLOGUE_SIZE, true, true);
    let head = self.tag_at(header(self.prologue));
    let foot = self.tag_at(self.prologue + PROLOGUE_SIZE - DSIZE);

    for tag in [head, foot] {
      match tag {
        Some(tag) if tag.size == expected.size && tag.allocated => {}
        Some(tag) => report.issues.push(Corruption::BadPrologue {
          block: self.prologue,
          tag,
        }),
        None => report.issues.push(Corruption::OutOfBounds {
          block: self.prologue,
        }),
      }
    }

    match self.tag_at(self.epilogue) {
      Some(tag) if tag.size == 0 && tag.allocated => {}
      Some(tag) => report.issues.push(Corruption::BadEpilogue {
        at: self.epilogue,
        tag,
      }),
      None => report.issues.push(Corruption::OutOfBounds {
        block: self.epilogue + WSIZE,
      }),
    }
  }

  fn walk_blocks(
    &self,
    report: &mut HeapReport,
  ) {
    let mut bp = self.first_block();
    let mut prev_allocated = true;

    loop {
      let Some(tag) = self.tag_at(header(bp)) else {
        report.issues.push(Corruption::OutOfBounds { block: bp });
        return;
      };

      if tag.prev_allocated != prev_allocated {
        report.issues.push(Corruption::PrevAllocMismatch {
          block: bp,
          recorded: tag.prev_allocated,
          actual: prev_allocated,
        });
      }

      if tag.size == 0 {
        if header(bp) != self.epilogue {
          report.issues.push(Corruption::WalkEndMismatch {
            at: header(bp),
            expected: self.epilogue,
          });
        }
        return;
      }

      if !is_aligned(bp) {
        report.issues.push(Corruption::Misaligned { block: bp });
      }

      if tag.size < MIN_BLOCK_SIZE {
        report.issues.push(Corruption::TooSmall {
          block: bp,
          size: tag.size,
        });
      }

      if bp + tag.size > self.bytes.len() {
        report.issues.push(Corruption::OutOfBounds { block: bp });
        return;
      }

      if tag.allocated {
        report.allocated_blocks += 1;
      } else {
        report.free_blocks_physical += 1;
        report.free_bytes += tag.size;

        let footer = self.tag_at(bp + tag.size - DSIZE);
        if footer.is_none_or(|footer| footer.size != tag.size || footer.allocated) {
          report.issues.push(Corruption::FooterMismatch {
            block: bp,
            header: tag,
            footer,
          });
        }

        if !prev_allocated {
          report.issues.push(Corruption::AdjacentFree { block: bp });
        }
      }

      prev_allocated = tag.allocated;
      bp += tag.size;
    }
  }

  fn in_heap(
    &self,
    bp: usize,
  ) -> bool {
    bp >= self.first_block() && bp < self.epilogue
  }

  fn walk_lists(
    &self,
    report: &mut HeapReport,
  ) {
    // A well-formed list can't hold more blocks than fit in the heap.
    let max_steps = self.bytes.len() / MIN_BLOCK_SIZE + 1;

    for class in SizeClass::all() {
      let root = self.index.root(class);
      let mut node = root;
      let mut steps = 0;

      loop {
        let Some(next) = try_read_word(self.bytes, node).map(|link| link as usize) else {
          report.issues.push(Corruption::OutOfBounds { block: node });
          break;
        };

        if next != root && self.index.is_root(next) {
          report.issues.push(Corruption::CrossedRoot {
            class,
            from: node,
            to: next,
          });
          break;
        }

        if next != root && !self.in_heap(next) {
          report.issues.push(Corruption::LinkOutOfHeap {
            class,
            from: node,
            to: next,
          });
          break;
        }

        match try_read_word(self.bytes, next + WSIZE).map(|link| link as usize) {
          Some(back) if back == node => {}
          back => report.issues.push(Corruption::LinkMismatch {
            class,
            block: next,
            back: back.unwrap_or(usize::MAX),
            expected: node,
          }),
        }

        if next == root {
          break;
        }

        steps += 1;
        if steps > max_steps {
          report.issues.push(Corruption::ListCycle { class });
          break;
        }

        report.free_blocks_listed += 1;

        if let Some(tag) = self.tag_at(header(next)) {
          if tag.allocated {
            report.issues.push(Corruption::ListedAllocated { class, block: next });
          }
          if !class.contains(tag.size) {
            report.issues.push(Corruption::WrongClass {
              class,
              block: next,
              size: tag.size,
            });
          }
        }

        node = next;
      }
    }
  }
}
