//! Free block search.
//!
//! Small requests take the first block that fits, starting at their own class
//! and moving up. Requests from [`BEST_FIT_CLASS`] upwards are rarer and waste
//! more when placed badly, so they scan every candidate class and keep the
//! smallest block that fits, stopping early on an exact match.

use crate::block::read_header;
use crate::class::{SegregatedIndex, SizeClass};

/// First class searched best-fit. Classes below it are searched first-fit.
pub const BEST_FIT_CLASS: usize = 4;

/// Search strategy used for a size class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitPolicy {
  FirstFit,
  BestFit,
}

impl FitPolicy {
  pub fn for_class(class: SizeClass) -> Self {
    if class.index() < BEST_FIT_CLASS {
      Self::FirstFit
    } else {
      Self::BestFit
    }
  }
}

/// Finds a free block of at least `asize` bytes, or `None` if no list holds
/// one and the arena has to grow.
pub fn find(
  bytes: &[u8],
  index: &SegregatedIndex,
  asize: usize,
) -> Option<usize> {
  let class = SizeClass::of(asize);

  match FitPolicy::for_class(class) {
    FitPolicy::FirstFit => first_fit(bytes, index, class, asize),
    FitPolicy::BestFit => best_fit(bytes, index, class, asize),
  }
}

fn first_fit(
  bytes: &[u8],
  index: &SegregatedIndex,
  class: SizeClass,
  asize: usize,
) -> Option<usize> {
  class
    .and_larger()
    .flat_map(|class| index.iter(bytes, class))
    .find(|&bp| read_header(bytes, bp).size >= asize)
}

fn best_fit(
  bytes: &[u8],
  index: &SegregatedIndex,
  class: SizeClass,
  asize: usize,
) -> Option<usize> {
  let mut best: Option<(usize, usize)> = None;

  for bp in class.and_larger().flat_map(|class| index.iter(bytes, class)) {
    let size = read_header(bytes, bp).size;

    if size == asize {
      return Some(bp);
    }

    if size > asize && best.is_none_or(|(_, best_size)| size < best_size) {
      best = Some((bp, size));
    }
  }

  best.map(|(bp, _)| bp)
}
