//! Allocator configuration parameters.

use crate::align::{ALIGNMENT, is_aligned};
use crate::block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::error::AllocError;

/// Controls how the heap grows. Validated when the allocator is built and
/// immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Minimum number of bytes the arena grows by when no free block fits.
  ///
  /// Default: 512.
  pub chunk_size: usize,

  /// Size of the free block created right after the heap is laid out.
  ///
  /// Default: 4096.
  pub initial_size: usize,
}

impl AllocatorConfig {
  pub const DEFAULT_CHUNK_SIZE: usize = 1 << 9;

  pub const DEFAULT_INITIAL_SIZE: usize = 1 << 12;

  pub fn new() -> Self {
    Self {
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      initial_size: Self::DEFAULT_INITIAL_SIZE,
    }
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_initial_size(
    mut self,
    initial_size: usize,
  ) -> Self {
    self.initial_size = initial_size;
    self
  }

  /// Both sizes must be multiples of the double word, no smaller than a
  /// minimum block and small enough for a block header.
  pub fn validate(&self) -> Result<(), AllocError> {
    let sizes = [("chunk_size", self.chunk_size), ("initial_size", self.initial_size)];

    for (name, value) in sizes {
      if value < MIN_BLOCK_SIZE || !is_aligned(value) || value > MAX_BLOCK_SIZE {
        return Err(AllocError::InvalidConfig(format!(
          "{name} is {value}, need a multiple of {ALIGNMENT} in {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}"
        )));
      }
    }

    Ok(())
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self::new()
  }
}
