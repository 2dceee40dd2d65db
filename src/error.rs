//! Errors surfaced by arena growth, configuration and initialisation.
//!
//! Allocation calls themselves never return these; they report failure as
//! `None`, the way `malloc` reports it as a null pointer.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
  /// The arena can't grow by the requested amount.
  #[error("arena exhausted: requested {requested} more bytes, {used} of {capacity} in use")]
  ArenaExhausted {
    requested: usize,
    used: usize,
    capacity: usize,
  },

  /// Reserving the backing region failed.
  #[error("failed to map {length} bytes for the arena (errno {errno})")]
  MapFailed { length: usize, errno: i32 },

  #[error("invalid allocator configuration: {0}")]
  InvalidConfig(String),

  #[error("heap is already initialised")]
  AlreadyInitialized,

  #[error("heap is not initialised")]
  NotInitialized,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages() {
    let err = AllocError::ArenaExhausted {
      requested: 512,
      used: 4200,
      capacity: 4608,
    };
    assert_eq!(
      err.to_string(),
      "arena exhausted: requested 512 more bytes, 4200 of 4608 in use"
    );

    let err = AllocError::InvalidConfig("chunk_size must be a multiple of 8".into());
    assert!(err.to_string().ends_with("multiple of 8"));
  }
}
