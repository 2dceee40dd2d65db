//! The memory the allocator carves blocks out of.
//!
//! An arena is one contiguous run of bytes that only ever grows at its high
//! end, like the program break moved by `sbrk(2)`:
//!
//! ```text
//!   low_address()                     high_address()
//!   |                                 |
//!   v                                 v
//!   +---------------------------------+- - - - - - - - - - - - +
//!   |          managed bytes          |   room left to grow    |
//!   +---------------------------------+- - - - - - - - - - - - +
//!                                     ^                        ^
//!                                     break                    capacity
//! ```
//!
//! The allocator addresses everything by offset from the arena base, so an
//! arena is free to move its bytes when it grows.

use std::ptr::{self, NonNull};

use crate::error::AllocError;

/// Largest arena the allocator can manage: free list links are 4-byte offsets.
pub const MAX_ARENA_SIZE: usize = u32::MAX as usize;

/// Default capacity, 20 MiB.
pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

/// Growable memory region used by [`crate::Allocator`].
pub trait Arena {
  /// Extends the arena by `bytes` and returns the offset where the new space
  /// starts. On failure the arena is left as it was.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError>;

  /// Every byte currently managed, starting at the arena base.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Maximum number of bytes the arena can grow to.
  fn capacity(&self) -> usize;

  /// Number of bytes currently managed.
  fn len(&self) -> usize {
    self.bytes().len()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Offset of the first managed byte.
  fn low_address(&self) -> usize {
    0
  }

  /// Offset of the last managed byte.
  fn high_address(&self) -> usize {
    self.len().saturating_sub(1)
  }
}

fn check_capacity(capacity: usize) -> Result<(), AllocError> {
  if capacity > MAX_ARENA_SIZE {
    return Err(AllocError::InvalidConfig(format!(
      "arena capacity {capacity} exceeds {MAX_ARENA_SIZE} bytes"
    )));
  }

  Ok(())
}

fn exhausted(
  requested: usize,
  used: usize,
  capacity: usize,
) -> AllocError {
  AllocError::ArenaExhausted {
    requested,
    used,
    capacity,
  }
}

/// Arena backed by a `Vec<u8>`. Every instance is an independent heap.
#[derive(Debug, Clone)]
pub struct VecArena {
  bytes: Vec<u8>,
  capacity: usize,
}

impl VecArena {
  pub fn new(capacity: usize) -> Result<Self, AllocError> {
    check_capacity(capacity)?;

    Ok(Self {
      bytes: Vec::new(),
      capacity,
    })
  }
}

impl Default for VecArena {
  fn default() -> Self {
    Self {
      bytes: Vec::new(),
      capacity: DEFAULT_CAPACITY,
    }
  }
}

impl Arena for VecArena {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError> {
    let old = self.bytes.len();
    let new = old
      .checked_add(bytes)
      .filter(|&new| new <= self.capacity)
      .ok_or_else(|| exhausted(bytes, old, self.capacity))?;

    self.bytes.resize(new, 0);

    Ok(old)
  }

  fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.bytes
  }

  fn capacity(&self) -> usize {
    self.capacity
  }
}

/// Arena backed by an anonymous private mapping reserved up front. Growing
/// moves a private break inside the mapping, so the bytes never move and
/// [`MmapArena::as_ptr`] plus an offset is a real, stable address.
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapArena {
  base: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

#[cfg(unix)]
impl MmapArena {
  pub fn new(capacity: usize) -> Result<Self, AllocError> {
    check_capacity(capacity)?;

    if capacity == 0 {
      return Err(AllocError::InvalidConfig("arena capacity must be non-zero".into()));
    }

    // Read-write, private to this process and not backed by any file.
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(ptr::null_mut(), capacity, protection, flags, -1, 0) };

    if address == libc::MAP_FAILED {
      return Err(AllocError::MapFailed {
        length: capacity,
        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
      });
    }

    match NonNull::new(address.cast::<u8>()) {
      Some(base) => Ok(Self {
        base,
        brk: 0,
        capacity,
      }),
      None => Err(AllocError::MapFailed {
        length: capacity,
        errno: 0,
      }),
    }
  }

  /// Address of the arena base. Valid until the arena is dropped.
  pub fn as_ptr(&self) -> *const u8 {
    self.base.as_ptr()
  }
}

#[cfg(unix)]
impl Arena for MmapArena {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError> {
    let old = self.brk;
    self.brk = old
      .checked_add(bytes)
      .filter(|&new| new <= self.capacity)
      .ok_or_else(|| exhausted(bytes, old, self.capacity))?;

    Ok(old)
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: the mapping is `capacity` bytes long, readable, zero filled by
    // the kernel and owned by `self`; `brk <= capacity`.
    unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` guarantees exclusive access.
    unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
  }

  fn capacity(&self) -> usize {
    self.capacity
  }
}

#[cfg(unix)]
impl Drop for MmapArena {
  fn drop(&mut self) {
    let result = unsafe { libc::munmap(self.base.as_ptr().cast(), self.capacity) };

    if result != 0 {
      tracing::warn!(
        capacity = self.capacity,
        error = %std::io::Error::last_os_error(),
        "failed to unmap arena"
      );
    }
  }
}
