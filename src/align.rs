/// Alignment of every block address and block size in the arena (one double word).
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 24);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    (($value) + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Returns `true` if `value` is a multiple of [`ALIGNMENT`].
#[inline]
pub const fn is_aligned(value: usize) -> bool {
  value & (ALIGNMENT - 1) == 0
}
