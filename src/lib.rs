//! # segalloc - A Segregated Free List Allocator
//!
//! This crate implements a **segregated-fit allocator** with boundary tags over a
//! single growable arena. Freed blocks are merged with their free neighbours
//! immediately and filed by size, so later requests reuse them instead of
//! growing the heap.
//!
//! ## Overview
//!
//! ```text
//!   Segregated Free Lists:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         ROOT TABLE                                   │
//!   │                                                                      │
//!   │   class 0  [16]          ──► ┌────┐ ──► ┌────┐ ──► (root)            │
//!   │                              │ 16 │     │ 16 │                       │
//!   │   class 1  [17, 31]      ──► (root)                                  │
//!   │                                                                      │
//!   │   class 2  [32, 63]      ──► ┌────┐ ──► (root)                       │
//!   │                              │ 48 │                                  │
//!   │     ...                                                              │
//!   │                                                                      │
//!   │   class 9  [4096, ..)    ──► ┌──────┐ ──► (root)                     │
//!   │                              │ 8192 │                                │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Every list is circular and doubly linked through its root.
//!   Links are 4-byte offsets from the arena base.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro (align!)
//!   ├── arena      - Arena trait, VecArena and MmapArena
//!   ├── block      - Boundary tags, block navigation, heap walk
//!   ├── list       - Circular free lists over offsets (internal)
//!   ├── class      - Size classes and the root table
//!   ├── fit        - First-fit / best-fit search
//!   ├── coalesce   - Merging of adjacent free blocks
//!   ├── allocator  - Allocator: init, allocate, release, reallocate
//!   ├── validate   - Heap consistency checker
//!   ├── config     - AllocatorConfig
//!   └── error      - AllocError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, VecArena, AllocatorConfig};
//!
//! let mut heap = Allocator::new(VecArena::default(), AllocatorConfig::default()).unwrap();
//! heap.init().unwrap();
//!
//! // Allocate room for 12 bytes
//! let ptr = heap.allocate(12).unwrap();
//! heap.payload_mut(ptr, 12).copy_from_slice(b"hello, heap!");
//! assert_eq!(heap.payload(ptr, 12), b"hello, heap!");
//!
//! // Free it again, the block goes back to its size class
//! heap.release(ptr);
//! assert!(heap.check_heap().is_consistent());
//! ```
//!
//! ## How It Works
//!
//! The heap starts with a fixed layout, then grows in chunks:
//!
//! ```text
//!   Heap Layout:
//!
//!   offset 0    ┌─────────────────────┐
//!               │   pad (4 bytes)     │
//!   offset 4    ├─────────────────────┤
//!               │  prologue header    │  allocated, 96 bytes
//!   offset 8    ├─────────────────────┤
//!               │  root table         │  10 x (next, prev)
//!   offset 96   ├─────────────────────┤
//!               │  prologue footer    │
//!   offset 100  ├─────────────────────┤
//!               │  blocks ...         │  first payload at 104
//!               │                     │
//!               ├─────────────────────┤
//!               │  epilogue header    │  size 0, allocated
//!   break       └─────────────────────┘
//! ```
//!
//! Every block carries a one-word header:
//!
//! ```text
//!   Block Header:
//!   ┌──────────────────────────────────┬───────┬───────┐
//!   │           size [31:3]            │ prev  │ alloc │
//!   │                                  │ bit 1 │ bit 0 │
//!   └──────────────────────────────────┴───────┴───────┘
//!
//!   Free blocks also keep a footer with their size, and the
//!   next/prev free list links in their first two payload words.
//! ```
//!
//! ## Features
//!
//! - **Segregated lists**: ten size classes, first-fit for small requests and
//!   best-fit for large ones
//! - **Constant-time coalescing**: boundary tags plus a `prev_allocated` bit,
//!   so allocated blocks need no footer
//! - **Pluggable arenas**: a `Vec`-backed arena, or an `mmap(2)` reservation on unix
//! - **Heap checker**: reports every inconsistency without touching the heap
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **No shrinking**: The arena only grows; memory is returned when it is dropped
//! - **4 GiB heaps**: Free list links are 32-bit offsets
//! - **No in-place realloc**: `reallocate` always moves the data

pub mod align;
pub mod arena;
pub mod block;
pub mod class;
pub mod coalesce;
pub mod fit;
pub mod validate;

mod allocator;
mod config;
mod error;
mod list;

pub use allocator::{Allocator, LAYOUT_SIZE, PROLOGUE_SIZE};
#[cfg(unix)]
pub use arena::MmapArena;
pub use arena::{Arena, VecArena};
pub use block::{Address, BlockInfo, BlockTag};
pub use class::SizeClass;
pub use config::AllocatorConfig;
pub use error::AllocError;
pub use fit::FitPolicy;
pub use validate::{Corruption, HeapReport, HeapValidator};
