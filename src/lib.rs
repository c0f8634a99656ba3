//! emberheap: a dynamic-memory allocator over a growable byte arena.
//!
//! Free space is tracked by a B+ tree keyed on block size, and the tree's
//! own nodes live inside the arena they index, carved as ordinary allocated
//! blocks. Every block carries mirrored boundary tags, so physical
//! neighbors are always reachable and adjacent free blocks coalesce eagerly.
//!
//! The entry point is [`Heap`]:
//!
//! ```
//! use emberheap::Heap;
//!
//! let mut heap = Heap::new()?;
//! let block = heap.allocate(64)?;
//! heap.payload_mut(block)[..5].copy_from_slice(b"hello");
//! heap.release(Some(block))?;
//! # Ok::<(), emberheap::HeapError>(())
//! ```
//!
//! Handles are plain arena offsets, not pointers, so the arena can reallocate
//! its backing storage on growth without invalidating anything.

pub mod arena;
pub mod block;
pub mod check;
pub mod heap;
pub mod index;
pub mod types;

pub use check::{verify, verify_index, HeapStats, IndexStats};
pub use heap::{Heap, HeapOptions};
pub use types::{BlockOffset, HeapError, NodeOffset, Result};
