//! Growable byte arena standing in for the raw heap-growth primitive.
//!
//! The arena is append-only: `grow` extends it and returns the offset of the
//! new region, previously returned offsets stay valid forever. A byte limit
//! models the collaborator refusing further growth, which surfaces as
//! [`HeapError::OutOfMemory`].

use tracing::debug;

use crate::types::{HeapError, Result};

/// Contiguous, append-only byte range addressed by `u32` offsets.
pub struct Arena {
    bytes: Vec<u8>,
    limit: usize,
}

impl Arena {
    /// Creates an empty arena that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Current arena length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True before the first growth.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Extends the arena by `n` zeroed bytes and returns the offset of the
    /// new region. Monotonic: never shrinks, never moves existing offsets.
    pub fn grow(&mut self, n: usize) -> Result<u32> {
        let base = self.bytes.len();
        let new_len = base.checked_add(n).ok_or(HeapError::OutOfMemory)?;
        if new_len > self.limit || new_len > u32::MAX as usize {
            return Err(HeapError::OutOfMemory);
        }
        self.bytes.resize(new_len, 0);
        debug!(grown = n, total = new_len, "arena grown");
        Ok(base as u32)
    }

    /// Reads a little-endian word at `offset`.
    pub fn read_u32(&self, offset: u32) -> u32 {
        let start = offset as usize;
        u32::from_le_bytes(self.bytes[start..start + 4].try_into().unwrap())
    }

    /// Writes a little-endian word at `offset`.
    pub fn write_u32(&mut self, offset: u32, value: u32) {
        let start = offset as usize;
        self.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads a little-endian half-word at `offset`.
    pub fn read_u16(&self, offset: u32) -> u16 {
        let start = offset as usize;
        u16::from_le_bytes(self.bytes[start..start + 2].try_into().unwrap())
    }

    /// Writes a little-endian half-word at `offset`.
    pub fn write_u16(&mut self, offset: u32, value: u16) {
        let start = offset as usize;
        self.bytes[start..start + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the byte at `offset`.
    pub fn read_u8(&self, offset: u32) -> u8 {
        self.bytes[offset as usize]
    }

    /// Writes the byte at `offset`.
    pub fn write_u8(&mut self, offset: u32, value: u8) {
        self.bytes[offset as usize] = value;
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn slice(&self, offset: u32, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.bytes[start..start + len]
    }

    /// Mutable variant of [`Arena::slice`].
    pub fn slice_mut(&mut self, offset: u32, len: usize) -> &mut [u8] {
        let start = offset as usize;
        &mut self.bytes[start..start + len]
    }

    /// Copies `len` bytes from `src` to `dst` within the arena.
    pub fn copy_within(&mut self, src: u32, dst: u32, len: usize) {
        let src = src as usize;
        self.bytes.copy_within(src..src + len, dst as usize);
    }

    /// Zeroes `len` bytes starting at `offset`.
    pub fn fill_zero(&mut self, offset: u32, len: usize) {
        let start = offset as usize;
        self.bytes[start..start + len].fill(0);
    }
}
