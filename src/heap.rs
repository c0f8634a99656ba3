//! Public allocator façade: allocate, release, resize.
//!
//! `Heap` owns the arena and the free-block index and orchestrates the
//! block layer, the placement/split decision, and coalescing of physically
//! adjacent free blocks. Single-threaded by contract: callers serialize all
//! operations against one heap.
//!
//! Every operation reserves the index's worst-case node demand before it
//! mutates any block tags, so a refused arena growth always surfaces as
//! `OutOfMemory` with the heap in its pre-call state. The reservation is
//! conservative (tree height, not the actual split run), which means an
//! operation at the hard arena limit can be refused even when the index
//! would not have split; the heap stays fully usable within what is already
//! carved.

use tracing::trace;

use crate::arena::Arena;
use crate::block;
use crate::index::FreeIndex;
use crate::types::{
    align_up, BlockOffset, HeapError, Result, DSIZE, MIN_BLOCK_SIZE, WSIZE,
};

/// Tuning knobs for a heap instance.
#[derive(Clone, Copy, Debug)]
pub struct HeapOptions {
    /// Hard byte limit the arena will never grow past.
    pub arena_limit: usize,
    /// Minimum number of bytes added per arena growth.
    pub growth_chunk: usize,
}

impl Default for HeapOptions {
    fn default() -> Self {
        Self {
            arena_limit: 1 << 30,
            growth_chunk: 4096,
        }
    }
}

/// A growable arena allocator with a B+ tree free-block index.
pub struct Heap {
    arena: Arena,
    index: FreeIndex,
    growth_chunk: usize,
}

impl Heap {
    /// Builds a heap with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(HeapOptions::default())
    }

    /// Builds a heap: bootstrap tags, an empty root leaf, and one growth
    /// chunk of free space. Fails with [`HeapError::Init`] when the arena
    /// limit cannot host even that.
    pub fn with_options(options: HeapOptions) -> Result<Self> {
        let mut arena = Arena::with_limit(options.arena_limit);
        arena
            .grow(block::FIRST_BLOCK as usize)
            .map_err(|_| HeapError::Init("arena limit below bootstrap tags"))?;
        block::write_bootstrap(&mut arena);
        let index = FreeIndex::bootstrap(&mut arena)
            .map_err(|_| HeapError::Init("arena limit below root node"))?;
        let mut heap = Self {
            arena,
            index,
            growth_chunk: options.growth_chunk.max(MIN_BLOCK_SIZE as usize),
        };
        heap.extend(heap.growth_chunk)
            .map_err(|_| HeapError::Init("arena limit below first growth chunk"))?;
        Ok(heap)
    }

    /// Allocates at least `len` usable bytes and returns the payload offset.
    pub fn allocate(&mut self, len: usize) -> Result<BlockOffset> {
        if len == 0 {
            return Err(HeapError::InvalidSize);
        }
        let asize = block_size_for(len)?;
        // Growth and placement each insert once; cover both before mutating.
        self.index.reserve(&mut self.arena, 2)?;

        if let Some(bp) = self.index.find_first_fit(&self.arena, asize)? {
            self.index.remove(&mut self.arena, bp)?;
            self.place(bp, asize)?;
            return Ok(bp);
        }

        self.extend(asize.max(self.growth_chunk as u32) as usize)?;
        let bp = self
            .index
            .find_first_fit(&self.arena, asize)?
            .ok_or(HeapError::Corruption("grown arena lost its first fit"))?;
        self.index.remove(&mut self.arena, bp)?;
        self.place(bp, asize)?;
        Ok(bp)
    }

    /// Frees the block at `bp`, coalescing with adjacent free neighbors.
    /// `None` is a no-op, matching a null free.
    ///
    /// Fails with [`HeapError::OutOfMemory`] only when index node storage
    /// cannot be reserved at the arena limit; the block is then left
    /// allocated and untouched.
    pub fn release(&mut self, bp: Option<BlockOffset>) -> Result<()> {
        let Some(bp) = bp else { return Ok(()) };
        self.index.reserve(&mut self.arena, 1)?;
        let size = block::size(&self.arena, bp);
        block::set_tags(&mut self.arena, bp, size, false);
        let merged = self.coalesce(bp)?;
        self.index.insert(&mut self.arena, merged)
    }

    /// Resizes the block at `bp` to hold `len` bytes.
    ///
    /// `None` input behaves as [`Heap::allocate`]; `len == 0` releases the
    /// block and returns `None`. Shrinks stay in place and split a remainder
    /// back into the index; grows first try to absorb a free physical
    /// successor, then fall back to allocate-copy-release.
    pub fn resize(&mut self, bp: Option<BlockOffset>, len: usize) -> Result<Option<BlockOffset>> {
        let Some(bp) = bp else {
            if len == 0 {
                return Ok(None);
            }
            return self.allocate(len).map(Some);
        };
        if len == 0 {
            self.release(Some(bp))?;
            return Ok(None);
        }

        let old_size = block::size(&self.arena, bp);
        let asize = block_size_for(len)?;
        // Shrink and absorb insert at most once; the relocation path defers
        // to allocate/release, which reserve for themselves.
        self.index.reserve(&mut self.arena, 1)?;

        if asize <= old_size {
            if old_size - asize >= MIN_BLOCK_SIZE {
                block::set_tags(&mut self.arena, bp, asize, true);
                let rem = BlockOffset(bp.0 + asize);
                block::set_tags(&mut self.arena, rem, old_size - asize, false);
                let merged = self.coalesce(rem)?;
                self.index.insert(&mut self.arena, merged)?;
                trace!(block = %bp, shrunk_to = asize, "resize split a remainder");
            }
            return Ok(Some(bp));
        }

        let next = block::next(&self.arena, bp);
        if !block::is_allocated(&self.arena, next) {
            let total = old_size + block::size(&self.arena, next);
            if total >= asize {
                self.index.remove(&mut self.arena, next)?;
                block::set_tags(&mut self.arena, bp, total, true);
                self.place(bp, asize)?;
                trace!(block = %bp, absorbed = %next, "resize extended in place");
                return Ok(Some(bp));
            }
        }

        let new_bp = self.allocate(len)?;
        let copy_len = ((old_size - DSIZE) as usize).min(len);
        self.arena.copy_within(bp.0, new_bp.0, copy_len);
        self.release(Some(bp))?;
        Ok(Some(new_bp))
    }

    /// Usable bytes of the allocated block at `bp`.
    pub fn payload(&self, bp: BlockOffset) -> &[u8] {
        let len = (block::size(&self.arena, bp) - DSIZE) as usize;
        self.arena.slice(bp.0, len)
    }

    /// Mutable variant of [`Heap::payload`].
    pub fn payload_mut(&mut self, bp: BlockOffset) -> &mut [u8] {
        let len = (block::size(&self.arena, bp) - DSIZE) as usize;
        self.arena.slice_mut(bp.0, len)
    }

    /// Current arena length in bytes.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn index(&self) -> &FreeIndex {
        &self.index
    }

    /// Grows the arena by at least `bytes`, coalesces the new region with a
    /// preceding free block, and indexes the result.
    fn extend(&mut self, bytes: usize) -> Result<BlockOffset> {
        let size = align_up(u32::try_from(bytes.max(MIN_BLOCK_SIZE as usize))
            .map_err(|_| HeapError::OutOfMemory)?);
        let bp = block::carve(&mut self.arena, size, false)?;
        let merged = self.coalesce(bp)?;
        self.index.insert(&mut self.arena, merged)?;
        Ok(merged)
    }

    /// Merges the free block at `bp` with free physical neighbors, removing
    /// each absorbed neighbor from the index first (its key is about to
    /// change). Returns the merged block; the caller reindexes it.
    fn coalesce(&mut self, bp: BlockOffset) -> Result<BlockOffset> {
        let mut bp = bp;
        let mut size = block::size(&self.arena, bp);

        if !block::next_allocated(&self.arena, bp) {
            let next = block::next(&self.arena, bp);
            self.index.remove(&mut self.arena, next)?;
            size += block::size(&self.arena, next);
            block::set_tags(&mut self.arena, bp, size, false);
        }
        if !block::prev_allocated(&self.arena, bp) {
            let prev = block::prev(&self.arena, bp);
            self.index.remove(&mut self.arena, prev)?;
            size += block::size(&self.arena, prev);
            bp = prev;
            block::set_tags(&mut self.arena, bp, size, false);
        }
        Ok(bp)
    }

    /// Marks `bp` allocated at `asize` bytes, splitting off a free remainder
    /// when at least one minimum block is left over; otherwise the whole
    /// block is handed out (internal fragmentation accepted).
    fn place(&mut self, bp: BlockOffset, asize: u32) -> Result<()> {
        let csize = block::size(&self.arena, bp);
        if csize - asize >= MIN_BLOCK_SIZE {
            block::set_tags(&mut self.arena, bp, asize, true);
            let rem = BlockOffset(bp.0 + asize);
            block::set_tags(&mut self.arena, rem, csize - asize, false);
            self.index.insert(&mut self.arena, rem)?;
        } else {
            block::set_tags(&mut self.arena, bp, csize, true);
        }
        Ok(())
    }
}

/// Aligned block size serving a `len`-byte request: payload plus tags,
/// rounded up, never below the minimum block.
fn block_size_for(len: usize) -> Result<u32> {
    let padded = len
        .checked_add(DSIZE as usize)
        .and_then(|n| n.checked_add(WSIZE as usize))
        .ok_or(HeapError::OutOfMemory)?;
    // align_up works on u32; reject requests the 32-bit arena can't hold.
    let raw = u32::try_from(padded - WSIZE as usize).map_err(|_| HeapError::OutOfMemory)?;
    Ok(align_up(raw).max(MIN_BLOCK_SIZE))
}
