//! Boundary-tag block encoding over the arena.
//!
//! Every block carries a 4-byte header word and a mirrored 4-byte footer,
//! each packing `size | allocated-bit`; size is always a multiple of 8, so
//! the low three bits are free for the flag. Adjacent blocks are reachable
//! from tags alone: the next block starts at `payload + size`, the previous
//! block's footer sits directly before this block's header.
//!
//! Arena layout after bootstrap:
//!
//! ```text
//! [pad u32][prologue hdr][prologue ftr][ blocks ... ][epilogue hdr]
//! ```
//!
//! The prologue is a permanently-allocated 8-byte block and the epilogue a
//! zero-size allocated header, so coalescing never walks off either end.
//! New blocks are carved at the top by consuming the epilogue word as the
//! new block's header and writing a fresh epilogue after it.

use crate::arena::Arena;
use crate::types::{BlockOffset, HeapError, Result, ALIGNMENT, DSIZE, MIN_BLOCK_SIZE, WSIZE};

/// Low bit of a tag word: set when the block is allocated.
pub const ALLOC_BIT: u32 = 1;

/// Payload offset of the first block carved after bootstrap.
pub const FIRST_BLOCK: u32 = 4 * WSIZE;

/// Packs a block size and allocated flag into one tag word.
pub const fn pack(size: u32, allocated: bool) -> u32 {
    size | (allocated as u32)
}

/// Size stored in the tags of the block at `bp`.
pub fn size(arena: &Arena, bp: BlockOffset) -> u32 {
    arena.read_u32(bp.0 - WSIZE) & !(ALIGNMENT - 1)
}

/// Allocated flag stored in the tags of the block at `bp`.
pub fn is_allocated(arena: &Arena, bp: BlockOffset) -> bool {
    arena.read_u32(bp.0 - WSIZE) & ALLOC_BIT != 0
}

/// Writes matching header and footer tags for the block at `bp`.
pub fn set_tags(arena: &mut Arena, bp: BlockOffset, size: u32, allocated: bool) {
    let tag = pack(size, allocated);
    arena.write_u32(bp.0 - WSIZE, tag);
    arena.write_u32(bp.0 + size - DSIZE, tag);
}

/// Payload offset of the physically following block.
pub fn next(arena: &Arena, bp: BlockOffset) -> BlockOffset {
    BlockOffset(bp.0 + size(arena, bp))
}

/// Payload offset of the physically preceding block, from its footer.
pub fn prev(arena: &Arena, bp: BlockOffset) -> BlockOffset {
    let prev_size = arena.read_u32(bp.0 - DSIZE) & !(ALIGNMENT - 1);
    BlockOffset(bp.0 - prev_size)
}

/// Allocated flag of the physically preceding block, read from its footer.
pub fn prev_allocated(arena: &Arena, bp: BlockOffset) -> bool {
    arena.read_u32(bp.0 - DSIZE) & ALLOC_BIT != 0
}

/// Allocated flag of the physically following block.
pub fn next_allocated(arena: &Arena, bp: BlockOffset) -> bool {
    is_allocated(arena, next(arena, bp))
}

/// Writes the bootstrap padding, prologue block, and epilogue header into a
/// freshly grown arena region starting at offset 0.
pub fn write_bootstrap(arena: &mut Arena) {
    arena.write_u32(0, 0);
    arena.write_u32(WSIZE, pack(DSIZE, true));
    arena.write_u32(2 * WSIZE, pack(DSIZE, true));
    arena.write_u32(3 * WSIZE, pack(0, true));
}

/// Carves a new block of `size` bytes at the top of the arena.
///
/// The old epilogue word becomes the new block's header and a fresh epilogue
/// is written after it, so the growth visible to the block chain equals
/// `size` exactly. Fails with `OutOfMemory` when the arena refuses to grow,
/// leaving the chain untouched.
pub fn carve(arena: &mut Arena, size: u32, allocated: bool) -> Result<BlockOffset> {
    debug_assert!(size % ALIGNMENT == 0 && size >= MIN_BLOCK_SIZE);
    if arena.len() < FIRST_BLOCK as usize {
        return Err(HeapError::Corruption("carve before heap bootstrap"));
    }
    let base = arena.grow(size as usize)?;
    let bp = BlockOffset(base);
    set_tags(arena, bp, size, allocated);
    arena.write_u32(bp.0 + size - WSIZE, pack(0, true));
    Ok(bp)
}
