//! Shared identifier types, error taxonomy, and layout constants.

use std::fmt;

/// Alignment granularity of the arena; every block size is a multiple of this.
pub const ALIGNMENT: u32 = 8;
/// Size of one boundary-tag word (header or footer).
pub const WSIZE: u32 = 4;
/// Combined size of a block's header and footer.
pub const DSIZE: u32 = 8;
/// Smallest block the allocator will carve: tags plus one aligned payload word.
pub const MIN_BLOCK_SIZE: u32 = 16;

/// Rounds `size` up to the arena alignment granularity.
pub const fn align_up(size: u32) -> u32 {
    (size + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// Arena-relative offset of a block's payload (the byte after its header).
///
/// Offsets, not addresses, are the unit of reference everywhere: the backing
/// storage may reallocate on growth, so nothing holds a raw pointer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockOffset(pub u32);

/// Arena-relative offset of a free-index tree node.
///
/// A node occupies the payload of a permanently-allocated block, so a
/// `NodeOffset` is numerically the `BlockOffset` of its carrier block.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeOffset(pub u32);

impl fmt::Display for BlockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported by heap operations.
#[derive(thiserror::Error, Debug)]
pub enum HeapError {
    /// A zero-byte allocation was requested.
    #[error("invalid size: zero-byte request")]
    InvalidSize,
    /// The arena refused to grow; fatal to the requesting call only.
    #[error("out of memory")]
    OutOfMemory,
    /// Bootstrap could not carve the initial heap structures.
    #[error("initialization failed: {0}")]
    Init(&'static str),
    /// A structural invariant of the index or block chain is violated.
    #[error("corruption: {0}")]
    Corruption(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HeapError>;
