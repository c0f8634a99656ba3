//! On-arena layout of free-index tree nodes.
//!
//! A node lives in the payload of a permanently-allocated block and is
//! addressed by its [`NodeOffset`]. Field layout, all little-endian:
//!
//! ```text
//! kind     u8   @ 0    1 = leaf, 2 = internal
//! count    u16  @ 2    keys currently in use
//! parent   u32  @ 4    0 = none
//! sibling  u32  @ 8    next leaf in ascending key order, 0 = none
//! keys     u32  @ 12   ORDER-1 slots (free-block sizes, duplicates allowed)
//! slots    u32  @ 12 + (ORDER-1)*4   ORDER slots (block or child offsets)
//! ```
//!
//! Offset 0 is the bootstrap padding word, so 0 doubles as the null
//! reference for parent and sibling links.

use crate::arena::Arena;
use crate::types::{align_up, BlockOffset, HeapError, NodeOffset, Result, DSIZE};

/// Branching factor of the free index: maximum children of an internal node.
pub const ORDER: usize = 5;
const _: () = assert!(ORDER % 2 == 1, "ORDER must be odd for median splits");

/// Maximum keys a node may hold.
pub const MAX_KEYS: usize = ORDER - 1;
/// Minimum keys a non-root node must hold.
pub const MIN_KEYS: usize = (ORDER - 1) / 2;

const KIND_OFFSET: u32 = 0;
const COUNT_OFFSET: u32 = 2;
const PARENT_OFFSET: u32 = 4;
const SIBLING_OFFSET: u32 = 8;
const KEYS_OFFSET: u32 = 12;
const SLOTS_OFFSET: u32 = KEYS_OFFSET + MAX_KEYS as u32 * 4;

/// Bytes of node state stored in the carrier block's payload.
pub const NODE_LEN: u32 = SLOTS_OFFSET + ORDER as u32 * 4;
/// Block size carved for each node: node state plus boundary tags, aligned.
pub const NODE_BLOCK_SIZE: u32 = align_up(NODE_LEN + DSIZE);

/// Logical kind of a tree node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// Leaf holding free-block entries.
    Leaf = 1,
    /// Internal node holding separators and child references.
    Internal = 2,
}

impl NodeKind {
    /// Converts the stored byte back to a kind.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(HeapError::Corruption("unknown tree node kind")),
        }
    }
}

/// Zeroes a node and stamps its kind.
pub fn init(arena: &mut Arena, node: NodeOffset, kind: NodeKind) {
    arena.fill_zero(node.0, NODE_LEN as usize);
    arena.write_u8(node.0 + KIND_OFFSET, kind as u8);
}

/// Kind of the node at `node`.
pub fn kind(arena: &Arena, node: NodeOffset) -> Result<NodeKind> {
    NodeKind::from_u8(arena.read_u8(node.0 + KIND_OFFSET))
}

/// True when the node is a leaf.
pub fn is_leaf(arena: &Arena, node: NodeOffset) -> Result<bool> {
    Ok(kind(arena, node)? == NodeKind::Leaf)
}

/// Number of keys currently used.
pub fn count(arena: &Arena, node: NodeOffset) -> usize {
    arena.read_u16(node.0 + COUNT_OFFSET) as usize
}

/// Sets the used-key count.
pub fn set_count(arena: &mut Arena, node: NodeOffset, value: usize) {
    debug_assert!(value <= MAX_KEYS);
    arena.write_u16(node.0 + COUNT_OFFSET, value as u16);
}

/// Owning parent of the node, if any.
pub fn parent(arena: &Arena, node: NodeOffset) -> Option<NodeOffset> {
    decode_ref(arena.read_u32(node.0 + PARENT_OFFSET))
}

/// Sets the owning parent reference.
pub fn set_parent(arena: &mut Arena, node: NodeOffset, value: Option<NodeOffset>) {
    arena.write_u32(node.0 + PARENT_OFFSET, value.map_or(0, |n| n.0));
}

/// Forward sibling of a leaf in ascending key order, if any.
pub fn sibling(arena: &Arena, node: NodeOffset) -> Option<NodeOffset> {
    decode_ref(arena.read_u32(node.0 + SIBLING_OFFSET))
}

/// Sets the forward sibling reference.
pub fn set_sibling(arena: &mut Arena, node: NodeOffset, value: Option<NodeOffset>) {
    arena.write_u32(node.0 + SIBLING_OFFSET, value.map_or(0, |n| n.0));
}

/// Key at index `i`.
pub fn key(arena: &Arena, node: NodeOffset, i: usize) -> u32 {
    debug_assert!(i < MAX_KEYS);
    arena.read_u32(node.0 + KEYS_OFFSET + i as u32 * 4)
}

/// Sets the key at index `i`.
pub fn set_key(arena: &mut Arena, node: NodeOffset, i: usize, value: u32) {
    debug_assert!(i < MAX_KEYS);
    arena.write_u32(node.0 + KEYS_OFFSET + i as u32 * 4, value);
}

/// Raw slot value at index `i` (block offset in leaves, child in internals).
pub fn slot(arena: &Arena, node: NodeOffset, i: usize) -> u32 {
    debug_assert!(i < ORDER);
    arena.read_u32(node.0 + SLOTS_OFFSET + i as u32 * 4)
}

/// Sets the raw slot value at index `i`.
pub fn set_slot(arena: &mut Arena, node: NodeOffset, i: usize, value: u32) {
    debug_assert!(i < ORDER);
    arena.write_u32(node.0 + SLOTS_OFFSET + i as u32 * 4, value);
}

/// Free-block reference in leaf slot `i`.
pub fn entry(arena: &Arena, node: NodeOffset, i: usize) -> BlockOffset {
    BlockOffset(slot(arena, node, i))
}

/// Child node reference in internal slot `i`.
pub fn child(arena: &Arena, node: NodeOffset, i: usize) -> NodeOffset {
    NodeOffset(slot(arena, node, i))
}

/// Position of `target` within `parent_node`'s child array.
pub fn child_index(arena: &Arena, parent_node: NodeOffset, target: NodeOffset) -> Result<usize> {
    let n = count(arena, parent_node);
    for i in 0..=n {
        if slot(arena, parent_node, i) == target.0 {
            return Ok(i);
        }
    }
    Err(HeapError::Corruption("child not linked in parent"))
}

fn decode_ref(raw: u32) -> Option<NodeOffset> {
    if raw == 0 {
        None
    } else {
        Some(NodeOffset(raw))
    }
}
