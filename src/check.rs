//! Structural verification of the index and the block chain.
//!
//! `verify_index` walks the tree and enforces every B+ invariant; `verify`
//! additionally walks the physical block chain and cross-checks the two
//! views of free space against each other. Both are meant for tests and
//! debugging aids, not the hot path.

use crate::arena::Arena;
use crate::block;
use crate::heap::Heap;
use crate::index::node::{self, NodeKind, MAX_KEYS, MIN_KEYS};
use crate::index::FreeIndex;
use crate::types::{
    BlockOffset, HeapError, NodeOffset, Result, ALIGNMENT, DSIZE, MIN_BLOCK_SIZE, WSIZE,
};

/// Shape summary produced by a successful [`verify_index`] walk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexStats {
    /// Levels in the tree; a lone root leaf counts as 1.
    pub height: usize,
    /// Nodes reachable from the root.
    pub node_count: usize,
    /// Free-block entries across all leaves.
    pub entry_count: usize,
}

/// Full-heap summary produced by a successful [`verify`] pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HeapStats {
    /// Levels in the free index.
    pub height: usize,
    /// Index nodes reachable from the root.
    pub node_count: usize,
    /// Free-block entries in the index.
    pub entry_count: usize,
    /// Free blocks on the physical chain.
    pub free_blocks: usize,
    /// Bytes held by free blocks, tags included.
    pub free_bytes: usize,
    /// Allocated blocks on the physical chain, node carriers included.
    pub allocated_blocks: usize,
    /// Bytes held by allocated blocks, tags included.
    pub allocated_bytes: usize,
    /// Recycled nodes waiting on the spare chain.
    pub spare_nodes: usize,
    /// Total arena length in bytes.
    pub arena_len: usize,
}

struct Walk {
    nodes: usize,
    leaf_depth: Option<usize>,
    entries: Vec<(u32, u32)>,
}

/// Checks every structural invariant of the free index.
///
/// Equal leaf depth, key ordering within nodes, inclusive separator bounds
/// (duplicates may sit on either side of an equal separator), fill minimums
/// for non-root nodes, parent back-references, leaf entries tagging free
/// blocks whose size matches their key, and agreement between the in-order
/// walk and the leaf sibling chain.
pub fn verify_index(arena: &Arena, index: &FreeIndex) -> Result<IndexStats> {
    walk_index(arena, index).map(|(stats, _)| stats)
}

/// Single verification walk, returning the in-order entries for callers
/// that cross-check them against the block chain.
fn walk_index(arena: &Arena, index: &FreeIndex) -> Result<(IndexStats, Vec<(u32, u32)>)> {
    let root = index.root();
    if node::parent(arena, root).is_some() {
        return Err(HeapError::Corruption("root has a parent reference"));
    }
    let mut walk = Walk {
        nodes: 0,
        leaf_depth: None,
        entries: Vec::new(),
    };
    let height = walk_node(arena, root, root, None, None, None, 0, &mut walk)?;

    let mut chained = Vec::new();
    let mut leaf = leftmost_leaf(arena, root)?;
    loop {
        for i in 0..node::count(arena, leaf) {
            chained.push((node::key(arena, leaf, i), node::slot(arena, leaf, i)));
        }
        match node::sibling(arena, leaf) {
            Some(next) => leaf = next,
            None => break,
        }
    }
    if chained != walk.entries {
        return Err(HeapError::Corruption("sibling chain disagrees with tree order"));
    }

    let stats = IndexStats {
        height,
        node_count: walk.nodes,
        entry_count: walk.entries.len(),
    };
    Ok((stats, walk.entries))
}

/// Checks the whole heap: the index plus the physical block chain, and the
/// cross-consistency between them.
pub fn verify(heap: &Heap) -> Result<HeapStats> {
    let arena = heap.arena();
    let index = heap.index();
    let (index_stats, mut indexed) = walk_index(arena, index)?;

    let mut free_blocks = 0usize;
    let mut free_bytes = 0usize;
    let mut allocated_blocks = 0usize;
    let mut allocated_bytes = 0usize;
    let mut free_seen: Vec<(u32, u32)> = Vec::new();
    let mut prev_free = false;

    let mut bp = BlockOffset(block::FIRST_BLOCK);
    loop {
        let size = block::size(arena, bp);
        if size == 0 {
            // Epilogue: must be allocated and end the arena.
            if !block::is_allocated(arena, bp) {
                return Err(HeapError::Corruption("epilogue lost its allocated bit"));
            }
            if bp.0 as usize != arena.len() {
                return Err(HeapError::Corruption("epilogue is not at the arena end"));
            }
            break;
        }
        if size % ALIGNMENT != 0 || size < MIN_BLOCK_SIZE {
            return Err(HeapError::Corruption("block size unaligned or undersized"));
        }
        let header = arena.read_u32(bp.0 - WSIZE);
        let footer = arena.read_u32(bp.0 + size - DSIZE);
        if header != footer {
            return Err(HeapError::Corruption("header and footer disagree"));
        }
        let allocated = block::is_allocated(arena, bp);
        if allocated {
            allocated_blocks += 1;
            allocated_bytes += size as usize;
        } else {
            if prev_free {
                return Err(HeapError::Corruption("adjacent free blocks escaped coalescing"));
            }
            free_blocks += 1;
            free_bytes += size as usize;
            free_seen.push((size, bp.0));
        }
        prev_free = !allocated;
        bp = block::next(arena, bp);
    }

    indexed.sort_unstable();
    free_seen.sort_unstable();
    if indexed != free_seen {
        return Err(HeapError::Corruption("index entries disagree with free blocks"));
    }

    // pad + prologue on the left, the epilogue word on the right.
    let accounted = 3 * WSIZE as usize + free_bytes + allocated_bytes + WSIZE as usize;
    if accounted != arena.len() {
        return Err(HeapError::Corruption("block sizes do not account for the arena"));
    }

    Ok(HeapStats {
        height: index_stats.height,
        node_count: index_stats.node_count,
        entry_count: index_stats.entry_count,
        free_blocks,
        free_bytes,
        allocated_blocks,
        allocated_bytes,
        spare_nodes: index.spare_nodes(arena),
        arena_len: arena.len(),
    })
}

#[allow(clippy::too_many_arguments)]
fn walk_node(
    arena: &Arena,
    current: NodeOffset,
    root: NodeOffset,
    expected_parent: Option<NodeOffset>,
    lower: Option<u32>,
    upper: Option<u32>,
    depth: usize,
    walk: &mut Walk,
) -> Result<usize> {
    walk.nodes += 1;
    if node::parent(arena, current) != expected_parent {
        return Err(HeapError::Corruption("parent reference mismatch"));
    }
    let n = node::count(arena, current);
    if n > MAX_KEYS {
        return Err(HeapError::Corruption("node over capacity"));
    }
    let kind = node::kind(arena, current)?;
    if current != root {
        if n < MIN_KEYS {
            return Err(HeapError::Corruption("non-root node under minimum fill"));
        }
    } else if kind == NodeKind::Internal && n == 0 {
        return Err(HeapError::Corruption("internal root without keys"));
    }

    for i in 0..n {
        let k = node::key(arena, current, i);
        if i > 0 && node::key(arena, current, i - 1) > k {
            return Err(HeapError::Corruption("keys out of order"));
        }
        if lower.is_some_and(|lo| k < lo) || upper.is_some_and(|hi| k > hi) {
            return Err(HeapError::Corruption("key outside separator bounds"));
        }
    }

    match kind {
        NodeKind::Leaf => {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(d) if d != depth => {
                    return Err(HeapError::Corruption("leaves at unequal depth"))
                }
                Some(_) => {}
            }
            for i in 0..n {
                let k = node::key(arena, current, i);
                let bp = node::entry(arena, current, i);
                if block::is_allocated(arena, bp) {
                    return Err(HeapError::Corruption("index entry points at allocated block"));
                }
                if block::size(arena, bp) != k {
                    return Err(HeapError::Corruption("index key disagrees with block size"));
                }
                walk.entries.push((k, bp.0));
            }
            Ok(1)
        }
        NodeKind::Internal => {
            let mut height = 0;
            for i in 0..=n {
                let child_lower = if i == 0 {
                    lower
                } else {
                    Some(node::key(arena, current, i - 1))
                };
                let child_upper = if i == n {
                    upper
                } else {
                    Some(node::key(arena, current, i))
                };
                let h = walk_node(
                    arena,
                    node::child(arena, current, i),
                    root,
                    Some(current),
                    child_lower,
                    child_upper,
                    depth + 1,
                    walk,
                )?;
                if i == 0 {
                    height = h;
                } else if h != height {
                    return Err(HeapError::Corruption("subtrees of unequal height"));
                }
            }
            Ok(height + 1)
        }
    }
}

fn leftmost_leaf(arena: &Arena, root: NodeOffset) -> Result<NodeOffset> {
    let mut current = root;
    while node::kind(arena, current)? == NodeKind::Internal {
        current = node::child(arena, current, 0);
    }
    Ok(current)
}
