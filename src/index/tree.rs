//! The size-indexed free-block B+ tree.
//!
//! Keys are free-block sizes (duplicates permitted), leaf slots reference
//! the free blocks themselves, internal slots reference child nodes. The
//! tree's own nodes are carved from the arena it indexes, as regular
//! allocated blocks, so the physical block chain stays walkable around them.
//!
//! Two descent biases are used. Inserts descend rightward on ties (equal
//! keys live right of their separator). Lookups and removals descend
//! leftward and then walk the leaf sibling chain: a leaf split can strand
//! entries equal to the new separator in the left half, and the leftmost
//! candidate leaf is the only safe starting point for an exact match or a
//! first-fit scan.
//!
//! Node storage is reserved up front. Before mutating anything, an insert
//! counts the run of full nodes on its root path and tops up the spare-node
//! chain to cover the worst-case split cascade; a failed reservation returns
//! `OutOfMemory` with the tree untouched. Callers that mutate block tags
//! before inserting go through [`FreeIndex::reserve`] first, so the chain
//! already holds enough nodes by the time anything irreversible happens.
//! Nodes emptied by merges or root demotion are threaded onto the spare
//! chain through their own sibling words and reused by later splits; the
//! index keeps no node storage outside the arena.

use smallvec::SmallVec;
use tracing::trace;

use crate::arena::Arena;
use crate::block;
use crate::index::node::{self, NodeKind, MAX_KEYS, MIN_KEYS, NODE_BLOCK_SIZE, ORDER};
use crate::types::{BlockOffset, HeapError, NodeOffset, Result};

/// Direction taken on a tie between the search key and a separator.
#[derive(Clone, Copy, Eq, PartialEq)]
enum Bias {
    /// Equal keys descend right; used when inserting.
    Right,
    /// Equal keys descend left; used for lookup and removal.
    Left,
}

/// Size-ordered index of every free block in the arena.
pub struct FreeIndex {
    root: NodeOffset,
    spare_head: Option<NodeOffset>,
}

impl FreeIndex {
    /// Carves the initial empty root leaf from the arena.
    pub fn bootstrap(arena: &mut Arena) -> Result<Self> {
        let carrier = block::carve(arena, NODE_BLOCK_SIZE, true)?;
        let root = NodeOffset(carrier.0);
        node::init(arena, root, NodeKind::Leaf);
        Ok(Self {
            root,
            spare_head: None,
        })
    }

    /// Current root node.
    pub fn root(&self) -> NodeOffset {
        self.root
    }

    /// Number of reusable nodes waiting on the spare chain.
    pub fn spare_nodes(&self, arena: &Arena) -> usize {
        let mut n = 0;
        let mut current = self.spare_head;
        while let Some(spare) = current {
            n += 1;
            current = node::sibling(arena, spare);
        }
        n
    }

    /// Tops the spare chain up to the worst-case node demand of `inserts`
    /// upcoming insertions: one node per level plus a new root for each,
    /// with every insertion allowed to raise the height for the next.
    ///
    /// The heap calls this before mutating any block tags, so a refused
    /// arena growth surfaces here with the tree and block chain untouched.
    pub(crate) fn reserve(&mut self, arena: &mut Arena, inserts: usize) -> Result<()> {
        let mut height = self.height(arena)?;
        let mut needed = 0;
        for _ in 0..inserts {
            needed += height + 1;
            height += 1;
        }
        while self.spare_nodes(arena) < needed {
            let carrier = block::carve(arena, NODE_BLOCK_SIZE, true)?;
            self.push_spare(arena, NodeOffset(carrier.0));
        }
        Ok(())
    }

    /// Inserts an entry for the free block at `bp`, keyed by its size.
    pub fn insert(&mut self, arena: &mut Arena, bp: BlockOffset) -> Result<()> {
        let size = block::size(arena, bp);
        let leaf = self.descend(arena, size, Bias::Right)?;
        self.reserve_for(arena, leaf)?;

        if node::count(arena, leaf) < MAX_KEYS {
            insert_into_leaf(arena, leaf, size, bp);
            return Ok(());
        }

        let (sep, right) = self.split_leaf(arena, leaf, size, bp)?;
        self.insert_into_parent(arena, leaf, sep, right)
    }

    /// Removes the entry matching both `bp`'s size and its exact offset.
    ///
    /// Sizes are not unique, so the match walks the sibling chain from the
    /// leftmost candidate leaf. A missing entry is a structural violation,
    /// never silently ignored.
    pub fn remove(&mut self, arena: &mut Arena, bp: BlockOffset) -> Result<()> {
        let size = block::size(arena, bp);
        let mut leaf = self.descend(arena, size, Bias::Left)?;
        loop {
            let n = node::count(arena, leaf);
            for i in 0..n {
                let k = node::key(arena, leaf, i);
                if k > size {
                    return Err(HeapError::Corruption("free block missing from index"));
                }
                if k == size && node::slot(arena, leaf, i) == bp.0 {
                    remove_from_leaf(arena, leaf, i);
                    return self.rebalance(arena, leaf);
                }
            }
            leaf = node::sibling(arena, leaf)
                .ok_or(HeapError::Corruption("free block missing from index"))?;
        }
    }

    /// First indexed block whose size is at least `min_size`, if any.
    ///
    /// First-fit-by-ascending-size: the sibling chain is globally sorted, so
    /// the first matching key is also a minimal matching size.
    pub fn find_first_fit(&self, arena: &Arena, min_size: u32) -> Result<Option<BlockOffset>> {
        let mut leaf = self.descend(arena, min_size, Bias::Left)?;
        loop {
            let n = node::count(arena, leaf);
            for i in 0..n {
                if node::key(arena, leaf, i) >= min_size {
                    return Ok(Some(node::entry(arena, leaf, i)));
                }
            }
            match node::sibling(arena, leaf) {
                Some(next) => leaf = next,
                None => return Ok(None),
            }
        }
    }

    fn descend(&self, arena: &Arena, size: u32, bias: Bias) -> Result<NodeOffset> {
        let mut current = self.root;
        loop {
            match node::kind(arena, current)? {
                NodeKind::Leaf => return Ok(current),
                NodeKind::Internal => {
                    let n = node::count(arena, current);
                    let mut i = 0;
                    while i < n {
                        let k = node::key(arena, current, i);
                        let go_right = match bias {
                            Bias::Right => size >= k,
                            Bias::Left => size > k,
                        };
                        if !go_right {
                            break;
                        }
                        i += 1;
                    }
                    current = node::child(arena, current, i);
                }
            }
        }
    }

    /// Tops the spare chain up to the exact node demand of inserting into
    /// `leaf`: one node per full node on the root path, plus one for a new
    /// root if the run of full nodes reaches the top.
    fn reserve_for(&mut self, arena: &mut Arena, leaf: NodeOffset) -> Result<()> {
        let mut needed = 0;
        let mut current = leaf;
        loop {
            if node::count(arena, current) < MAX_KEYS {
                break;
            }
            needed += 1;
            match node::parent(arena, current) {
                Some(parent) => current = parent,
                None => {
                    needed += 1;
                    break;
                }
            }
        }
        while self.spare_nodes(arena) < needed {
            let carrier = block::carve(arena, NODE_BLOCK_SIZE, true)?;
            self.push_spare(arena, NodeOffset(carrier.0));
        }
        Ok(())
    }

    /// Levels in the tree; a lone root leaf counts as one.
    fn height(&self, arena: &Arena) -> Result<usize> {
        let mut levels = 1;
        let mut current = self.root;
        while node::kind(arena, current)? == NodeKind::Internal {
            current = node::child(arena, current, 0);
            levels += 1;
        }
        Ok(levels)
    }

    fn take_spare(&mut self, arena: &Arena) -> Result<NodeOffset> {
        let head = self
            .spare_head
            .ok_or(HeapError::Corruption("spare node reservation exhausted"))?;
        self.spare_head = node::sibling(arena, head);
        Ok(head)
    }

    fn push_spare(&mut self, arena: &mut Arena, spare: NodeOffset) {
        node::set_sibling(arena, spare, self.spare_head);
        self.spare_head = Some(spare);
    }

    fn split_leaf(
        &mut self,
        arena: &mut Arena,
        leaf: NodeOffset,
        size: u32,
        bp: BlockOffset,
    ) -> Result<(u32, NodeOffset)> {
        let mut entries: SmallVec<[(u32, u32); ORDER]> = SmallVec::new();
        for i in 0..MAX_KEYS {
            entries.push((node::key(arena, leaf, i), node::slot(arena, leaf, i)));
        }
        let pos = entries
            .iter()
            .position(|&(k, _)| k > size)
            .unwrap_or(entries.len());
        entries.insert(pos, (size, bp.0));

        let split = ORDER / 2;
        node::set_count(arena, leaf, split);
        for (i, &(k, v)) in entries[..split].iter().enumerate() {
            node::set_key(arena, leaf, i, k);
            node::set_slot(arena, leaf, i, v);
        }

        let right = self.take_spare(arena)?;
        node::init(arena, right, NodeKind::Leaf);
        node::set_count(arena, right, ORDER - split);
        for (i, &(k, v)) in entries[split..].iter().enumerate() {
            node::set_key(arena, right, i, k);
            node::set_slot(arena, right, i, v);
        }
        node::set_sibling(arena, right, node::sibling(arena, leaf));
        node::set_sibling(arena, leaf, Some(right));
        node::set_parent(arena, right, node::parent(arena, leaf));

        let sep = entries[split].0;
        trace!(leaf = %leaf, right = %right, sep, "leaf split");
        Ok((sep, right))
    }

    /// Links `right` (with separator `sep`) next to `left` one level up,
    /// splitting full internal nodes as needed. Iterative: each round either
    /// finishes or turns a full parent into the next (left, sep, right).
    fn insert_into_parent(
        &mut self,
        arena: &mut Arena,
        mut left: NodeOffset,
        mut sep: u32,
        mut right: NodeOffset,
    ) -> Result<()> {
        loop {
            let Some(parent) = node::parent(arena, left) else {
                let new_root = self.take_spare(arena)?;
                node::init(arena, new_root, NodeKind::Internal);
                node::set_count(arena, new_root, 1);
                node::set_key(arena, new_root, 0, sep);
                node::set_slot(arena, new_root, 0, left.0);
                node::set_slot(arena, new_root, 1, right.0);
                node::set_parent(arena, left, Some(new_root));
                node::set_parent(arena, right, Some(new_root));
                self.root = new_root;
                trace!(root = %new_root, "tree height grew");
                return Ok(());
            };

            let left_idx = node::child_index(arena, parent, left)?;
            let n = node::count(arena, parent);
            if n < MAX_KEYS {
                let mut i = n;
                while i > left_idx {
                    let k = node::key(arena, parent, i - 1);
                    node::set_key(arena, parent, i, k);
                    let c = node::slot(arena, parent, i);
                    node::set_slot(arena, parent, i + 1, c);
                    i -= 1;
                }
                node::set_key(arena, parent, left_idx, sep);
                node::set_slot(arena, parent, left_idx + 1, right.0);
                node::set_count(arena, parent, n + 1);
                node::set_parent(arena, right, Some(parent));
                return Ok(());
            }

            // Parent is full: split it, promoting the median key.
            let mut keys: SmallVec<[u32; ORDER]> = SmallVec::new();
            let mut children: SmallVec<[u32; ORDER + 1]> = SmallVec::new();
            for i in 0..MAX_KEYS {
                keys.push(node::key(arena, parent, i));
            }
            for i in 0..ORDER {
                children.push(node::slot(arena, parent, i));
            }
            keys.insert(left_idx, sep);
            children.insert(left_idx + 1, right.0);
            node::set_parent(arena, right, Some(parent));

            let mid = (ORDER - 1) / 2;
            let promoted = keys[mid];

            node::set_count(arena, parent, mid);
            for (i, &k) in keys[..mid].iter().enumerate() {
                node::set_key(arena, parent, i, k);
            }
            for (i, &c) in children[..=mid].iter().enumerate() {
                node::set_slot(arena, parent, i, c);
            }

            let new_node = self.take_spare(arena)?;
            node::init(arena, new_node, NodeKind::Internal);
            node::set_count(arena, new_node, MAX_KEYS - mid);
            for (i, &k) in keys[mid + 1..].iter().enumerate() {
                node::set_key(arena, new_node, i, k);
            }
            for (i, &c) in children[mid + 1..].iter().enumerate() {
                node::set_slot(arena, new_node, i, c);
                node::set_parent(arena, NodeOffset(c), Some(new_node));
            }
            node::set_parent(arena, new_node, node::parent(arena, parent));
            trace!(parent = %parent, new_node = %new_node, promoted, "internal split");

            left = parent;
            sep = promoted;
            right = new_node;
        }
    }

    /// Restores minimum fill from `start` upward after a removal.
    ///
    /// An explicit loop rather than recursion: each merge removes a
    /// separator from the parent, which becomes the next node to examine.
    fn rebalance(&mut self, arena: &mut Arena, start: NodeOffset) -> Result<()> {
        let mut current = start;
        loop {
            if current == self.root {
                self.adjust_root(arena)?;
                return Ok(());
            }
            if node::count(arena, current) >= MIN_KEYS {
                return Ok(());
            }

            let parent = node::parent(arena, current)
                .ok_or(HeapError::Corruption("non-root node without parent"))?;
            let idx = node::child_index(arena, parent, current)?;
            let (sep_idx, neighbor, neighbor_is_left) = if idx == 0 {
                (0, node::child(arena, parent, 1), false)
            } else {
                (idx - 1, node::child(arena, parent, idx - 1), true)
            };

            if node::count(arena, neighbor) > MIN_KEYS {
                redistribute(arena, current, neighbor, neighbor_is_left, parent, sep_idx)?;
                return Ok(());
            }

            let (left, right) = if neighbor_is_left {
                (neighbor, current)
            } else {
                (current, neighbor)
            };
            merge_into_left(arena, left, right, parent, sep_idx)?;
            remove_from_internal(arena, parent, sep_idx);
            self.push_spare(arena, right);
            trace!(left = %left, right = %right, "nodes merged");

            current = parent;
        }
    }

    /// Replaces an empty internal root with its sole child; the old root
    /// node is recycled onto the spare chain. An empty root leaf is the
    /// terminal state and stays in place.
    fn adjust_root(&mut self, arena: &mut Arena) -> Result<()> {
        if node::kind(arena, self.root)? == NodeKind::Internal && node::count(arena, self.root) == 0
        {
            let old_root = self.root;
            let new_root = node::child(arena, old_root, 0);
            node::set_parent(arena, new_root, None);
            self.root = new_root;
            self.push_spare(arena, old_root);
            trace!(root = %new_root, "tree height shrank");
        }
        Ok(())
    }
}

fn insert_into_leaf(arena: &mut Arena, leaf: NodeOffset, size: u32, bp: BlockOffset) {
    let n = node::count(arena, leaf);
    let mut i = n;
    // Stable among equal keys: new entries land after existing ones.
    while i > 0 && node::key(arena, leaf, i - 1) > size {
        let k = node::key(arena, leaf, i - 1);
        node::set_key(arena, leaf, i, k);
        let v = node::slot(arena, leaf, i - 1);
        node::set_slot(arena, leaf, i, v);
        i -= 1;
    }
    node::set_key(arena, leaf, i, size);
    node::set_slot(arena, leaf, i, bp.0);
    node::set_count(arena, leaf, n + 1);
}

fn remove_from_leaf(arena: &mut Arena, leaf: NodeOffset, idx: usize) {
    let n = node::count(arena, leaf);
    for i in idx..n - 1 {
        let k = node::key(arena, leaf, i + 1);
        node::set_key(arena, leaf, i, k);
        let v = node::slot(arena, leaf, i + 1);
        node::set_slot(arena, leaf, i, v);
    }
    node::set_count(arena, leaf, n - 1);
}

/// Removes key `key_idx` and the child right of it from an internal node.
fn remove_from_internal(arena: &mut Arena, node_off: NodeOffset, key_idx: usize) {
    let n = node::count(arena, node_off);
    for i in key_idx..n - 1 {
        let k = node::key(arena, node_off, i + 1);
        node::set_key(arena, node_off, i, k);
    }
    for i in key_idx + 1..n {
        let c = node::slot(arena, node_off, i + 1);
        node::set_slot(arena, node_off, i, c);
    }
    node::set_count(arena, node_off, n - 1);
}

/// Borrows one entry from `neighbor` into `current` across the parent
/// separator at `sep_idx`, updating the separator to the new boundary.
fn redistribute(
    arena: &mut Arena,
    current: NodeOffset,
    neighbor: NodeOffset,
    neighbor_is_left: bool,
    parent: NodeOffset,
    sep_idx: usize,
) -> Result<()> {
    let leaf = node::is_leaf(arena, current)?;
    let cur_n = node::count(arena, current);
    let nbr_n = node::count(arena, neighbor);
    trace!(current = %current, neighbor = %neighbor, leaf, "redistributing one entry");

    if neighbor_is_left {
        // Shift current right by one and pull the neighbor's last entry in.
        if !leaf {
            let c = node::slot(arena, current, cur_n);
            node::set_slot(arena, current, cur_n + 1, c);
        }
        let mut i = cur_n;
        while i > 0 {
            let k = node::key(arena, current, i - 1);
            node::set_key(arena, current, i, k);
            let v = node::slot(arena, current, i - 1);
            node::set_slot(arena, current, i, v);
            i -= 1;
        }
        if leaf {
            let k = node::key(arena, neighbor, nbr_n - 1);
            let v = node::slot(arena, neighbor, nbr_n - 1);
            node::set_key(arena, current, 0, k);
            node::set_slot(arena, current, 0, v);
            node::set_key(arena, parent, sep_idx, k);
        } else {
            let sep = node::key(arena, parent, sep_idx);
            node::set_key(arena, current, 0, sep);
            let moved = node::child(arena, neighbor, nbr_n);
            node::set_slot(arena, current, 0, moved.0);
            node::set_parent(arena, moved, Some(current));
            let up = node::key(arena, neighbor, nbr_n - 1);
            node::set_key(arena, parent, sep_idx, up);
        }
    } else {
        // Append the right neighbor's first entry and shift it left by one.
        if leaf {
            let k = node::key(arena, neighbor, 0);
            let v = node::slot(arena, neighbor, 0);
            node::set_key(arena, current, cur_n, k);
            node::set_slot(arena, current, cur_n, v);
            let new_sep = node::key(arena, neighbor, 1);
            node::set_key(arena, parent, sep_idx, new_sep);
        } else {
            let sep = node::key(arena, parent, sep_idx);
            node::set_key(arena, current, cur_n, sep);
            let moved = node::child(arena, neighbor, 0);
            node::set_slot(arena, current, cur_n + 1, moved.0);
            node::set_parent(arena, moved, Some(current));
            let up = node::key(arena, neighbor, 0);
            node::set_key(arena, parent, sep_idx, up);
        }
        for i in 0..nbr_n - 1 {
            let k = node::key(arena, neighbor, i + 1);
            node::set_key(arena, neighbor, i, k);
            let v = node::slot(arena, neighbor, i + 1);
            node::set_slot(arena, neighbor, i, v);
        }
        if !leaf {
            let c = node::slot(arena, neighbor, nbr_n);
            node::set_slot(arena, neighbor, nbr_n - 1, c);
        }
    }

    node::set_count(arena, current, cur_n + 1);
    node::set_count(arena, neighbor, nbr_n - 1);
    Ok(())
}

/// Absorbs `right` into `left`. For internals the parent separator at
/// `sep_idx` is pulled down between the two halves; for leaves the sibling
/// chain skips the absorbed node. The caller removes the separator from the
/// parent and recycles `right`.
fn merge_into_left(
    arena: &mut Arena,
    left: NodeOffset,
    right: NodeOffset,
    parent: NodeOffset,
    sep_idx: usize,
) -> Result<()> {
    let leaf = node::is_leaf(arena, left)?;
    let mut left_n = node::count(arena, left);
    let right_n = node::count(arena, right);

    if leaf {
        if left_n + right_n > MAX_KEYS {
            return Err(HeapError::Corruption("leaf merge would overflow"));
        }
        for i in 0..right_n {
            let k = node::key(arena, right, i);
            node::set_key(arena, left, left_n + i, k);
            let v = node::slot(arena, right, i);
            node::set_slot(arena, left, left_n + i, v);
        }
        node::set_count(arena, left, left_n + right_n);
        let next = node::sibling(arena, right);
        node::set_sibling(arena, left, next);
    } else {
        if left_n + 1 + right_n > MAX_KEYS {
            return Err(HeapError::Corruption("internal merge would overflow"));
        }
        let sep = node::key(arena, parent, sep_idx);
        node::set_key(arena, left, left_n, sep);
        left_n += 1;
        for i in 0..right_n {
            let k = node::key(arena, right, i);
            node::set_key(arena, left, left_n + i, k);
        }
        for i in 0..=right_n {
            let moved = node::child(arena, right, i);
            node::set_slot(arena, left, left_n + i, moved.0);
            node::set_parent(arena, moved, Some(left));
        }
        node::set_count(arena, left, left_n + right_n);
    }
    Ok(())
}
