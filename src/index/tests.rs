use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::arena::Arena;
use crate::block;
use crate::check::verify_index;
use crate::index::FreeIndex;
use crate::types::BlockOffset;

fn fixture() -> (Arena, FreeIndex) {
    let mut arena = Arena::with_limit(1 << 22);
    arena.grow(block::FIRST_BLOCK as usize).unwrap();
    block::write_bootstrap(&mut arena);
    let index = FreeIndex::bootstrap(&mut arena).unwrap();
    (arena, index)
}

fn carve_free(arena: &mut Arena, size: u32) -> BlockOffset {
    block::carve(arena, size, false).unwrap()
}

/// Reference model: smallest adequate size among every pair the index holds.
fn model_first_fit(model: &[(u32, u32)], min_size: u32) -> Option<u32> {
    model
        .iter()
        .filter(|&&(size, _)| size >= min_size)
        .map(|&(size, _)| size)
        .min()
}

#[test]
fn empty_index_finds_nothing() {
    let (arena, index) = fixture();
    assert_eq!(index.find_first_fit(&arena, 16).unwrap(), None);
    let stats = verify_index(&arena, &index).unwrap();
    assert_eq!(stats.height, 1);
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.entry_count, 0);
}

#[test]
fn fifth_insert_splits_the_root_leaf() {
    let (mut arena, mut index) = fixture();
    for size in [32, 48, 16, 64, 24] {
        let bp = carve_free(&mut arena, size);
        index.insert(&mut arena, bp).unwrap();
    }

    let stats = verify_index(&arena, &index).unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.entry_count, 5);

    // Best fit for 40 usable-plus-tag bytes is the 48 block.
    let hit = index.find_first_fit(&arena, 40).unwrap().unwrap();
    assert_eq!(block::size(&arena, hit), 48);
    // Too large for everything.
    assert_eq!(index.find_first_fit(&arena, 72).unwrap(), None);
    // Smallest block wins an easy request.
    let hit = index.find_first_fit(&arena, 8).unwrap().unwrap();
    assert_eq!(block::size(&arena, hit), 16);
}

#[test]
fn removal_borrows_from_the_right_sibling() {
    let (mut arena, mut index) = fixture();
    let mut by_size = std::collections::HashMap::new();
    for size in [32, 48, 16, 64, 24] {
        let bp = carve_free(&mut arena, size);
        index.insert(&mut arena, bp).unwrap();
        by_size.insert(size, bp);
    }

    // The left leaf holds [16, 24]; removing 16 drops it below minimum fill
    // and redistribution pulls one entry across the separator.
    index.remove(&mut arena, by_size[&16]).unwrap();
    let stats = verify_index(&arena, &index).unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.entry_count, 4);
    let hit = index.find_first_fit(&arena, 8).unwrap().unwrap();
    assert_eq!(block::size(&arena, hit), 24);
}

#[test]
fn draining_merges_back_to_a_single_leaf() {
    let (mut arena, mut index) = fixture();
    let mut blocks = Vec::new();
    for size in [32, 48, 16, 64, 24] {
        let bp = carve_free(&mut arena, size);
        index.insert(&mut arena, bp).unwrap();
        blocks.push(bp);
    }
    for bp in blocks {
        index.remove(&mut arena, bp).unwrap();
        verify_index(&arena, &index).unwrap();
    }
    let stats = verify_index(&arena, &index).unwrap();
    assert_eq!(stats.height, 1);
    assert_eq!(stats.node_count, 1);
    assert_eq!(stats.entry_count, 0);
    // The split leaf and the demoted root both came back as spares.
    assert_eq!(index.spare_nodes(&arena), 2);
}

#[test]
fn spare_nodes_are_reused_by_later_splits() {
    let (mut arena, mut index) = fixture();
    let blocks: Vec<BlockOffset> = [32, 48, 16, 64, 24]
        .iter()
        .map(|&size| carve_free(&mut arena, size))
        .collect();

    for bp in &blocks {
        index.insert(&mut arena, *bp).unwrap();
    }
    for bp in &blocks {
        index.remove(&mut arena, *bp).unwrap();
    }
    let settled = arena.len();

    // Later rounds split again but feed on the spare list, not the arena.
    for _ in 0..8 {
        for bp in &blocks {
            index.insert(&mut arena, *bp).unwrap();
        }
        for bp in &blocks {
            index.remove(&mut arena, *bp).unwrap();
        }
        verify_index(&arena, &index).unwrap();
    }
    assert_eq!(arena.len(), settled);
}

#[test]
fn duplicate_sizes_resolve_by_offset() {
    let (mut arena, mut index) = fixture();
    // Enough equal keys to force splits with duplicate separators.
    let dups: Vec<BlockOffset> = (0..12).map(|_| carve_free(&mut arena, 32)).collect();
    for bp in &dups {
        index.insert(&mut arena, *bp).unwrap();
    }
    verify_index(&arena, &index).unwrap();

    // Each removal must find its exact block even when every key ties.
    for bp in &dups {
        index.remove(&mut arena, *bp).unwrap();
        verify_index(&arena, &index).unwrap();
    }
    assert_eq!(index.find_first_fit(&arena, 16).unwrap(), None);
}

#[test]
fn missing_entry_is_reported_as_corruption() {
    let (mut arena, mut index) = fixture();
    let indexed = carve_free(&mut arena, 32);
    index.insert(&mut arena, indexed).unwrap();
    let stranger = carve_free(&mut arena, 32);
    assert!(index.remove(&mut arena, stranger).is_err());
}

#[test]
fn interleaved_churn_matches_reference_model() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let (mut arena, mut index) = fixture();
    let mut model: Vec<(u32, u32)> = Vec::new();

    for step in 0..600 {
        let insert = model.is_empty() || rng.gen_bool(0.55);
        if insert {
            let size = 16 + 8 * rng.gen_range(0..32);
            let bp = carve_free(&mut arena, size);
            index.insert(&mut arena, bp).unwrap();
            model.push((size, bp.0));
        } else {
            let victim = model.swap_remove(rng.gen_range(0..model.len()));
            index.remove(&mut arena, BlockOffset(victim.1)).unwrap();
        }

        if step % 16 == 0 {
            let stats = verify_index(&arena, &index).unwrap();
            assert_eq!(stats.entry_count, model.len());
            let probe = 16 + 8 * rng.gen_range(0..40);
            let hit = index.find_first_fit(&arena, probe).unwrap();
            match model_first_fit(&model, probe) {
                Some(best) => {
                    let bp = hit.expect("model found a fit the index missed");
                    assert_eq!(block::size(&arena, bp), best);
                    assert!(model.contains(&(best, bp.0)));
                }
                None => assert!(hit.is_none()),
            }
        }
    }
}

proptest! {
    #[test]
    fn insert_then_drain_preserves_invariants(
        raw_sizes in proptest::collection::vec(0u32..48, 1..48),
        seed in any::<u64>(),
    ) {
        let (mut arena, mut index) = fixture();
        let mut model: Vec<(u32, u32)> = Vec::new();
        for raw in raw_sizes {
            let size = 16 + 8 * raw;
            let bp = carve_free(&mut arena, size);
            index.insert(&mut arena, bp).unwrap();
            model.push((size, bp.0));
            verify_index(&arena, &index).unwrap();
        }

        let stats = verify_index(&arena, &index).unwrap();
        prop_assert_eq!(stats.entry_count, model.len());

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        model.shuffle(&mut rng);
        while let Some((_, off)) = model.pop() {
            index.remove(&mut arena, BlockOffset(off)).unwrap();
            let stats = verify_index(&arena, &index).unwrap();
            prop_assert_eq!(stats.entry_count, model.len());
        }
        prop_assert_eq!(index.find_first_fit(&arena, 16).unwrap(), None);
    }

    #[test]
    fn first_fit_agrees_with_model(
        raw_sizes in proptest::collection::vec(0u32..32, 1..40),
        probes in proptest::collection::vec(0u32..40, 1..12),
    ) {
        let (mut arena, mut index) = fixture();
        let mut model: Vec<(u32, u32)> = Vec::new();
        for raw in raw_sizes {
            let size = 16 + 8 * raw;
            let bp = carve_free(&mut arena, size);
            index.insert(&mut arena, bp).unwrap();
            model.push((size, bp.0));
        }
        for raw in probes {
            let probe = 16 + 8 * raw;
            let hit = index.find_first_fit(&arena, probe).unwrap();
            match model_first_fit(&model, probe) {
                Some(best) => {
                    let bp = hit.expect("model found a fit the index missed");
                    prop_assert_eq!(block::size(&arena, bp), best);
                }
                None => prop_assert!(hit.is_none()),
            }
        }
    }
}
