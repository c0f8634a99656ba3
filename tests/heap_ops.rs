//! End-to-end allocator behavior through the public API, cross-checked with
//! the structural verifier after every interesting transition.

use emberheap::{verify, Heap, HeapError, HeapOptions};

fn small_heap() -> Heap {
    Heap::with_options(HeapOptions {
        arena_limit: 1 << 22,
        growth_chunk: 4096,
    })
    .unwrap()
}

#[test]
fn payloads_survive_neighboring_churn() {
    let mut heap = small_heap();
    let mut held = Vec::new();
    for i in 0..24u8 {
        let bp = heap.allocate(40).unwrap();
        heap.payload_mut(bp).fill(i);
        held.push((i, bp));
    }
    verify(&heap).unwrap();

    // Free every other block, leaving a comb of allocated islands.
    for &(_, bp) in held.iter().step_by(2) {
        heap.release(Some(bp)).unwrap();
    }
    verify(&heap).unwrap();
    for &(i, bp) in held.iter().skip(1).step_by(2) {
        assert!(heap.payload(bp).iter().all(|&b| b == i));
    }

    // New allocations land in the gaps without touching survivors.
    for _ in 0..12 {
        let bp = heap.allocate(40).unwrap();
        heap.payload_mut(bp).fill(0xAB);
    }
    verify(&heap).unwrap();
    for &(i, bp) in held.iter().skip(1).step_by(2) {
        assert!(heap.payload(bp).iter().all(|&b| b == i));
    }
}

#[test]
fn full_release_coalesces_to_one_block() {
    let mut heap = small_heap();
    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    let c = heap.allocate(64).unwrap();

    // Release out of order so merges happen on both sides.
    heap.release(Some(a)).unwrap();
    heap.release(Some(c)).unwrap();
    heap.release(Some(b)).unwrap();

    let stats = verify(&heap).unwrap();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_bytes, 4096);
    assert_eq!(stats.entry_count, 1);
    // Everything still allocated is index node storage.
    assert_eq!(stats.allocated_blocks, stats.node_count + stats.spare_nodes);
}

#[test]
fn allocation_grows_the_arena_on_demand() {
    let mut heap = small_heap();
    // Warm the spare-node pool so later lengths measure block growth only.
    let warm = heap.allocate(16).unwrap();
    heap.release(Some(warm)).unwrap();
    let before = heap.arena_len();

    // Exact fit for the whole initial chunk.
    let big = heap.allocate(4088).unwrap();
    assert_eq!(heap.arena_len(), before);

    // Nothing left: the next request forces one growth chunk.
    let small = heap.allocate(100).unwrap();
    assert_eq!(heap.arena_len(), before + 4096);
    verify(&heap).unwrap();

    heap.release(Some(big)).unwrap();
    heap.release(Some(small)).unwrap();
    verify(&heap).unwrap();
}

#[test]
fn refused_growth_leaves_the_heap_usable() {
    let mut heap = Heap::with_options(HeapOptions {
        arena_limit: 4600,
        growth_chunk: 4096,
    })
    .unwrap();

    let err = heap.allocate(100_000).unwrap_err();
    assert!(matches!(err, HeapError::OutOfMemory));
    verify(&heap).unwrap();

    // The failed attempt reserved nothing and the heap still serves fits.
    let bp = heap.allocate(128).unwrap();
    heap.payload_mut(bp).fill(0x5A);
    verify(&heap).unwrap();
    heap.release(Some(bp)).unwrap();
    let stats = verify(&heap).unwrap();
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn refused_node_reservation_leaves_the_heap_intact() {
    // Exactly bootstrap + root node + the spare pool of the first allocate
    // + one growth chunk: node storage can never grow again.
    let mut heap = Heap::with_options(HeapOptions {
        arena_limit: 16 + 56 + 5 * 56 + 4096,
        growth_chunk: 4096,
    })
    .unwrap();
    let blocks: Vec<_> = (0..256).map(|_| heap.allocate(8).unwrap()).collect();
    assert_eq!(heap.arena_len(), 16 + 56 + 5 * 56 + 4096);

    // Scattered frees never coalesce, so the index keeps splitting until a
    // reservation needs a node the arena cannot carve. That release must
    // fail before mutating anything.
    let mut refused = None;
    for (i, &bp) in blocks.iter().enumerate().step_by(2) {
        match heap.release(Some(bp)) {
            Ok(()) => {}
            Err(HeapError::OutOfMemory) => {
                refused = Some((i, bp));
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    let (_, survivor) = refused.expect("node storage never hit the limit");
    verify(&heap).unwrap();

    // The refused block is still allocated and fully usable.
    heap.payload_mut(survivor).fill(0x77);
    verify(&heap).unwrap();

    // Allocation at the same wall also fails cleanly.
    assert!(matches!(heap.allocate(8), Err(HeapError::OutOfMemory)));
    verify(&heap).unwrap();
}

#[test]
fn zero_length_requests_are_rejected() {
    let mut heap = small_heap();
    assert!(matches!(heap.allocate(0), Err(HeapError::InvalidSize)));
    heap.release(None).unwrap();
    assert_eq!(heap.resize(None, 0).unwrap(), None);
    verify(&heap).unwrap();
}

#[test]
fn resize_covers_all_transitions() {
    let mut heap = small_heap();

    // None-in behaves as allocate.
    let a = heap.resize(None, 48).unwrap().unwrap();
    heap.payload_mut(a)[..8].copy_from_slice(&b"emberheap"[..8]);

    // Shrink stays put and returns the slack to the index.
    let same = heap.resize(Some(a), 16).unwrap().unwrap();
    assert_eq!(same, a);
    assert_eq!(&heap.payload(a)[..8], &b"emberheap"[..8]);
    verify(&heap).unwrap();

    // Relocation copies the surviving payload prefix.
    let _wall = heap.allocate(32).unwrap();
    let moved = heap.resize(Some(a), 8192).unwrap().unwrap();
    assert_ne!(moved, a);
    assert_eq!(&heap.payload(moved)[..8], &b"emberheap"[..8]);
    verify(&heap).unwrap();

    // Zero length releases.
    assert_eq!(heap.resize(Some(moved), 0).unwrap(), None);
    verify(&heap).unwrap();
}

#[test]
fn repeated_churn_reaches_a_stable_footprint() {
    let mut heap = small_heap();
    let mut settled = 0;
    for round in 0..6 {
        let mut held = Vec::new();
        for _ in 0..60 {
            held.push(heap.allocate(24).unwrap());
        }
        // Odd-even release order keeps the index populated before the
        // final coalescing sweep.
        for &bp in held.iter().step_by(2) {
            heap.release(Some(bp)).unwrap();
        }
        for &bp in held.iter().skip(1).step_by(2) {
            heap.release(Some(bp)).unwrap();
        }
        verify(&heap).unwrap();

        if round == 1 {
            settled = heap.arena_len();
        }
        if round > 1 {
            // Node storage is recycled: later rounds carve nothing new.
            assert_eq!(heap.arena_len(), settled);
        }
    }
}
