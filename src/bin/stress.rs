//! Randomized workload driver for the allocator.
//!
//! Runs a seeded allocate/release/resize churn against a shadow model,
//! fills every payload with a block-specific pattern, and re-verifies both
//! the index and the block chain at a configurable cadence. Exits non-zero
//! on the first divergence.

use std::process::ExitCode;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use emberheap::{verify, BlockOffset, Heap, HeapOptions};

#[derive(Parser, Debug)]
#[command(
    name = "emberheap-stress",
    version,
    about = "Randomized stress harness for the emberheap allocator"
)]
struct Cli {
    #[arg(long, default_value_t = 100_000, help = "Operations to run")]
    ops: u64,

    #[arg(long, default_value_t = 42, help = "RNG seed for the workload")]
    seed: u64,

    #[arg(long, default_value_t = 2048, help = "Largest allocation request in bytes")]
    max_alloc: usize,

    #[arg(
        long,
        default_value_t = 1024,
        help = "Full heap verification every N operations"
    )]
    check_every: u64,

    #[arg(long, default_value_t = 1 << 28, help = "Arena byte limit")]
    arena_limit: usize,

    #[arg(long, default_value_t = 4096, help = "Arena growth chunk in bytes")]
    growth_chunk: usize,
}

struct Held {
    bp: BlockOffset,
    fill: u8,
    len: usize,
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("emberheap=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("stress failure: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let mut heap = Heap::with_options(HeapOptions {
        arena_limit: cli.arena_limit,
        growth_chunk: cli.growth_chunk,
    })
    .map_err(|e| format!("heap init: {e}"))?;

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let mut held: Vec<Held> = Vec::new();

    for op in 0..cli.ops {
        let roll = rng.gen_range(0..100);
        if held.is_empty() || roll < 50 {
            let len = rng.gen_range(1..=cli.max_alloc);
            let bp = heap.allocate(len).map_err(|e| format!("op {op} allocate: {e}"))?;
            let fill = rng.gen();
            heap.payload_mut(bp)[..len].fill(fill);
            held.push(Held { bp, fill, len });
        } else if roll < 85 {
            let victim = held.swap_remove(rng.gen_range(0..held.len()));
            check_fill(&heap, &victim, op)?;
            heap.release(Some(victim.bp))
                .map_err(|e| format!("op {op} release: {e}"))?;
        } else {
            let i = rng.gen_range(0..held.len());
            check_fill(&heap, &held[i], op)?;
            let len = rng.gen_range(1..=cli.max_alloc);
            let bp = heap
                .resize(Some(held[i].bp), len)
                .map_err(|e| format!("op {op} resize: {e}"))?
                .ok_or_else(|| format!("op {op} resize returned no block"))?;
            held[i].bp = bp;
            held[i].len = held[i].len.min(len);
            check_fill(&heap, &held[i], op)?;
            held[i].fill = rng.gen();
            held[i].len = len;
            heap.payload_mut(bp)[..len].fill(held[i].fill);
        }

        if op % cli.check_every == 0 {
            heap_check(&heap, op, held.len())?;
        }
    }

    for victim in held.drain(..) {
        heap.release(Some(victim.bp)).map_err(|e| format!("drain: {e}"))?;
    }
    heap_check(&heap, cli.ops, 0)?;

    let stats = verify(&heap).map_err(|e| format!("final verify: {e}"))?;
    println!(
        "ok: {} ops, arena {} bytes, {} free / {} allocated blocks, tree height {}, {} nodes ({} spare)",
        cli.ops,
        stats.arena_len,
        stats.free_blocks,
        stats.allocated_blocks,
        stats.height,
        stats.node_count,
        stats.spare_nodes,
    );
    Ok(())
}

fn check_fill(heap: &Heap, held: &Held, op: u64) -> Result<(), String> {
    let payload = heap.payload(held.bp);
    if payload[..held.len].iter().any(|&b| b != held.fill) {
        return Err(format!("op {op}: payload at {} lost its fill pattern", held.bp));
    }
    Ok(())
}

fn heap_check(heap: &Heap, op: u64, live: usize) -> Result<(), String> {
    let stats = verify(heap).map_err(|e| format!("op {op} verify: {e}"))?;
    tracing::info!(
        op,
        live,
        arena = stats.arena_len,
        free = stats.free_blocks,
        height = stats.height,
        "checkpoint"
    );
    Ok(())
}
