use ewah::gen_sequences::{gen_clustered_positions, gen_strictly_increasing_sequence};
use ewah::{Bitmap, EwahBitmap};

use mem_dbg::*;
use std::time::Instant;

const N_RUNS: usize = 5;
const DEFAULT_N_BITS: usize = 10_000_000;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Size of the universe in bits
    #[arg(short, long, default_value_t = DEFAULT_N_BITS)]
    n: usize,
    /// Density of set bits (one in `sparsity`)
    #[arg(short, long, default_value_t = 100)]
    sparsity: usize,
    /// Benchmark the combiners
    #[arg(short, long)]
    combine: bool,
    /// Benchmark the iterators
    #[arg(short, long)]
    iter: bool,
}

// Per-item minimum, maximum and mean over the recorded laps, in nanoseconds.
fn summarize(laps: &[u128], items: usize) -> (u128, u128, u128) {
    let items = items as u128;
    let min = laps.iter().min().unwrap() / items;
    let max = laps.iter().max().unwrap() / items;
    let avg = laps.iter().sum::<u128>() / (laps.len() as u128 * items);
    (min, max, avg)
}

fn build(positions: &[usize]) -> EwahBitmap {
    let start = Instant::now();
    let bitmap: EwahBitmap = positions.iter().copied().collect();
    let elapsed = start.elapsed();

    println!(
        "BUILD: [n_bits: {}, set_bits: {}, compressed_words: {}, time: {:?}]",
        bitmap.len(),
        bitmap.count_ones(),
        bitmap.compressed_len(),
        elapsed
    );
    println!("SPACE: {} bytes", bitmap.mem_size(SizeFlags::default()));

    bitmap
}

fn test_combine(a: &EwahBitmap, b: &EwahBitmap) {
    let mut laps = Vec::with_capacity(N_RUNS);
    let mut checksum = 0usize;

    for _ in 0..N_RUNS {
        let start = Instant::now();
        checksum += a.or(b).count_ones();
        checksum += a.and(b).count_ones();
        checksum += a.xor(b).count_ones();
        checksum += a.and_not(b).count_ones();
        laps.push(start.elapsed().as_nanos());
    }

    let (t_min, t_max, t_avg) = summarize(&laps, 4);
    println!(
        "COMBINE: [min_time (ns): {}, max_time (ns): {}, avg_time (ns): {}, num_runs: {}]",
        t_min, t_max, t_avg, N_RUNS
    );
    println!("IGNORE: {checksum}");
}

fn test_iter(bitmap: &EwahBitmap) {
    let n_bits = bitmap.count_ones().max(1);
    let mut laps = Vec::with_capacity(N_RUNS);
    let mut checksum = 0usize;

    for _ in 0..N_RUNS {
        let start = Instant::now();
        checksum += bitmap.ones().sum::<usize>();
        laps.push(start.elapsed().as_nanos());
    }

    let (t_min, t_max, t_avg) = summarize(&laps, n_bits);
    println!(
        "ITER ONES: [set_bits: {}, min_time (ns): {}, max_time (ns): {}, avg_time (ns): {}]",
        n_bits, t_min, t_max, t_avg
    );

    let n_words = bitmap.len().div_ceil(64).max(1);
    let mut laps = Vec::with_capacity(N_RUNS);
    for _ in 0..N_RUNS {
        let start = Instant::now();
        checksum += bitmap.words().map(|w| w.count_ones() as usize).sum::<usize>();
        laps.push(start.elapsed().as_nanos());
    }

    let (t_min, t_max, t_avg) = summarize(&laps, n_words);
    println!(
        "ITER WORDS: [words: {}, min_time (ns): {}, max_time (ns): {}, avg_time (ns): {}]",
        n_words, t_min, t_max, t_avg
    );
    println!("IGNORE: {checksum}");
}

fn main() {
    let args = Args::parse();

    let n_set = (args.n / args.sparsity).max(1);
    let sparse_positions = gen_strictly_increasing_sequence(n_set, args.n);
    let clustered_positions = gen_clustered_positions(n_set / 256 + 1, 256, args.sparsity * 256);

    println!("--- sparse bitmap ---");
    let sparse = build(&sparse_positions);

    println!("--- clustered bitmap ---");
    let clustered = build(&clustered_positions);

    // compression sanity check against the plain representation
    let mut plain = Bitmap::new();
    for &p in &sparse_positions {
        plain.set(p);
    }
    println!(
        "PLAIN SPACE: {} bytes ({} words)",
        plain.mem_size(SizeFlags::default()),
        plain.num_words()
    );

    if args.combine {
        test_combine(&sparse, &clustered);
    }

    if args.iter {
        test_iter(&sparse);
        test_iter(&clustered);
    }
}
