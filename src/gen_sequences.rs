use rand::Rng;

/// Generates a random strictly increasing sequence of `n` bit positions
/// below `universe`.
///
/// ## Examples
/// ```
/// use ewah::gen_sequences::gen_strictly_increasing_sequence;
///
/// let positions = gen_strictly_increasing_sequence(100, 1 << 16);
/// assert_eq!(positions.len(), 100);
/// assert!(positions.windows(2).all(|w| w[0] < w[1]));
/// ```
pub fn gen_strictly_increasing_sequence(n: usize, universe: usize) -> Vec<usize> {
    assert!(n <= universe);
    if n == universe {
        return (0..n).collect();
    }

    let mut rng = rand::rng();
    let mut v: Vec<usize> = (0..n).map(|_| rng.random_range(0..universe - n)).collect();
    v.sort_unstable();
    for (i, pos) in v.iter_mut().enumerate() {
        // shift by rank to remove duplicates
        *pos += i;
    }
    v
}

/// Generates positions grouped into `n_runs` dense runs of consecutive
/// bits separated by random gaps. This is the distribution a run-length
/// encoding compresses best, so tests use it to exercise long clean runs
/// and marker coalescing.
///
/// ## Examples
/// ```
/// use ewah::gen_sequences::gen_clustered_positions;
///
/// let positions = gen_clustered_positions(10, 200, 5000);
/// assert!(positions.windows(2).all(|w| w[0] < w[1]));
/// ```
pub fn gen_clustered_positions(n_runs: usize, max_run_len: usize, max_gap: usize) -> Vec<usize> {
    let mut rng = rand::rng();
    let mut v = Vec::new();
    let mut pos = 0;

    for _ in 0..n_runs {
        pos += rng.random_range(1..=max_gap);
        let run_len = rng.random_range(1..=max_run_len);
        for _ in 0..run_len {
            v.push(pos);
            pos += 1;
        }
    }
    v
}

/// Given a strictly increasing slice of positions, returns all positions
/// below `universe` that are not in it.
///
/// ## Examples
/// ```
/// use ewah::gen_sequences::complement;
///
/// assert_eq!(complement(&[1, 3, 6], 7), vec![0, 2, 4, 5]);
/// ```
pub fn complement(v: &[usize], universe: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(universe - v.len());
    let mut j = 0;
    for i in 0..universe {
        if j < v.len() && v[j] == i {
            j += 1;
        } else {
            out.push(i);
        }
    }
    out
}
