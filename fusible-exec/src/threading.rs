//! Rayon-based loop and scan execution.
//!
//! Host-threaded loops are split into one contiguous chunk per worker so each
//! worker streams through memory; device loops schedule every index as its own
//! task, the way an accelerator assigns one thread per index.

use rayon::prelude::*;

use crate::scan::sequential_scan;

/// Chunk length that gives each rayon worker roughly one chunk, never
/// shorter than `min_chunk`.
pub(crate) fn chunk_len(len: usize, min_chunk: usize) -> usize {
    let nthreads = rayon::current_num_threads().max(1);
    len.div_ceil(nthreads).max(min_chunk).max(1)
}

/// Threaded host loop over `[start, end)` in contiguous chunks.
pub(crate) fn par_for_chunked<F>(start: usize, end: usize, f: &F)
where
    F: Fn(usize) + Sync,
{
    let len = end - start;
    let chunk = chunk_len(len, 1);
    let nchunks = len.div_ceil(chunk);
    (0..nchunks).into_par_iter().for_each(|c| {
        let lo = start + c * chunk;
        let hi = (lo + chunk).min(end);
        for i in lo..hi {
            f(i);
        }
    });
}

/// Device loop over `[start, end)`: one task per index.
pub(crate) fn par_for_each_index<F>(start: usize, end: usize, f: &F)
where
    F: Fn(usize) + Sync,
{
    (start..end).into_par_iter().for_each(f);
}

/// `out[i] = f(i)` across the pool.
pub(crate) fn par_tabulate<T, F>(out: &mut [T], f: &F)
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    out.par_iter_mut()
        .enumerate()
        .for_each(|(i, slot)| *slot = f(i));
}

/// Map-reduce over `[start, end)`.
pub(crate) fn par_reduce<T, M, R>(start: usize, end: usize, map: &M, op: &R, identity: T) -> T
where
    T: Copy + Send + Sync,
    M: Fn(usize) -> T + Sync,
    R: Fn(T, T) -> T + Sync,
{
    (start..end)
        .into_par_iter()
        .map(map)
        .reduce(|| identity, |a, b| op(a, b))
}

/// Three-phase parallel scan.
///
/// 1. Each chunk is scanned locally, yielding the chunk total.
/// 2. Chunk totals are exclusive-scanned on the calling thread.
/// 3. Each chunk's exclusive prefix is folded into its elements.
///
/// `op` must be associative. Returns the reduction of the whole input.
pub(crate) fn par_scan<T, Op>(
    data: &mut [T],
    op: &Op,
    identity: T,
    inclusive: bool,
    min_chunk: usize,
) -> T
where
    T: Copy + Send + Sync,
    Op: Fn(T, T) -> T + Sync,
{
    let chunk = chunk_len(data.len(), min_chunk);
    let mut partials: Vec<T> = data
        .par_chunks_mut(chunk)
        .map(|c| sequential_scan(c, op, identity, inclusive))
        .collect();
    let total = sequential_scan(&mut partials, op, identity, false);
    data.par_chunks_mut(chunk)
        .zip(partials.par_iter())
        .skip(1)
        .for_each(|(c, &base)| {
            for x in c.iter_mut() {
                *x = op(base, *x);
            }
        });
    total
}
