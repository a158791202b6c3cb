/*!
Stable parallel counting sort of particle slots by cell id.

The keys are bounded (cell ids plus one sentinel bucket), so a counting sort
runs in `O(n + num_keys * num_chunks)`. The number of chunks is limited to
`max(1, n / num_keys)`, which keeps the scan linear in `n + num_keys` on
grids with many more cells than particles:

1. every chunk of slots counts its keys into its own histogram row,
2. a scan over `(key, chunk)` turns the counts into write cursors,
3. every chunk scatters its slot indices in order through its cursors.

Chunks are visited in slot order and every chunk writes its slots in order,
so equal keys keep their relative order.
*/

use crate::{
    concurrency::{num_threads, par_chunks_mut1},
    double_buffer::DoubleBuffer,
    particles::{BoidParticles, FluidParticles},
    thread_safe_ptr::ThreadSafeMutPtr,
};

const MIN_CHUNK_LEN: usize = 4096;

/// Slots per chunk for `n` keys spread over `num_threads` lanes. Every chunk
/// owns a cursor row of `num_keys` entries.
fn chunk_len(n: usize, num_keys: usize, num_threads: usize) -> usize {
    let max_chunks = usize::max(1, n / num_keys);
    let num_chunks = usize::min(num_threads, max_chunks);
    usize::max(MIN_CHUNK_LEN, (n + num_chunks - 1) / num_chunks)
}

/// Particle storages that can be reordered by their cell ids.
pub trait CellSorted {
    fn cell_ids(&self) -> &[u32];

    /// Reorder every buffer of `src` into `self` by `permutation`.
    fn gather_from(&mut self, src: &Self, permutation: &[u32]);
}

impl CellSorted for FluidParticles {
    fn cell_ids(&self) -> &[u32] {
        &self.cell_id
    }

    fn gather_from(&mut self, src: &Self, permutation: &[u32]) {
        FluidParticles::gather_from(self, src, permutation);
    }
}

impl CellSorted for BoidParticles {
    fn cell_ids(&self) -> &[u32] {
        &self.cell_id
    }

    fn gather_from(&mut self, src: &Self, permutation: &[u32]) {
        BoidParticles::gather_from(self, src, permutation);
    }
}

pub struct KeySort {
    num_keys: usize,
    // one row of `num_keys` counters per chunk
    cursors: Vec<u32>,
    permutation: Vec<u32>,
}

impl KeySort {
    /// Keys `>= num_keys - 1` all share the last bucket.
    pub fn new(capacity: usize, num_keys: usize) -> Self {
        assert!(num_keys > 0);
        KeySort {
            num_keys,
            cursors: Vec::new(),
            permutation: Vec::with_capacity(capacity),
        }
    }

    /**
     * Compute the permutation `perm` such that `keys[perm[0]], keys[perm[1]], ...`
     * is ascending. Ties keep their original order.
     */
    pub fn compute_permutation(&mut self, keys: &[u32]) -> &[u32] {
        let n = keys.len();
        self.permutation.resize(n, 0);
        if n == 0 {
            return &self.permutation;
        }

        let num_keys = self.num_keys;
        let last_bucket = (num_keys - 1) as u32;
        let chunk_len = chunk_len(n, num_keys, num_threads());
        let num_chunks = (n + chunk_len - 1) / chunk_len;
        let chunk_range = move |chunk_idx: usize| chunk_idx * chunk_len..usize::min(n, (chunk_idx + 1) * chunk_len);

        self.cursors.resize(num_chunks * num_keys, 0);

        // histogram per chunk
        par_chunks_mut1(&mut self.cursors, num_keys, |chunk_idx, counts| {
            counts.fill(0);
            for &key in &keys[chunk_range(chunk_idx)] {
                counts[u32::min(key, last_bucket) as usize] += 1;
            }
        });

        // exclusive scan, key-major so that lower chunks come first within a key
        let mut running = 0u32;
        for key in 0..num_keys {
            for chunk_idx in 0..num_chunks {
                let cursor = &mut self.cursors[chunk_idx * num_keys + key];
                let count = *cursor;
                *cursor = running;
                running += count;
            }
        }
        debug_assert_eq!(running as usize, n);

        // scatter
        let permutation_ptr = ThreadSafeMutPtr::new(self.permutation.as_mut_ptr());
        par_chunks_mut1(&mut self.cursors, num_keys, |chunk_idx, cursors| {
            for i in chunk_range(chunk_idx) {
                let cursor = &mut cursors[u32::min(keys[i], last_bucket) as usize];
                // SAFETY: the cursors of all chunks cover disjoint index ranges of
                // the permutation and every cursor position is written once.
                unsafe {
                    permutation_ptr.write(*cursor as usize, i as u32);
                }
                *cursor += 1;
            }
        });

        &self.permutation
    }

    /**
     * Sort all particle buffers by cell id.
     *
     * The front storage is gathered into the back storage as a whole and then
     * published, so the buffers never disagree about a particle's slot.
     */
    pub fn sort<P: CellSorted>(&mut self, particles: &mut DoubleBuffer<P>) {
        let (front, back) = particles.split_mut();
        let permutation = self.compute_permutation(front.cell_ids());
        back.gather_from(front, permutation);
        particles.flip();
    }
}
