/*!
Data-parallel loops used by every solver phase.

Each helper runs one lane per element and returns only after all lanes
finished, so consecutive calls are separated by a full barrier. With the
`single-threaded` feature the same loops run sequentially in index order.
*/

pub use internal::*;

#[cfg(feature = "single-threaded")]
mod internal {
    pub fn par_reduce<X: Send, F: Fn(usize) -> X + Send + Sync, C: Fn(X, X) -> X + Send + Sync, I: Fn() -> X + Send + Sync>(
        n: usize,
        identity: I,
        combine: C,
        f: F,
    ) -> X {
        (0..n).map(|i| f(i)).fold(identity(), |acc, value| combine(acc, value))
    }

    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
        arr1.iter_mut().enumerate().for_each(|(idx, v1)| {
            f(idx, v1);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.iter_mut()
            .zip(arr2.iter_mut())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }

    pub fn par_iter_mut3<
        T1: Send + Sync,
        T2: Send + Sync,
        T3: Send + Sync,
        F: Fn(usize, &mut T1, &mut T2, &mut T3) + Send + Sync,
    >(
        arr1: &mut [T1],
        arr2: &mut [T2],
        arr3: &mut [T3],
        f: F,
    ) {
        arr1.iter_mut()
            .zip(arr2.iter_mut())
            .zip(arr3.iter_mut())
            .enumerate()
            .for_each(|(idx, ((v1, v2), v3))| {
                f(idx, v1, v2, v3);
            });
    }

    pub fn par_chunks_mut1<T1: Send + Sync, F: Fn(usize, &mut [T1]) + Send + Sync>(
        arr1: &mut [T1],
        chunk_size: usize,
        f: F,
    ) {
        arr1.chunks_mut(chunk_size).enumerate().for_each(|(chunk_idx, chunk)| {
            f(chunk_idx, chunk);
        });
    }

    pub fn num_threads() -> usize {
        1
    }
}

#[cfg(not(feature = "single-threaded"))]
mod internal {
    use rayon::prelude::*;

    pub fn par_reduce<X: Send, F: Fn(usize) -> X + Send + Sync, C: Fn(X, X) -> X + Send + Sync, I: Fn() -> X + Send + Sync>(
        n: usize,
        identity: I,
        combine: C,
        f: F,
    ) -> X {
        (0..n).into_par_iter().map(|i| f(i)).reduce(identity, combine)
    }

    pub fn par_iter_mut0<F: Fn(usize) + Send + Sync>(n: usize, f: F) {
        (0..n).into_par_iter().for_each(|idx| {
            f(idx);
        });
    }

    pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
        arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
            f(idx, v1);
        });
    }

    pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
        arr1: &mut [T1],
        arr2: &mut [T2],
        f: F,
    ) {
        arr1.into_par_iter()
            .zip(arr2.into_par_iter())
            .enumerate()
            .for_each(|(idx, (v1, v2))| {
                f(idx, v1, v2);
            });
    }

    pub fn par_iter_mut3<
        T1: Send + Sync,
        T2: Send + Sync,
        T3: Send + Sync,
        F: Fn(usize, &mut T1, &mut T2, &mut T3) + Send + Sync,
    >(
        arr1: &mut [T1],
        arr2: &mut [T2],
        arr3: &mut [T3],
        f: F,
    ) {
        arr1.into_par_iter()
            .zip(arr2.into_par_iter())
            .zip(arr3.into_par_iter())
            .enumerate()
            .for_each(|(idx, ((v1, v2), v3))| {
                f(idx, v1, v2, v3);
            });
    }

    pub fn par_chunks_mut1<T1: Send + Sync, F: Fn(usize, &mut [T1]) + Send + Sync>(
        arr1: &mut [T1],
        chunk_size: usize,
        f: F,
    ) {
        arr1.par_chunks_mut(chunk_size)
            .enumerate()
            .for_each(|(chunk_idx, chunk)| {
                f(chunk_idx, chunk);
            });
    }

    pub fn num_threads() -> usize {
        rayon::current_num_threads()
    }
}

#[test]
fn par_reduce_sums_all_lanes() {
    let sum = par_reduce(1000, || 0usize, |a, b| a + b, |i| i);
    assert_eq!(sum, 999 * 1000 / 2);
}

#[test]
fn par_chunks_mut1_visits_chunks_in_index_order() {
    let mut values = vec![0usize; 10];
    par_chunks_mut1(&mut values, 4, |chunk_idx, chunk| {
        for v in chunk.iter_mut() {
            *v = chunk_idx;
        }
    });
    assert_eq!(values, vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);
}
