//! Row and column sampling: uniform subsampling with and without
//! replacement, weighted sampling through a balanced prefix-sum tree, and
//! the per-tree column sampler with optional kurtosis weighting.

use rand::prelude::*;

/// Balanced binary tree of cumulative weights over `n` leaves, sized to the
/// next power of two. One draw is an O(log n) descent; drawing without
/// replacement zeroes the chosen leaf and propagates the subtraction up.
#[derive(Debug, Clone)]
pub(crate) struct BtreeSampler {
    nodes: Vec<f64>,
    /// Index of the first leaf.
    offset: usize,
    n: usize,
}

impl BtreeSampler {
    pub fn new(weights: &[f64]) -> Self {
        let n = weights.len();
        let leaves = n.next_power_of_two().max(1);
        let mut nodes = vec![0.0; 2 * leaves - 1];
        let offset = leaves - 1;
        for (i, &w) in weights.iter().enumerate() {
            nodes[offset + i] = w.max(0.0);
        }
        for i in (0..offset).rev() {
            nodes[i] = nodes[2 * i + 1] + nodes[2 * i + 2];
        }
        BtreeSampler { nodes, offset, n }
    }

    pub fn total(&self) -> f64 {
        self.nodes[0]
    }

    /// Draw one leaf in proportion to its weight, without removing it.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Option<usize> {
        let total = self.total();
        if total <= 0.0 {
            return None;
        }
        let mut r = rng.random::<f64>() * total;
        let mut ix = 0usize;
        while ix < self.offset {
            let left = 2 * ix + 1;
            if r < self.nodes[left] || self.nodes[left + 1] <= 0.0 {
                ix = left;
            } else {
                r -= self.nodes[left];
                ix = left + 1;
            }
        }
        let leaf = ix - self.offset;
        if leaf < self.n {
            Some(leaf)
        } else {
            // only reachable through floating-point round-off at the
            // right edge; fall back to the last weighted leaf
            (0..self.n).rev().find(|&i| self.nodes[self.offset + i] > 0.0)
        }
    }

    /// Draw one leaf and zero it out.
    pub fn draw_remove<R: Rng>(&mut self, rng: &mut R) -> Option<usize> {
        let leaf = self.draw(rng)?;
        self.set_zero(leaf);
        Some(leaf)
    }

    fn set_zero(&mut self, leaf: usize) {
        let mut ix = self.offset + leaf;
        let w = self.nodes[ix];
        self.nodes[ix] = 0.0;
        while ix > 0 {
            ix = (ix - 1) / 2;
            self.nodes[ix] -= w;
            if self.nodes[ix] < 0.0 {
                self.nodes[ix] = 0.0;
            }
        }
    }
}

/// Fill `out` with a weighted shuffle of `0..n`: every prefix is a
/// weighted sample without replacement.
pub(crate) fn weighted_shuffle<R: Rng>(out: &mut Vec<usize>, weights: &[f64], rng: &mut R) {
    out.clear();
    let mut btree = BtreeSampler::new(weights);
    while let Some(ix) = btree.draw_remove(rng) {
        out.push(ix);
    }
}

/// Subsample `sample_size` of `nrows` rows into `ix_arr`.
///
/// Without weights this is a partial Fisher-Yates shuffle (or a plain
/// shuffle when the sample is the whole data); with weights and
/// `with_replacement = false` it walks the prefix-sum tree, removing each
/// draw. Draws with replacement are independent either way.
pub(crate) fn sample_random_rows<R: Rng>(
    ix_arr: &mut Vec<usize>,
    nrows: usize,
    sample_size: usize,
    with_replacement: bool,
    weights: Option<&[f64]>,
    rng: &mut R,
) {
    ix_arr.clear();
    match (weights, with_replacement) {
        (None, false) => {
            let mut pool: Vec<usize> = (0..nrows).collect();
            for i in 0..sample_size.min(nrows) {
                let j = rng.random_range(i..nrows);
                pool.swap(i, j);
            }
            ix_arr.extend_from_slice(&pool[..sample_size.min(nrows)]);
        }
        (None, true) => {
            for _ in 0..sample_size {
                ix_arr.push(rng.random_range(0..nrows));
            }
        }
        (Some(w), false) => {
            if sample_size >= nrows {
                weighted_shuffle(ix_arr, w, rng);
            } else {
                let mut btree = BtreeSampler::new(w);
                for _ in 0..sample_size {
                    match btree.draw_remove(rng) {
                        Some(row) => ix_arr.push(row),
                        None => break,
                    }
                }
            }
        }
        (Some(w), true) => {
            let btree = BtreeSampler::new(w);
            for _ in 0..sample_size {
                match btree.draw(rng) {
                    Some(row) => ix_arr.push(row),
                    None => break,
                }
            }
        }
    }
}

/// Per-tree column sampler. Uniform over still-splittable columns, or
/// weighted by user weights (optionally scaled by kurtosis). Excluded
/// columns never come back within the tree.
#[derive(Debug, Clone)]
pub(crate) struct ColumnSampler {
    /// Empty for the uniform sampler.
    weights: Vec<f64>,
    ncols: usize,
}

impl ColumnSampler {
    pub fn uniform(ncols: usize) -> Self {
        ColumnSampler {
            weights: Vec::new(),
            ncols,
        }
    }

    pub fn weighted(weights: Vec<f64>) -> Self {
        let ncols = weights.len();
        ColumnSampler { weights, ncols }
    }

    pub fn is_weighted(&self) -> bool {
        !self.weights.is_empty()
    }

    /// Draw a column among those still marked possible, or None when all
    /// are exhausted.
    pub fn sample<R: Rng>(&self, cols_possible: &[bool], rng: &mut R) -> Option<usize> {
        if self.weights.is_empty() {
            let n_possible = cols_possible.iter().filter(|&&p| p).count();
            if n_possible == 0 {
                return None;
            }
            let k = rng.random_range(0..n_possible);
            cols_possible
                .iter()
                .enumerate()
                .filter(|(_, &p)| p)
                .nth(k)
                .map(|(col, _)| col)
        } else {
            let total: f64 = self
                .weights
                .iter()
                .zip(cols_possible)
                .filter(|(_, &p)| p)
                .map(|(&w, _)| w)
                .sum();
            if total <= 0.0 {
                // weights all zero but columns remain; treat as uniform
                return ColumnSampler::uniform(self.ncols).sample(cols_possible, rng);
            }
            let mut r = rng.random::<f64>() * total;
            for (col, (&w, &p)) in self.weights.iter().zip(cols_possible).enumerate() {
                if p {
                    if r < w {
                        return Some(col);
                    }
                    r -= w;
                }
            }
            // floating-point edge: last possible column
            cols_possible.iter().rposition(|&p| p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn btree_respects_weights() {
        let weights = [0.0, 0.0, 5.0, 0.0];
        let btree = BtreeSampler::new(&weights);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(btree.draw(&mut rng), Some(2));
        }
    }

    #[test]
    fn btree_draw_remove_exhausts_mass() {
        let weights = [1.0, 2.0, 3.0];
        let mut btree = BtreeSampler::new(&weights);
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = Vec::new();
        while let Some(ix) = btree.draw_remove(&mut rng) {
            seen.push(ix);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(btree.total().abs() < 1e-9);
    }

    #[test]
    fn weighted_shuffle_is_a_permutation() {
        let weights = [0.5, 1.0, 2.0, 4.0, 8.0];
        let mut rng = StdRng::seed_from_u64(3);
        let mut out = Vec::new();
        weighted_shuffle(&mut out, &weights, &mut rng);
        let mut sorted = out.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn sample_without_replacement_has_no_duplicates() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut ix = Vec::new();
        sample_random_rows(&mut ix, 100, 40, false, None, &mut rng);
        assert_eq!(ix.len(), 40);
        let mut sorted = ix.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 40);
    }

    #[test]
    fn full_sample_is_a_shuffle() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut ix = Vec::new();
        sample_random_rows(&mut ix, 10, 10, false, None, &mut rng);
        let mut sorted = ix.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn zero_weight_rows_are_never_sampled() {
        let mut weights = vec![1.0; 20];
        weights[7] = 0.0;
        weights[13] = 0.0;
        let mut rng = StdRng::seed_from_u64(9);
        let mut ix = Vec::new();
        sample_random_rows(&mut ix, 20, 18, false, Some(&weights), &mut rng);
        assert!(!ix.contains(&7));
        assert!(!ix.contains(&13));
        assert_eq!(ix.len(), 18);
    }

    #[test]
    fn column_sampler_skips_excluded() {
        let sampler = ColumnSampler::uniform(4);
        let possible = [true, false, true, false];
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let col = sampler.sample(&possible, &mut rng).unwrap();
            assert!(col == 0 || col == 2);
        }
    }

    #[test]
    fn weighted_column_sampler_follows_mass() {
        let sampler = ColumnSampler::weighted(vec![0.0, 0.0, 1.0]);
        let possible = [true, true, true];
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            assert_eq!(sampler.sample(&possible, &mut rng), Some(2));
        }
    }
}
