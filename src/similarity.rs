//! Pairwise similarity from separation depths. Every internal node a pair
//! traverses together contributes one separation step; pairs still
//! together at a leaf collect the leaf's expected remainder. Accumulation
//! happens in per-worker upper-triangular buffers that are reduced after
//! the join, which keeps the O(n^2) inner loops free of atomic contention.

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::PredictionData;
use crate::errors::{ForestError, Result};
use crate::fit::with_pool;
use crate::forest::{ExtIsoForest, HPlaneNode, IsoForest, Model, Node};
use crate::math::expected_separation_depth;
use crate::partition::divide_subset;
use crate::predict::{decide_split, project_row, Decision};

/// Index of pair (i, j), i < j, in a row-major upper triangle without the
/// diagonal.
#[inline]
pub(crate) fn tri_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * (2 * n - i - 1) / 2 + (j - i - 1)
}

/// Add `amount` (scaled by each row's mass fraction, when given as
/// `(weights, base_weights)`) to every pair within `ix`.
pub(crate) fn increase_comb_counter(
    counter: &mut [f64],
    ix: &[usize],
    nrows: usize,
    amount: f64,
    masses: Option<(&[f64], &[f64])>,
) {
    let frac = |row: usize| -> f64 {
        match masses {
            None => 1.0,
            Some((w, base)) => {
                if base[row] > 0.0 {
                    w[row] / base[row]
                } else {
                    0.0
                }
            }
        }
    };
    for (a, &ri) in ix.iter().enumerate() {
        let fi = frac(ri);
        if fi <= 0.0 {
            continue;
        }
        for &rj in &ix[a + 1..] {
            let fj = frac(rj);
            if fj <= 0.0 {
                continue;
            }
            let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
            counter[tri_index(nrows, lo, hi)] += amount * fi * fj;
        }
    }
}

/// Turn an accumulated separation-step triangle into similarities (or
/// distances when `standardize_dist`), normalizing by the expected
/// separation depth and the tree count.
pub(crate) fn finalize_tmat(
    counter: &mut [f64],
    ntrees: usize,
    exp_sep: f64,
    standardize_dist: bool,
) {
    let denom = (ntrees as f64) * exp_sep;
    for v in counter.iter_mut() {
        let sim = if denom > 0.0 {
            (*v / denom).clamp(0.0, 1.0)
        } else {
            0.0
        };
        *v = if standardize_dist { 1.0 - sim } else { sim };
    }
}

/// Expand an upper-triangular buffer into a dense symmetric matrix. The
/// diagonal, which the triangle does not carry, is set to one (a row is
/// identical to itself) or zero as requested.
pub fn tmat_to_dense(tmat: &[f64], n: usize, diag_to_one: bool) -> Array2<f64> {
    let mut out = Array2::zeros((n, n));
    let diag = if diag_to_one { 1.0 } else { 0.0 };
    for i in 0..n {
        out[[i, i]] = diag;
        for j in i + 1..n {
            let v = tmat[tri_index(n, i, j)];
            out[[i, j]] = v;
            out[[j, i]] = v;
        }
    }
    out
}

/// Pairwise similarity (or distance) of `data`'s rows under a trained
/// model, as an upper-triangular buffer of length n(n-1)/2.
pub fn calc_similarity(
    model: &Model,
    data: &PredictionData<'_>,
    assume_full_distr: bool,
    standardize_dist: bool,
    nthreads: usize,
) -> Result<Vec<f64>> {
    let n = data.nrows;
    if n < 2 {
        return Err(ForestError::InvalidArgument(
            "similarity needs at least two rows".into(),
        ));
    }
    let len = n * (n - 1) / 2;
    let mut acc: Vec<f64> = Vec::new();
    acc.try_reserve_exact(len)?;

    let reduced = with_pool(nthreads, || -> Result<Vec<f64>> {
        let counters: Result<Vec<Vec<f64>>> = (0..model.ntrees())
            .into_par_iter()
            .map(|t| -> Result<Vec<f64>> {
                let mut counter: Vec<f64> = Vec::new();
                counter.try_reserve_exact(len)?;
                counter.resize(len, 0.0);
                match model {
                    Model::Single(forest) => {
                        sim_tree_single(&forest.trees[t], forest, data, &mut counter)?
                    }
                    Model::Extended(forest) => {
                        sim_tree_ext(&forest.hplanes[t], forest, data, &mut counter)?
                    }
                }
                Ok(counter)
            })
            .collect();
        let counters = counters?;
        let mut total = vec![0.0; len];
        for counter in counters {
            for (a, b) in total.iter_mut().zip(&counter) {
                *a += b;
            }
        }
        Ok(total)
    })??;

    acc.extend_from_slice(&reduced);
    let exp_sep = if assume_full_distr {
        model.exp_avg_sep()
    } else {
        expected_separation_depth(n)
    };
    finalize_tmat(&mut acc, model.ntrees(), exp_sep, standardize_dist);
    Ok(acc)
}

fn sim_tree_single(
    tree: &[Node],
    forest: &IsoForest,
    data: &PredictionData<'_>,
    counter: &mut [f64],
) -> Result<()> {
    let n = data.nrows;
    let mut ix: Vec<usize> = (0..n).collect();
    let mut weights = vec![1.0; n];
    let mut decisions: Vec<Decision> = vec![Decision::Left; n];
    walk_single(
        tree,
        forest,
        data,
        0,
        &mut ix,
        0,
        n,
        &mut weights,
        &mut decisions,
        counter,
    )
}

#[allow(clippy::too_many_arguments)]
fn walk_single(
    tree: &[Node],
    forest: &IsoForest,
    data: &PredictionData<'_>,
    node_ix: usize,
    ix: &mut Vec<usize>,
    st: usize,
    end: usize,
    weights: &mut Vec<f64>,
    decisions: &mut Vec<Decision>,
    counter: &mut [f64],
) -> Result<()> {
    if end <= st {
        return Ok(());
    }
    let n = data.nrows;
    match &tree[node_ix] {
        Node::Leaf { remainder, .. } => {
            if end - st >= 2 && *remainder > 0.0 {
                add_pairs(counter, &ix[st..end], weights, n, *remainder);
            }
            Ok(())
        }
        Node::Branch {
            split,
            left,
            right,
            pct_left,
        } => {
            if end - st >= 2 {
                add_pairs(counter, &ix[st..end], weights, n, 1.0);
            }
            for &row in &ix[st..end] {
                decisions[row] = decide_split(split, *pct_left, forest, data, row)?.0;
            }
            let bands = divide_subset(
                ix,
                st,
                end,
                |row| matches!(decisions[row], Decision::Both(_)),
                |row| decisions[row] == Decision::Left,
            );

            // save the range and masses; the left descent scrambles both
            let ix_saved = ix[st..end].to_vec();
            let w_saved: Vec<f64> = ix_saved.iter().map(|&r| weights[r]).collect();

            for &row in &ix[bands.st_na..bands.end_na] {
                weights[row] *= pct_left;
            }
            walk_single(
                tree, forest, data, *left, ix, st, bands.end_na, weights, decisions, counter,
            )?;

            ix[st..end].copy_from_slice(&ix_saved);
            for (&row, &w) in ix_saved.iter().zip(&w_saved) {
                weights[row] = w;
            }
            for &row in &ix[bands.st_na..bands.end_na] {
                weights[row] *= 1.0 - pct_left;
            }
            walk_single(
                tree,
                forest,
                data,
                *right,
                ix,
                bands.st_na,
                end,
                weights,
                decisions,
                counter,
            )?;
            ix[st..end].copy_from_slice(&ix_saved);
            for (&row, &w) in ix_saved.iter().zip(&w_saved) {
                weights[row] = w;
            }
            Ok(())
        }
    }
}

fn add_pairs(counter: &mut [f64], ix: &[usize], weights: &[f64], nrows: usize, amount: f64) {
    for (a, &ri) in ix.iter().enumerate() {
        let wi = weights[ri];
        if wi <= 0.0 {
            continue;
        }
        for &rj in &ix[a + 1..] {
            let wj = weights[rj];
            if wj <= 0.0 {
                continue;
            }
            let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
            counter[tri_index(nrows, lo, hi)] += amount * wi * wj;
        }
    }
}

fn sim_tree_ext(
    tree: &[HPlaneNode],
    forest: &ExtIsoForest,
    data: &PredictionData<'_>,
    counter: &mut [f64],
) -> Result<()> {
    let n = data.nrows;
    let mut ix: Vec<usize> = (0..n).collect();
    walk_ext(tree, forest, data, 0, &mut ix, 0, n, counter)
}

#[allow(clippy::too_many_arguments)]
fn walk_ext(
    tree: &[HPlaneNode],
    forest: &ExtIsoForest,
    data: &PredictionData<'_>,
    node_ix: usize,
    ix: &mut Vec<usize>,
    st: usize,
    end: usize,
    counter: &mut [f64],
) -> Result<()> {
    if end <= st {
        return Ok(());
    }
    let n = data.nrows;
    match &tree[node_ix] {
        HPlaneNode::Leaf { remainder, .. } => {
            if end - st >= 2 && *remainder > 0.0 {
                increase_comb_counter(counter, &ix[st..end], n, *remainder, None);
            }
            Ok(())
        }
        HPlaneNode::Branch {
            terms,
            split_point,
            left,
            right,
            ..
        } => {
            if end - st >= 2 {
                increase_comb_counter(counter, &ix[st..end], n, 1.0, None);
            }
            let mut mid = st;
            for i in st..end {
                let z = project_row(terms, forest, data, ix[i])?;
                if z <= *split_point {
                    ix.swap(i, mid);
                    mid += 1;
                }
            }
            walk_ext(tree, forest, data, *left, ix, st, mid, counter)?;
            walk_ext(tree, forest, data, *right, ix, mid, end, counter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tri_index_is_a_bijection() {
        let n = 7;
        let mut seen = vec![false; n * (n - 1) / 2];
        for i in 0..n {
            for j in i + 1..n {
                let k = tri_index(n, i, j);
                assert!(!seen[k]);
                seen[k] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn comb_counter_adds_to_every_pair() {
        let n = 4;
        let mut counter = vec![0.0; 6];
        let ix = [0usize, 2, 3];
        increase_comb_counter(&mut counter, &ix, n, 2.0, None);
        assert_eq!(counter[tri_index(n, 0, 2)], 2.0);
        assert_eq!(counter[tri_index(n, 0, 3)], 2.0);
        assert_eq!(counter[tri_index(n, 2, 3)], 2.0);
        assert_eq!(counter[tri_index(n, 0, 1)], 0.0);
    }

    #[test]
    fn finalize_clamps_and_flips() {
        let mut c = vec![0.0, 3.0, 12.0];
        finalize_tmat(&mut c, 2, 3.0, false);
        assert_eq!(c, vec![0.0, 0.5, 1.0]);
        let mut c = vec![0.0, 3.0, 12.0];
        finalize_tmat(&mut c, 2, 3.0, true);
        assert_eq!(c, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn dense_matrix_is_symmetric_with_unit_diagonal() {
        let tmat = vec![0.1, 0.2, 0.3];
        let d = tmat_to_dense(&tmat, 3, true);
        for i in 0..3 {
            assert_eq!(d[[i, i]], 1.0);
            for j in 0..3 {
                assert_eq!(d[[i, j]], d[[j, i]]);
            }
        }
    }
}
