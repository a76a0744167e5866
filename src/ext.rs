//! Extended-model builder: each split thresholds a linear combination of
//! up to `ndim` columns with randomized coefficients. Same explicit-stack
//! skeleton as the single-variable builder, but children never share rows
//! (the Divide missing policy is rejected for this model), so snapshots
//! carry no row copies.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::data::InputData;
use crate::forest::{HPlaneNode, ProjectionTerm, CHILD_UNSET};
use crate::gain::eval_guided_numeric;
use crate::math::{expected_avg_depth_w, expected_separation_depth_w, KahanSum};
use crate::params::{
    CategSplit, CoefType, GainCriterion, MissingAction, ModelParams, NewCategAction, SplitStrategy,
};
use crate::similarity::increase_comb_counter;
use crate::workspace::{RecursionState, Workspace};

/// Attempts at drawing a non-degenerate random hyperplane before the node
/// is closed.
const RANDOM_HPLANE_RETRIES: usize = 3;

struct PendingRight {
    node_ix: usize,
    depth: usize,
    saved: RecursionState,
}

enum NodeOutcome {
    Branch { node_ix: usize },
    Leaf,
}

struct HPlaneCandidate {
    terms: Vec<ProjectionTerm>,
    comb: Vec<f64>,
    split_point: f64,
    zmin: f64,
    zmax: f64,
    gain: f64,
}

/// Grow one extended tree over the rows already sampled into `ws.ix_arr`.
pub(crate) fn build_hplane_tree(
    nodes: &mut Vec<HPlaneNode>,
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    max_depth: usize,
) {
    nodes.clear();
    ws.st = 0;
    ws.end = ws.ix_arr.len();
    ws.st_na = 0;
    ws.end_na = 0;
    let mut stack: Vec<PendingRight> = Vec::new();
    let mut depth = 0usize;
    loop {
        match process_node(nodes, ws, input, params, max_depth, depth) {
            NodeOutcome::Branch { node_ix } => {
                let saved = RecursionState::backup(ws, false);
                stack.push(PendingRight {
                    node_ix,
                    depth,
                    saved,
                });
                ws.end = ws.end_na;
                depth += 1;
            }
            NodeOutcome::Leaf => match stack.pop() {
                None => break,
                Some(pending) => {
                    pending.saved.restore(ws);
                    let next_ix = nodes.len();
                    if let HPlaneNode::Branch { right, .. } = &mut nodes[pending.node_ix] {
                        debug_assert_eq!(*right, CHILD_UNSET);
                        *right = next_ix;
                    }
                    ws.st = ws.st_na;
                    depth = pending.depth + 1;
                }
            },
        }
    }
}

fn process_node(
    nodes: &mut Vec<HPlaneNode>,
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    max_depth: usize,
    depth: usize,
) -> NodeOutcome {
    let n = ws.end - ws.st;
    let sum_w = ws.sum_weight(ws.st, ws.end);
    if n <= 1 || depth >= max_depth || sum_w <= 0.0 {
        return close_leaf(nodes, ws, depth, sum_w);
    }

    // the extended model treats pick-by-gain and split-by-gain alike:
    // ntry candidate hyperplanes, keep the best by the chosen criterion
    let criterion = if params.any_guided() {
        let u = ws.rng.random::<f64>();
        match params.draw_strategy(u) {
            SplitStrategy::PickByGain(c) | SplitStrategy::SplitByGain(c) => Some(c),
            SplitStrategy::Random => None,
        }
    } else {
        None
    };

    let tries = match criterion {
        Some(_) => params.ntry.max(1),
        None => RANDOM_HPLANE_RETRIES,
    };
    let mut best: Option<HPlaneCandidate> = None;
    for _ in 0..tries {
        if let Some(cand) = make_candidate(ws, input, params, criterion) {
            if best.as_ref().map_or(true, |b| cand.gain > b.gain) {
                best = Some(cand);
            }
            if criterion.is_none() {
                break;
            }
        }
    }

    match best {
        Some(cand) => apply_split(nodes, ws, cand),
        None => close_leaf(nodes, ws, depth, sum_w),
    }
}

fn close_leaf(
    nodes: &mut Vec<HPlaneNode>,
    ws: &mut Workspace,
    depth: usize,
    sum_w: f64,
) -> NodeOutcome {
    let score = depth as f64 + expected_avg_depth_w(sum_w);
    let remainder = expected_separation_depth_w(sum_w);
    nodes.push(HPlaneNode::Leaf { score, remainder });

    let (st, end) = (ws.st, ws.end);
    if !ws.row_depths.is_empty() {
        let (row_depths, ix_arr) = (&mut ws.row_depths, &ws.ix_arr);
        for &row in &ix_arr[st..end] {
            row_depths[row] += score;
        }
    }
    if !ws.tmat.is_empty() && end - st >= 2 && remainder > 0.0 {
        let (tmat, ix_arr, nrows) = (&mut ws.tmat, &ws.ix_arr, ws.nrows);
        increase_comb_counter(tmat, &ix_arr[st..end], nrows, remainder, None);
    }
    NodeOutcome::Leaf
}

fn draw_coef<R: Rng>(rng: &mut R, coef_type: CoefType) -> f64 {
    match coef_type {
        CoefType::Uniform => rng.random_range(-1.0..1.0),
        CoefType::Normal => rng.sample(StandardNormal),
    }
}

/// Assemble one hyperplane: take up to `ndim` usable columns, draw their
/// coefficients, project the active rows and pick a split point on the
/// projection. Columns with a single observed value at this node are
/// excluded for the rest of the path (and never enter the plane, so no
/// zero-contribution coefficient survives).
fn make_candidate(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    criterion: Option<GainCriterion>,
) -> Option<HPlaneCandidate> {
    let (st, end) = (ws.st, ws.end);
    let n = end - st;
    let mut terms: Vec<ProjectionTerm> = Vec::new();
    let mut taken: Vec<usize> = Vec::new();

    while terms.len() < params.ndim {
        let col = {
            let (sampler, cols_possible) = (&ws.col_sampler, &ws.cols_possible);
            match sampler.sample(cols_possible, &mut ws.rng) {
                Some(c) => c,
                None => break,
            }
        };
        // reserve the column for this plane; restored below
        ws.cols_possible[col] = false;

        if col < input.ncols_numeric {
            match numeric_term(ws, input, params, col) {
                Some(term) => {
                    terms.push(term);
                    taken.push(col);
                }
                None => continue, // constant or all-missing: stays excluded
            }
        } else {
            let categ_col = col - input.ncols_numeric;
            match categ_term(ws, input, params, categ_col) {
                Some(term) => {
                    terms.push(term);
                    taken.push(col);
                }
                None => continue,
            }
        }
    }
    for &col in &taken {
        ws.cols_possible[col] = true;
    }
    if terms.is_empty() {
        return None;
    }

    // project the active rows
    ws.comb_val.clear();
    ws.comb_val.resize(n, 0.0);
    for pos in 0..n {
        let row = ws.ix_arr[st + pos];
        let mut acc = KahanSum::default();
        for term in &terms {
            acc.add(term_value_train(term, input, row));
        }
        ws.comb_val[pos] = acc.value();
    }
    let zmin = ws.comb_val.iter().copied().fold(f64::INFINITY, f64::min);
    let zmax = ws
        .comb_val
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !(zmax > zmin) {
        return None;
    }

    let (gain, split_point) = match criterion {
        Some(c) => {
            ws.values_buf.clear();
            ws.values_buf.extend_from_slice(&ws.comb_val);
            match eval_guided_numeric(&mut ws.values_buf, c) {
                Some(s) => (s.gain, s.split_point),
                None => return None,
            }
        }
        None => (0.0, ws.rng.random_range(zmin..zmax)),
    };

    Some(HPlaneCandidate {
        terms,
        comb: ws.comb_val.clone(),
        split_point,
        zmin,
        zmax,
        gain,
    })
}

/// Contribution of one term for a training row (fills applied).
fn term_value_train(term: &ProjectionTerm, input: &InputData<'_>, row: usize) -> f64 {
    match term {
        ProjectionTerm::Numeric {
            col,
            coef,
            offset,
            fill_val,
        } => {
            let v = input.num_value(row, *col);
            let v = if v.is_nan() { *fill_val } else { v };
            coef * (v - offset)
        }
        ProjectionTerm::Categorical {
            col,
            coefs,
            fill_val,
            ..
        } => {
            let c = input.cat_value(row, *col);
            if c < 0 {
                *fill_val
            } else {
                coefs[c as usize]
            }
        }
        ProjectionTerm::SingleCateg {
            col,
            category,
            coef,
            fill_val,
            ..
        } => {
            let c = input.cat_value(row, *col);
            if c < 0 {
                *fill_val
            } else if c == *category {
                *coef
            } else {
                0.0
            }
        }
    }
}

/// Numeric term: coefficient scaled by the node-local standard deviation
/// so the projection is scale-invariant, centered on the node-local mean
/// which doubles as the missing-value fill.
fn numeric_term(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    col: usize,
) -> Option<ProjectionTerm> {
    let (st, end) = (ws.st, ws.end);
    let mut sum = KahanSum::default();
    let mut sum_sq = KahanSum::default();
    let mut n_present = 0usize;
    let mut has_missing = false;
    for &row in &ws.ix_arr[st..end] {
        let v = input.num_value(row, col);
        if v.is_nan() {
            has_missing = true;
        } else {
            sum.add(v);
            sum_sq.add(v * v);
            n_present += 1;
        }
    }
    if n_present < 2 || (params.missing_action == MissingAction::Fail && has_missing) {
        return None;
    }
    let nf = n_present as f64;
    let mean = sum.value() / nf;
    let var = (sum_sq.value() - sum.value() * sum.value() / nf) / nf;
    if !(var > 0.0) {
        return None;
    }
    let sd = var.sqrt();
    let coef = draw_coef(&mut ws.rng, params.coef_type) / sd;
    Some(ProjectionTerm::Numeric {
        col,
        coef,
        offset: mean,
        fill_val: mean,
    })
}

fn categ_term(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    col: usize,
) -> Option<ProjectionTerm> {
    let ncat = input.ncat[col].max(0) as usize;
    let (st, end) = (ws.st, ws.end);
    let mut has_missing = false;
    {
        let (counts_buf, ix_arr, weights) = (&mut ws.counts_buf, &ws.ix_arr, &ws.weights);
        counts_buf[..ncat].fill(0.0);
        for &row in &ix_arr[st..end] {
            let v = input.cat_value(row, col);
            if v < 0 {
                has_missing = true;
            } else {
                let w = if weights.is_empty() { 1.0 } else { weights[row] };
                counts_buf[v as usize] += w;
            }
        }
    }
    if params.missing_action == MissingAction::Fail && has_missing {
        return None;
    }
    let counts = ws.counts_buf[..ncat].to_vec();
    let total: f64 = counts.iter().sum();
    let n_present = counts.iter().filter(|&&c| c > 0.0).count();
    if n_present < 2 || total <= 0.0 {
        return None;
    }

    match params.cat_split_type {
        CategSplit::SubSet => {
            let coefs: Vec<f64> = (0..ncat)
                .map(|_| draw_coef(&mut ws.rng, params.coef_type))
                .collect();
            let fill_val = counts
                .iter()
                .zip(&coefs)
                .map(|(&cnt, &cf)| cnt * cf)
                .sum::<f64>()
                / total;
            let fill_new = match params.new_cat_action {
                NewCategAction::Weighted => fill_val,
                NewCategAction::Smallest => {
                    let smallest = (0..ncat)
                        .filter(|&c| counts[c] > 0.0)
                        .min_by(|&a, &b| counts[a].partial_cmp(&counts[b]).unwrap())
                        .unwrap();
                    coefs[smallest]
                }
                NewCategAction::Random => draw_coef(&mut ws.rng, params.coef_type),
            };
            Some(ProjectionTerm::Categorical {
                col,
                coefs,
                fill_val,
                fill_new,
            })
        }
        CategSplit::SingleCateg => {
            let present: Vec<usize> = (0..ncat).filter(|&c| counts[c] > 0.0).collect();
            let category = present[ws.rng.random_range(0..present.len())] as i32;
            let coef = draw_coef(&mut ws.rng, params.coef_type);
            let fill_val = coef * counts[category as usize] / total;
            let fill_new = match params.new_cat_action {
                NewCategAction::Weighted => fill_val,
                NewCategAction::Smallest => {
                    let smallest = present
                        .iter()
                        .copied()
                        .min_by(|&a, &b| counts[a].partial_cmp(&counts[b]).unwrap())
                        .unwrap();
                    if smallest as i32 == category {
                        coef
                    } else {
                        0.0
                    }
                }
                NewCategAction::Random => {
                    if ws.rng.random_bool(0.5) {
                        coef
                    } else {
                        0.0
                    }
                }
            };
            Some(ProjectionTerm::SingleCateg {
                col,
                category,
                coef,
                fill_val,
                fill_new,
            })
        }
    }
}

fn apply_split(
    nodes: &mut Vec<HPlaneNode>,
    ws: &mut Workspace,
    cand: HPlaneCandidate,
) -> NodeOutcome {
    let (st, end) = (ws.st, ws.end);
    let HPlaneCandidate {
        terms,
        mut comb,
        split_point,
        zmin,
        zmax,
        ..
    } = cand;

    // co-partition the index range and its projections
    let mut mid = st;
    for i in st..end {
        if comb[i - st] <= split_point {
            ws.ix_arr.swap(i, mid);
            comb.swap(i - st, mid - st);
            mid += 1;
        }
    }
    debug_assert!(mid > st && mid < end);

    if !ws.tmat.is_empty() && end - st >= 2 {
        let (tmat, ix_arr, nrows) = (&mut ws.tmat, &ws.ix_arr, ws.nrows);
        increase_comb_counter(tmat, &ix_arr[st..end], nrows, 1.0, None);
    }

    let node_ix = nodes.len();
    nodes.push(HPlaneNode::Branch {
        terms,
        split_point,
        range_low: zmin,
        range_high: zmax,
        left: node_ix + 1,
        right: CHILD_UNSET,
    });
    ws.st_na = mid;
    ws.end_na = mid;
    NodeOutcome::Branch { node_ix }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::init_tree_workspace;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn build_once(x: &Array2<f64>, params: &ModelParams, seed: u64) -> Vec<HPlaneNode> {
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let sample_size = params.effective_sample_size(input.nrows);
        let max_depth = params.effective_max_depth(sample_size);
        let mut ws = Workspace::new(&input, params, seed, 0);
        init_tree_workspace(&mut ws, &input, params, sample_size);
        let mut nodes = Vec::new();
        build_hplane_tree(&mut nodes, &mut ws, &input, params, max_depth);
        nodes
    }

    fn ext_params() -> ModelParams {
        ModelParams {
            ndim: 2,
            missing_action: MissingAction::Impute,
            sample_size: 128,
            ..ModelParams::default()
        }
    }

    #[test]
    fn hplane_tree_structure_is_sound() {
        let x = Array2::random((300, 4), Uniform::new(0.0, 1.0));
        for seed in 0..5 {
            let nodes = build_once(&x, &ext_params(), seed);
            let mut seen = vec![false; nodes.len()];
            let mut stack = vec![0usize];
            while let Some(ix) = stack.pop() {
                assert!(!seen[ix]);
                seen[ix] = true;
                if let HPlaneNode::Branch {
                    terms,
                    left,
                    right,
                    range_low,
                    range_high,
                    split_point,
                    ..
                } = &nodes[ix]
                {
                    assert!(!terms.is_empty() && terms.len() <= 2);
                    assert!(range_low <= split_point && split_point <= range_high);
                    assert_ne!(*right, CHILD_UNSET);
                    stack.push(*left);
                    stack.push(*right);
                }
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn constant_columns_never_enter_a_plane() {
        let mut x = Array2::random((200, 3), Uniform::new(0.0, 1.0));
        for i in 0..200 {
            x[[i, 1]] = -4.0;
        }
        for seed in 0..5 {
            let nodes = build_once(&x, &ext_params(), seed);
            for node in &nodes {
                if let HPlaneNode::Branch { terms, .. } = node {
                    for term in terms {
                        if let ProjectionTerm::Numeric { col, .. } = term {
                            assert_ne!(*col, 1);
                        }
                    }
                }
            }
        }
    }
}
