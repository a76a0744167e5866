//! Single-variable tree builder. The recursion is driven by an explicit
//! stack of `RecursionState` snapshots rather than the call stack, so
//! degenerate inputs cannot overflow it: the left child reuses the live
//! workspace, the right child restores the snapshot taken at its parent.

use rand::Rng;

use crate::data::{get_range, get_range_sparse, ColumnRange, InputData};
use crate::forest::{Node, Split, CHILD_UNSET};
use crate::gain::{
    eval_guided_categ_single, eval_guided_categ_subset, eval_guided_numeric, random_categ_single,
    random_categ_subset, CategChoice,
};
use crate::math::{expected_avg_depth_w, expected_separation_depth_w};
use crate::params::{
    CategSplit, GainCriterion, MissingAction, ModelParams, NewCategAction, SplitStrategy,
};
use crate::partition::{divide_subset, Bands};
use crate::similarity::increase_comb_counter;
use crate::workspace::{RecursionState, Workspace};

struct PendingRight {
    node_ix: usize,
    depth: usize,
    pct_left: f64,
    saved: RecursionState,
}

enum NodeOutcome {
    Branch { node_ix: usize, pct_left: f64 },
    Leaf,
}

/// A chosen split, ready to partition with. `num_fill` / `cat_fill` carry
/// the node-local imputation values under the Impute policy.
struct Candidate {
    split: Split,
    num_fill: f64,
    cat_fill: i32,
}

/// Grow one tree over the rows already sampled into `ws.ix_arr`.
pub(crate) fn build_tree(
    nodes: &mut Vec<Node>,
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
    // only Divide lets the two children share rows
    let share_rows = params.missing_action == MissingAction::Divide;
    let mut stack: Vec<PendingRight> = Vec::new();
    let mut depth = 0usize;
    loop {
        match process_node(nodes, ws, input, params, max_depth, depth) {
            NodeOutcome::Branch { node_ix, pct_left } => {
                let saved = RecursionState::backup(ws, share_rows);
                stack.push(PendingRight {
                    node_ix,
                    depth,
                    pct_left,
                    saved,
                });
                if share_rows {
                    for pos in ws.st_na..ws.end_na {
                        let row = ws.ix_arr[pos];
                        ws.weights[row] *= pct_left;
                    }
                }
                // left child spans the left band plus the missing band
                ws.end = ws.end_na;
                depth += 1;
            }
            NodeOutcome::Leaf => match stack.pop() {
                None => break,
                Some(pending) => {
                    pending.saved.restore(ws);
                    let next_ix = nodes.len();
                    set_right(nodes, pending.node_ix, next_ix);
                    if share_rows {
                        for pos in ws.st_na..ws.end_na {
                            let row = ws.ix_arr[pos];
                            ws.weights[row] *= 1.0 - pending.pct_left;
                        }
                    }
                    // right child spans the missing band plus the right band
                    ws.st = ws.st_na;
                    depth = pending.depth + 1;
                }
            },
        }
    }
}

fn set_right(nodes: &mut [Node], ix: usize, child: usize) {
    if let Node::Branch { right, .. } = &mut nodes[ix] {
        debug_assert_eq!(*right, CHILD_UNSET);
        *right = child;
    }
}

fn process_node(
    nodes: &mut Vec<Node>,
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    max_depth: usize,
    depth: usize,
) -> NodeOutcome {
    let n = ws.end - ws.st;
    let sum_w = ws.sum_weight(ws.st, ws.end);
    if n <= 1 || depth >= max_depth || sum_w <= 0.0 {
        return close_leaf(nodes, ws, params, depth, sum_w);
    }

    let strategy = if params.any_guided() {
        let u = ws.rng.random::<f64>();
        params.draw_strategy(u)
    } else {
        SplitStrategy::Random
    };

    let candidate = match strategy {
        SplitStrategy::PickByGain(crit) => best_col_by_gain(ws, input, params, crit),
        SplitStrategy::SplitByGain(crit) => sample_col_candidate(ws, input, params, Some(crit)),
        SplitStrategy::Random => sample_col_candidate(ws, input, params, None),
    };

    match candidate {
        Some(cand) => apply_split(nodes, ws, input, params, depth, cand),
        None => close_leaf(nodes, ws, params, depth, sum_w),
    }
}

fn close_leaf(
    nodes: &mut Vec<Node>,
    ws: &mut Workspace,
    _params: &ModelParams,
    depth: usize,
    sum_w: f64,
) -> NodeOutcome {
    let score = depth as f64 + expected_avg_depth_w(sum_w);
    let remainder = expected_separation_depth_w(sum_w);
    nodes.push(Node::Leaf { score, remainder });

    let (st, end) = (ws.st, ws.end);
    if !ws.row_depths.is_empty() {
        let (row_depths, ix_arr) = (&mut ws.row_depths, &ws.ix_arr);
        for &row in &ix_arr[st..end] {
            let frac = if ws.weights.is_empty() {
                1.0
            } else if ws.base_weights[row] > 0.0 {
                ws.weights[row] / ws.base_weights[row]
            } else {
                0.0
            };
            row_depths[row] += frac * score;
        }
    }
    if !ws.tmat.is_empty() && end - st >= 2 && remainder > 0.0 {
        let (tmat, ix_arr, nrows) = (&mut ws.tmat, &ws.ix_arr, ws.nrows);
        let masses = if ws.weights.is_empty() {
            None
        } else {
            Some((ws.weights.as_slice(), ws.base_weights.as_slice()))
        };
        increase_comb_counter(tmat, &ix_arr[st..end], nrows, remainder, masses);
    }
    NodeOutcome::Leaf
}

/// Evaluate every still-possible column under the criterion and keep the
/// best column + split pair. Columns found unsplittable stay excluded for
/// the rest of this path.
fn best_col_by_gain(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    crit: GainCriterion,
) -> Option<Candidate> {
    let mut best: Option<(f64, Candidate)> = None;
    for col in 0..input.ncols_tot() {
        if !ws.cols_possible[col] {
            continue;
        }
        match eval_column(ws, input, params, col, Some(crit)) {
            ColumnEval::Unsplittable => ws.cols_possible[col] = false,
            ColumnEval::Split { gain, candidate } => {
                if best.as_ref().map_or(true, |(g, _)| gain > *g) {
                    best = Some((gain, candidate));
                }
            }
        }
    }
    best.map(|(_, c)| c)
}

/// Draw columns from the sampler until one yields a split; every column
/// proven unsplittable is excluded before redrawing. Returns None once the
/// sampler runs dry, which terminates the node.
fn sample_col_candidate(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    crit: Option<GainCriterion>,
) -> Option<Candidate> {
    loop {
        let col = {
            let (sampler, cols_possible) = (&ws.col_sampler, &ws.cols_possible);
            sampler.sample(cols_possible, &mut ws.rng)?
        };
        match eval_column(ws, input, params, col, crit) {
            ColumnEval::Unsplittable => ws.cols_possible[col] = false,
            ColumnEval::Split { candidate, .. } => return Some(candidate),
        }
    }
}

enum ColumnEval {
    Unsplittable,
    Split { gain: f64, candidate: Candidate },
}

fn eval_column(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    col: usize,
    crit: Option<GainCriterion>,
) -> ColumnEval {
    if col < input.ncols_numeric {
        eval_numeric_column(ws, input, params, col, crit)
    } else {
        eval_categ_column(ws, input, params, col - input.ncols_numeric, crit)
    }
}

fn eval_numeric_column(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    col: usize,
    crit: Option<GainCriterion>,
) -> ColumnEval {
    let (st, end) = (ws.st, ws.end);
    let range: ColumnRange = if let Some(xc) = input.numeric_csc {
        get_range_sparse(&ws.ix_arr[st..end], &xc, col, params.missing_action)
    } else {
        get_range(
            &ws.ix_arr[st..end],
            |row| input.num_value(row, col),
            params.missing_action,
        )
    };
    if range.unsplittable {
        return ColumnEval::Unsplittable;
    }

    let needs_values = crit.is_some() || params.missing_action == MissingAction::Impute;
    let mut mean = f64::NAN;
    if needs_values {
        let n_present = {
            let (values_buf, ix_arr) = (&mut ws.values_buf, &ws.ix_arr);
            values_buf.clear();
            for &row in &ix_arr[st..end] {
                let v = input.num_value(row, col);
                if !v.is_nan() {
                    values_buf.push(v);
                }
            }
            values_buf.len()
        };
        if n_present > 0 {
            mean = ws.values_buf.iter().sum::<f64>() / n_present as f64;
        }
    }

    let (gain, split_point) = match crit {
        Some(c) => match eval_guided_numeric(&mut ws.values_buf, c) {
            Some(s) => (s.gain, s.split_point),
            None => return ColumnEval::Unsplittable,
        },
        None => (0.0, ws.rng.random_range(range.xmin..range.xmax)),
    };

    ColumnEval::Split {
        gain,
        candidate: Candidate {
            split: Split::Numeric {
                col,
                split_point,
                range_low: range.xmin,
                range_high: range.xmax,
            },
            num_fill: mean,
            cat_fill: -1,
        },
    }
}

fn eval_categ_column(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    col: usize,
    crit: Option<GainCriterion>,
) -> ColumnEval {
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
        return ColumnEval::Unsplittable;
    }
    let counts = &ws.counts_buf[..ncat];
    let n_present_categs = counts.iter().filter(|&&c| c > 0.0).count();
    if n_present_categs < 2 {
        return ColumnEval::Unsplittable;
    }

    // mode, for routing missing rows under Impute
    let cat_fill = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(c, _)| c as i32)
        .unwrap_or(-1);

    let (gain, choice) = match (params.cat_split_type, crit) {
        (CategSplit::SubSet, None) => {
            let counts_owned = counts.to_vec();
            match random_categ_subset(&counts_owned, &mut ws.rng) {
                Some(left) => (0.0, CategChoice::Subset(left)),
                None => return ColumnEval::Unsplittable,
            }
        }
        (CategSplit::SubSet, Some(c)) => {
            match eval_guided_categ_subset(counts, c, params.all_perm) {
                Some(g) => (g.gain, g.choice),
                None => return ColumnEval::Unsplittable,
            }
        }
        (CategSplit::SingleCateg, None) => {
            let counts_owned = counts.to_vec();
            match random_categ_single(&counts_owned, &mut ws.rng) {
                Some(cat) => (0.0, CategChoice::Single(cat)),
                None => return ColumnEval::Unsplittable,
            }
        }
        (CategSplit::SingleCateg, Some(c)) => match eval_guided_categ_single(counts, c) {
            Some(g) => (g.gain, g.choice),
            None => return ColumnEval::Unsplittable,
        },
    };

    let split = match choice {
        CategChoice::Single(category) => Split::Single { col, category },
        CategChoice::Subset(assignment) => {
            // resolve categories absent from this node per the
            // new-category policy, frozen into the tree
            let counts = ws.counts_buf[..ncat].to_vec();
            let w_left: f64 = counts
                .iter()
                .enumerate()
                .filter(|(c, _)| assignment[*c])
                .map(|(_, &w)| w)
                .sum();
            let w_right: f64 = counts.iter().sum::<f64>() - w_left;
            let mut left_categs = vec![0i8; ncat];
            for c in 0..ncat {
                left_categs[c] = if counts[c] > 0.0 {
                    assignment[c] as i8
                } else {
                    match params.new_cat_action {
                        NewCategAction::Random => ws.rng.random_bool(0.5) as i8,
                        NewCategAction::Smallest => (w_left <= w_right) as i8,
                        NewCategAction::Weighted => -1,
                    }
                };
            }
            Split::Subset { col, left_categs }
        }
    };

    ColumnEval::Split {
        gain,
        candidate: Candidate {
            split,
            num_fill: f64::NAN,
            cat_fill,
        },
    }
}

fn apply_split(
    nodes: &mut Vec<Node>,
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    depth: usize,
    cand: Candidate,
) -> NodeOutcome {
    let (st, end) = (ws.st, ws.end);
    let impute = params.missing_action == MissingAction::Impute;

    let bands: Bands = match &cand.split {
        Split::Numeric {
            col, split_point, ..
        } => {
            let col = *col;
            let point = *split_point;
            let fill = cand.num_fill;
            divide_subset(
                &mut ws.ix_arr,
                st,
                end,
                |row| !impute && input.num_value(row, col).is_nan(),
                move |row| {
                    let v = input.num_value(row, col);
                    let v = if v.is_nan() { fill } else { v };
                    v <= point
                },
            )
        }
        Split::Subset { col, left_categs } => {
            let col = *col;
            let fill = cand.cat_fill;
            divide_subset(
                &mut ws.ix_arr,
                st,
                end,
                |row| !impute && input.cat_value(row, col) < 0,
                |row| {
                    let v = input.cat_value(row, col);
                    let v = if v < 0 { fill } else { v };
                    v >= 0 && left_categs[v as usize] == 1
                },
            )
        }
        Split::Single { col, category } => {
            let col = *col;
            let category = *category;
            let fill = cand.cat_fill;
            divide_subset(
                &mut ws.ix_arr,
                st,
                end,
                |row| !impute && input.cat_value(row, col) < 0,
                move |row| {
                    let v = input.cat_value(row, col);
                    let v = if v < 0 { fill } else { v };
                    v == category
                },
            )
        }
    };

    let w_left = ws.sum_weight(st, bands.st_na);
    let w_right = ws.sum_weight(bands.end_na, end);
    if w_left + w_right <= 0.0 {
        // every row carrying mass was missing on the split variable
        let sum_w = ws.sum_weight(st, end);
        return close_leaf(nodes, ws, params, depth, sum_w);
    }
    let pct_left = w_left / (w_left + w_right);

    if !ws.tmat.is_empty() && end - st >= 2 {
        let (tmat, ix_arr, nrows) = (&mut ws.tmat, &ws.ix_arr, ws.nrows);
        let masses = if ws.weights.is_empty() {
            None
        } else {
            Some((ws.weights.as_slice(), ws.base_weights.as_slice()))
        };
        increase_comb_counter(tmat, &ix_arr[st..end], nrows, 1.0, masses);
    }

    let node_ix = nodes.len();
    nodes.push(Node::Branch {
        split: cand.split,
        left: node_ix + 1,
        right: CHILD_UNSET,
        pct_left,
    });
    ws.st_na = bands.st_na;
    ws.end_na = bands.end_na;
    NodeOutcome::Branch { node_ix, pct_left }
}
