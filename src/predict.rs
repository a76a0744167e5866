//! Tree traversal and anomaly scoring over a trained forest. Rows with a
//! missing split variable under Divide (and unseen categories under the
//! Weighted policy) have their probability mass split across both
//! subtrees; leaf scores already carry the depth from the root, so a
//! traversal combines leaf scores by weight and adds any range penalties
//! collected along the way.

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::data::PredictionData;
use crate::errors::{ForestError, Result};
use crate::fit::with_pool;
use crate::forest::{
    standardized_score, ExtIsoForest, HPlaneNode, IsoForest, Model, Node, ProjectionTerm, Split,
};
use crate::params::{MissingAction, NewCategAction};

/// Where a row goes at a branch: one child, or both with the given share
/// of its mass sent left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Decision {
    Left,
    Right,
    Both(f64),
}

/// Additive depth penalty for a value outside the range observed at the
/// node during training: log2(1 + distance_outside / range_width),
/// monotone in the distance.
pub(crate) fn range_penalty(v: f64, lo: f64, hi: f64) -> f64 {
    let width = hi - lo;
    if v.is_nan() || !(width > 0.0) {
        0.0
    } else if v < lo {
        (1.0 + (lo - v) / width).log2()
    } else if v > hi {
        (1.0 + (v - hi) / width).log2()
    } else {
        0.0
    }
}

/// Routing decision plus range penalty for one single-variable branch.
pub(crate) fn decide_split(
    split: &Split,
    pct_left: f64,
    forest: &IsoForest,
    data: &PredictionData<'_>,
    row: usize,
) -> Result<(Decision, f64)> {
    match split {
        Split::Numeric {
            col,
            split_point,
            range_low,
            range_high,
        } => {
            let v = data.num_value(row, *col);
            if v.is_nan() {
                return Ok((missing_decision(forest.missing_action, pct_left)?, 0.0));
            }
            let penalty = if forest.penalize_range {
                range_penalty(v, *range_low, *range_high)
            } else {
                0.0
            };
            let decision = if v <= *split_point {
                Decision::Left
            } else {
                Decision::Right
            };
            Ok((decision, penalty))
        }
        Split::Subset { col, left_categs } => {
            let c = data.cat_value(row, *col);
            if c < 0 {
                return Ok((missing_decision(forest.missing_action, pct_left)?, 0.0));
            }
            let c = c as usize;
            if c >= left_categs.len() {
                return Ok((new_categ_decision(forest.new_cat_action, pct_left)?, 0.0));
            }
            let decision = match left_categs[c] {
                1 => Decision::Left,
                0 => Decision::Right,
                // category absent at this node during training
                _ => new_categ_decision(forest.new_cat_action, pct_left)?,
            };
            Ok((decision, 0.0))
        }
        Split::Single { col, category } => {
            let c = data.cat_value(row, *col);
            if c < 0 {
                return Ok((missing_decision(forest.missing_action, pct_left)?, 0.0));
            }
            if *col < forest.ncat.len() && c >= forest.ncat[*col] {
                return Ok((new_categ_decision(forest.new_cat_action, pct_left)?, 0.0));
            }
            let decision = if c == *category {
                Decision::Left
            } else {
                Decision::Right
            };
            Ok((decision, 0.0))
        }
    }
}

fn missing_decision(missing_action: MissingAction, pct_left: f64) -> Result<Decision> {
    match missing_action {
        MissingAction::Divide => Ok(Decision::Both(pct_left)),
        MissingAction::Impute => Ok(heavier_side(pct_left)),
        MissingAction::Fail => Err(ForestError::InputSchema(
            "missing value encountered under the Fail policy".into(),
        )),
    }
}

fn new_categ_decision(new_cat_action: NewCategAction, pct_left: f64) -> Result<Decision> {
    match new_cat_action {
        NewCategAction::Weighted => Ok(Decision::Both(pct_left)),
        NewCategAction::Smallest => Ok(smaller_side(pct_left)),
        NewCategAction::Random => Err(ForestError::InputSchema(
            "unseen category encountered under the Random policy".into(),
        )),
    }
}

fn heavier_side(pct_left: f64) -> Decision {
    if pct_left >= 0.5 {
        Decision::Left
    } else {
        Decision::Right
    }
}

fn smaller_side(pct_left: f64) -> Decision {
    if pct_left <= 0.5 {
        Decision::Left
    } else {
        Decision::Right
    }
}

/// Expected depth of one row in one single-variable tree.
pub(crate) fn traverse_tree(
    tree: &[Node],
    forest: &IsoForest,
    data: &PredictionData<'_>,
    row: usize,
    node_ix: usize,
) -> Result<f64> {
    match &tree[node_ix] {
        Node::Leaf { score, .. } => Ok(*score),
        Node::Branch {
            split,
            left,
            right,
            pct_left,
        } => {
            let (decision, penalty) = decide_split(split, *pct_left, forest, data, row)?;
            let depth = match decision {
                Decision::Left => traverse_tree(tree, forest, data, row, *left)?,
                Decision::Right => traverse_tree(tree, forest, data, row, *right)?,
                Decision::Both(p) => {
                    p * traverse_tree(tree, forest, data, row, *left)?
                        + (1.0 - p) * traverse_tree(tree, forest, data, row, *right)?
                }
            };
            Ok(depth + penalty)
        }
    }
}

/// Terminal node hit by one row when forced down a single path (mass-split
/// decisions follow the heavier side).
fn terminal_node_single(
    tree: &[Node],
    forest: &IsoForest,
    data: &PredictionData<'_>,
    row: usize,
) -> Result<usize> {
    let mut ix = 0usize;
    loop {
        match &tree[ix] {
            Node::Leaf { .. } => return Ok(ix),
            Node::Branch {
                split,
                left,
                right,
                pct_left,
            } => {
                let (decision, _) = decide_split(split, *pct_left, forest, data, row)?;
                ix = match decision {
                    Decision::Left => *left,
                    Decision::Right => *right,
                    Decision::Both(p) => {
                        if p >= 0.5 {
                            *left
                        } else {
                            *right
                        }
                    }
                };
            }
        }
    }
}

/// Scalar projection of one row onto a hyperplane, with missing and
/// unseen-category fills applied.
pub(crate) fn project_row(
    terms: &[ProjectionTerm],
    forest: &ExtIsoForest,
    data: &PredictionData<'_>,
    row: usize,
) -> Result<f64> {
    let mut acc = 0.0;
    for term in terms {
        acc += match term {
            ProjectionTerm::Numeric {
                col,
                coef,
                offset,
                fill_val,
            } => {
                let v = data.num_value(row, *col);
                let v = if v.is_nan() {
                    if forest.missing_action == MissingAction::Fail {
                        return Err(ForestError::InputSchema(
                            "missing value encountered under the Fail policy".into(),
                        ));
                    }
                    *fill_val
                } else {
                    v
                };
                coef * (v - offset)
            }
            ProjectionTerm::Categorical {
                col,
                coefs,
                fill_val,
                fill_new,
            } => {
                let c = data.cat_value(row, *col);
                if c < 0 {
                    if forest.missing_action == MissingAction::Fail {
                        return Err(ForestError::InputSchema(
                            "missing value encountered under the Fail policy".into(),
                        ));
                    }
                    *fill_val
                } else if (c as usize) < coefs.len() {
                    coefs[c as usize]
                } else if forest.new_cat_action == NewCategAction::Random {
                    return Err(ForestError::InputSchema(
                        "unseen category encountered under the Random policy".into(),
                    ));
                } else {
                    *fill_new
                }
            }
            ProjectionTerm::SingleCateg {
                col,
                category,
                coef,
                fill_val,
                fill_new,
            } => {
                let c = data.cat_value(row, *col);
                if c < 0 {
                    if forest.missing_action == MissingAction::Fail {
                        return Err(ForestError::InputSchema(
                            "missing value encountered under the Fail policy".into(),
                        ));
                    }
                    *fill_val
                } else if *col < forest.ncat.len() && c >= forest.ncat[*col] {
                    if forest.new_cat_action == NewCategAction::Random {
                        return Err(ForestError::InputSchema(
                            "unseen category encountered under the Random policy".into(),
                        ));
                    }
                    *fill_new
                } else if c == *category {
                    *coef
                } else {
                    0.0
                }
            }
        };
    }
    Ok(acc)
}

/// Depth of one row in one extended tree, plus the terminal node index.
pub(crate) fn traverse_hplane(
    tree: &[HPlaneNode],
    forest: &ExtIsoForest,
    data: &PredictionData<'_>,
    row: usize,
) -> Result<(f64, usize)> {
    let mut ix = 0usize;
    let mut penalties = 0.0;
    loop {
        match &tree[ix] {
            HPlaneNode::Leaf { score, .. } => return Ok((score + penalties, ix)),
            HPlaneNode::Branch {
                terms,
                split_point,
                range_low,
                range_high,
                left,
                right,
            } => {
                let z = project_row(terms, forest, data, row)?;
                if forest.penalize_range {
                    penalties += range_penalty(z, *range_low, *range_high);
                }
                ix = if z <= *split_point { *left } else { *right };
            }
        }
    }
}

/// Per-row outputs of `predict_iforest`.
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Standardized anomaly scores, or raw mean depths when
    /// `standardize = false`.
    pub depths: Array1<f64>,
    /// Leaf ordinal hit per (row, tree), when requested.
    pub tree_num: Option<Array2<usize>>,
}

/// Score prediction rows against a trained model.
pub fn predict_iforest(
    model: &Model,
    data: &PredictionData<'_>,
    standardize: bool,
    nthreads: usize,
    want_tree_num: bool,
) -> Result<Predictions> {
    validate_schema(model, data)?;
    let ntrees = model.ntrees();
    if ntrees == 0 {
        return Err(ForestError::InvalidArgument(
            "the model holds no trees".into(),
        ));
    }
    let leaf_maps = if want_tree_num {
        Some(leaf_ordinals(model))
    } else {
        None
    };

    let per_row = with_pool(nthreads, || {
        (0..data.nrows)
            .into_par_iter()
            .map(|row| -> Result<(f64, Vec<usize>)> {
                let mut depth_sum = 0.0;
                let mut leaves = Vec::new();
                match model {
                    Model::Single(forest) => {
                        for (t, tree) in forest.trees.iter().enumerate() {
                            depth_sum += traverse_tree(tree, forest, data, row, 0)?;
                            if let Some(maps) = &leaf_maps {
                                let term = terminal_node_single(tree, forest, data, row)?;
                                leaves.push(maps[t][term]);
                            }
                        }
                    }
                    Model::Extended(forest) => {
                        for (t, tree) in forest.hplanes.iter().enumerate() {
                            let (depth, term) = traverse_hplane(tree, forest, data, row)?;
                            depth_sum += depth;
                            if let Some(maps) = &leaf_maps {
                                leaves.push(maps[t][term]);
                            }
                        }
                    }
                }
                Ok((depth_sum / ntrees as f64, leaves))
            })
            .collect::<Result<Vec<_>>>()
    })??;

    let mut depths = Array1::zeros(data.nrows);
    let mut tree_num = if want_tree_num {
        Some(Array2::zeros((data.nrows, ntrees)))
    } else {
        None
    };
    for (row, (avg_depth, leaves)) in per_row.into_iter().enumerate() {
        depths[row] = if standardize {
            standardized_score(avg_depth, model.exp_avg_depth())
        } else {
            avg_depth
        };
        if let Some(tn) = tree_num.as_mut() {
            for (t, leaf) in leaves.into_iter().enumerate() {
                tn[[row, t]] = leaf;
            }
        }
    }
    Ok(Predictions { depths, tree_num })
}

/// Node index -> leaf ordinal, per tree, so terminal hits are reported as
/// dense leaf numbers.
fn leaf_ordinals(model: &Model) -> Vec<Vec<usize>> {
    match model {
        Model::Single(forest) => forest
            .trees
            .iter()
            .map(|tree| ordinals(tree.len(), |ix| tree[ix].is_leaf()))
            .collect(),
        Model::Extended(forest) => forest
            .hplanes
            .iter()
            .map(|tree| ordinals(tree.len(), |ix| tree[ix].is_leaf()))
            .collect(),
    }
}

fn ordinals(len: usize, is_leaf: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut out = vec![0usize; len];
    let mut next = 0usize;
    for (ix, slot) in out.iter_mut().enumerate() {
        if is_leaf(ix) {
            *slot = next;
            next += 1;
        }
    }
    out
}

/// Column-count checks against what the model's splits reference; value-
/// level checks (unseen categories under a policy that forbids them)
/// happen during traversal.
fn validate_schema(model: &Model, data: &PredictionData<'_>) -> Result<()> {
    let (need_num, need_cat) = required_columns(model);
    let have_num = data
        .numeric
        .map(|x| x.ncols())
        .or_else(|| data.numeric_csc.map(|x| x.ncols()))
        .unwrap_or(usize::MAX); // CSR width was validated at construction
    let have_cat = data.categ.map(|x| x.ncols()).unwrap_or(0);
    if need_num > 0 && have_num < need_num {
        return Err(ForestError::InputSchema(format!(
            "model references {} numeric columns, input has {}",
            need_num, have_num
        )));
    }
    if need_cat > have_cat {
        return Err(ForestError::InputSchema(format!(
            "model references {} categorical columns, input has {}",
            need_cat, have_cat
        )));
    }
    Ok(())
}

fn required_columns(model: &Model) -> (usize, usize) {
    let mut need_num = 0usize;
    let mut need_cat = 0usize;
    match model {
        Model::Single(forest) => {
            for tree in &forest.trees {
                for node in tree {
                    if let Node::Branch { split, .. } = node {
                        match split {
                            Split::Numeric { col, .. } => need_num = need_num.max(col + 1),
                            Split::Subset { col, .. } | Split::Single { col, .. } => {
                                need_cat = need_cat.max(col + 1)
                            }
                        }
                    }
                }
            }
        }
        Model::Extended(forest) => {
            for tree in &forest.hplanes {
                for node in tree {
                    if let HPlaneNode::Branch { terms, .. } = node {
                        for term in terms {
                            match term {
                                ProjectionTerm::Numeric { col, .. } => {
                                    need_num = need_num.max(col + 1)
                                }
                                ProjectionTerm::Categorical { col, .. }
                                | ProjectionTerm::SingleCateg { col, .. } => {
                                    need_cat = need_cat.max(col + 1)
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    (need_num, need_cat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn penalty_is_zero_inside_the_range() {
        assert_eq!(range_penalty(0.5, 0.0, 1.0), 0.0);
        assert_eq!(range_penalty(0.0, 0.0, 1.0), 0.0);
        assert_eq!(range_penalty(1.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn penalty_grows_with_distance_outside() {
        let p1 = range_penalty(1.5, 0.0, 1.0);
        let p2 = range_penalty(3.0, 0.0, 1.0);
        assert!(p1 > 0.0);
        assert!(p2 > p1);
        assert_relative_eq!(range_penalty(2.0, 0.0, 1.0), 1.0); // log2(1 + 1/1) = 1
    }

    #[test]
    fn leaf_ordinals_number_only_leaves() {
        let is_leaf = [false, true, false, true, true];
        let out = ordinals(5, |ix| is_leaf[ix]);
        assert_eq!(out[1], 0);
        assert_eq!(out[3], 1);
        assert_eq!(out[4], 2);
    }
}
