//! Trained model structures. Trees are append-only within a forest; node
//! fields are never mutated once a tree is finished, and the forest is
//! immutable during prediction and similarity computation.

use serde::{Deserialize, Serialize};

use crate::params::{CategSplit, MissingAction, NewCategAction};

/// Child index marking "not yet linked" while a tree is under
/// construction; never present in a finished tree.
pub(crate) const CHILD_UNSET: usize = usize::MAX;

/// The test applied at a single-variable branch. Exactly one of the three
/// shapes applies to any node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Split {
    /// `value <= split_point` goes left. `range_low`/`range_high` bound the
    /// training values that reached the node and feed range penalization.
    Numeric {
        col: usize,
        split_point: f64,
        range_low: f64,
        range_high: f64,
    },
    /// Per-category routing: 1 sends the category left, 0 right, -1 marks
    /// a category that was absent at the node during training and is
    /// resolved at prediction time by the new-category policy.
    Subset { col: usize, left_categs: Vec<i8> },
    /// Exactly `category` goes left.
    Single { col: usize, category: i32 },
}

impl Split {
    pub fn col(&self) -> usize {
        match self {
            Split::Numeric { col, .. } | Split::Subset { col, .. } | Split::Single { col, .. } => {
                *col
            }
        }
    }
}

/// One node of a single-variable tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Branch {
        split: Split,
        left: usize,
        right: usize,
        /// Fraction of the training weight that flowed left, excluding
        /// rows missing on the split variable.
        pct_left: f64,
    },
    Leaf {
        /// Depth contribution: the leaf's depth plus the expected path
        /// length c(n) still owed by the rows that were not isolated.
        score: f64,
        /// Expected separation depth still owed among the leaf's rows;
        /// consumed only by similarity computations.
        remainder: f64,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// One additive term of an extended-model hyperplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectionTerm {
    /// Contributes `coef * (x - offset)`; a missing value substitutes
    /// `fill_val` for x.
    Numeric {
        col: usize,
        coef: f64,
        offset: f64,
        fill_val: f64,
    },
    /// Contributes `coefs[x]`; `fill_val` substitutes for missing values
    /// and `fill_new` for categories unseen at training time.
    Categorical {
        col: usize,
        coefs: Vec<f64>,
        fill_val: f64,
        fill_new: f64,
    },
    /// Contributes `coef` when `x == category`, zero otherwise.
    SingleCateg {
        col: usize,
        category: i32,
        coef: f64,
        fill_val: f64,
        fill_new: f64,
    },
}

/// One node of an extended (hyperplane) tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HPlaneNode {
    Branch {
        terms: Vec<ProjectionTerm>,
        /// Threshold on the scalar projection; at or below goes left.
        split_point: f64,
        /// Bounds of the projection over the training rows at this node.
        range_low: f64,
        range_high: f64,
        left: usize,
        right: usize,
    },
    Leaf { score: f64, remainder: f64 },
}

impl HPlaneNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, HPlaneNode::Leaf { .. })
    }
}

/// A fitted single-variable isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoForest {
    pub trees: Vec<Vec<Node>>,
    pub new_cat_action: NewCategAction,
    pub cat_split_type: CategSplit,
    pub missing_action: MissingAction,
    /// Category counts per categorical column at training time; lets
    /// prediction tell an unseen category from a known one.
    pub ncat: Vec<i32>,
    /// c(sample_size): normalizer for standardized scores.
    pub exp_avg_depth: f64,
    /// Expected separation depth at the training sample size.
    pub exp_avg_sep: f64,
    pub orig_sample_size: usize,
    pub penalize_range: bool,
}

impl IsoForest {
    pub fn ntrees(&self) -> usize {
        self.trees.len()
    }
}

/// A fitted extended isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtIsoForest {
    pub hplanes: Vec<Vec<HPlaneNode>>,
    pub new_cat_action: NewCategAction,
    pub cat_split_type: CategSplit,
    pub missing_action: MissingAction,
    /// Category counts per categorical column at training time.
    pub ncat: Vec<i32>,
    pub exp_avg_depth: f64,
    pub exp_avg_sep: f64,
    pub orig_sample_size: usize,
    pub penalize_range: bool,
}

impl ExtIsoForest {
    pub fn ntrees(&self) -> usize {
        self.hplanes.len()
    }
}

/// Either model kind; the fitting entry point produces exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Model {
    Single(IsoForest),
    Extended(ExtIsoForest),
}

impl Model {
    pub fn ntrees(&self) -> usize {
        match self {
            Model::Single(m) => m.ntrees(),
            Model::Extended(m) => m.ntrees(),
        }
    }

    pub fn exp_avg_depth(&self) -> f64 {
        match self {
            Model::Single(m) => m.exp_avg_depth,
            Model::Extended(m) => m.exp_avg_depth,
        }
    }

    pub fn exp_avg_sep(&self) -> f64 {
        match self {
            Model::Single(m) => m.exp_avg_sep,
            Model::Extended(m) => m.exp_avg_sep,
        }
    }

    pub fn orig_sample_size(&self) -> usize {
        match self {
            Model::Single(m) => m.orig_sample_size,
            Model::Extended(m) => m.orig_sample_size,
        }
    }
}

/// Standardized anomaly score 2^(-depth / c(n)); higher is more anomalous.
pub fn standardized_score(avg_depth: f64, exp_avg_depth: f64) -> f64 {
    if exp_avg_depth <= 0.0 {
        return 1.0;
    }
    (2.0f64).powf(-avg_depth / exp_avg_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn score_is_half_at_expected_depth() {
        assert_relative_eq!(standardized_score(10.0, 10.0), 0.5);
    }

    #[test]
    fn score_bounds() {
        assert!(standardized_score(0.0, 8.0) <= 1.0);
        assert!(standardized_score(100.0, 8.0) > 0.0);
        assert!(standardized_score(100.0, 8.0) < standardized_score(1.0, 8.0));
    }

    #[test]
    fn split_reports_its_column() {
        let s = Split::Single { col: 3, category: 1 };
        assert_eq!(s.col(), 3);
    }
}
