//! Per-worker mutable scratch. One `Workspace` lives for the duration of
//! one tree (buffers are resized in place across nodes, never reallocated
//! per split); `RecursionState` snapshots are scoped to a single descent
//! into a right subtree.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::InputData;
use crate::params::ModelParams;
use crate::sampler::ColumnSampler;

pub(crate) struct Workspace {
    pub rng: StdRng,
    /// Total rows in the training data (not just the sample); fixes the
    /// pair-triangle indexing for on-the-fly similarity.
    pub nrows: usize,
    /// Active row indices; `[st, end)` is the current node's range, with
    /// the missing band at `[st_na, end_na)` (see the partition module).
    pub ix_arr: Vec<usize>,
    pub st: usize,
    pub end: usize,
    pub st_na: usize,
    pub end_na: usize,
    /// Observation mass per row, indexed by row id. Empty when every
    /// sampled row counts exactly once.
    pub weights: Vec<f64>,
    /// Mass each row entered the tree with; fixes the denominator for
    /// fractional accumulation under the Divide missing policy.
    pub base_weights: Vec<f64>,
    /// Columns not yet proven unsplittable on this path (combined column
    /// space: numeric then categorical).
    pub cols_possible: Vec<bool>,
    pub col_sampler: ColumnSampler,
    /// Weighted category counts scratch, sized to the widest categorical
    /// column.
    pub counts_buf: Vec<f64>,
    /// Gathered numeric values scratch.
    pub values_buf: Vec<f64>,
    /// Projection values per active position (extended model), parallel to
    /// `ix_arr[st..end]`.
    pub comb_val: Vec<f64>,
    /// On-the-fly in-sample depth accumulator (length nrows) when enabled.
    pub row_depths: Vec<f64>,
    /// How many times each row entered this tree's sample; the reduction
    /// divides by the total so never-sampled rows are distinguishable.
    pub row_hits: Vec<f64>,
    /// On-the-fly pairwise separation accumulator (upper triangle) when
    /// enabled.
    pub tmat: Vec<f64>,
}

impl Workspace {
    pub fn new(
        input: &InputData<'_>,
        params: &ModelParams,
        seed: u64,
        tmat_len: usize,
    ) -> Self {
        let max_categ = input.max_categ();
        Workspace {
            rng: StdRng::seed_from_u64(seed),
            nrows: input.nrows,
            ix_arr: Vec::new(),
            st: 0,
            end: 0,
            st_na: 0,
            end_na: 0,
            weights: Vec::new(),
            base_weights: Vec::new(),
            cols_possible: vec![true; input.ncols_tot()],
            col_sampler: ColumnSampler::uniform(input.ncols_tot()),
            counts_buf: vec![0.0; max_categ],
            values_buf: Vec::new(),
            comb_val: Vec::new(),
            row_depths: if params.calc_depth {
                vec![0.0; input.nrows]
            } else {
                Vec::new()
            },
            row_hits: Vec::new(),
            tmat: vec![0.0; tmat_len],
        }
    }

    pub fn is_weighted(&self) -> bool {
        !self.weights.is_empty()
    }

    /// Total mass over `ix_arr[lo..hi]`.
    pub fn sum_weight(&self, lo: usize, hi: usize) -> f64 {
        if self.weights.is_empty() {
            (hi - lo) as f64
        } else {
            self.ix_arr[lo..hi].iter().map(|&r| self.weights[r]).sum()
        }
    }
}

/// Snapshot of the traversal-relevant workspace taken before descending
/// into the left child; restoring it re-creates the node exactly as it was
/// so the right child can be processed. Auxiliary heap usage is bounded by
/// O(tree height x snapshot size).
pub(crate) struct RecursionState {
    pub st: usize,
    pub end: usize,
    pub st_na: usize,
    pub end_na: usize,
    ix_saved: Vec<usize>,
    weights_saved: Vec<f64>,
    cols_possible_saved: Vec<bool>,
}

impl RecursionState {
    /// `save_rows` copies the index range and the row masses; it is only
    /// needed when the two children can share rows (the Divide missing
    /// policy), since disjoint children never disturb each other's range.
    pub fn backup(ws: &Workspace, save_rows: bool) -> Self {
        let ix_saved = if save_rows {
            ws.ix_arr[ws.st..ws.end].to_vec()
        } else {
            Vec::new()
        };
        let weights_saved = if save_rows && ws.is_weighted() {
            ix_saved.iter().map(|&r| ws.weights[r]).collect()
        } else {
            Vec::new()
        };
        RecursionState {
            st: ws.st,
            end: ws.end,
            st_na: ws.st_na,
            end_na: ws.end_na,
            ix_saved,
            weights_saved,
            cols_possible_saved: ws.cols_possible.clone(),
        }
    }

    pub fn restore(self, ws: &mut Workspace) {
        ws.st = self.st;
        ws.end = self.end;
        ws.st_na = self.st_na;
        ws.end_na = self.end_na;
        if !self.ix_saved.is_empty() {
            ws.ix_arr[self.st..self.end].copy_from_slice(&self.ix_saved);
            for (&row, &w) in self.ix_saved.iter().zip(&self.weights_saved) {
                ws.weights[row] = w;
            }
        }
        ws.cols_possible.copy_from_slice(&self.cols_possible_saved);
    }
}
