//! Uniform read access over the supported input layouts: dense numeric,
//! dense categorical, and sparse numeric in compressed-column form (plus a
//! compressed-row variant used only at prediction time). All views borrow
//! caller-owned buffers and are never retained past the call.

use ndarray::ArrayView2;

use crate::errors::{ForestError, Result};
use crate::params::MissingAction;

/// Borrowed compressed-sparse-column numeric matrix. Absent entries read
/// as zero; stored NaN or infinite values count as missing.
#[derive(Debug, Clone, Copy)]
pub struct SparseColumns<'a> {
    pub values: &'a [f64],
    pub indices: &'a [usize],
    pub indptr: &'a [usize],
}

impl<'a> SparseColumns<'a> {
    pub fn ncols(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    fn check(&self, nrows: usize, ncols: usize) -> Result<()> {
        if self.indptr.len() != ncols + 1
            || self.indptr.first() != Some(&0)
            || self.indptr.windows(2).any(|w| w[0] > w[1])
            || *self.indptr.last().unwrap_or(&0) != self.indices.len()
            || self.indices.len() != self.values.len()
            || self.indices.iter().any(|&r| r >= nrows)
        {
            return Err(ForestError::InvalidArgument(
                "malformed compressed-column matrix".into(),
            ));
        }
        Ok(())
    }

    /// Value at (row, col); zero when the entry is absent.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        let lo = self.indptr[col];
        let hi = self.indptr[col + 1];
        match self.indices[lo..hi].binary_search(&row) {
            Ok(pos) => self.values[lo + pos],
            Err(_) => 0.0,
        }
    }

    /// Present (row, value) pairs of one column.
    pub fn column(&self, col: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        let lo = self.indptr[col];
        let hi = self.indptr[col + 1];
        let indices: &'a [usize] = &self.indices[lo..hi];
        let values: &'a [f64] = &self.values[lo..hi];
        indices.iter().copied().zip(values.iter().copied())
    }
}

/// Borrowed compressed-sparse-row numeric matrix, for cache-friendly row
/// scans at prediction time.
#[derive(Debug, Clone, Copy)]
pub struct SparseRows<'a> {
    pub values: &'a [f64],
    pub indices: &'a [usize],
    pub indptr: &'a [usize],
}

impl<'a> SparseRows<'a> {
    fn check(&self, nrows: usize, ncols: usize) -> Result<()> {
        if self.indptr.len() != nrows + 1
            || self.indptr.first() != Some(&0)
            || self.indptr.windows(2).any(|w| w[0] > w[1])
            || *self.indptr.last().unwrap_or(&0) != self.indices.len()
            || self.indices.len() != self.values.len()
            || self.indices.iter().any(|&c| c >= ncols)
        {
            return Err(ForestError::InvalidArgument(
                "malformed compressed-row matrix".into(),
            ));
        }
        Ok(())
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        let lo = self.indptr[row];
        let hi = self.indptr[row + 1];
        match self.indices[lo..hi].binary_search(&col) {
            Ok(pos) => self.values[lo + pos],
            Err(_) => 0.0,
        }
    }
}

/// Training inputs. Rows are observations; numeric and categorical columns
/// live in separate index spaces, with numeric columns ordered before
/// categorical ones in the combined space used for column sampling.
#[derive(Clone)]
pub struct InputData<'a> {
    pub numeric: Option<ArrayView2<'a, f64>>,
    pub numeric_csc: Option<SparseColumns<'a>>,
    pub categ: Option<ArrayView2<'a, i32>>,
    /// Category counts per categorical column.
    pub ncat: &'a [i32],
    pub nrows: usize,
    pub ncols_numeric: usize,
    pub ncols_categ: usize,
    pub sample_weights: Option<&'a [f64]>,
    pub col_weights: Option<&'a [f64]>,
}

impl<'a> InputData<'a> {
    /// Dense numeric and/or dense categorical inputs. NaN and infinities
    /// are missing in numeric columns; negative integers are missing in
    /// categorical ones.
    pub fn from_dense(
        numeric: Option<ArrayView2<'a, f64>>,
        categ: Option<ArrayView2<'a, i32>>,
        ncat: &'a [i32],
    ) -> Result<Self> {
        let (nrows_num, ncols_numeric) = numeric.map_or((0, 0), |x| (x.nrows(), x.ncols()));
        let (nrows_cat, ncols_categ) = categ.map_or((0, 0), |x| (x.nrows(), x.ncols()));
        if numeric.is_some() && categ.is_some() && nrows_num != nrows_cat {
            return Err(ForestError::InvalidArgument(
                "numeric and categorical inputs disagree on the row count".into(),
            ));
        }
        let input = InputData {
            numeric,
            numeric_csc: None,
            categ,
            ncat,
            nrows: nrows_num.max(nrows_cat),
            ncols_numeric,
            ncols_categ,
            sample_weights: None,
            col_weights: None,
        };
        input.check_categ()?;
        Ok(input)
    }

    /// Sparse numeric input in compressed-column form, optionally alongside
    /// dense categorical columns.
    pub fn from_sparse(
        numeric_csc: SparseColumns<'a>,
        nrows: usize,
        categ: Option<ArrayView2<'a, i32>>,
        ncat: &'a [i32],
    ) -> Result<Self> {
        let ncols_numeric = numeric_csc.ncols();
        numeric_csc.check(nrows, ncols_numeric)?;
        if let Some(c) = categ {
            if c.nrows() != nrows {
                return Err(ForestError::InvalidArgument(
                    "sparse numeric and categorical inputs disagree on the row count".into(),
                ));
            }
        }
        let input = InputData {
            numeric: None,
            numeric_csc: Some(numeric_csc),
            categ,
            ncat,
            nrows,
            ncols_numeric,
            ncols_categ: categ.map_or(0, |c| c.ncols()),
            sample_weights: None,
            col_weights: None,
        };
        input.check_categ()?;
        Ok(input)
    }

    pub fn with_sample_weights(mut self, weights: &'a [f64]) -> Result<Self> {
        if weights.len() != self.nrows {
            return Err(ForestError::InvalidArgument(
                "sample_weights length must equal nrows".into(),
            ));
        }
        self.sample_weights = Some(weights);
        Ok(self)
    }

    pub fn with_col_weights(mut self, weights: &'a [f64]) -> Result<Self> {
        if weights.len() != self.ncols_tot() {
            return Err(ForestError::InvalidArgument(
                "col_weights length must equal the total column count".into(),
            ));
        }
        self.col_weights = Some(weights);
        Ok(self)
    }

    pub fn ncols_tot(&self) -> usize {
        self.ncols_numeric + self.ncols_categ
    }

    /// Largest category count across categorical columns.
    pub(crate) fn max_categ(&self) -> usize {
        self.ncat.iter().copied().max().unwrap_or(0).max(0) as usize
    }

    fn check_categ(&self) -> Result<()> {
        if self.ncols_categ != self.ncat.len() {
            return Err(ForestError::InvalidArgument(
                "ncat length must equal the categorical column count".into(),
            ));
        }
        if let Some(categ) = self.categ {
            for (c, &k) in self.ncat.iter().enumerate() {
                if k < 2 {
                    return Err(ForestError::InvalidArgument(format!(
                        "categorical column {} declares fewer than 2 categories",
                        c
                    )));
                }
                if categ.column(c).iter().any(|&v| v >= k) {
                    return Err(ForestError::InvalidArgument(format!(
                        "categorical column {} holds a value outside [0, {})",
                        c, k
                    )));
                }
            }
        }
        Ok(())
    }

    /// Numeric value at (row, col), NaN when missing or absent.
    pub(crate) fn num_value(&self, row: usize, col: usize) -> f64 {
        if let Some(x) = self.numeric {
            let v = x[[row, col]];
            if v.is_finite() {
                v
            } else {
                f64::NAN
            }
        } else if let Some(xc) = self.numeric_csc {
            let v = xc.value(row, col);
            if v.is_finite() {
                v
            } else {
                f64::NAN
            }
        } else {
            f64::NAN
        }
    }

    /// Categorical value at (row, col), negative when missing.
    pub(crate) fn cat_value(&self, row: usize, col: usize) -> i32 {
        match self.categ {
            Some(x) => x[[row, col]],
            None => -1,
        }
    }
}

/// Outcome of scanning one numeric column over an active row subset.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRange {
    pub xmin: f64,
    pub xmax: f64,
    pub n_present: usize,
    pub unsplittable: bool,
    pub has_missing: bool,
}

/// Minimum and maximum of a numeric column over `ix_arr`, treating NaN and
/// infinities as absent. A column with fewer than two distinct present
/// values is unsplittable; under `Fail` the presence of a missing value
/// also makes it so.
pub fn get_range(
    ix_arr: &[usize],
    value_at: impl Fn(usize) -> f64,
    missing_action: MissingAction,
) -> ColumnRange {
    let mut xmin = f64::INFINITY;
    let mut xmax = f64::NEG_INFINITY;
    let mut n_present = 0usize;
    let mut has_missing = false;
    for &row in ix_arr {
        let v = value_at(row);
        if !v.is_finite() {
            has_missing = true;
        } else {
            xmin = xmin.min(v);
            xmax = xmax.max(v);
            n_present += 1;
        }
    }
    let unsplittable = n_present < 2
        || xmin >= xmax
        || (missing_action == MissingAction::Fail && has_missing);
    ColumnRange {
        xmin,
        xmax,
        n_present,
        unsplittable,
        has_missing,
    }
}

/// Range of a sparse numeric column over `ix_arr`. Absent entries read as
/// zero, so zero joins the range whenever any active row lacks an entry.
pub fn get_range_sparse(
    ix_arr: &[usize],
    xc: &SparseColumns<'_>,
    col: usize,
    missing_action: MissingAction,
) -> ColumnRange {
    let mut xmin = f64::INFINITY;
    let mut xmax = f64::NEG_INFINITY;
    let mut n_present = 0usize;
    let mut has_missing = false;
    let lo = xc.indptr[col];
    let hi = xc.indptr[col + 1];
    for &row in ix_arr {
        match xc.indices[lo..hi].binary_search(&row) {
            Ok(pos) => {
                let v = xc.values[lo + pos];
                if v.is_finite() {
                    xmin = xmin.min(v);
                    xmax = xmax.max(v);
                    n_present += 1;
                } else {
                    has_missing = true;
                }
            }
            Err(_) => {
                xmin = xmin.min(0.0);
                xmax = xmax.max(0.0);
                n_present += 1;
            }
        }
    }
    let unsplittable = n_present < 2
        || xmin >= xmax
        || (missing_action == MissingAction::Fail && has_missing);
    ColumnRange {
        xmin,
        xmax,
        n_present,
        unsplittable,
        has_missing,
    }
}

/// Outcome of scanning one categorical column over an active row subset.
#[derive(Debug)]
pub struct CategPresence {
    pub n_present_categs: usize,
    pub unsplittable: bool,
    pub has_missing: bool,
}

/// Fill `present[0..ncat]` with whether each category occurs in `ix_arr`.
/// Fewer than two present categories makes the column unsplittable.
pub fn get_categs(
    ix_arr: &[usize],
    value_at: impl Fn(usize) -> i32,
    ncat: usize,
    missing_action: MissingAction,
    present: &mut [bool],
) -> CategPresence {
    debug_assert!(present.len() >= ncat);
    present[..ncat].fill(false);
    let mut has_missing = false;
    for &row in ix_arr {
        let v = value_at(row);
        if v < 0 {
            has_missing = true;
        } else {
            present[v as usize] = true;
        }
    }
    let n_present_categs = present[..ncat].iter().filter(|&&p| p).count();
    let unsplittable =
        n_present_categs < 2 || (missing_action == MissingAction::Fail && has_missing);
    CategPresence {
        n_present_categs,
        unsplittable,
        has_missing,
    }
}

/// Prediction inputs; any numeric layout may be given, with the
/// compressed-row form preferred for row-major scans when present.
#[derive(Clone)]
pub struct PredictionData<'a> {
    pub numeric: Option<ArrayView2<'a, f64>>,
    pub numeric_csc: Option<SparseColumns<'a>>,
    pub numeric_csr: Option<SparseRows<'a>>,
    pub categ: Option<ArrayView2<'a, i32>>,
    pub nrows: usize,
}

impl<'a> PredictionData<'a> {
    pub fn from_dense(
        numeric: Option<ArrayView2<'a, f64>>,
        categ: Option<ArrayView2<'a, i32>>,
    ) -> Result<Self> {
        let (nrows_num, _) = numeric.map_or((0, 0), |x| (x.nrows(), x.ncols()));
        let (nrows_cat, _) = categ.map_or((0, 0), |x| (x.nrows(), x.ncols()));
        if numeric.is_some() && categ.is_some() && nrows_num != nrows_cat {
            return Err(ForestError::InvalidArgument(
                "numeric and categorical inputs disagree on the row count".into(),
            ));
        }
        Ok(PredictionData {
            numeric,
            numeric_csc: None,
            numeric_csr: None,
            categ,
            nrows: nrows_num.max(nrows_cat),
        })
    }

    pub fn from_csr(
        numeric_csr: SparseRows<'a>,
        nrows: usize,
        ncols_numeric: usize,
        categ: Option<ArrayView2<'a, i32>>,
    ) -> Result<Self> {
        numeric_csr.check(nrows, ncols_numeric)?;
        Ok(PredictionData {
            numeric: None,
            numeric_csc: None,
            numeric_csr: Some(numeric_csr),
            categ,
            nrows,
        })
    }

    pub fn from_csc(
        numeric_csc: SparseColumns<'a>,
        nrows: usize,
        categ: Option<ArrayView2<'a, i32>>,
    ) -> Result<Self> {
        numeric_csc.check(nrows, numeric_csc.ncols())?;
        Ok(PredictionData {
            numeric: None,
            numeric_csc: Some(numeric_csc),
            numeric_csr: None,
            categ,
            nrows,
        })
    }

    pub(crate) fn num_value(&self, row: usize, col: usize) -> f64 {
        let v = if let Some(x) = self.numeric {
            x[[row, col]]
        } else if let Some(xr) = self.numeric_csr {
            xr.value(row, col)
        } else if let Some(xc) = self.numeric_csc {
            xc.value(row, col)
        } else {
            f64::NAN
        };
        if v.is_finite() {
            v
        } else {
            f64::NAN
        }
    }

    pub(crate) fn cat_value(&self, row: usize, col: usize) -> i32 {
        match self.categ {
            Some(x) => x[[row, col]],
            None => -1,
        }
    }
}
