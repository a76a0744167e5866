use serde::{Deserialize, Serialize};

use crate::data::InputData;
use crate::errors::{ForestError, Result};

/// What to do when a category shows up at prediction time that was not
/// present at the node during training.
///
/// - For the single-variable model, `Smallest` also accepts categories that
///   were never in the training data at all (an integer at or above the
///   column's category count); `Random` does not, and such values are
///   reported as a schema error.
/// - For the extended model, `Weighted` becomes a weighted imputation
///   through the stored `fill_new` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewCategAction {
    Weighted,
    Smallest,
    Random,
}

/// How missing values are handled, both while growing trees and while
/// traversing them. `Divide` is only valid for the single-variable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingAction {
    Divide,
    Impute,
    Fail,
}

/// Shape of a categorical split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategSplit {
    /// An arbitrary subset of categories goes left, the complement right.
    SubSet,
    /// Exactly one category goes left, all others right.
    SingleCateg,
}

/// Criterion for guided splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainCriterion {
    Averaged,
    Pooled,
    NoCrit,
}

/// Distribution the extended model draws hyperplane coefficients from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoefType {
    Uniform,
    Normal,
}

/// Hyperparameters for fitting a forest.
///
/// `ndim == 1` selects the single-variable model (`IsoForest`); `ndim >= 2`
/// selects the extended model (`ExtIsoForest`) whose splits are linear
/// combinations of up to `ndim` columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Rows sampled per tree. Zero means "use all rows".
    pub sample_size: usize,
    pub ntrees: usize,
    pub with_replacement: bool,
    /// When row weights are given, whether they bias the row subsample
    /// (true) or ride along as observation masses (false).
    pub weight_as_sample: bool,
    /// Cap on tree depth. Zero with `limit_depth` set means the usual
    /// ceil(log2(sample_size)).
    pub max_depth: usize,
    pub limit_depth: bool,
    /// Penalize values that fall outside the range observed at a node
    /// during training (applied at prediction time).
    pub penalize_range: bool,
    /// Report 2^(-depth/c(n)) scores instead of raw average depths.
    pub standardize_depth: bool,
    /// Report distances (1 - similarity) instead of similarities.
    pub standardize_dist: bool,
    /// Normalize pairwise separation against the full sample size rather
    /// than the pair counts actually observed.
    pub assume_full_distr: bool,
    /// Accumulate in-sample depths while fitting.
    pub calc_depth: bool,
    /// Accumulate the pairwise similarity triangle while fitting.
    pub calc_dist: bool,
    /// Multiply column sampling weights by each column's kurtosis,
    /// computed once per tree over the tree's sample.
    pub weigh_by_kurt: bool,
    /// Probability of choosing both column and split point by averaged gain.
    pub prob_pick_by_gain_avg: f64,
    /// Probability of a random column with an averaged-gain split point.
    pub prob_split_by_gain_avg: f64,
    /// Probability of choosing both column and split point by pooled gain.
    pub prob_pick_by_gain_pl: f64,
    /// Probability of a random column with a pooled-gain split point.
    pub prob_split_by_gain_pl: f64,
    pub cat_split_type: CategSplit,
    pub new_cat_action: NewCategAction,
    pub missing_action: MissingAction,
    /// Enumerate every category partition when searching guided subset
    /// splits, instead of the greedy search. Only feasible for few
    /// categories.
    pub all_perm: bool,
    /// Columns combined per split in the extended model; 1 selects the
    /// single-variable model.
    pub ndim: usize,
    /// Hyperplane candidates evaluated per node in the extended model when
    /// a gain criterion is in effect.
    pub ntry: usize,
    pub coef_type: CoefType,
    pub random_seed: u64,
    /// Worker threads for fitting and prediction. Zero lets rayon decide.
    pub nthreads: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            sample_size: 256,
            ntrees: 100,
            with_replacement: false,
            weight_as_sample: true,
            max_depth: 0,
            limit_depth: true,
            penalize_range: false,
            standardize_depth: true,
            standardize_dist: true,
            assume_full_distr: true,
            calc_depth: false,
            calc_dist: false,
            weigh_by_kurt: false,
            prob_pick_by_gain_avg: 0.0,
            prob_split_by_gain_avg: 0.0,
            prob_pick_by_gain_pl: 0.0,
            prob_split_by_gain_pl: 0.0,
            cat_split_type: CategSplit::SubSet,
            new_cat_action: NewCategAction::Weighted,
            missing_action: MissingAction::Divide,
            all_perm: false,
            ndim: 1,
            ntry: 3,
            coef_type: CoefType::Normal,
            random_seed: 1,
            nthreads: 0,
        }
    }
}

impl ModelParams {
    /// Sample size actually used for `nrows` rows. Draws with replacement
    /// may exceed the row count; without replacement validation has
    /// already rejected that case.
    pub fn effective_sample_size(&self, nrows: usize) -> usize {
        if self.sample_size == 0 {
            nrows
        } else if self.with_replacement {
            self.sample_size
        } else {
            self.sample_size.min(nrows)
        }
    }

    /// Depth cap actually used for a sample of `sample_size` rows, or
    /// `usize::MAX` when depth is unlimited.
    pub fn effective_max_depth(&self, sample_size: usize) -> usize {
        if !self.limit_depth {
            usize::MAX
        } else if self.max_depth > 0 {
            self.max_depth
        } else {
            (sample_size.max(2) as f64).log2().ceil() as usize
        }
    }

    /// Check this parameter set against the data it will be fit on.
    /// Runs before any allocation.
    pub fn validate(&self, input: &InputData) -> Result<()> {
        if self.ntrees == 0 {
            return Err(ForestError::InvalidArgument(
                "ntrees must be at least 1".into(),
            ));
        }
        if input.nrows == 0 || input.ncols_tot() == 0 {
            return Err(ForestError::InvalidArgument(
                "cannot fit to an empty dataset".into(),
            ));
        }
        if self.sample_size > input.nrows && !self.with_replacement {
            return Err(ForestError::InvalidArgument(format!(
                "sample_size ({}) exceeds nrows ({}) without replacement",
                self.sample_size, input.nrows
            )));
        }
        let probs = [
            self.prob_pick_by_gain_avg,
            self.prob_pick_by_gain_pl,
            self.prob_split_by_gain_avg,
            self.prob_split_by_gain_pl,
        ];
        if probs.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(ForestError::InvalidArgument(
                "split-strategy probabilities must lie in [0, 1]".into(),
            ));
        }
        if probs.iter().sum::<f64>() > 1.0 + 1e-12 {
            return Err(ForestError::InvalidArgument(
                "split-strategy probabilities must sum to at most 1".into(),
            ));
        }
        if self.ndim == 0 {
            return Err(ForestError::InvalidArgument(
                "ndim must be at least 1".into(),
            ));
        }
        if self.ndim > input.ncols_tot() {
            return Err(ForestError::InvalidArgument(format!(
                "ndim ({}) exceeds the total column count ({})",
                self.ndim,
                input.ncols_tot()
            )));
        }
        if self.ndim > 1 && self.missing_action == MissingAction::Divide {
            return Err(ForestError::InvalidArgument(
                "missing_action = Divide is only valid for the single-variable model".into(),
            ));
        }
        if self.ndim > 1 && self.ntry == 0 {
            return Err(ForestError::InvalidArgument(
                "ntry must be at least 1 for the extended model".into(),
            ));
        }
        if let Some(w) = input.sample_weights {
            if w.iter().any(|&v| !v.is_finite() || v < 0.0) {
                return Err(ForestError::InvalidArgument(
                    "sample weights must be finite and non-negative".into(),
                ));
            }
        }
        if let Some(w) = input.col_weights {
            if w.iter().any(|&v| !v.is_finite() || v < 0.0) {
                return Err(ForestError::InvalidArgument(
                    "column weights must be finite and non-negative".into(),
                ));
            }
        }
        Ok(())
    }

    /// Draw a split strategy for one node. The four probabilities are
    /// checked in order against a single uniform draw; the residual mass is
    /// the fully random strategy.
    pub(crate) fn draw_strategy(&self, u: f64) -> SplitStrategy {
        let mut cum = self.prob_pick_by_gain_avg;
        if u < cum {
            return SplitStrategy::PickByGain(GainCriterion::Averaged);
        }
        cum += self.prob_pick_by_gain_pl;
        if u < cum {
            return SplitStrategy::PickByGain(GainCriterion::Pooled);
        }
        cum += self.prob_split_by_gain_avg;
        if u < cum {
            return SplitStrategy::SplitByGain(GainCriterion::Averaged);
        }
        cum += self.prob_split_by_gain_pl;
        if u < cum {
            return SplitStrategy::SplitByGain(GainCriterion::Pooled);
        }
        SplitStrategy::Random
    }

    /// Whether any guided strategy can ever trigger.
    pub(crate) fn any_guided(&self) -> bool {
        self.prob_pick_by_gain_avg > 0.0
            || self.prob_pick_by_gain_pl > 0.0
            || self.prob_split_by_gain_avg > 0.0
            || self.prob_split_by_gain_pl > 0.0
    }
}

/// Strategy chosen for one node, first-hit over the listed probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitStrategy {
    /// Evaluate every available column and keep the best column + split.
    PickByGain(GainCriterion),
    /// Random column, guided split point.
    SplitByGain(GainCriterion),
    /// Random column, random split point.
    Random,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order_is_first_hit() {
        let params = ModelParams {
            prob_pick_by_gain_avg: 0.2,
            prob_pick_by_gain_pl: 0.2,
            prob_split_by_gain_avg: 0.2,
            prob_split_by_gain_pl: 0.2,
            ..ModelParams::default()
        };
        assert_eq!(
            params.draw_strategy(0.1),
            SplitStrategy::PickByGain(GainCriterion::Averaged)
        );
        assert_eq!(
            params.draw_strategy(0.3),
            SplitStrategy::PickByGain(GainCriterion::Pooled)
        );
        assert_eq!(
            params.draw_strategy(0.5),
            SplitStrategy::SplitByGain(GainCriterion::Averaged)
        );
        assert_eq!(
            params.draw_strategy(0.7),
            SplitStrategy::SplitByGain(GainCriterion::Pooled)
        );
        assert_eq!(params.draw_strategy(0.9), SplitStrategy::Random);
    }

    #[test]
    fn default_depth_cap_tracks_sample_size() {
        let params = ModelParams::default();
        assert_eq!(params.effective_max_depth(256), 8);
        assert_eq!(params.effective_max_depth(1000), 10);
    }
}
