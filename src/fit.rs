//! Ensemble driver: fork-join construction of `ntrees` trees, each with
//! its own seeded generator and isolated workspace, plus the reduction of
//! per-worker depth and similarity accumulators into the caller-facing
//! outputs. Tree t is seeded `random_seed + t`, so structures are
//! bit-identical for a fixed seed regardless of thread count; only the
//! floating-point reduction order varies with it.

use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array1;
use rayon::prelude::*;

use crate::build::build_tree;
use crate::data::InputData;
use crate::errors::{ForestError, Result};
use crate::ext::build_hplane_tree;
use crate::forest::{
    standardized_score, ExtIsoForest, HPlaneNode, IsoForest, Model, Node,
};
use crate::gain::{categ_kurtosis, numeric_kurtosis};
use crate::math::{expected_avg_depth, expected_separation_depth};
use crate::params::{MissingAction, ModelParams};
use crate::sampler::{sample_random_rows, ColumnSampler};
use crate::similarity::finalize_tmat;
use crate::workspace::Workspace;

/// Run `f` on the global rayon pool, or on a dedicated pool of `nthreads`
/// workers when a thread count is pinned.
pub(crate) fn with_pool<R: Send>(nthreads: usize, f: impl FnOnce() -> R + Send) -> Result<R> {
    if nthreads == 0 {
        Ok(f())
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build()
            .map_err(|e| ForestError::InvalidArgument(format!("thread pool: {}", e)))?;
        Ok(pool.install(f))
    }
}

/// Everything `fit_iforest` produces.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub model: Model,
    /// In-sample depths (standardized scores when `standardize_depth`),
    /// when requested. Rows never sampled into any tree hold NaN.
    pub row_depths: Option<Array1<f64>>,
    /// Upper-triangular similarity (or distance) accumulator, when
    /// requested.
    pub tmat: Option<Vec<f64>>,
    /// Trees actually built; less than `ntrees` only after an
    /// interruption.
    pub trees_built: usize,
}

enum TreeNodes {
    Single(Vec<Node>),
    Ext(Vec<HPlaneNode>),
}

struct TreeOut {
    nodes: TreeNodes,
    row_depths: Vec<f64>,
    row_hits: Vec<f64>,
    tmat: Vec<f64>,
}

/// Fit a forest. `ndim == 1` in the parameters produces the
/// single-variable model, anything larger the extended model. An optional
/// stop flag is checked before each tree; once raised, no further trees
/// start and the already-built ones form a consistent (if smaller) forest.
pub fn fit_iforest(
    input: &InputData<'_>,
    params: &ModelParams,
    stop: Option<&AtomicBool>,
) -> Result<FitOutput> {
    params.validate(input)?;
    let sample_size = params.effective_sample_size(input.nrows);
    let max_depth = params.effective_max_depth(sample_size);
    let exp_avg_depth = expected_avg_depth(sample_size);
    let exp_avg_sep = expected_separation_depth(sample_size);

    let tmat_len = if params.calc_dist {
        input.nrows * (input.nrows - 1) / 2
    } else {
        0
    };
    let mut tmat_acc: Vec<f64> = Vec::new();
    if params.calc_dist {
        tmat_acc.try_reserve_exact(tmat_len)?;
        tmat_acc.resize(tmat_len, 0.0);
    }

    let build_one = |t: usize| -> Option<TreeOut> {
        if stop.map_or(false, |s| s.load(Ordering::Relaxed)) {
            return None;
        }
        let seed = params.random_seed.wrapping_add(t as u64);
        let mut ws = Workspace::new(input, params, seed, tmat_len);
        init_tree_workspace(&mut ws, input, params, sample_size);
        let nodes = if params.ndim == 1 {
            let mut nodes = Vec::new();
            build_tree(&mut nodes, &mut ws, input, params, max_depth);
            TreeNodes::Single(nodes)
        } else {
            let mut nodes = Vec::new();
            build_hplane_tree(&mut nodes, &mut ws, input, params, max_depth);
            TreeNodes::Ext(nodes)
        };
        Some(TreeOut {
            nodes,
            row_depths: ws.row_depths,
            row_hits: ws.row_hits,
            tmat: ws.tmat,
        })
    };

    let outs: Vec<Option<TreeOut>> = with_pool(params.nthreads, || {
        (0..params.ntrees).into_par_iter().map(build_one).collect()
    })?;

    let mut single_trees: Vec<Vec<Node>> = Vec::new();
    let mut ext_trees: Vec<Vec<HPlaneNode>> = Vec::new();
    let mut depth_acc = vec![0.0f64; if params.calc_depth { input.nrows } else { 0 }];
    let mut hits_acc = vec![0.0f64; depth_acc.len()];
    let mut trees_built = 0usize;

    for out in outs.into_iter().flatten() {
        trees_built += 1;
        match out.nodes {
            TreeNodes::Single(nodes) => single_trees.push(nodes),
            TreeNodes::Ext(nodes) => ext_trees.push(nodes),
        }
        for (a, b) in depth_acc.iter_mut().zip(&out.row_depths) {
            *a += b;
        }
        for (a, b) in hits_acc.iter_mut().zip(&out.row_hits) {
            *a += b;
        }
        for (a, b) in tmat_acc.iter_mut().zip(&out.tmat) {
            *a += b;
        }
    }
    if trees_built == 0 {
        return Err(ForestError::Interrupted);
    }

    let row_depths = if params.calc_depth {
        let mut depths = Array1::zeros(input.nrows);
        for row in 0..input.nrows {
            let avg = if hits_acc[row] > 0.0 {
                depth_acc[row] / hits_acc[row]
            } else {
                f64::NAN
            };
            depths[row] = if params.standardize_depth {
                standardized_score(avg, exp_avg_depth)
            } else {
                avg
            };
        }
        Some(depths)
    } else {
        None
    };

    let tmat = if params.calc_dist {
        let exp_sep = if params.assume_full_distr {
            exp_avg_sep
        } else {
            expected_separation_depth(input.nrows)
        };
        finalize_tmat(&mut tmat_acc, trees_built, exp_sep, params.standardize_dist);
        Some(tmat_acc)
    } else {
        None
    };

    let model = if params.ndim == 1 {
        Model::Single(IsoForest {
            trees: single_trees,
            new_cat_action: params.new_cat_action,
            cat_split_type: params.cat_split_type,
            missing_action: params.missing_action,
            ncat: input.ncat.to_vec(),
            exp_avg_depth,
            exp_avg_sep,
            orig_sample_size: sample_size,
            penalize_range: params.penalize_range,
        })
    } else {
        Model::Extended(ExtIsoForest {
            hplanes: ext_trees,
            new_cat_action: params.new_cat_action,
            cat_split_type: params.cat_split_type,
            missing_action: params.missing_action,
            ncat: input.ncat.to_vec(),
            exp_avg_depth,
            exp_avg_sep,
            orig_sample_size: sample_size,
            penalize_range: params.penalize_range,
        })
    };

    Ok(FitOutput {
        model,
        row_depths,
        tmat,
        trees_built,
    })
}

/// Append one tree to an existing forest, drawing a fresh sample under the
/// same parameters. The new tree's seed continues the sequence, so growing
/// a forest tree by tree reproduces a forest grown in one call.
pub fn add_tree(model: &mut Model, input: &InputData<'_>, params: &ModelParams) -> Result<()> {
    params.validate(input)?;
    match (&model, params.ndim) {
        (Model::Single(_), 1) => {}
        (Model::Extended(_), d) if d > 1 => {}
        _ => {
            return Err(ForestError::InvalidArgument(
                "model kind does not match ndim in the parameters".into(),
            ))
        }
    }
    let sample_size = params.effective_sample_size(input.nrows);
    let max_depth = params.effective_max_depth(sample_size);
    let t = model.ntrees();
    let seed = params.random_seed.wrapping_add(t as u64);
    let mut ws = Workspace::new(input, params, seed, 0);
    init_tree_workspace(&mut ws, input, params, sample_size);
    match model {
        Model::Single(forest) => {
            let mut nodes = Vec::new();
            build_tree(&mut nodes, &mut ws, input, params, max_depth);
            forest.trees.push(nodes);
        }
        Model::Extended(forest) => {
            let mut nodes = Vec::new();
            build_hplane_tree(&mut nodes, &mut ws, input, params, max_depth);
            forest.hplanes.push(nodes);
        }
    }
    Ok(())
}

/// Sample this tree's rows, set up masses, and build the column sampler
/// (kurtosis computed here, once per tree over the tree's sample).
pub(crate) fn init_tree_workspace(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
    sample_size: usize,
) {
    let sampling_weights = if params.weight_as_sample {
        input.sample_weights
    } else {
        None
    };
    {
        let (ix_arr, rng) = (&mut ws.ix_arr, &mut ws.rng);
        sample_random_rows(
            ix_arr,
            input.nrows,
            sample_size,
            params.with_replacement,
            sampling_weights,
            rng,
        );
    }

    // density weights ride along as observation masses; with-replacement
    // draws collapse into multiplicities; Divide needs masses to split
    let density = if params.weight_as_sample {
        None
    } else {
        input.sample_weights
    };
    let needs_weights = params.with_replacement
        || density.is_some()
        || params.missing_action == MissingAction::Divide;
    ws.weights.clear();
    ws.base_weights.clear();
    if needs_weights {
        ws.weights.resize(input.nrows, 0.0);
        if params.with_replacement {
            for &row in &ws.ix_arr {
                ws.weights[row] += density.map_or(1.0, |d| d[row]);
            }
            ws.ix_arr.sort_unstable();
            ws.ix_arr.dedup();
        } else {
            for &row in &ws.ix_arr {
                ws.weights[row] = density.map_or(1.0, |d| d[row]);
            }
        }
        ws.base_weights.extend_from_slice(&ws.weights);
    }

    if !ws.row_depths.is_empty() {
        ws.row_hits.resize(input.nrows, 0.0);
        for &row in &ws.ix_arr {
            ws.row_hits[row] += 1.0;
        }
    }

    ws.cols_possible.fill(true);
    ws.col_sampler = make_col_sampler(ws, input, params);
}

fn make_col_sampler(
    ws: &mut Workspace,
    input: &InputData<'_>,
    params: &ModelParams,
) -> ColumnSampler {
    let ncols = input.ncols_tot();
    if !params.weigh_by_kurt && input.col_weights.is_none() {
        return ColumnSampler::uniform(ncols);
    }
    let mut weights: Vec<f64> = match input.col_weights {
        Some(cw) => cw.to_vec(),
        None => vec![1.0; ncols],
    };
    if params.weigh_by_kurt {
        for col in 0..ncols {
            let kurt = if col < input.ncols_numeric {
                let values: Vec<f64> = ws
                    .ix_arr
                    .iter()
                    .map(|&row| input.num_value(row, col))
                    .filter(|v| !v.is_nan())
                    .collect();
                numeric_kurtosis(&values)
            } else {
                let categ_col = col - input.ncols_numeric;
                let ncat = input.ncat[categ_col].max(0) as usize;
                let mut counts = vec![0.0; ncat];
                for &row in &ws.ix_arr {
                    let v = input.cat_value(row, categ_col);
                    if v >= 0 {
                        counts[v as usize] += 1.0;
                    }
                }
                categ_kurtosis(&counts, &mut ws.rng)
            };
            weights[col] *= kurt;
        }
    }
    ColumnSampler::weighted(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    #[test]
    fn fit_produces_requested_tree_count() {
        let x = Array2::random((120, 3), Uniform::new(0.0, 1.0));
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let params = ModelParams {
            ntrees: 17,
            sample_size: 64,
            ..ModelParams::default()
        };
        let out = fit_iforest(&input, &params, None).unwrap();
        assert_eq!(out.trees_built, 17);
        assert_eq!(out.model.ntrees(), 17);
    }

    #[test]
    fn stop_flag_raised_up_front_interrupts() {
        let x = Array2::random((50, 2), Uniform::new(0.0, 1.0));
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let params = ModelParams {
            ntrees: 10,
            sample_size: 32,
            ..ModelParams::default()
        };
        let stop = AtomicBool::new(true);
        match fit_iforest(&input, &params, Some(&stop)) {
            Err(ForestError::Interrupted) => {}
            other => panic!("expected Interrupted, got {:?}", other.map(|o| o.trees_built)),
        }
    }

    #[test]
    fn add_tree_extends_the_forest() {
        let x = Array2::random((80, 2), Uniform::new(0.0, 1.0));
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let params = ModelParams {
            ntrees: 5,
            sample_size: 40,
            ..ModelParams::default()
        };
        let mut out = fit_iforest(&input, &params, None).unwrap();
        add_tree(&mut out.model, &input, &params).unwrap();
        assert_eq!(out.model.ntrees(), 6);
    }

    #[test]
    fn add_tree_rejects_kind_mismatch() {
        let x = Array2::random((60, 3), Uniform::new(0.0, 1.0));
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let params = ModelParams {
            ntrees: 3,
            sample_size: 32,
            ..ModelParams::default()
        };
        let mut out = fit_iforest(&input, &params, None).unwrap();
        let ext_params = ModelParams {
            ndim: 2,
            missing_action: MissingAction::Impute,
            ..params
        };
        assert!(matches!(
            add_tree(&mut out.model, &input, &ext_params),
            Err(ForestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn in_sample_depths_cover_all_rows_at_full_sample() {
        let x = Array2::random((64, 2), Uniform::new(0.0, 1.0));
        let input = InputData::from_dense(Some(x.view()), None, &[]).unwrap();
        let params = ModelParams {
            ntrees: 20,
            sample_size: 0, // full data
            calc_depth: true,
            ..ModelParams::default()
        };
        let out = fit_iforest(&input, &params, None).unwrap();
        let depths = out.row_depths.unwrap();
        assert_eq!(depths.len(), 64);
        for &d in depths.iter() {
            assert!(d.is_finite());
            assert!(d > 0.0 && d <= 1.0); // standardized scores
        }
    }
}
