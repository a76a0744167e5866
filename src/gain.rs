//! Split-point evaluation: random draws, the averaged- and pooled-gain
//! guided criteria for numeric and categorical columns, and the kurtosis
//! statistic used to re-weight column sampling.

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::math::{sd_from_moments, KahanSum};
use crate::params::GainCriterion;

/// How many times a degenerate random category assignment (all categories
/// on one side) is redrawn before the column is declared unsplittable.
const CATEG_REDRAW_LIMIT: usize = 20;

/// Hard cap on category counts for the exhaustive subset search; beyond
/// this the greedy search takes over regardless of `all_perm`.
const ALL_PERM_LIMIT: usize = 16;

/// A guided numeric split candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NumericSplit {
    pub gain: f64,
    pub split_point: f64,
}

/// Best split point over sorted candidate positions of `values`.
///
/// `Averaged` maximizes sd(parent) - (n_l*sd_l + n_r*sd_r)/n, `Pooled`
/// maximizes sd(parent)^2 - (n_l*sd_l^2 + n_r*sd_r^2)/n. Ties keep the
/// earliest boundary. Returns None when every value is equal.
pub(crate) fn eval_guided_numeric(
    values: &mut Vec<f64>,
    criterion: GainCriterion,
) -> Option<NumericSplit> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if values[0] >= values[n - 1] {
        return None;
    }

    let mut total_sum = KahanSum::default();
    let mut total_sq = KahanSum::default();
    for &v in values.iter() {
        total_sum.add(v);
        total_sq.add(v * v);
    }
    let nf = n as f64;
    let sd_full = sd_from_moments(nf, total_sum.value(), total_sq.value());

    let mut left_sum = KahanSum::default();
    let mut left_sq = KahanSum::default();
    let mut best: Option<NumericSplit> = None;
    for i in 0..n - 1 {
        let v = values[i];
        left_sum.add(v);
        left_sq.add(v * v);
        if values[i + 1] <= v {
            continue;
        }
        let n_l = (i + 1) as f64;
        let n_r = nf - n_l;
        let sd_l = sd_from_moments(n_l, left_sum.value(), left_sq.value());
        let sd_r = sd_from_moments(
            n_r,
            total_sum.value() - left_sum.value(),
            total_sq.value() - left_sq.value(),
        );
        let gain = match criterion {
            GainCriterion::Averaged => sd_full - (n_l * sd_l + n_r * sd_r) / nf,
            GainCriterion::Pooled => {
                sd_full * sd_full - (n_l * sd_l * sd_l + n_r * sd_r * sd_r) / nf
            }
            GainCriterion::NoCrit => 0.0,
        };
        if best.map_or(true, |b| gain > b.gain) {
            best = Some(NumericSplit {
                gain,
                split_point: v + (values[i + 1] - v) / 2.0,
            });
        }
    }
    best
}

/// A guided categorical split candidate.
#[derive(Debug, Clone)]
pub(crate) enum CategChoice {
    /// `left_categs[c]` routes category c left; entries for categories
    /// absent from the node are filled by the caller per the new-category
    /// policy.
    Subset(Vec<bool>),
    Single(i32),
}

#[derive(Debug, Clone)]
pub(crate) struct CategGain {
    pub gain: f64,
    pub choice: CategChoice,
}

/// Gini-style spread of a categorical distribution, the analog of a
/// standard deviation for the averaged criterion.
fn cat_sd(counts: &[f64], subset: impl Fn(usize) -> bool, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let sq: f64 = counts
        .iter()
        .enumerate()
        .filter(|(c, _)| subset(*c))
        .map(|(_, &cnt)| (cnt / total) * (cnt / total))
        .sum();
    (1.0 - sq).max(0.0).sqrt()
}

/// n*ln(n) - sum c*ln(c): entropy scaled by the count, in nats.
fn cat_info(counts: &[f64], subset: impl Fn(usize) -> bool, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let sum_clnc: f64 = counts
        .iter()
        .enumerate()
        .filter(|(c, _)| subset(*c))
        .map(|(_, &cnt)| if cnt > 0.0 { cnt * cnt.ln() } else { 0.0 })
        .sum();
    total * total.ln() - sum_clnc
}

fn partition_gain(counts: &[f64], left: &[bool], criterion: GainCriterion) -> f64 {
    let total: f64 = counts.iter().sum();
    let n_l: f64 = counts
        .iter()
        .enumerate()
        .filter(|(c, _)| left[*c])
        .map(|(_, &cnt)| cnt)
        .sum();
    let n_r = total - n_l;
    if n_l <= 0.0 || n_r <= 0.0 {
        return f64::NEG_INFINITY;
    }
    match criterion {
        GainCriterion::Averaged => {
            let sd_parent = cat_sd(counts, |_| true, total);
            let sd_l = cat_sd(counts, |c| left[c], n_l);
            let sd_r = cat_sd(counts, |c| !left[c], n_r);
            sd_parent - (n_l * sd_l + n_r * sd_r) / total
        }
        GainCriterion::Pooled => {
            let base = cat_info(counts, |_| true, total);
            let info_l = cat_info(counts, |c| left[c], n_l);
            let info_r = cat_info(counts, |c| !left[c], n_r);
            (base - info_l - info_r) / total
        }
        GainCriterion::NoCrit => 0.0,
    }
}

/// Best single category to isolate, by gain. `counts` are (possibly
/// weighted) occurrence counts per category; zero-count categories are
/// absent from the node.
pub(crate) fn eval_guided_categ_single(
    counts: &[f64],
    criterion: GainCriterion,
) -> Option<CategGain> {
    let ncat = counts.len();
    let mut left = vec![false; ncat];
    let mut best: Option<CategGain> = None;
    for k in 0..ncat {
        if counts[k] <= 0.0 {
            continue;
        }
        left.fill(false);
        left[k] = true;
        let gain = partition_gain(counts, &left, criterion);
        if gain.is_finite() && best.as_ref().map_or(true, |b| gain > b.gain) {
            best = Some(CategGain {
                gain,
                choice: CategChoice::Single(k as i32),
            });
        }
    }
    best
}

/// Best category subset by gain: exhaustive over all 2^(k-1) - 1
/// non-trivial partitions when `all_perm` and feasible, otherwise greedy
/// (repeatedly move the category whose transfer most increases the gain).
pub(crate) fn eval_guided_categ_subset(
    counts: &[f64],
    criterion: GainCriterion,
    all_perm: bool,
) -> Option<CategGain> {
    let ncat = counts.len();
    let present: Vec<usize> = (0..ncat).filter(|&c| counts[c] > 0.0).collect();
    let k = present.len();
    if k < 2 {
        return None;
    }

    if all_perm && k <= ALL_PERM_LIMIT {
        // fix the first present category on the right to halve the space
        let mut best_gain = f64::NEG_INFINITY;
        let mut best_left = vec![false; ncat];
        let mut left = vec![false; ncat];
        for mask in 1u32..(1u32 << (k - 1)) {
            left.fill(false);
            for (bit, &cat) in present.iter().skip(1).enumerate() {
                if (mask >> bit) & 1 == 1 {
                    left[cat] = true;
                }
            }
            let gain = partition_gain(counts, &left, criterion);
            if gain > best_gain {
                best_gain = gain;
                best_left.copy_from_slice(&left);
            }
        }
        if best_gain.is_finite() {
            return Some(CategGain {
                gain: best_gain,
                choice: CategChoice::Subset(best_left),
            });
        }
        return None;
    }

    // greedy: grow the left side one category at a time from empty,
    // keeping the best configuration seen
    let mut left = vec![false; ncat];
    let mut n_left_categs = 0usize;
    let mut current_gain = f64::NEG_INFINITY;
    let mut best: Option<(f64, Vec<bool>)> = None;
    loop {
        let mut move_best: Option<(f64, usize)> = None;
        for &cat in &present {
            if left[cat] || n_left_categs + 1 == k {
                continue;
            }
            left[cat] = true;
            let gain = partition_gain(counts, &left, criterion);
            left[cat] = false;
            if gain.is_finite() && move_best.map_or(true, |(g, _)| gain > g) {
                move_best = Some((gain, cat));
            }
        }
        match move_best {
            Some((gain, cat)) if gain > current_gain || n_left_categs == 0 => {
                left[cat] = true;
                n_left_categs += 1;
                current_gain = gain;
                if best.as_ref().map_or(true, |(g, _)| gain > *g) {
                    best = Some((gain, left.clone()));
                }
            }
            _ => break,
        }
    }
    best.map(|(gain, left)| CategGain {
        gain,
        choice: CategChoice::Subset(left),
    })
}

/// Random subset assignment: independent Bernoulli(1/2) per present
/// category, redrawn a bounded number of times if one side comes out
/// empty.
pub(crate) fn random_categ_subset<R: Rng>(
    counts: &[f64],
    rng: &mut R,
) -> Option<Vec<bool>> {
    let ncat = counts.len();
    let present: Vec<usize> = (0..ncat).filter(|&c| counts[c] > 0.0).collect();
    if present.len() < 2 {
        return None;
    }
    for _ in 0..CATEG_REDRAW_LIMIT {
        let mut left = vec![false; ncat];
        let mut n_left = 0usize;
        for &cat in &present {
            if rng.random_bool(0.5) {
                left[cat] = true;
                n_left += 1;
            }
        }
        if n_left > 0 && n_left < present.len() {
            return Some(left);
        }
    }
    None
}

/// One present category chosen uniformly.
pub(crate) fn random_categ_single<R: Rng>(counts: &[f64], rng: &mut R) -> Option<i32> {
    let present: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] > 0.0).collect();
    if present.len() < 2 {
        return None;
    }
    Some(present[rng.random_range(0..present.len())] as i32)
}

/// Kurtosis (m4 / m2^2, uncentered about 3 for a normal) of the present
/// values of a numeric column; zero for degenerate columns so that
/// kurtosis-weighted sampling drops them.
pub(crate) fn numeric_kurtosis(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return 0.0;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let mut m2 = KahanSum::default();
    let mut m4 = KahanSum::default();
    for &v in values {
        let d = v - mean;
        m2.add(d * d);
        m4.add(d * d * d * d);
    }
    let m2 = m2.value() / nf;
    let m4 = m4.value() / nf;
    if m2 <= 0.0 {
        0.0
    } else {
        (m4 / (m2 * m2)).max(0.0)
    }
}

/// Kurtosis for a categorical column: each category is mapped to a
/// standard-normal draw and the induced numeric variable is measured. The
/// mapping is drawn once per evaluation from the tree's own generator.
pub(crate) fn categ_kurtosis<R: Rng>(counts: &[f64], rng: &mut R) -> f64 {
    let total: f64 = counts.iter().sum();
    if total < 4.0 {
        return 0.0;
    }
    let mapped: Vec<f64> = counts.iter().map(|_| rng.sample(StandardNormal)).collect();
    let mean: f64 = counts
        .iter()
        .zip(&mapped)
        .map(|(&c, &v)| c * v)
        .sum::<f64>()
        / total;
    let mut m2 = 0.0;
    let mut m4 = 0.0;
    for (&c, &v) in counts.iter().zip(&mapped) {
        let d = v - mean;
        m2 += c * d * d;
        m4 += c * d * d * d * d;
    }
    let m2 = m2 / total;
    let m4 = m4 / total;
    if m2 <= 0.0 {
        0.0
    } else {
        (m4 / (m2 * m2)).max(0.0)
    }
}
