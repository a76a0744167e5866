//! Depth and separation constants shared by training, prediction and
//! similarity: harmonic numbers, the expected path length of an
//! unsuccessful BST search, and the expected depth at which two random
//! points first part ways.

use statrs::consts::EULER_MASCHERONI;

/// Exact summation below this, asymptotic expansion above.
const HARMONIC_EXACT_LIMIT: usize = 256;

/// n-th harmonic number H(n).
pub fn harmonic(n: usize) -> f64 {
    if n == 0 {
        0.0
    } else if n <= HARMONIC_EXACT_LIMIT {
        (1..=n).map(|i| 1.0 / i as f64).sum()
    } else {
        harmonic_approx(n as f64)
    }
}

fn harmonic_approx(x: f64) -> f64 {
    x.ln() + EULER_MASCHERONI + 1.0 / (2.0 * x) - 1.0 / (12.0 * x * x)
}

/// Expected path length of an unsuccessful search in an average binary
/// search tree over `n` points: c(n) = 2*H(n-1) - 2*(n-1)/n, with c(1) = 0.
pub fn expected_avg_depth(n: usize) -> f64 {
    if n <= 1 {
        0.0
    } else {
        2.0 * harmonic(n - 1) - 2.0 * (n - 1) as f64 / n as f64
    }
}

/// `expected_avg_depth` over a fractional count, as arises with row
/// weights. Below 2 the exact values c(1) = 0 and c(2) = 1 are bridged
/// linearly.
pub fn expected_avg_depth_w(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else if n < 2.0 {
        n - 1.0
    } else if n < HARMONIC_EXACT_LIMIT as f64 {
        let lo = expected_avg_depth(n.floor() as usize);
        let hi = expected_avg_depth(n.floor() as usize + 1);
        lo + (hi - lo) * n.fract()
    } else {
        2.0 * harmonic_approx(n - 1.0) - 2.0 * (n - 1.0) / n
    }
}

/// Expected depth at which two distinct points, placed uniformly at random
/// among `n`, first land in different leaves of a random partitioning tree.
///
/// With T(k) the sum of that depth over all pairs of k points and splits
/// drawn uniformly over the k-1 gaps,
///   T(k) = k(k-1)/2 + 2/(k-1) * sum_{g<k} T(g)
/// and the per-pair expectation T(n) / (n(n-1)/2) converges to 3.
pub fn expected_separation_depth(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n_eff = n.min(SEPARATION_ITER_LIMIT);
            let mut prefix = 0.0f64;
            let mut t = 0.0f64;
            for k in 2..=n_eff {
                t = (k * (k - 1) / 2) as f64 + 2.0 * prefix / (k - 1) as f64;
                prefix += t;
            }
            let pairs = (n_eff * (n_eff - 1) / 2) as f64;
            (t / pairs).min(3.0)
        }
    }
}

/// Past this point the expectation is within floating-point noise of its
/// limit of 3.
const SEPARATION_ITER_LIMIT: usize = 10_000;

/// `expected_separation_depth` over a fractional count.
pub fn expected_separation_depth_w(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else {
        expected_separation_depth(n.round().max(2.0) as usize)
    }
}

/// Compensated (Kahan) accumulator for the running sums behind the gain
/// criteria; the pooled-variance formula cancels catastrophically with a
/// naive sum.
#[derive(Debug, Default, Clone, Copy)]
pub struct KahanSum {
    sum: f64,
    comp: f64,
}

impl KahanSum {
    pub fn add(&mut self, v: f64) {
        let y = v - self.comp;
        let t = self.sum + y;
        self.comp = (t - self.sum) - y;
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum
    }
}

/// Standard deviation from a count, sum and sum of squares.
pub(crate) fn sd_from_moments(cnt: f64, sum: f64, sum_sq: f64) -> f64 {
    if cnt < 2.0 {
        return 0.0;
    }
    let var = (sum_sq - sum * sum / cnt) / cnt;
    if var > 0.0 {
        var.sqrt()
    } else {
        0.0
    }
}
