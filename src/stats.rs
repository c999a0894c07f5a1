//! Running statistics used for proposal adaptation, the convergence
//! diagnostic and posterior summaries.

use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_stats::QuantileExt;

/// Per-parameter running mean and variance (Welford's algorithm).
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    n: u64,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningStats {
    pub fn new(n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(n_params),
            m2: Array1::zeros(n_params),
        }
    }

    pub fn push(&mut self, x: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for ((mean, m2), &v) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = v - *mean;
            *mean += delta / n;
            *m2 += delta * (v - *mean);
        }
    }

    pub fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Unbiased sample variance; zero with fewer than two samples.
    pub fn variance(&self) -> Array1<f64> {
        if self.n < 2 {
            return Array1::zeros(self.mean.len());
        }
        &self.m2 / (self.n as f64 - 1.0)
    }

    pub fn std(&self) -> Array1<f64> {
        self.variance().mapv(f64::sqrt)
    }

    /// Merges another accumulator over disjoint samples into this one.
    pub fn merge(&mut self, other: &RunningStats) {
        if other.n == 0 {
            return;
        }
        if self.n == 0 {
            *self = other.clone();
            return;
        }
        let (na, nb) = (self.n as f64, other.n as f64);
        let total = na + nb;
        let delta = &other.mean - &self.mean;
        self.mean = &self.mean + &(&delta * (nb / total));
        self.m2 = &self.m2 + &other.m2 + &(delta.mapv(|d| d * d) * (na * nb / total));
        self.n += other.n;
    }
}

/// Snapshot of one chain's window statistics, as consumed by [`rhat`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub n: u64,
    pub p_accept: f64,
    pub mean: Array1<f64>,
    pub sm2: Array1<f64>,
}

/// Gelman–Rubin potential scale reduction factor for every parameter.
///
/// With `m` chains of `n` samples each, chain means `θ̄_j` and chain variances
/// `s_j²`:
///
/// ```text
/// W = mean_j s_j²
/// B = n / (m - 1) · Σ_j (θ̄_j - θ̄)²
/// R̂ = sqrt(((n - 1) / n · W + B / n) / W)
/// ```
///
/// Components where `W` is zero (a parameter that never moved) are reported as
/// `1.0` if all chain means agree and `inf` otherwise. Returns `None` for fewer
/// than two chains or fewer than two samples per chain.
pub fn rhat(chains: &[ChainStats]) -> Option<Array1<f64>> {
    let m = chains.len();
    if m < 2 || chains.iter().any(|c| c.n < 2) {
        return None;
    }
    let means: Vec<ArrayView1<f64>> = chains.iter().map(|c| c.mean.view()).collect();
    let means = ndarray::stack(Axis(0), &means).ok()?;
    let sm2s: Vec<ArrayView1<f64>> = chains.iter().map(|c| c.sm2.view()).collect();
    let sm2s = ndarray::stack(Axis(0), &sm2s).ok()?;

    let n = chains.iter().map(|c| c.n as f64).sum::<f64>() / m as f64;
    let within = sm2s.mean_axis(Axis(0))?;
    let grand_mean = means.mean_axis(Axis(0))?;
    let between = (&means - &grand_mean.insert_axis(Axis(0)))
        .mapv(|d| d * d)
        .sum_axis(Axis(0))
        * (n / (m as f64 - 1.0));

    let rhat = Zip::from(&within)
        .and(&between)
        .map_collect(|&w, &b| {
            if w > 0.0 {
                (((n - 1.0) / n * w + b / n) / w).sqrt()
            } else if b == 0.0 {
                1.0
            } else {
                f64::INFINITY
            }
        });
    Some(rhat)
}

/// Largest component of an R̂ vector; `None` if empty or undefined (NaN).
pub fn max_rhat(rhat: &Array1<f64>) -> Option<f64> {
    rhat.max().ok().copied()
}

/// Mean and standard deviation of `values`, ignoring non-finite entries.
pub fn mean_std(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let mut stats = RunningStats::new(1);
    for v in values.into_iter().filter(|v| v.is_finite()) {
        stats.push(&[v]);
    }
    if stats.count() == 0 {
        return (f64::NAN, f64::NAN);
    }
    (stats.mean()[0], stats.std()[0])
}
