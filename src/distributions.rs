/*!
Defines the interfaces through which the sampler talks to the outside world:
the black-box [`FitModel`] that supplies a log-posterior for a parameter vector
and a dataset, and the pluggable [`Prior`] densities attached to parameters.

A reference target, [`DiagonalGaussian`], is provided for testing and
benchmarking; it ignores its dataset.

# Examples

```rust
use bayes_mcmc::distributions::{DiagonalGaussian, FitModel, GaussianPrior, Prior};

let target = DiagonalGaussian::new(vec![0.0, 1.0], vec![1.0, 2.0]);
let lp = target.evaluate(&[0.0, 1.0], &());
assert_eq!(lp, 0.0);

let prior = GaussianPrior::new(300.0, 10.0);
assert!(prior.log_density(300.0) > prior.log_density(320.0));
```
*/

use std::f64::consts::PI;
use std::fmt::Debug;

/// A model supplying the log-posterior (up to a constant) of a parameter vector
/// given a dataset.
///
/// Implementations must be reentrant: the sampler evaluates the same model from
/// several worker threads at once, so no scratch state may be shared between
/// concurrent calls. Return `f64::NEG_INFINITY` outside the support. NaN is
/// accepted and treated the same way.
pub trait FitModel: Send + Sync {
    /// The observed data the model is conditioned on.
    type Data: Sync;

    /// Returns the unnormalized log-posterior of `parameters` given `data`.
    fn evaluate(&self, parameters: &[f64], data: &Self::Data) -> f64;
}

/// A one-dimensional prior density, evaluated in log-space.
///
/// Priors only need to be correct up to an additive constant.
pub trait Prior: Send + Sync + Debug {
    fn log_density(&self, x: f64) -> f64;
}

/// A flat prior over the parameter's range. Contributes nothing to the
/// log-posterior.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatPrior;

impl Prior for FlatPrior {
    fn log_density(&self, _x: f64) -> f64 {
        0.0
    }
}

/// A Gaussian prior with the given mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPrior {
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianPrior {
    pub fn new(mean: f64, sigma: f64) -> Self {
        Self { mean, sigma }
    }
}

impl Prior for GaussianPrior {
    fn log_density(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.sigma;
        -0.5 * z * z - self.sigma.ln() - 0.5 * (2.0 * PI).ln()
    }
}

/**
A Gaussian target with independent components, parameterized by per-component
means and standard deviations.

The dataset is the unit type; this target exists to exercise the sampler on a
posterior with known moments.

# Examples

```rust
use bayes_mcmc::distributions::{DiagonalGaussian, FitModel};

let target = DiagonalGaussian::standard(3);
assert_eq!(target.dim(), 3);
assert!(target.evaluate(&[1.0, 0.0, 0.0], &()) < target.evaluate(&[0.0, 0.0, 0.0], &()));
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalGaussian {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl DiagonalGaussian {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Self {
        assert_eq!(
            mean.len(),
            std.len(),
            "mean and std must have the same length"
        );
        Self { mean, std }
    }

    /// A standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self::new(vec![0.0; dim], vec![1.0; dim])
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl FitModel for DiagonalGaussian {
    type Data = ();

    fn evaluate(&self, parameters: &[f64], _data: &()) -> f64 {
        parameters
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(&x, (&m, &s))| {
                let z = (x - m) / s;
                -0.5 * z * z
            })
            .sum()
    }
}
