//! Parameter declarations: names, allowed ranges, priors and fixing.
//!
//! A [`ParameterSpace`] is configured once and then handed to a sampler, which
//! takes ownership of it. Fixing a parameter is therefore only possible before
//! a run starts.

use std::sync::Arc;

use rand::Rng;

use crate::distributions::{FlatPrior, Prior};
use crate::error::{Error, Result};

/// A single model parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub prior: Arc<dyn Prior>,
    /// When set, the parameter is held at this value and never proposed.
    pub fixed: Option<f64>,
}

impl Parameter {
    /// A parameter with a flat prior over `[min, max]`.
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            prior: Arc::new(FlatPrior),
            fixed: None,
        }
    }

    pub fn set_prior(mut self, prior: impl Prior + 'static) -> Self {
        self.prior = Arc::new(prior);
        self
    }

    pub fn range_width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }
}

/// Ordered collection of parameters making up a model's parameter vector.
///
/// # Examples
///
/// ```rust
/// use bayes_mcmc::parameters::{Parameter, ParameterSpace};
/// use bayes_mcmc::distributions::GaussianPrior;
///
/// let space = ParameterSpace::new()
///     .add(Parameter::new("background", 200.0, 400.0).set_prior(GaussianPrior::new(300.0, 10.0)))
///     .add(Parameter::new("signal", 0.0, 200.0));
/// assert_eq!(space.len(), 2);
/// assert_eq!(space.index_of("signal"), Some(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Holds the named parameter at `value` for every subsequent run.
    pub fn fix(&mut self, name: &str, value: f64) -> Result<()> {
        let parameter = self
            .parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::config(format!("unknown parameter '{name}'")))?;
        if !parameter.contains(value) {
            return Err(Error::config(format!(
                "cannot fix '{name}' to {value}: outside [{}, {}]",
                parameter.min, parameter.max
            )));
        }
        parameter.fixed = Some(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.parameters.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.parameters.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Indices of the parameters that are sampled, i.e. not fixed.
    pub fn free_indices(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_fixed())
            .map(|(i, _)| i)
            .collect()
    }

    /// Checks the declarations. Called by the sampler before anything runs.
    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(Error::config("parameter space has no parameters"));
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if !(p.min.is_finite() && p.max.is_finite()) || p.min >= p.max {
                return Err(Error::config(format!(
                    "parameter '{}' has invalid range [{}, {}]",
                    p.name, p.min, p.max
                )));
            }
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return Err(Error::config(format!("duplicate parameter '{}'", p.name)));
            }
            if let Some(v) = p.fixed {
                if !p.contains(v) {
                    return Err(Error::config(format!(
                        "parameter '{}' fixed outside its range",
                        p.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn in_range(&self, x: &[f64]) -> bool {
        x.len() == self.parameters.len()
            && self.parameters.iter().zip(x).all(|(p, &v)| p.contains(v))
    }

    /// Sum of the prior log-densities, or `-inf` when `x` leaves the range.
    pub fn log_prior(&self, x: &[f64]) -> f64 {
        if !self.in_range(x) {
            return f64::NEG_INFINITY;
        }
        self.parameters
            .iter()
            .zip(x)
            .map(|(p, &v)| p.prior.log_density(v))
            .sum()
    }

    /// Draws a point uniformly inside the ranges; fixed parameters take their
    /// fixed value.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|p| match p.fixed {
                Some(v) => v,
                None => rng.gen_range(p.min..=p.max),
            })
            .collect()
    }
}
