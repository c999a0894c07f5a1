/*!
# Ensemble tests

Validates a fit procedure by repeating it on many pseudo-experiments. Each
pseudo-experiment ("ensemble") is a synthetic binned [`Dataset`], either a copy
of a baseline or a Poisson fluctuation of it. Every dataset is fitted by a
fresh [`MetropolisHastings`] sampler, and the posterior mean and standard
deviation are compared with a reference value through the pull

```text
pull = (fitted - reference) / uncertainty
```

For a well-calibrated fit the pulls of each parameter are distributed with
mean 0 and standard deviation 1.

Trials run in parallel. A fit's sampler seed is derived from the global seed
and the dataset contents, and template redraws from the trial index, so results
do not depend on the number of trial workers and identical datasets give
identical fits.

## Example Usage

```rust
use bayes_mcmc::ensemble::{Dataset, EnsembleConfig, EnsembleFacility, EnsembleMode};
use bayes_mcmc::metropolis_hastings::SamplerConfig;
use bayes_mcmc::models::TemplateModel;
use bayes_mcmc::precision::Precision;

let model = TemplateModel::new(2)
    .add_process("signal", vec![10.0, 30.0], 1.0)?
    .add_process("background", vec![20.0, 20.0], 1.0)?;
let space = model.parameter_space(200.0);
let baseline = Dataset::new(model.expected(&[40.0, 60.0]));

let sampler = SamplerConfig::new(Precision::Quick)
    .set_seed(3)
    .set_pre_run_max(2_000)
    .set_run_iterations(500);
let config = EnsembleConfig::new(4, EnsembleMode::Fluctuate).set_seed(9);
let facility = EnsembleFacility::new(model, space, baseline, sampler, config)?
    .set_truth(vec![40.0, 60.0]);

let datasets = facility.build_ensembles(4, EnsembleMode::Fluctuate);
let results = facility.perform_ensemble_test(&datasets, 500, false)?;
assert_eq!(results.len(), 4);
# Ok::<(), bayes_mcmc::error::Error>(())
```
*/

use std::fmt;
use std::str::FromStr;

use log::{debug, info};
use rand::prelude::*;
use rand_distr::Poisson;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::distributions::FitModel;
use crate::error::{Error, Result};
use crate::io::NullSink;
use crate::metropolis_hastings::{
    ConvergenceStatus, MetropolisHastings, PosteriorSummary, SamplerConfig,
};
use crate::parameters::ParameterSpace;
use crate::stats;

/// Observed (or synthetic) event counts of one binned channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub counts: Vec<f64>,
}

impl Dataset {
    pub fn new(counts: Vec<f64>) -> Self {
        Self { counts }
    }

    pub fn from_counts(counts: &[u64]) -> Self {
        Self::new(counts.iter().map(|&c| c as f64).collect())
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// A hash of the exact bin contents. Bit-identical datasets share it.
    pub fn fingerprint(&self) -> u64 {
        self.counts
            .iter()
            .fold(splitmix64(self.counts.len() as u64), |h, c| {
                splitmix64(h ^ c.to_bits())
            })
    }
}

/// Draws one Poisson count per bin with the given means. Bins with a
/// non-positive (or non-finite) mean yield 0.
///
/// The same `expected` and `seed` always produce the same counts.
pub fn fluctuate(expected: &[f64], seed: u64) -> Vec<u64> {
    let mut rng = SmallRng::seed_from_u64(seed);
    expected
        .iter()
        .map(|&mean| match Poisson::new(mean) {
            Ok(poisson) if mean > 0.0 && mean.is_finite() => rng.sample(poisson) as u64,
            _ => 0,
        })
        .collect()
}

/// Derives the seed of pseudo-experiment `index` from a global seed.
pub fn ensemble_seed(global_seed: u64, index: u64) -> u64 {
    splitmix64(global_seed ^ splitmix64(index))
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// How pseudo-experiments are generated from the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnsembleMode {
    /// Every ensemble is an exact copy of the baseline.
    Identical,
    /// Every ensemble is a Poisson fluctuation of the baseline.
    #[default]
    Fluctuate,
}

impl fmt::Display for EnsembleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsembleMode::Identical => f.write_str("identical"),
            EnsembleMode::Fluctuate => f.write_str("fluctuate"),
        }
    }
}

impl FromStr for EnsembleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "identical" | "data" => Ok(EnsembleMode::Identical),
            "fluctuate" | "mc" => Ok(EnsembleMode::Fluctuate),
            _ => Err(Error::config(format!("unknown ensemble mode '{s}'"))),
        }
    }
}

/// Builds `n` pseudo-experiments from `baseline`. In fluctuating mode the
/// baseline counts are used as Poisson means and ensemble `i` is drawn with
/// seed `ensemble_seed(seed, i)`.
pub fn build_ensembles(baseline: &Dataset, n: usize, mode: EnsembleMode, seed: u64) -> Vec<Dataset> {
    match mode {
        EnsembleMode::Identical => vec![baseline.clone(); n],
        EnsembleMode::Fluctuate => (0..n)
            .map(|i| {
                Dataset::from_counts(&fluctuate(&baseline.counts, ensemble_seed(seed, i as u64)))
            })
            .collect(),
    }
}

/// A binned model whose prediction can drive pseudo-experiment generation and
/// whose Monte Carlo templates can be statistically redrawn per trial.
pub trait TemplateFluctuation: FitModel<Data = Dataset> + Clone {
    fn n_bins(&self) -> usize;

    /// Length of the parameter vectors the model expects.
    fn n_parameters(&self) -> usize;

    /// Expected count in every bin for the given parameters.
    fn expected(&self, parameters: &[f64]) -> Vec<f64>;

    /// A copy of the model with its templates redrawn using `seed`.
    fn fluctuate_templates(&self, seed: u64) -> Self;
}

/// Which posterior statistic a trial reports as its fitted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointEstimate {
    /// Posterior mean of every parameter.
    #[default]
    Mean,
    /// Highest-probability state visited during the main run.
    Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    pub n_ensembles: usize,
    pub mode: EnsembleMode,
    pub seed: u64,
    /// Trials fitted concurrently.
    pub workers: usize,
    pub fluctuate_templates: bool,
    pub point_estimate: PointEstimate,
}

impl EnsembleConfig {
    pub fn new(n_ensembles: usize, mode: EnsembleMode) -> Self {
        Self {
            n_ensembles,
            mode,
            seed: thread_rng().gen::<u64>(),
            workers: rayon::current_num_threads(),
            fluctuate_templates: false,
            point_estimate: PointEstimate::default(),
        }
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn set_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn set_fluctuate_templates(mut self, fluctuate: bool) -> Self {
        self.fluctuate_templates = fluctuate;
        self
    }

    pub fn set_point_estimate(mut self, estimate: PointEstimate) -> Self {
        self.point_estimate = estimate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_ensembles == 0 {
            return Err(Error::config("at least one ensemble is required"));
        }
        Ok(())
    }
}

/// Fit of one pseudo-experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    pub trial: usize,
    pub status: ConvergenceStatus,
    /// Posterior mean or mode per parameter, see [`PointEstimate`].
    pub fitted: Vec<f64>,
    /// Posterior standard deviation per parameter.
    pub uncertainty: Vec<f64>,
    /// NaN where the uncertainty is zero.
    pub pull: Vec<f64>,
}

/// Distribution of the pulls of one parameter over all trials.
#[derive(Debug, Clone, PartialEq)]
pub struct PullSummary {
    pub mean: f64,
    pub std: f64,
    /// Trials with a finite pull.
    pub count: usize,
}

/// Mean and standard deviation of the finite pulls of every parameter.
pub fn summarize_pulls(results: &[EnsembleResult]) -> Vec<PullSummary> {
    let n_params = results.first().map_or(0, |r| r.pull.len());
    (0..n_params)
        .map(|j| {
            let pulls: Vec<f64> = results
                .iter()
                .map(|r| r.pull[j])
                .filter(|p| p.is_finite())
                .collect();
            let (mean, std) = stats::mean_std(pulls.iter().copied());
            PullSummary {
                mean,
                std,
                count: pulls.len(),
            }
        })
        .collect()
}

/// Runs ensemble tests of a model against a baseline dataset.
#[derive(Debug)]
pub struct EnsembleFacility<M: TemplateFluctuation> {
    model: M,
    space: ParameterSpace,
    baseline: Dataset,
    sampler: SamplerConfig,
    config: EnsembleConfig,
    truth: Option<Vec<f64>>,
}

impl<M: TemplateFluctuation> EnsembleFacility<M> {
    pub fn new(
        model: M,
        space: ParameterSpace,
        baseline: Dataset,
        sampler: SamplerConfig,
        config: EnsembleConfig,
    ) -> Result<Self> {
        space.validate()?;
        sampler.validate()?;
        config.validate()?;
        if baseline.len() != model.n_bins() {
            return Err(Error::config(format!(
                "baseline has {} bins, model has {}",
                baseline.len(),
                model.n_bins()
            )));
        }
        if space.len() != model.n_parameters() {
            return Err(Error::config(format!(
                "parameter space has {} parameters, model expects {}",
                space.len(),
                model.n_parameters()
            )));
        }
        Ok(Self {
            model,
            space,
            baseline,
            sampler,
            config,
            truth: None,
        })
    }

    /// Sets the true parameter values pulls are computed against. Without a
    /// truth, pulls are taken relative to a fit of the baseline.
    pub fn set_truth(mut self, truth: Vec<f64>) -> Self {
        self.truth = Some(truth);
        self
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn baseline(&self) -> &Dataset {
        &self.baseline
    }

    /// Builds `n` pseudo-experiments from the baseline using the configured
    /// seed.
    pub fn build_ensembles(&self, n: usize, mode: EnsembleMode) -> Vec<Dataset> {
        build_ensembles(&self.baseline, n, mode, self.config.seed)
    }

    /// Builds `n` Poisson pseudo-experiments around the model's expectation
    /// for `parameters` instead of around the baseline.
    pub fn build_ensembles_from_parameters(
        &self,
        parameters: &[f64],
        n: usize,
    ) -> Result<Vec<Dataset>> {
        if parameters.len() != self.model.n_parameters() {
            return Err(Error::config(format!(
                "got {} parameter values, model expects {}",
                parameters.len(),
                self.model.n_parameters()
            )));
        }
        let expected = Dataset::new(self.model.expected(parameters));
        Ok(build_ensembles(&expected, n, EnsembleMode::Fluctuate, self.config.seed))
    }

    /**
    Fits every dataset with a fresh sampler and returns one result per dataset,
    in dataset order.

    Every fit seeds its sampler from the sampler seed and the dataset's
    [`Dataset::fingerprint`], so identical datasets (and the baseline) give
    bit-identical fits. Each trial runs its chains on a single thread; trials
    themselves are spread over the configured number of workers. With
    `fluctuate_templates` each trial fits a model whose templates were redrawn
    with a seed of its own.

    # Errors

    * [`Error::Configuration`] for an empty dataset list, zero iterations, a
      dataset with the wrong number of bins or a truth of the wrong length.
    * Any error of a trial's sampler; the first failing trial aborts the test.
    */
    pub fn perform_ensemble_test(
        &self,
        datasets: &[Dataset],
        iterations_per_trial: usize,
        fluctuate_templates: bool,
    ) -> Result<Vec<EnsembleResult>> {
        let label = self.sampler.label.clone();
        if datasets.is_empty() {
            return Err(Error::config("no datasets to fit"));
        }
        if iterations_per_trial == 0 {
            return Err(Error::config("iterations_per_trial must be positive"));
        }
        if let Some(bad) = datasets.iter().position(|d| d.len() != self.model.n_bins()) {
            return Err(Error::config(format!(
                "dataset {bad} has {} bins, model has {}",
                datasets[bad].len(),
                self.model.n_bins()
            )));
        }

        let reference = match &self.truth {
            Some(truth) if truth.len() != self.space.len() => {
                return Err(Error::config(format!(
                    "truth has {} values, model has {} parameters",
                    truth.len(),
                    self.space.len()
                )));
            }
            Some(truth) => truth.clone(),
            None => {
                let mut sampler = MetropolisHastings::new(
                    self.model.clone(),
                    self.space.clone(),
                    self.trial_config(
                        self.fit_seed(&self.baseline),
                        iterations_per_trial,
                        "baseline",
                    ),
                )?;
                let summary = sampler.run(&self.baseline, NullSink)?;
                let fit = summary
                    .posterior
                    .ok_or_else(|| Error::config("baseline fit produced no samples"))?;
                let fitted = self.point_estimate(fit);
                debug!(target: label.as_str(), "baseline fit: {:?}", fitted);
                fitted
            }
        };

        info!(
            target: label.as_str(),
            "ensemble test: {} trials x {} iterations on {} workers",
            datasets.len(),
            iterations_per_trial,
            self.config.workers.max(1)
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| Error::config(format!("cannot build trial pool: {e}")))?;
        let mut results: Vec<EnsembleResult> = pool.install(|| {
            datasets
                .par_iter()
                .enumerate()
                .map(|(trial, data)| {
                    self.run_trial(trial, data, iterations_per_trial, fluctuate_templates, &reference)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        results.sort_by_key(|r| r.trial);
        info!(target: label.as_str(), "ensemble test finished");
        Ok(results)
    }

    /// Builds `n_ensembles` datasets in the configured mode and fits them.
    pub fn run(&self, iterations_per_trial: usize) -> Result<Vec<EnsembleResult>> {
        let datasets = self.build_ensembles(self.config.n_ensembles, self.config.mode);
        self.perform_ensemble_test(&datasets, iterations_per_trial, self.config.fluctuate_templates)
    }

    fn fit_seed(&self, data: &Dataset) -> u64 {
        ensemble_seed(self.sampler.seed, data.fingerprint())
    }

    fn point_estimate(&self, posterior: PosteriorSummary) -> Vec<f64> {
        match self.config.point_estimate {
            PointEstimate::Mean => posterior.mean,
            PointEstimate::Mode => posterior.mode,
        }
    }

    fn trial_config(&self, seed: u64, iterations: usize, name: &str) -> SamplerConfig {
        self.sampler
            .clone()
            .set_seed(seed)
            .set_run_iterations(iterations)
            .set_workers(1)
            .set_label(format!("{}::{}", self.sampler.label, name))
    }

    fn run_trial(
        &self,
        trial: usize,
        data: &Dataset,
        iterations: usize,
        fluctuate_templates: bool,
        reference: &[f64],
    ) -> Result<EnsembleResult> {
        let model = if fluctuate_templates {
            self.model
                .fluctuate_templates(ensemble_seed(!self.config.seed, trial as u64))
        } else {
            self.model.clone()
        };
        let config = self.trial_config(self.fit_seed(data), iterations, &format!("trial{trial}"));
        let mut sampler = MetropolisHastings::new(model, self.space.clone(), config)?;
        let summary = sampler.run(data, NullSink)?;
        let posterior = summary
            .posterior
            .ok_or_else(|| Error::config(format!("trial {trial} produced no samples")))?;

        let uncertainty = posterior.std.clone();
        debug!(
            target: self.sampler.label.as_str(),
            "trial {trial}: mean {:?}, std {:?}",
            posterior.mean,
            posterior.std
        );
        let fitted = self.point_estimate(posterior);
        let pull = fitted
            .iter()
            .zip(&uncertainty)
            .zip(reference)
            .map(|((&fitted, &sigma), &r)| {
                if sigma > 0.0 {
                    (fitted - r) / sigma
                } else {
                    f64::NAN
                }
            })
            .collect();
        Ok(EnsembleResult {
            trial,
            status: summary.status,
            fitted,
            uncertainty,
            pull,
        })
    }
}
