/*!
# Metropolis–Hastings Sampler

This module implements the multi-chain sampler. It owns a fixed set of
[`Chain`]s, runs them through an adaptive pre-run until a between/within-chain
convergence diagnostic passes (or the pre-run budget is exhausted), then runs
them for a fixed number of main iterations with frozen proposals.

## Overview

- **Model (`M`)**: any [`FitModel`]; the sampler never looks inside it.
- **Parameters**: a validated [`ParameterSpace`] supplying ranges and priors.
- **Configuration**: a [`SamplerConfig`] built from a [`Precision`] level.
- **Reproducibility**: chain `i` is seeded with `seed + i`; the records written
  to the sink are identical for every worker count.
- **Cancellation**: a [`CancelToken`] is checked between blocks; a cancelled
  sampler can be resumed by calling [`MetropolisHastings::run`] again with the
  same dataset.

## Example Usage

```rust
use bayes_mcmc::distributions::DiagonalGaussian;
use bayes_mcmc::io::MemorySink;
use bayes_mcmc::metropolis_hastings::{MetropolisHastings, SamplerConfig};
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

let space = ParameterSpace::new().add(Parameter::new("mu", -10.0, 10.0));
let config = SamplerConfig::new(Precision::Quick)
    .set_seed(42)
    .set_run_iterations(1_000);
let mut mh = MetropolisHastings::new(DiagonalGaussian::standard(1), space, config)?;

let mut sink = MemorySink::new();
let summary = mh.run(&(), &mut sink)?;
assert_eq!(sink.len(), 2 * 1_000);
assert!(summary.posterior.unwrap().mean[0].abs() < 0.5);
# Ok::<(), bayes_mcmc::error::Error>(())
```
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, trace, warn};
use ndarray::Array1;
use rand::prelude::*;

use crate::chain::{Chain, Posterior, SampleRecord};
use crate::coordinator::ParallelCoordinator;
use crate::distributions::FitModel;
use crate::error::{Error, Result};
use crate::io::PersistenceSink;
use crate::parameters::ParameterSpace;
use crate::precision::Precision;
use crate::proposal::AcceptanceBand;
use crate::stats::{self, ChainStats, RunningStats};

/// Settings of one sampler run.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub precision: Precision,
    pub n_chains: usize,
    pub pre_run_min: usize,
    pub pre_run_max: usize,
    pub run_iterations: usize,
    pub check_interval: usize,
    pub rhat_threshold: f64,
    pub band: AcceptanceBand,
    pub seed: u64,
    /// Worker threads used to advance chains. A performance hint only.
    pub workers: usize,
    /// Whether pre-run records are written to the sink as well.
    pub record_pre_run: bool,
    /// Target used for all log messages of this sampler.
    pub label: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(Precision::default())
    }
}

impl SamplerConfig {
    /// Applies the preset of `precision`. The seed is drawn at random; call
    /// [`SamplerConfig::set_seed`] for reproducible runs.
    pub fn new(precision: Precision) -> Self {
        let preset = precision.preset();
        Self {
            precision,
            n_chains: preset.n_chains,
            pre_run_min: preset.pre_run_min,
            pre_run_max: preset.pre_run_max,
            run_iterations: preset.run_iterations,
            check_interval: preset.check_interval,
            rhat_threshold: preset.rhat_threshold,
            band: AcceptanceBand::default(),
            seed: thread_rng().gen::<u64>(),
            workers: 1,
            record_pre_run: false,
            label: "bayes_mcmc::sampler".to_string(),
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

    pub fn set_chains(mut self, n_chains: usize) -> Self {
        self.n_chains = n_chains;
        self
    }

    pub fn set_run_iterations(mut self, n: usize) -> Self {
        self.run_iterations = n;
        self
    }

    pub fn set_pre_run_min(mut self, n: usize) -> Self {
        self.pre_run_min = n;
        self
    }

    pub fn set_pre_run_max(mut self, n: usize) -> Self {
        self.pre_run_max = n;
        self
    }

    pub fn set_check_interval(mut self, n: usize) -> Self {
        self.check_interval = n;
        self
    }

    pub fn set_rhat_threshold(mut self, threshold: f64) -> Self {
        self.rhat_threshold = threshold;
        self
    }

    pub fn set_acceptance_band(mut self, min: f64, max: f64) -> Self {
        self.band = AcceptanceBand { min, max };
        self
    }

    pub fn set_record_pre_run(mut self, record: bool) -> Self {
        self.record_pre_run = record;
        self
    }

    pub fn set_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_chains == 0 {
            return Err(Error::config("at least one chain is required"));
        }
        if self.run_iterations == 0 {
            return Err(Error::config("run_iterations must be positive"));
        }
        if self.check_interval == 0 {
            return Err(Error::config("check_interval must be positive"));
        }
        if self.pre_run_min > self.pre_run_max {
            return Err(Error::config(format!(
                "pre_run_min ({}) exceeds pre_run_max ({})",
                self.pre_run_min, self.pre_run_max
            )));
        }
        if !(self.rhat_threshold > 1.0) {
            return Err(Error::config("rhat_threshold must be greater than 1"));
        }
        let band = self.band;
        if !(0.0..=1.0).contains(&band.min) || !(0.0..=1.0).contains(&band.max) || band.min >= band.max
        {
            return Err(Error::config(format!(
                "invalid acceptance band [{}, {}]",
                band.min, band.max
            )));
        }
        Ok(())
    }
}

/// Outcome of the pre-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// The pre-run has not finished yet.
    Pending,
    Converged,
    /// The pre-run budget was exhausted before the diagnostic passed. The main
    /// run still took place.
    NotConverged,
}

/// Shared flag that stops a run at the next block boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears the flag so that a cancelled sampler can be resumed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-parameter summary of the main-run samples of all chains.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSummary {
    pub names: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// Highest-probability state visited during the main run.
    pub mode: Vec<f64>,
    pub mode_log_probability: f64,
    pub n_samples: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub status: ConvergenceStatus,
    pub pre_run_iterations: usize,
    pub run_iterations: usize,
    pub acceptance_rates: Vec<f64>,
    /// R̂ per parameter at the last pre-run check, if it could be computed.
    pub rhat: Option<Vec<f64>>,
    /// `None` until at least one main-run iteration has been done.
    pub posterior: Option<PosteriorSummary>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        !self.cancelled
    }
}

/**
The multi-chain Metropolis–Hastings sampler.

# Type Parameters
- `M`: The model supplying the log-posterior. Must implement [`FitModel`].

# Examples

```rust
use bayes_mcmc::distributions::DiagonalGaussian;
use bayes_mcmc::metropolis_hastings::{MetropolisHastings, SamplerConfig};
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

let space = ParameterSpace::new().add(Parameter::new("x", -1.0, 1.0));
let config = SamplerConfig::new(Precision::Medium).set_seed(42);
let mh = MetropolisHastings::new(DiagonalGaussian::standard(1), space, config)?;
assert_eq!(mh.config().n_chains, 4);
# Ok::<(), bayes_mcmc::error::Error>(())
```
*/
#[derive(Debug)]
pub struct MetropolisHastings<M: FitModel> {
    model: M,
    space: ParameterSpace,
    config: SamplerConfig,
    coordinator: ParallelCoordinator,
    chains: Vec<Chain>,
    pre_run_done: usize,
    run_done: usize,
    status: ConvergenceStatus,
    last_rhat: Option<Array1<f64>>,
    cancel: CancelToken,
}

impl<M: FitModel> MetropolisHastings<M> {
    /// Validates the parameter space and the configuration and prepares the
    /// sampler. Chains are created lazily on the first call to `run`, since
    /// their starting points are evaluated against the dataset.
    pub fn new(model: M, space: ParameterSpace, config: SamplerConfig) -> Result<Self> {
        space.validate()?;
        config.validate()?;
        let coordinator = ParallelCoordinator::new(config.workers, config.label.clone())?;
        Ok(Self {
            model,
            space,
            config,
            coordinator,
            chains: Vec::new(),
            pre_run_done: 0,
            run_done: 0,
            status: ConvergenceStatus::Pending,
            last_rhat: None,
            cancel: CancelToken::default(),
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn status(&self) -> ConvergenceStatus {
        self.status
    }

    /// A handle that stops the run at the next block boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Seed of chain `index`.
    pub fn chain_seed(&self, index: usize) -> u64 {
        self.config.seed.wrapping_add(index as u64)
    }

    /**
    Runs the pre-run and the main run, writing records to `sink`.

    Returns early, with `cancelled` set in the summary, if the cancel token is
    raised; calling `run` again continues from the same block boundary.

    # Errors

    * [`Error::Configuration`] if a chain finds no starting point with finite
      log-posterior, e.g. for an empty or mismatched dataset. Nothing is
      written to the sink in that case.
    * [`Error::Persistence`] if the sink fails.
    * [`Error::WorkerFailure`] if a chain faults.
    */
    pub fn run<S: PersistenceSink>(&mut self, data: &M::Data, mut sink: S) -> Result<RunSummary> {
        self.run_inner(data, &mut sink, None)
    }

    /// Like [`run`](Self::run), displaying one progress bar per chain.
    pub fn run_progress<S: PersistenceSink>(
        &mut self,
        data: &M::Data,
        mut sink: S,
    ) -> Result<RunSummary> {
        let multi = MultiProgress::new();
        let pb_style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| Error::config(e.to_string()))?
            .progress_chars("##-");
        let total = (self.config.pre_run_max + self.config.run_iterations) as u64;
        let bars: Vec<ProgressBar> = (0..self.config.n_chains)
            .map(|i| {
                let pb = multi.add(ProgressBar::new(total));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());
                pb
            })
            .collect();

        let result = self.run_inner(data, &mut sink, Some(&bars));
        for pb in &bars {
            pb.finish_with_message("Done!");
        }
        result
    }

    fn run_inner<S: PersistenceSink>(
        &mut self,
        data: &M::Data,
        sink: &mut S,
        bars: Option<&[ProgressBar]>,
    ) -> Result<RunSummary> {
        let label = self.config.label.clone();
        if self.chains.is_empty() {
            let posterior = Posterior::new(&self.model, &self.space, data);
            self.chains = (0..self.config.n_chains)
                .map(|i| {
                    let seed = self.config.seed.wrapping_add(i as u64);
                    Chain::start(i, seed, &posterior, self.config.band)
                })
                .collect::<Result<Vec<_>>>()?;
            info!(
                target: label.as_str(),
                "starting {} chains (seed {}, {} workers, precision {})",
                self.config.n_chains,
                self.config.seed,
                self.coordinator.workers(),
                self.config.precision
            );
        }

        if self.status == ConvergenceStatus::Pending && self.config.pre_run_max == 0 {
            self.end_pre_run(ConvergenceStatus::NotConverged);
        }

        while self.status == ConvergenceStatus::Pending {
            if self.cancel.is_cancelled() {
                info!(target: label.as_str(), "cancelled during pre-run at {}", self.pre_run_done);
                return Ok(self.summary(true));
            }
            let block = self
                .config
                .check_interval
                .min(self.config.pre_run_max - self.pre_run_done);
            let posterior = Posterior::new(&self.model, &self.space, data);
            let records = self
                .coordinator
                .advance_block(&mut self.chains, block, &posterior)?;
            if self.config.record_pre_run {
                write_block(sink, &records)?;
            }
            self.pre_run_done += block;
            update_bars(bars, &self.chains, self.pre_run_done);
            self.check_pre_run();
        }

        while self.run_done < self.config.run_iterations {
            if self.cancel.is_cancelled() {
                info!(target: label.as_str(), "cancelled during main run at {}", self.run_done);
                return Ok(self.summary(true));
            }
            let block = self
                .config
                .check_interval
                .min(self.config.run_iterations - self.run_done);
            let posterior = Posterior::new(&self.model, &self.space, data);
            let records = self
                .coordinator
                .advance_block(&mut self.chains, block, &posterior)?;
            write_block(sink, &records)?;
            self.run_done += block;
            update_bars(bars, &self.chains, self.pre_run_done + self.run_done);
        }

        self.chains.iter_mut().for_each(Chain::finish);
        let summary = self.summary(false);
        info!(
            target: label.as_str(),
            "main run finished: {} iterations x {} chains, status {:?}",
            self.run_done,
            self.chains.len(),
            summary.status
        );
        Ok(summary)
    }

    /// Evaluates the convergence diagnostic over the last window, adapts the
    /// proposals and, on success or budget exhaustion, moves the chains into
    /// the main run.
    fn check_pre_run(&mut self) {
        let label = self.config.label.as_str();
        let windows: Vec<ChainStats> = self.chains.iter().map(Chain::window_stats).collect();
        let band = self.config.band;
        let efficiency_ok = windows.iter().all(|w| band.contains(w.p_accept));

        let free = self.space.free_indices();
        let rhat = stats::rhat(&windows).map(|r| r.select(ndarray::Axis(0), &free));
        let max_rhat = rhat.as_ref().and_then(stats::max_rhat);
        let rhat_ok = match max_rhat {
            Some(r) => r < self.config.rhat_threshold,
            // A single chain has no between-chain variance to compare with.
            None => self.chains.len() == 1,
        };
        debug!(
            target: label,
            "pre-run check at {}: max R = {:?}, acceptance = {:?}",
            self.pre_run_done,
            max_rhat,
            windows.iter().map(|w| w.p_accept).collect::<Vec<_>>()
        );
        self.last_rhat = rhat;

        if self.pre_run_done >= self.config.pre_run_min && rhat_ok && efficiency_ok {
            info!(
                target: label,
                "pre-run converged after {} iterations",
                self.pre_run_done
            );
            self.end_pre_run(ConvergenceStatus::Converged);
        } else if self.pre_run_done >= self.config.pre_run_max {
            warn!(
                target: label,
                "pre-run did not converge within {} iterations (max R = {:?}); continuing with main run",
                self.config.pre_run_max,
                max_rhat
            );
            self.end_pre_run(ConvergenceStatus::NotConverged);
        } else {
            for chain in &mut self.chains {
                chain.adapt();
                trace!(
                    target: label,
                    "chain {}: proposal scale {:.4}, widths {:?}",
                    chain.id,
                    chain.proposal().scale(),
                    chain.proposal().widths()
                );
            }
        }
    }

    fn end_pre_run(&mut self, status: ConvergenceStatus) {
        self.status = status;
        self.chains.iter_mut().for_each(Chain::start_run);
    }

    fn summary(&self, cancelled: bool) -> RunSummary {
        RunSummary {
            status: self.status,
            pre_run_iterations: self.pre_run_done,
            run_iterations: self.run_done,
            acceptance_rates: self.chains.iter().map(Chain::acceptance_rate).collect(),
            rhat: self.last_rhat.as_ref().map(|r| r.to_vec()),
            posterior: self.posterior_summary(),
            cancelled,
        }
    }

    /// Summary of the main-run samples so far, merged over chains in chain
    /// order.
    pub fn posterior_summary(&self) -> Option<PosteriorSummary> {
        let mut merged = RunningStats::new(self.space.len());
        for chain in &self.chains {
            merged.merge(chain.run_stats());
        }
        if merged.count() == 0 {
            return None;
        }
        let (mode_log_probability, mode) = self
            .chains
            .iter()
            .filter_map(Chain::mode)
            .fold(None::<&(f64, Vec<f64>)>, |best, m| match best {
                Some(b) if b.0 >= m.0 => Some(b),
                _ => Some(m),
            })
            .cloned()?;
        Some(PosteriorSummary {
            names: self.space.names(),
            mean: merged.mean().to_vec(),
            std: merged.std().to_vec(),
            mode,
            mode_log_probability,
            n_samples: merged.count(),
        })
    }
}

/// Appends one block of records to the sink, chain by chain.
fn write_block<S: PersistenceSink>(sink: &mut S, records: &[Vec<SampleRecord>]) -> Result<()> {
    for chain_records in records {
        for record in chain_records {
            sink.append(record)?;
        }
    }
    sink.flush()
}

fn update_bars(bars: Option<&[ProgressBar]>, chains: &[Chain], position: usize) {
    if let Some(bars) = bars {
        for (pb, chain) in bars.iter().zip(chains) {
            pb.set_position(position as u64);
            pb.set_message(format!("AcceptRate={:.3}", chain.acceptance_rate()));
        }
    }
}
