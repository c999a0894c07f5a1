/*!
A single Metropolis–Hastings random walk.

A [`Chain`] exclusively owns its state, its proposal engine and its random
stream. The stream is seeded once from the chain's seed and never touched by
anything else, so the whole trajectory of a chain is a function of its seed,
the posterior and the sequence of phase transitions applied to it. This is
what makes parallel execution reproduce serial execution exactly.

# Examples

```rust
use bayes_mcmc::chain::{Chain, Phase, Posterior};
use bayes_mcmc::distributions::DiagonalGaussian;
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::proposal::AcceptanceBand;

let space = ParameterSpace::new().add(Parameter::new("x", -10.0, 10.0));
let model = DiagonalGaussian::standard(1);
let posterior = Posterior::new(&model, &space, &());

let mut chain = Chain::start(0, 42, &posterior, AcceptanceBand::default())?;
let record = chain.step(&posterior).unwrap();
assert_eq!(record.phase, Phase::PreRun);
assert_eq!(record.iteration, 0);
# Ok::<(), bayes_mcmc::error::Error>(())
```
*/

use std::fmt;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::distributions::FitModel;
use crate::error::{Error, Result};
use crate::parameters::ParameterSpace;
use crate::proposal::{AcceptanceBand, ProposalEngine};
use crate::stats::{ChainStats, RunningStats};

/// Attempts at finding a starting point with finite log-probability.
const MAX_INIT_ATTEMPTS: usize = 100;

/// Sampling phase a record was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreRun,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreRun => write!(f, "prerun"),
            Phase::Run => write!(f, "run"),
        }
    }
}

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Initializing,
    PreRun,
    Run,
    Finished,
}

/// One iteration of one chain: the current state after the accept/reject
/// decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub chain: usize,
    pub iteration: u64,
    pub log_probability: f64,
    pub phase: Phase,
    pub parameters: Vec<f64>,
}

/// Mutable state of a chain. Iteration and acceptance counters restart at
/// zero when the chain enters its main run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    pub parameters: Vec<f64>,
    pub log_probability: f64,
    pub iteration: u64,
    pub phase: Phase,
    pub n_accepted: u64,
}

/// The log-posterior seen by the chains: priors and ranges from the parameter
/// space plus the model's evaluation of the dataset.
pub struct Posterior<'a, M: FitModel> {
    pub model: &'a M,
    pub space: &'a ParameterSpace,
    pub data: &'a M::Data,
}

impl<'a, M: FitModel> Posterior<'a, M> {
    pub fn new(model: &'a M, space: &'a ParameterSpace, data: &'a M::Data) -> Self {
        Self { model, space, data }
    }

    /// Log-posterior of `x`; `-inf` outside the ranges or when the model
    /// returns NaN.
    pub fn log_prob(&self, x: &[f64]) -> f64 {
        let prior = self.space.log_prior(x);
        if prior == f64::NEG_INFINITY || prior.is_nan() {
            return f64::NEG_INFINITY;
        }
        let lp = prior + self.model.evaluate(x, self.data);
        if lp.is_nan() {
            f64::NEG_INFINITY
        } else {
            lp
        }
    }
}

/// Metropolis acceptance for a symmetric proposal, in log space.
fn accept(log_u: f64, candidate_lp: f64, current_lp: f64) -> bool {
    if candidate_lp == f64::NEG_INFINITY {
        false
    } else if current_lp == f64::NEG_INFINITY {
        true
    } else {
        log_u < candidate_lp - current_lp
    }
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub id: usize,
    pub seed: u64,
    rng: SmallRng,
    proposal: ProposalEngine,
    state: ChainState,
    status: ChainStatus,
    window: RunningStats,
    window_accepted: u64,
    run_stats: RunningStats,
    mode: Option<(f64, Vec<f64>)>,
}

impl Chain {
    /// Creates a chain in the [`ChainStatus::Initializing`] state. It has no
    /// starting point yet; see [`Chain::initialize`].
    pub fn new(id: usize, seed: u64, space: &ParameterSpace, band: AcceptanceBand) -> Self {
        let n = space.len();
        Self {
            id,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            proposal: ProposalEngine::new(space, band),
            state: ChainState {
                parameters: Vec::new(),
                log_probability: f64::NEG_INFINITY,
                iteration: 0,
                phase: Phase::PreRun,
                n_accepted: 0,
            },
            status: ChainStatus::Initializing,
            window: RunningStats::new(n),
            window_accepted: 0,
            run_stats: RunningStats::new(n),
            mode: None,
        }
    }

    /// Draws the starting point uniformly inside the parameter ranges from the
    /// chain's own random stream and enters the pre-run. Up to
    /// [`MAX_INIT_ATTEMPTS`] points are tried until one has finite
    /// log-probability.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if no finite starting point is found, which
    /// usually means the dataset is missing or does not match the model. The
    /// chain then stays in [`ChainStatus::Initializing`].
    pub fn initialize<M: FitModel>(&mut self, posterior: &Posterior<'_, M>) -> Result<()> {
        if self.status != ChainStatus::Initializing {
            return Ok(());
        }
        let space = posterior.space;
        for _ in 0..MAX_INIT_ATTEMPTS {
            let parameters = space.sample_uniform(&mut self.rng);
            let log_probability = posterior.log_prob(&parameters);
            if log_probability.is_finite() {
                self.state.parameters = parameters;
                self.state.log_probability = log_probability;
                self.status = ChainStatus::PreRun;
                return Ok(());
            }
        }
        Err(Error::config(format!(
            "chain {}: no starting point with finite log-probability in {} attempts \
             (missing or mismatched dataset?)",
            self.id, MAX_INIT_ATTEMPTS
        )))
    }

    /// [`Chain::new`] followed by [`Chain::initialize`].
    pub fn start<M: FitModel>(
        id: usize,
        seed: u64,
        posterior: &Posterior<'_, M>,
        band: AcceptanceBand,
    ) -> Result<Self> {
        let mut chain = Self::new(id, seed, posterior.space, band);
        chain.initialize(posterior)?;
        Ok(chain)
    }

    /// Performs one Metropolis–Hastings iteration and returns the record of
    /// the resulting state, or `None` before initialization and once the chain
    /// has finished.
    ///
    /// The random stream is consumed identically whatever the outcome: one
    /// normal draw per free parameter for the proposal, then one uniform for
    /// the decision.
    pub fn step<M: FitModel>(&mut self, posterior: &Posterior<'_, M>) -> Option<SampleRecord> {
        let phase = match self.status {
            ChainStatus::PreRun => Phase::PreRun,
            ChainStatus::Run => Phase::Run,
            ChainStatus::Initializing | ChainStatus::Finished => return None,
        };

        let candidate = self.proposal.propose(&self.state.parameters, &mut self.rng);
        let candidate_lp = posterior.log_prob(&candidate);
        let u: f64 = self.rng.gen();
        let accepted = accept(u.ln(), candidate_lp, self.state.log_probability);
        if accepted {
            self.state.parameters = candidate;
            self.state.log_probability = candidate_lp;
            self.state.n_accepted += 1;
            self.window_accepted += 1;
        }

        let record = SampleRecord {
            chain: self.id,
            iteration: self.state.iteration,
            log_probability: self.state.log_probability,
            phase,
            parameters: self.state.parameters.clone(),
        };
        self.state.iteration += 1;
        self.window.push(&self.state.parameters);

        if phase == Phase::Run {
            self.run_stats.push(&self.state.parameters);
            let better = self
                .mode
                .as_ref()
                .map_or(true, |(lp, _)| self.state.log_probability > *lp);
            if better {
                self.mode = Some((self.state.log_probability, self.state.parameters.clone()));
            }
        }
        Some(record)
    }

    /// Runs `n_steps` iterations and returns their records in order.
    pub fn run<M: FitModel>(
        &mut self,
        n_steps: usize,
        posterior: &Posterior<'_, M>,
    ) -> Vec<SampleRecord> {
        let mut out = Vec::with_capacity(n_steps);
        for _ in 0..n_steps {
            match self.step(posterior) {
                Some(record) => out.push(record),
                None => break,
            }
        }
        out
    }

    /// Statistics of the samples drawn since the last call to
    /// [`Chain::adapt`] or [`Chain::reset_window`].
    pub fn window_stats(&self) -> ChainStats {
        let n = self.window.count();
        ChainStats {
            n,
            p_accept: if n > 0 {
                self.window_accepted as f64 / n as f64
            } else {
                0.0
            },
            mean: self.window.mean().clone(),
            sm2: self.window.variance(),
        }
    }

    /// Feeds the current window to the proposal engine and starts a new window.
    pub fn adapt(&mut self) {
        let stats = self.window_stats();
        if stats.n > 0 {
            let std: Vec<f64> = stats.sm2.iter().map(|v| v.sqrt()).collect();
            self.proposal.adapt(stats.p_accept, &std);
        }
        self.reset_window();
    }

    pub fn reset_window(&mut self) {
        self.window.reset();
        self.window_accepted = 0;
    }

    /// Moves the chain from its pre-run into the main run: freezes the
    /// proposal and restarts the counters.
    pub fn start_run(&mut self) {
        if self.status != ChainStatus::PreRun {
            return;
        }
        self.proposal.freeze();
        self.status = ChainStatus::Run;
        self.state.phase = Phase::Run;
        self.state.iteration = 0;
        self.state.n_accepted = 0;
        self.reset_window();
    }

    pub fn finish(&mut self) {
        self.status = ChainStatus::Finished;
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn proposal(&self) -> &ProposalEngine {
        &self.proposal
    }

    /// Acceptance rate over the current phase.
    pub fn acceptance_rate(&self) -> f64 {
        if self.state.iteration == 0 {
            0.0
        } else {
            self.state.n_accepted as f64 / self.state.iteration as f64
        }
    }

    /// Running statistics of the main-run samples.
    pub fn run_stats(&self) -> &RunningStats {
        &self.run_stats
    }

    /// Highest-probability main-run state seen so far.
    pub fn mode(&self) -> Option<&(f64, Vec<f64>)> {
        self.mode.as_ref()
    }
}
