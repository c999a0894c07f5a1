/*!
Advances whole chains on a pool of worker threads.

Work is split by chain, never within a chain: each worker takes complete
chains and runs them for a block of iterations without any synchronization.
Collecting the parallel iterator is the barrier at the end of the block. Since
a chain's trajectory depends only on its own random stream, its own history
and a reentrant model, the records produced are identical for every worker
count; the worker count only affects wall-clock time.
*/

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::trace;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::chain::{Chain, Posterior, SampleRecord};
use crate::distributions::FitModel;
use crate::error::{Error, Result};

pub struct ParallelCoordinator {
    workers: usize,
    pool: Option<ThreadPool>,
    label: String,
}

impl std::fmt::Debug for ParallelCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelCoordinator")
            .field("workers", &self.workers)
            .field("label", &self.label)
            .finish()
    }
}

impl ParallelCoordinator {
    /// Creates a coordinator with `workers` threads. With a single worker the
    /// chains are advanced on the calling thread and no pool is built.
    pub fn new(workers: usize, label: impl Into<String>) -> Result<Self> {
        let workers = workers.max(1);
        let pool = if workers > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| Error::config(format!("cannot build worker pool: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self {
            workers,
            pool,
            label: label.into(),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /**
    Advances every chain by `block_size` iterations and returns each chain's
    records, indexed like `chains`.

    A panic while advancing a chain is reported as [`Error::WorkerFailure`]
    for the lowest-indexed failing chain; the block's records are discarded
    and the run must be aborted.

    # Examples

    ```rust
    use bayes_mcmc::chain::{Chain, Posterior};
    use bayes_mcmc::coordinator::ParallelCoordinator;
    use bayes_mcmc::distributions::DiagonalGaussian;
    use bayes_mcmc::parameters::{Parameter, ParameterSpace};
    use bayes_mcmc::proposal::AcceptanceBand;

    let space = ParameterSpace::new().add(Parameter::new("x", -5.0, 5.0));
    let model = DiagonalGaussian::standard(1);
    let posterior = Posterior::new(&model, &space, &());
    let mut chains = (0..4)
        .map(|i| Chain::start(i, 7 + i as u64, &posterior, AcceptanceBand::default()))
        .collect::<bayes_mcmc::error::Result<Vec<Chain>>>()?;

    let coordinator = ParallelCoordinator::new(2, "doc")?;
    let blocks = coordinator.advance_block(&mut chains, 10, &posterior)?;
    assert_eq!(blocks.len(), 4);
    assert!(blocks.iter().all(|b| b.len() == 10));
    # Ok::<(), bayes_mcmc::error::Error>(())
    ```
    */
    pub fn advance_block<M: FitModel>(
        &self,
        chains: &mut [Chain],
        block_size: usize,
        posterior: &Posterior<'_, M>,
    ) -> Result<Vec<Vec<SampleRecord>>> {
        trace!(
            target: self.label.as_str(),
            "advancing {} chains by {} iterations on {} workers",
            chains.len(),
            block_size,
            self.workers
        );
        let results: Vec<Result<Vec<SampleRecord>>> = match &self.pool {
            None => chains
                .iter_mut()
                .map(|chain| run_guarded(chain, block_size, posterior))
                .collect(),
            Some(pool) => pool.install(|| {
                chains
                    .par_iter_mut()
                    .with_max_len(1)
                    .map(|chain| run_guarded(chain, block_size, posterior))
                    .collect()
            }),
        };
        results.into_iter().collect()
    }
}

fn run_guarded<M: FitModel>(
    chain: &mut Chain,
    block_size: usize,
    posterior: &Posterior<'_, M>,
) -> Result<Vec<SampleRecord>> {
    let id = chain.id;
    panic::catch_unwind(AssertUnwindSafe(|| chain.run(block_size, posterior))).map_err(|payload| {
        Error::WorkerFailure {
            chain: id,
            message: panic_message(payload.as_ref()),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
