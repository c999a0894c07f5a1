//! Tests that sampler output depends only on the seed: not on the number of
//! worker threads, and not on whether a run was cancelled and resumed.

use bayes_mcmc::chain::{Phase, SampleRecord};
use bayes_mcmc::distributions::DiagonalGaussian;
use bayes_mcmc::error::Result;
use bayes_mcmc::io::{MemorySink, PersistenceSink};
use bayes_mcmc::metropolis_hastings::{CancelToken, MetropolisHastings, RunSummary, SamplerConfig};
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

#[cfg(test)]
mod tests {
    use super::*;

    fn space(dim: usize) -> ParameterSpace {
        (0..dim).fold(ParameterSpace::new(), |s, i| {
            s.add(Parameter::new(format!("x{i}"), -10.0, 10.0))
        })
    }

    fn run(config: SamplerConfig, dim: usize) -> (MemorySink, RunSummary) {
        let mut mh = MetropolisHastings::new(DiagonalGaussian::standard(dim), space(dim), config)
            .expect("valid sampler");
        let mut sink = MemorySink::new();
        let summary = mh.run(&(), &mut sink).expect("run succeeds");
        (sink, summary)
    }

    /// Serial and four-worker runs of the same seed produce the same 400
    /// records, field by field.
    #[test]
    fn test_seed_11_serial_matches_parallel() {
        let config = |workers| {
            SamplerConfig::new(Precision::Medium)
                .set_seed(11)
                .set_chains(4)
                .set_run_iterations(100)
                .set_workers(workers)
        };
        let (serial, _) = run(config(1), 1);
        let (parallel, _) = run(config(4), 1);

        assert_eq!(serial.len(), 400);
        assert_eq!(parallel.len(), 400);
        for chain in 0..4 {
            let a = serial.chain(chain);
            let b = parallel.chain(chain);
            assert_eq!(a.len(), 100);
            for (i, (ra, rb)) in a.iter().zip(&b).enumerate() {
                assert_eq!(ra.chain, rb.chain);
                assert_eq!(ra.iteration, i as u64);
                assert_eq!(ra.iteration, rb.iteration);
                assert_eq!(ra.phase, Phase::Run);
                assert_eq!(ra.phase, rb.phase);
                assert_eq!(ra.log_probability.to_bits(), rb.log_probability.to_bits());
                assert_eq!(ra.parameters[0].to_bits(), rb.parameters[0].to_bits());
            }
        }
    }

    #[test]
    fn test_worker_counts_give_identical_records() {
        let config = |workers| {
            SamplerConfig::new(Precision::Quick)
                .set_seed(2024)
                .set_chains(8)
                .set_run_iterations(2_000)
                .set_record_pre_run(true)
                .set_workers(workers)
        };
        let (reference, reference_summary) = run(config(1), 3);
        for workers in [2, 4, 8] {
            let (sink, summary) = run(config(workers), 3);
            assert_eq!(sink, reference, "workers = {workers}");
            assert_eq!(summary, reference_summary, "workers = {workers}");
        }
    }

    #[test]
    fn test_record_count_invariant() {
        for (chains, iterations) in [(2, 1), (3, 777), (5, 1_500)] {
            let config = SamplerConfig::new(Precision::Quick)
                .set_seed(5)
                .set_chains(chains)
                .set_run_iterations(iterations);
            let (sink, summary) = run(config, 2);
            assert_eq!(sink.len(), chains * iterations);
            assert_eq!(summary.run_iterations, iterations);
            for c in 0..chains {
                assert_eq!(sink.chain(c).len(), iterations);
            }
            assert!(sink.records.iter().all(|r| r.phase == Phase::Run));
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let config = |seed| SamplerConfig::new(Precision::Quick).set_seed(seed).set_run_iterations(100);
        let (a, _) = run(config(1), 1);
        let (b, _) = run(config(2), 1);
        assert_ne!(a, b);
    }

    /// Cancels the run once a given number of records has been written.
    struct CancellingSink {
        inner: MemorySink,
        token: CancelToken,
        after: usize,
    }

    impl PersistenceSink for CancellingSink {
        fn append(&mut self, record: &SampleRecord) -> Result<()> {
            self.inner.append(record)?;
            if self.inner.len() == self.after {
                self.token.cancel();
            }
            Ok(())
        }
    }

    #[test]
    fn test_cancel_and_resume_matches_uninterrupted_run() {
        let config = || {
            SamplerConfig::new(Precision::Quick)
                .set_seed(77)
                .set_run_iterations(3_000)
                .set_check_interval(500)
        };
        let (reference, reference_summary) = run(config(), 2);

        let mut mh =
            MetropolisHastings::new(DiagonalGaussian::standard(2), space(2), config()).unwrap();
        let token = mh.cancel_token();
        let mut sink = CancellingSink {
            inner: MemorySink::new(),
            token: token.clone(),
            after: 2 * 1_000,
        };
        let partial = mh.run(&(), &mut sink).unwrap();
        assert!(partial.cancelled);
        assert!(!partial.is_complete());
        assert_eq!(partial.run_iterations, 1_000);
        assert_eq!(sink.inner.len(), 2 * 1_000);

        token.reset();
        let resumed = mh.run(&(), &mut sink).unwrap();
        assert!(!resumed.cancelled);
        assert_eq!(sink.inner, reference);
        assert_eq!(resumed, reference_summary);
    }

    #[test]
    fn test_cancel_before_start_leaves_nothing_written() {
        let config = || SamplerConfig::new(Precision::Quick).set_seed(8).set_run_iterations(500);
        let (reference, _) = run(config(), 1);

        let mut mh =
            MetropolisHastings::new(DiagonalGaussian::standard(1), space(1), config()).unwrap();
        let token = mh.cancel_token();
        token.cancel();
        let mut sink = MemorySink::new();
        let summary = mh.run(&(), &mut sink).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.pre_run_iterations, 0);
        assert!(sink.is_empty());

        token.reset();
        mh.run(&(), &mut sink).unwrap();
        assert_eq!(sink, reference);
    }
}
