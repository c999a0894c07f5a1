//! Error paths: invalid configuration fails before sampling, sink failures and
//! faulting chains abort the run, and undefined log-posteriors are rejected
//! without stopping it.

use std::sync::atomic::{AtomicUsize, Ordering};

use bayes_mcmc::chain::SampleRecord;
use bayes_mcmc::distributions::{DiagonalGaussian, FitModel};
use bayes_mcmc::ensemble::Dataset;
use bayes_mcmc::error::{Error, Result};
use bayes_mcmc::io::{MemorySink, PersistenceSink};
use bayes_mcmc::metropolis_hastings::{ConvergenceStatus, MetropolisHastings, SamplerConfig};
use bayes_mcmc::models::TemplateModel;
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SamplerConfig {
        SamplerConfig::new(Precision::Quick)
            .set_seed(1)
            .set_run_iterations(1_000)
    }

    fn one_param() -> ParameterSpace {
        ParameterSpace::new().add(Parameter::new("x", -5.0, 5.0))
    }

    #[test]
    fn test_invalid_parameter_spaces() {
        let spaces = [
            ParameterSpace::new(),
            ParameterSpace::new().add(Parameter::new("x", 1.0, 1.0)),
            ParameterSpace::new().add(Parameter::new("x", 0.0, f64::INFINITY)),
            ParameterSpace::new()
                .add(Parameter::new("x", 0.0, 1.0))
                .add(Parameter::new("x", 0.0, 1.0)),
        ];
        for space in spaces {
            let err = MetropolisHastings::new(DiagonalGaussian::standard(1), space, config())
                .unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{err}");
        }
        let mut space = one_param();
        assert!(matches!(space.fix("x", 10.0), Err(Error::Configuration(_))));
        assert!(matches!(space.fix("y", 0.0), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_missing_dataset_fails_before_sampling() {
        let model = TemplateModel::new(3)
            .add_process("signal", vec![1.0, 2.0, 1.0], 1.0)
            .and_then(|m| m.add_process("background", vec![1.0, 1.0, 1.0], 1.0))
            .unwrap();
        let space = model.parameter_space(100.0);
        for data in [Dataset::new(vec![]), Dataset::new(vec![4.0, 5.0])] {
            let mut mh = MetropolisHastings::new(model.clone(), space.clone(), config()).unwrap();
            let mut sink = MemorySink::new();
            let err = mh.run(&data, &mut sink).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{err}");
            assert!(sink.is_empty());
            assert_eq!(mh.status(), ConvergenceStatus::Pending);
        }
    }

    #[test]
    fn test_unknown_precision_name() {
        let err = "ultra".parse::<Precision>().unwrap_err();
        assert!(err.to_string().contains("ultra"));
    }

    struct FailingSink {
        written: usize,
        limit: usize,
    }

    impl PersistenceSink for FailingSink {
        fn append(&mut self, _record: &SampleRecord) -> Result<()> {
            if self.written == self.limit {
                return Err(Error::Persistence("disk full".to_string()));
            }
            self.written += 1;
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let mut mh =
            MetropolisHastings::new(DiagonalGaussian::standard(1), one_param(), config()).unwrap();
        let mut sink = FailingSink {
            written: 0,
            limit: 700,
        };
        let err = mh.run(&(), &mut sink).unwrap_err();
        assert!(matches!(err, Error::Persistence(ref m) if m == "disk full"));
        assert_eq!(sink.written, 700);
    }

    /// Panics once it has been evaluated a given number of times.
    struct Fragile {
        calls: AtomicUsize,
        limit: usize,
    }

    impl FitModel for Fragile {
        type Data = ();

        fn evaluate(&self, parameters: &[f64], _data: &()) -> f64 {
            if self.calls.fetch_add(1, Ordering::Relaxed) >= self.limit {
                panic!("numerical integration diverged");
            }
            -0.5 * parameters[0] * parameters[0]
        }
    }

    #[test]
    fn test_worker_failure_aborts_run() {
        for workers in [1, 2] {
            let model = Fragile {
                calls: AtomicUsize::new(0),
                limit: 5_000,
            };
            let mut mh =
                MetropolisHastings::new(model, one_param(), config().set_workers(workers)).unwrap();
            let err = mh.run(&(), MemorySink::new()).unwrap_err();
            match err {
                Error::WorkerFailure { chain, message } => {
                    assert!(chain < 2);
                    assert!(message.contains("diverged"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    /// NaN for negative arguments, a standard normal otherwise.
    struct HalfDefined;

    impl FitModel for HalfDefined {
        type Data = ();

        fn evaluate(&self, parameters: &[f64], _data: &()) -> f64 {
            if parameters[0] < 0.0 {
                f64::NAN
            } else {
                -0.5 * parameters[0] * parameters[0]
            }
        }
    }

    #[test]
    fn test_nan_log_posterior_is_rejected() {
        let mut mh = MetropolisHastings::new(
            HalfDefined,
            one_param(),
            config().set_record_pre_run(true),
        )
        .unwrap();
        let mut sink = MemorySink::new();
        let summary = mh.run(&(), &mut sink).unwrap();
        assert!(!sink.is_empty());
        assert!(sink
            .records
            .iter()
            .all(|r| r.parameters[0] >= 0.0 && r.log_probability.is_finite()));
        assert_eq!(summary.run_iterations, 1_000);
    }
}
