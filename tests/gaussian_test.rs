//! Statistical checks of the sampler on Gaussian targets with known moments.
//!
//! Monte Carlo standard errors are estimated with batch means, which accounts
//! for the autocorrelation of the chains.

use approx::assert_abs_diff_eq;
use bayes_mcmc::distributions::{DiagonalGaussian, GaussianPrior};
use bayes_mcmc::io::MemorySink;
use bayes_mcmc::metropolis_hastings::{ConvergenceStatus, MetropolisHastings, SamplerConfig};
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: usize = 1_000;

    /// Mean of `f` over each chain's samples, batch by batch, and the standard
    /// error of the overall mean derived from the spread of the batch means.
    fn batch_means(chains: &[Vec<f64>], f: impl Fn(f64) -> f64) -> (f64, f64) {
        let batches: Vec<f64> = chains
            .iter()
            .flat_map(|c| {
                c.chunks_exact(BATCH)
                    .map(|b| b.iter().map(|&x| f(x)).sum::<f64>() / BATCH as f64)
                    .collect::<Vec<_>>()
            })
            .collect();
        let n = batches.len() as f64;
        let mean = batches.iter().sum::<f64>() / n;
        let var = batches.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, (var / n).sqrt())
    }

    fn chain_values(sink: &MemorySink, n_chains: usize) -> Vec<Vec<f64>> {
        (0..n_chains)
            .map(|c| sink.chain(c).iter().map(|r| r.parameters[0]).collect())
            .collect()
    }

    #[test]
    fn test_one_d_gaussian_moments() {
        const MU: f64 = 2.0;
        const SIGMA: f64 = 0.5;
        const N_CHAINS: usize = 4;

        let space = ParameterSpace::new().add(Parameter::new("x", -10.0, 10.0));
        let config = SamplerConfig::new(Precision::Quick)
            .set_seed(42)
            .set_chains(N_CHAINS)
            .set_pre_run_max(50_000)
            .set_run_iterations(50_000)
            .set_workers(4);
        let target = DiagonalGaussian::new(vec![MU], vec![SIGMA]);
        let mut mh = MetropolisHastings::new(target, space, config).unwrap();
        let mut sink = MemorySink::new();
        let summary = mh.run(&(), &mut sink).unwrap();
        assert_eq!(summary.status, ConvergenceStatus::Converged);

        let chains = chain_values(&sink, N_CHAINS);
        let (mean, mean_se) = batch_means(&chains, |x| x);
        assert!(
            (mean - MU).abs() < 3.0 * mean_se,
            "mean {mean} vs {MU} (se {mean_se})"
        );
        let (var, var_se) = batch_means(&chains, |x| (x - mean).powi(2));
        assert!(
            (var - SIGMA * SIGMA).abs() < 3.0 * var_se,
            "variance {var} vs {} (se {var_se})",
            SIGMA * SIGMA
        );

        let post = summary.posterior.unwrap();
        assert_abs_diff_eq!(post.mean[0], mean, epsilon = 1e-9);
        assert_abs_diff_eq!(post.mode[0], MU, epsilon = 0.05);
    }

    #[test]
    fn test_acceptance_rate_settles_in_range() {
        for dim in [1, 3, 5] {
            let space = (0..dim).fold(ParameterSpace::new(), |s, i| {
                s.add(Parameter::new(format!("x{i}"), -20.0, 20.0))
            });
            let config = SamplerConfig::new(Precision::Quick)
                .set_seed(7 + dim as u64)
                .set_pre_run_max(50_000)
                .set_run_iterations(20_000);
            let mut mh =
                MetropolisHastings::new(DiagonalGaussian::standard(dim), space, config).unwrap();
            let summary = mh.run(&(), MemorySink::new()).unwrap();
            for rate in summary.acceptance_rates {
                assert!(
                    (0.1..=0.6).contains(&rate),
                    "dim {dim}: acceptance rate {rate}"
                );
            }
        }
    }

    /// A Gaussian prior times a Gaussian likelihood: the posterior is Gaussian
    /// with precision-weighted mean.
    #[test]
    fn test_prior_is_included_in_posterior() {
        let space = ParameterSpace::new()
            .add(Parameter::new("x", -20.0, 20.0).set_prior(GaussianPrior::new(4.0, 1.0)));
        let config = SamplerConfig::new(Precision::Quick)
            .set_seed(9)
            .set_run_iterations(40_000);
        let mut mh = MetropolisHastings::new(DiagonalGaussian::standard(1), space, config).unwrap();
        let summary = mh.run(&(), MemorySink::new()).unwrap();
        let post = summary.posterior.unwrap();
        assert_abs_diff_eq!(post.mean[0], 2.0, epsilon = 0.08);
        assert_abs_diff_eq!(post.std[0], 0.5_f64.sqrt(), epsilon = 0.05);
    }

    #[test]
    fn test_samples_stay_in_range() {
        // Most of the mass lies outside [0, 1].
        let space = ParameterSpace::new().add(Parameter::new("x", 0.0, 1.0));
        let target = DiagonalGaussian::new(vec![-1.0], vec![1.0]);
        let config = SamplerConfig::new(Precision::Quick)
            .set_seed(3)
            .set_record_pre_run(true);
        let mut mh = MetropolisHastings::new(target, space, config).unwrap();
        let mut sink = MemorySink::new();
        mh.run(&(), &mut sink).unwrap();
        assert!(sink
            .records
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.parameters[0])));
    }
}
