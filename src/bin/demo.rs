//! Runs a standard-normal target serially and on four workers and checks that
//! both runs produce the same records, then performs a small ensemble test of a
//! signal-plus-background template fit.
//!
//! Usage: `demo [precision]`, e.g. `RUST_LOG=info demo quick`.

use std::error::Error;

use bayes_mcmc::distributions::{DiagonalGaussian, GaussianPrior};
use bayes_mcmc::ensemble::{summarize_pulls, Dataset, EnsembleConfig, EnsembleFacility, EnsembleMode};
use bayes_mcmc::io::MemorySink;
use bayes_mcmc::metropolis_hastings::{MetropolisHastings, SamplerConfig};
use bayes_mcmc::models::TemplateModel;
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::precision::Precision;

const SEED: u64 = 11;
const N_ENSEMBLES: usize = 200;

fn sample_gaussian(workers: usize) -> Result<MemorySink, Box<dyn Error>> {
    let space = ParameterSpace::new().add(Parameter::new("x", -10.0, 10.0));
    let config = SamplerConfig::new(Precision::Medium)
        .set_seed(SEED)
        .set_chains(4)
        .set_workers(workers)
        .set_run_iterations(100)
        .set_label(format!("demo::gaussian::w{workers}"));
    let mut mh = MetropolisHastings::new(DiagonalGaussian::standard(1), space, config)?;
    let mut sink = MemorySink::new();
    mh.run(&(), &mut sink)?;
    Ok(sink)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let precision: Precision = match std::env::args().nth(1) {
        Some(name) => name.parse()?,
        None => Precision::Quick,
    };

    // Serial vs parallel
    let serial = sample_gaussian(1)?;
    let parallel = sample_gaussian(4)?;
    println!(
        "serial: {} records, parallel: {} records, identical: {}",
        serial.len(),
        parallel.len(),
        serial == parallel
    );
    if serial != parallel {
        return Err("serial and parallel runs differ".into());
    }

    // Ensemble test: signal peak on a flat background, with a Gaussian
    // constraint on the background yield.
    let model = TemplateModel::new(10)
        .add_process(
            "signal",
            vec![0.0, 1.0, 4.0, 12.0, 20.0, 20.0, 12.0, 4.0, 1.0, 0.0],
            1.0,
        )?
        .add_process("background", vec![10.0; 10], 1.0)?;
    let space = ParameterSpace::new()
        .add(Parameter::new("signal", 0.0, 400.0))
        .add(Parameter::new("background", 200.0, 400.0).set_prior(GaussianPrior::new(300.0, 10.0)));
    let truth = vec![100.0, 300.0];
    let baseline = Dataset::new(model.expected(&truth));

    let sampler = SamplerConfig::new(precision)
        .set_seed(SEED)
        .set_label("demo::ensemble");
    let config = EnsembleConfig::new(N_ENSEMBLES, EnsembleMode::Fluctuate).set_seed(SEED);
    let facility = EnsembleFacility::new(model, space, baseline, sampler, config)?.set_truth(truth);

    let results = facility.run(1_000)?;
    for (name, pulls) in ["signal", "background"].iter().zip(summarize_pulls(&results)) {
        println!(
            "{name:>10}: pull mean {:+.3}, pull std {:.3} ({} trials)",
            pulls.mean, pulls.std, pulls.count
        );
    }
    Ok(())
}
