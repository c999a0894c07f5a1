use bayes_mcmc::chain::{Chain, Posterior};
use bayes_mcmc::coordinator::ParallelCoordinator;
use bayes_mcmc::distributions::DiagonalGaussian;
use bayes_mcmc::parameters::{Parameter, ParameterSpace};
use bayes_mcmc::proposal::AcceptanceBand;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const DIM: usize = 20;
const N_CHAINS: usize = 8;
const BLOCK: usize = 1_000;

fn space() -> ParameterSpace {
    (0..DIM).fold(ParameterSpace::new(), |s, i| {
        s.add(Parameter::new(format!("x{i}"), -10.0, 10.0))
    })
}

fn bench_advance_block(c: &mut Criterion) {
    let space = space();
    let model = DiagonalGaussian::standard(DIM);
    let posterior = Posterior::new(&model, &space, &());
    let mut group = c.benchmark_group("advance_block");
    for workers in [1, 2, 4, 8] {
        let coordinator = ParallelCoordinator::new(workers, "bench").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            let mut chains: Vec<Chain> = (0..N_CHAINS)
                .map(|i| {
                    Chain::start(i, i as u64, &posterior, AcceptanceBand::default()).unwrap()
                })
                .collect();
            b.iter(|| {
                let _ = coordinator
                    .advance_block(&mut chains, BLOCK, &posterior)
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_advance_block);
criterion_main!(benches);
