/*!
Binned template fit of a single channel.

Each process contributes a shape (its template, a histogram of Monte Carlo
counts) scaled by an efficiency and by its expected yield. The yields are the
model parameters, in the order the processes were added. The expected count in
bin `i` is

```text
λ_i = Σ_p yield_p · eff_p · t_{p,i} / Σ_j t_{p,j}
```

and the log-likelihood of observed counts `n_i` is the Poisson
`Σ_i (n_i ln λ_i − λ_i)`, with the `ln n_i!` terms dropped since they do not
depend on the parameters.

# Examples

```rust
use bayes_mcmc::distributions::FitModel;
use bayes_mcmc::ensemble::Dataset;
use bayes_mcmc::models::TemplateModel;

let model = TemplateModel::new(2)
    .add_process("signal", vec![0.0, 10.0], 1.0)?
    .add_process("background", vec![5.0, 5.0], 0.5)?;
assert_eq!(model.expected(&[20.0, 40.0]), vec![10.0, 30.0]);

let data = Dataset::new(vec![10.0, 30.0]);
assert!(model.evaluate(&[20.0, 40.0], &data) > model.evaluate(&[0.0, 40.0], &data));
# Ok::<(), bayes_mcmc::error::Error>(())
```
*/

use crate::distributions::FitModel;
use crate::ensemble::{fluctuate, Dataset, TemplateFluctuation};
use crate::error::{Error, Result};
use crate::parameters::{Parameter, ParameterSpace};

/// One contribution to the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub name: String,
    pub template: Vec<f64>,
    pub efficiency: f64,
    norm: f64,
}

impl Process {
    /// Template normalized to unit sum.
    pub fn shape(&self) -> impl Iterator<Item = f64> + '_ {
        self.template.iter().map(move |t| t / self.norm)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateModel {
    n_bins: usize,
    processes: Vec<Process>,
}

impl TemplateModel {
    pub fn new(n_bins: usize) -> Self {
        Self {
            n_bins,
            processes: Vec::new(),
        }
    }

    /// Adds a process. The template must have one non-negative entry per bin
    /// and a positive sum; the efficiency must lie in `(0, 1]`.
    pub fn add_process(
        mut self,
        name: impl Into<String>,
        template: Vec<f64>,
        efficiency: f64,
    ) -> Result<Self> {
        let name = name.into();
        if template.len() != self.n_bins {
            return Err(Error::config(format!(
                "template of '{name}' has {} bins, channel has {}",
                template.len(),
                self.n_bins
            )));
        }
        if template.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(Error::config(format!(
                "template of '{name}' has negative or non-finite entries"
            )));
        }
        let norm: f64 = template.iter().sum();
        if norm <= 0.0 {
            return Err(Error::config(format!("template of '{name}' is empty")));
        }
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(Error::config(format!(
                "efficiency of '{name}' must be in (0, 1], got {efficiency}"
            )));
        }
        if self.processes.iter().any(|p| p.name == name) {
            return Err(Error::config(format!("duplicate process '{name}'")));
        }
        self.processes.push(Process {
            name,
            template,
            efficiency,
            norm,
        });
        Ok(self)
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process_names(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.name.clone()).collect()
    }

    /// One yield parameter per process over `[0, max_yield]`, with flat priors.
    pub fn parameter_space(&self, max_yield: f64) -> ParameterSpace {
        self.processes
            .iter()
            .fold(ParameterSpace::new(), |space, p| {
                space.add(Parameter::new(p.name.clone(), 0.0, max_yield))
            })
    }

    /// Expected count per bin for the given yields.
    pub fn expected(&self, yields: &[f64]) -> Vec<f64> {
        let mut lambda = vec![0.0; self.n_bins];
        for (process, &y) in self.processes.iter().zip(yields) {
            let scale = y * process.efficiency;
            for (l, s) in lambda.iter_mut().zip(process.shape()) {
                *l += scale * s;
            }
        }
        lambda
    }
}

impl FitModel for TemplateModel {
    type Data = Dataset;

    fn evaluate(&self, parameters: &[f64], data: &Dataset) -> f64 {
        if data.len() != self.n_bins {
            return f64::NEG_INFINITY;
        }
        self.expected(parameters)
            .iter()
            .zip(&data.counts)
            .map(|(&lambda, &n)| {
                if lambda > 0.0 {
                    n * lambda.ln() - lambda
                } else if n > 0.0 {
                    f64::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .sum()
    }
}

impl TemplateFluctuation for TemplateModel {
    fn n_bins(&self) -> usize {
        self.n_bins
    }

    fn n_parameters(&self) -> usize {
        self.processes.len()
    }

    fn expected(&self, parameters: &[f64]) -> Vec<f64> {
        TemplateModel::expected(self, parameters)
    }

    /// Redraws every template bin from a Poisson distribution around its
    /// current content. A process whose redrawn template comes out empty keeps
    /// its original template.
    fn fluctuate_templates(&self, seed: u64) -> Self {
        let mut model = self.clone();
        for (k, process) in model.processes.iter_mut().enumerate() {
            let counts = fluctuate(&process.template, seed.wrapping_add(k as u64));
            let norm = counts.iter().sum::<u64>() as f64;
            if norm > 0.0 {
                process.template = counts.iter().map(|&c| c as f64).collect();
                process.norm = norm;
            }
        }
        model
    }
}
