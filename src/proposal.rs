/*!
Adaptive Gaussian random-walk proposals.

Each chain owns one [`ProposalEngine`]. A candidate is the current point plus
independent Gaussian noise on every free parameter, with per-parameter width
`scale · σ_i`. During the pre-run the owning chain feeds the engine its
acceptance rate and recent sample spread at every check interval:

* acceptance below the band minimum halves `scale`, above the maximum doubles it;
* `σ_i` tracks the standard deviation of the recent samples.

Once the chain enters its main run the engine is frozen and its proposal
kernel stays fixed, which keeps the main-run samples a valid Markov chain.
*/

use rand::Rng;
use rand_distr::StandardNormal;

use crate::parameters::ParameterSpace;

const MIN_SCALE: f64 = 1e-6;
const MAX_SCALE: f64 = 100.0;

/// Target acceptance-rate band for the pre-run adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceBand {
    pub min: f64,
    pub max: f64,
}

impl Default for AcceptanceBand {
    fn default() -> Self {
        Self {
            min: 0.15,
            max: 0.5,
        }
    }
}

impl AcceptanceBand {
    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min && rate <= self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposalEngine {
    free: Vec<usize>,
    widths: Vec<f64>,
    scale: f64,
    band: AcceptanceBand,
    frozen: bool,
}

impl ProposalEngine {
    /// Creates an engine whose initial widths are a quarter of every free
    /// parameter's range.
    pub fn new(space: &ParameterSpace, band: AcceptanceBand) -> Self {
        let free = space.free_indices();
        let widths = space.iter().map(|p| p.range_width() / 4.0).collect();
        let scale = 2.38 / (free.len().max(1) as f64).sqrt();
        Self {
            free,
            widths,
            scale,
            band,
            frozen: false,
        }
    }

    /// Draws a candidate. Consumes exactly one standard-normal draw per free
    /// parameter from `rng` and nothing else.
    pub fn propose<R: Rng + ?Sized>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        let mut candidate = current.to_vec();
        for &i in &self.free {
            let z: f64 = rng.sample(StandardNormal);
            candidate[i] += self.scale * self.widths[i] * z;
        }
        candidate
    }

    /// Rescales the proposal given the acceptance rate and per-parameter
    /// standard deviations observed since the previous call. Ignored once
    /// frozen.
    pub fn adapt(&mut self, acceptance_rate: f64, sample_std: &[f64]) {
        if self.frozen {
            return;
        }
        if acceptance_rate < self.band.min {
            self.scale = (self.scale * 0.5).max(MIN_SCALE);
        } else if acceptance_rate > self.band.max {
            self.scale = (self.scale * 2.0).min(MAX_SCALE);
        }
        for &i in &self.free {
            if let Some(&s) = sample_std.get(i) {
                if s.is_finite() && s > 0.0 {
                    self.widths[i] = s;
                }
            }
        }
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn band(&self) -> AcceptanceBand {
        self.band
    }
}
