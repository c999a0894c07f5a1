//! Named precision levels and the sampler settings they expand to.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    Low,
    Quick,
    #[default]
    Medium,
    High,
    VeryHigh,
}

/// Settings implied by a [`Precision`] level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub n_chains: usize,
    pub pre_run_min: usize,
    pub pre_run_max: usize,
    pub run_iterations: usize,
    pub rhat_threshold: f64,
    pub check_interval: usize,
}

impl Precision {
    pub const ALL: [Precision; 5] = [
        Precision::Low,
        Precision::Quick,
        Precision::Medium,
        Precision::High,
        Precision::VeryHigh,
    ];

    pub fn preset(self) -> Preset {
        match self {
            Precision::Low => Preset {
                n_chains: 2,
                pre_run_min: 1_500,
                pre_run_max: 10_000,
                run_iterations: 10_000,
                rhat_threshold: 1.2,
                check_interval: 500,
            },
            Precision::Quick => Preset {
                n_chains: 2,
                pre_run_min: 1_500,
                pre_run_max: 10_000,
                run_iterations: 10_000,
                rhat_threshold: 1.1,
                check_interval: 500,
            },
            Precision::Medium => Preset {
                n_chains: 4,
                pre_run_min: 1_500,
                pre_run_max: 100_000,
                run_iterations: 100_000,
                rhat_threshold: 1.1,
                check_interval: 1_000,
            },
            Precision::High => Preset {
                n_chains: 4,
                pre_run_min: 5_000,
                pre_run_max: 1_000_000,
                run_iterations: 1_000_000,
                rhat_threshold: 1.1,
                check_interval: 1_000,
            },
            Precision::VeryHigh => Preset {
                n_chains: 8,
                pre_run_min: 10_000,
                pre_run_max: 10_000_000,
                run_iterations: 10_000_000,
                rhat_threshold: 1.05,
                check_interval: 1_000,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Precision::Low => "low",
            Precision::Quick => "quick",
            Precision::Medium => "medium",
            Precision::High => "high",
            Precision::VeryHigh => "veryhigh",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        Precision::ALL
            .into_iter()
            .find(|p| p.name() == key)
            .ok_or_else(|| Error::config(format!("unknown precision level '{s}'")))
    }
}
