//! Multi-chain adaptive Metropolis–Hastings sampling for black-box posteriors,
//! with parallel chain execution, a Gelman–Rubin convergence check and
//! ensemble tests of fit calibration.
//!
//! Start with [`metropolis_hastings::MetropolisHastings`] and
//! [`ensemble::EnsembleFacility`].

pub mod chain;
pub mod coordinator;
pub mod distributions;
pub mod ensemble;
pub mod error;
pub mod io;
pub mod metropolis_hastings;
pub mod models;
pub mod parameters;
pub mod precision;
pub mod proposal;
pub mod stats;
