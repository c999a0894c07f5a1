//! Error type shared by every component of the crate.
//!
//! Only conditions that must stop a run are errors. A model returning NaN is
//! treated as a rejected candidate, and a pre-run that never converges is
//! reported through [`ConvergenceStatus`](crate::metropolis_hastings::ConvergenceStatus).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter declarations, sampler settings or datasets.
    /// Always raised before any chain has been advanced.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A record could not be written. The run is aborted because the stored
    /// trajectory would no longer be complete.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A chain faulted while being advanced on a worker.
    #[error("chain {chain} failed: {message}")]
    WorkerFailure { chain: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

#[cfg(feature = "csv")]
impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
