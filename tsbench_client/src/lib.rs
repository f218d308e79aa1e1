//! Concurrent clients that drive a workload against a backend and the benchmark run that
//! coordinates them.
//!
//! A [`Benchmark`] prepares the backend, splits the devices over `client_number`
//! [`Client`]s, runs them together on the tokio runtime and returns the final
//! [`Summary`](tsbench_measurement::Summary).

use thiserror::Error;
use tsbench_config::ConfigError;
use tsbench_db::DbError;
use tsbench_workload::WorkloadError;

mod benchmark;
mod client;
mod operation;

pub use benchmark::{Benchmark, partition_devices};
pub use client::Client;
pub use operation::OperationController;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("workload generation failed: {0}")]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("operation proportion cannot be sampled: {0}")]
    OperationProportion(#[from] rand::distributions::WeightedError),

    #[error("client task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the backend could not be reached at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Database(DbError::Connection(_)))
    }
}
