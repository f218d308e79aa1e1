//! Synthetic device/sensor workloads for time-series benchmarks.
//!
//! The pieces fit together in the order they are used at startup:
//!
//! 1. [`schema::build_device_schemas`] lays out devices, storage groups and sensor names.
//! 2. [`assigner::assign_sensor_functions`] binds every sensor to one [`SensorFunction`] drawn
//!    from a [`FunctionCatalog`], reproducibly for a given seed.
//! 3. A shared [`DataModel`] holds both, and every client builds its own
//!    [`SyntheticWorkload`] from it to produce write batches and read queries.
//! 4. An [`OutOfOrderScheduler`] optionally moves batch timestamps back in time right before a
//!    write is submitted.

use thiserror::Error;
use tsbench_config::{ConfigError, FunctionRatios};

pub mod assigner;
pub mod batch;
pub mod function;
pub mod generator;
pub mod out_of_order;
pub mod query;
pub mod schema;

pub use assigner::{SensorFunctions, assign_sensor_functions};
pub use batch::{Batch, Record};
pub use function::{FunctionCatalog, FunctionFamily, SensorFunction};
pub use generator::{DataModel, SyntheticWorkload};
pub use out_of_order::OutOfOrderScheduler;
pub use query::{
    AggRangeQuery, AggRangeValueQuery, AggValueQuery, GroupByQuery, LatestPointQuery,
    PreciseQuery, RangeQuery, ValueRangeQuery,
};
pub use schema::DeviceSchema;

/// Errors raised while building or generating a workload
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("function ratios must each be >= 0 and sum to a positive value, got {0}")]
    InvalidFunctionRatios(FunctionRatios),

    #[error("sensor {sensor} landed in the {family} family, which has no candidate functions")]
    EmptyFunctionFamily {
        family: FunctionFamily,
        sensor: String,
    },

    #[error("no function is bound to sensor {0}")]
    FunctionNotBound(String),

    #[error("requested {requested} devices but the schema only has {available}")]
    NotEnoughDevices { requested: usize, available: usize },

    #[error("requested {requested} sensors but a device only has {available}")]
    NotEnoughSensors { requested: usize, available: usize },

    #[error("sensor index {index} is out of range for device {device}")]
    SensorOutOfRange { device: String, index: usize },

    #[error("invalid poisson parameters: {0}")]
    Poisson(String),

    #[error("failed to read function catalog '{path}': {source}")]
    CatalogRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse function catalog: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = WorkloadError> = std::result::Result<T, E>;
