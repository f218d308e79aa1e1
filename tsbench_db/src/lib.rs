//! The boundary between the harness and the storage backend under test.
//!
//! Backends implement [`Database`]. Clients never call a backend directly: every call goes
//! through a [`DbWrapper`], which times it, classifies the outcome and records it.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tsbench_config::{BackendKind, BenchmarkConfig};
use tsbench_workload::{
    AggRangeQuery, AggRangeValueQuery, AggValueQuery, Batch, DeviceSchema, GroupByQuery,
    LatestPointQuery, PreciseQuery, RangeQuery, ValueRangeQuery,
};

pub mod memory;
pub mod noop;
mod wrapper;

pub use memory::MemoryDatabase;
pub use noop::NoopDatabase;
pub use wrapper::DbWrapper;

#[derive(Debug, Error)]
pub enum DbError {
    /// The backend cannot be reached. Ends the run.
    #[error("connection to the backend failed: {0}")]
    Connection(String),

    /// A single operation failed. Recorded as a failure, the run goes on.
    #[error("operation failed: {0}")]
    Operation(String),
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Outcome of one backend operation
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    ok: bool,
    point_count: usize,
    elapsed: Duration,
    error: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self::ok_with_points(0)
    }

    /// Success with `points` accepted (writes) or returned (queries) points
    pub fn ok_with_points(points: usize) -> Self {
        Self {
            ok: true,
            point_count: points,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            point_count: 0,
            elapsed: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Time the operation took, as measured by [`DbWrapper`]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn with_elapsed(self, elapsed: Duration) -> Self {
        Self { elapsed, ..self }
    }
}

/// What a storage backend must support to be benchmarked.
///
/// Backends enforce the configured [`OperationTimeouts`] themselves and every call runs to
/// completion. Only [`DbError::Connection`] stops the run.
#[async_trait]
pub trait Database: Debug + Send + Sync + 'static {
    async fn init(&self) -> Result<()>;

    /// Remove data left over by previous runs
    async fn cleanup(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn register_schema(&self, schemas: &[Arc<DeviceSchema>]) -> Result<()>;

    async fn insert_one_batch(&self, batch: &Batch) -> Result<Status>;

    /// Write a batch carrying a single sensor column
    async fn insert_one_sensor_batch(&self, batch: &Batch) -> Result<Status> {
        self.insert_one_batch(batch).await
    }

    async fn precise_query(&self, query: &PreciseQuery) -> Result<Status>;

    async fn range_query(&self, query: &RangeQuery) -> Result<Status>;

    async fn value_range_query(&self, query: &ValueRangeQuery) -> Result<Status>;

    async fn agg_range_query(&self, query: &AggRangeQuery) -> Result<Status>;

    async fn agg_value_query(&self, query: &AggValueQuery) -> Result<Status>;

    async fn agg_range_value_query(&self, query: &AggRangeValueQuery) -> Result<Status>;

    async fn group_by_query(&self, query: &GroupByQuery) -> Result<Status>;

    async fn latest_point_query(&self, query: &LatestPointQuery) -> Result<Status>;

    /// `query.desc` is set
    async fn range_query_order_by_desc(&self, query: &RangeQuery) -> Result<Status> {
        self.range_query(query).await
    }

    /// `query.desc` is set
    async fn value_range_query_order_by_desc(&self, query: &ValueRangeQuery) -> Result<Status> {
        self.value_range_query(query).await
    }
}

/// Time limits a backend applies to its own operations. `None` is unbounded.
///
/// The harness never interrupts a call: a backend that honors these limits reports an
/// operation that ran too long as failed once it returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub write: Option<Duration>,
    pub read: Option<Duration>,
}

impl OperationTimeouts {
    /// `write_operation_timeout_ms` and `read_operation_timeout_ms`, 0 meaning unbounded
    pub fn from_config(config: &BenchmarkConfig) -> Self {
        let bound = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Self {
            write: bound(config.write_operation_timeout_ms),
            read: bound(config.read_operation_timeout_ms),
        }
    }
}

/// Build the backend selected by `db_switch`
pub fn create_database(config: &BenchmarkConfig) -> Arc<dyn Database> {
    match config.db_switch {
        BackendKind::Noop => Arc::new(NoopDatabase),
        BackendKind::Memory => Arc::new(MemoryDatabase::with_timeouts(
            OperationTimeouts::from_config(config),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_constructors() {
        let ok = Status::ok_with_points(12);
        assert!(ok.is_ok());
        assert_eq!(ok.point_count(), 12);
        assert_eq!(ok.error(), None);

        let failed = Status::failed("disk full");
        assert!(!failed.is_ok());
        assert_eq!(failed.error(), Some("disk full"));

        let timed = Status::ok().with_elapsed(Duration::from_millis(3));
        assert_eq!(timed.elapsed(), Duration::from_millis(3));
    }

    #[test]
    fn factory_follows_config() {
        let config = BenchmarkConfig {
            db_switch: BackendKind::Memory,
            ..Default::default()
        };
        assert!(format!("{:?}", create_database(&config)).contains("MemoryDatabase"));
        assert!(format!("{:?}", create_database(&BenchmarkConfig::default())).contains("Noop"));
    }

    #[test]
    fn timeouts_come_from_config() {
        let config = BenchmarkConfig {
            write_operation_timeout_ms: 50,
            read_operation_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            OperationTimeouts::from_config(&config),
            OperationTimeouts {
                write: Some(Duration::from_millis(50)),
                read: None,
            }
        );
        assert_eq!(
            OperationTimeouts::from_config(&BenchmarkConfig::default()),
            OperationTimeouts {
                write: Some(Duration::from_secs(120)),
                read: Some(Duration::from_secs(300)),
            }
        );
    }
}
