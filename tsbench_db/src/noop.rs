use std::sync::Arc;

use async_trait::async_trait;
use tsbench_workload::{
    AggRangeQuery, AggRangeValueQuery, AggValueQuery, Batch, DeviceSchema, GroupByQuery,
    LatestPointQuery, PreciseQuery, RangeQuery, ValueRangeQuery,
};

use crate::{Database, Result, Status};

/// Accepts every write and answers every query with no points.
///
/// Measures the overhead of the harness itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDatabase;

#[async_trait]
impl Database for NoopDatabase {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn register_schema(&self, _schemas: &[Arc<DeviceSchema>]) -> Result<()> {
        Ok(())
    }

    async fn insert_one_batch(&self, batch: &Batch) -> Result<Status> {
        Ok(Status::ok_with_points(batch.point_count()))
    }

    async fn precise_query(&self, _query: &PreciseQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn range_query(&self, _query: &RangeQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn value_range_query(&self, _query: &ValueRangeQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn agg_range_query(&self, _query: &AggRangeQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn agg_value_query(&self, _query: &AggValueQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn agg_range_value_query(&self, _query: &AggRangeValueQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn group_by_query(&self, _query: &GroupByQuery) -> Result<Status> {
        Ok(Status::ok())
    }

    async fn latest_point_query(&self, _query: &LatestPointQuery) -> Result<Status> {
        Ok(Status::ok())
    }
}
