use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{error, info, warn};
use tsbench_config::BenchmarkConfig;
use tsbench_measurement::{Measurement, Operation, persistence::TestDataPersistence};
use tsbench_workload::{
    AggRangeQuery, AggRangeValueQuery, AggValueQuery, Batch, DeviceSchema, GroupByQuery,
    LatestPointQuery, PreciseQuery, RangeQuery, ValueRangeQuery,
};

use crate::{Database, DbError, Result, Status};

/// Times every backend call and records its outcome.
///
/// A successful call adds its latency, one ok operation and its points (the batch's points
/// for writes, the returned points for queries) to the [`Measurement`]. Any failure other
/// than [`DbError::Connection`] is counted as a failed operation and returned as a failed
/// [`Status`]; failed writes also count the batch's points as failed. Every outcome is
/// forwarded to the persistence sink before the call returns.
///
/// Calls are never cut short here: time limits belong to the backend, so a slow call is
/// measured for as long as it takes.
#[derive(Debug)]
pub struct DbWrapper {
    db: Arc<dyn Database>,
    measurement: Arc<Measurement>,
    recorder: Arc<dyn TestDataPersistence>,
    config: Arc<BenchmarkConfig>,
}

impl DbWrapper {
    pub fn new(
        db: Arc<dyn Database>,
        measurement: Arc<Measurement>,
        recorder: Arc<dyn TestDataPersistence>,
        config: Arc<BenchmarkConfig>,
    ) -> Self {
        Self {
            db,
            measurement,
            recorder,
            config,
        }
    }

    pub fn measurement(&self) -> &Arc<Measurement> {
        &self.measurement
    }

    pub async fn init(&self) -> Result<()> {
        self.db.init().await
    }

    /// Clean up old data, then give the backend `init_wait_time_ms` to settle
    pub async fn cleanup(&self) -> Result<()> {
        self.db.cleanup().await?;
        let wait = self.config.init_wait_time_ms;
        info!(wait_ms = wait, "waiting for old data deletion");
        tokio::time::sleep(Duration::from_millis(wait)).await;
        Ok(())
    }

    /// Close the backend and the persistence sink
    pub async fn close(&self) -> Result<()> {
        let closed = self.db.close().await;
        if let Err(e) = self.recorder.close() {
            error!(error = %e, "failed to close the persistence sink");
        }
        closed
    }

    /// Register `schemas` when `create_schema` is set, timing the registration
    pub async fn register_schema(&self, schemas: &[Arc<DeviceSchema>]) -> Result<()> {
        if !self.config.create_schema {
            return Ok(());
        }
        info!(devices = schemas.len(), "registering schema");
        let start = Instant::now();
        match self.db.register_schema(schemas).await {
            Ok(()) => {
                let latency_ms = self.latency_ms("register schema", elapsed_ns(start));
                self.measurement.set_create_schema_time(latency_ms);
                info!(latency_ms, "schema registered");
                Ok(())
            }
            Err(e) => {
                self.measurement.set_create_schema_time(0.0);
                Err(e)
            }
        }
    }

    pub async fn insert_one_batch(&self, batch: &Batch) -> Result<Status> {
        self.measure_write(batch, self.db.insert_one_batch(batch))
            .await
    }

    pub async fn insert_one_sensor_batch(&self, batch: &Batch) -> Result<Status> {
        self.measure_write(batch, self.db.insert_one_sensor_batch(batch))
            .await
    }

    pub async fn precise_query(&self, query: &PreciseQuery) -> Result<Status> {
        self.measure_query(Operation::PreciseQuery, self.db.precise_query(query))
            .await
    }

    pub async fn range_query(&self, query: &RangeQuery) -> Result<Status> {
        self.measure_query(Operation::RangeQuery, self.db.range_query(query))
            .await
    }

    pub async fn value_range_query(&self, query: &ValueRangeQuery) -> Result<Status> {
        self.measure_query(Operation::ValueRangeQuery, self.db.value_range_query(query))
            .await
    }

    pub async fn agg_range_query(&self, query: &AggRangeQuery) -> Result<Status> {
        self.measure_query(Operation::AggRangeQuery, self.db.agg_range_query(query))
            .await
    }

    pub async fn agg_value_query(&self, query: &AggValueQuery) -> Result<Status> {
        self.measure_query(Operation::AggValueQuery, self.db.agg_value_query(query))
            .await
    }

    pub async fn agg_range_value_query(&self, query: &AggRangeValueQuery) -> Result<Status> {
        self.measure_query(
            Operation::AggRangeValueQuery,
            self.db.agg_range_value_query(query),
        )
        .await
    }

    pub async fn group_by_query(&self, query: &GroupByQuery) -> Result<Status> {
        self.measure_query(Operation::GroupByQuery, self.db.group_by_query(query))
            .await
    }

    pub async fn latest_point_query(&self, query: &LatestPointQuery) -> Result<Status> {
        self.measure_query(Operation::LatestPointQuery, self.db.latest_point_query(query))
            .await
    }

    /// Runs `query` newest first
    pub async fn range_query_order_by_desc(&self, query: RangeQuery) -> Result<Status> {
        let query = query.into_desc();
        self.measure_query(
            Operation::RangeQueryOrderByTimeDesc,
            self.db.range_query_order_by_desc(&query),
        )
        .await
    }

    /// Runs `query` newest first
    pub async fn value_range_query_order_by_desc(
        &self,
        query: ValueRangeQuery,
    ) -> Result<Status> {
        let query = query.into_desc();
        self.measure_query(
            Operation::ValueRangeQueryOrderByTimeDesc,
            self.db.value_range_query_order_by_desc(&query),
        )
        .await
    }

    async fn measure_write<F>(&self, batch: &Batch, call: F) -> Result<Status>
    where
        F: Future<Output = Result<Status>> + Send,
    {
        let operation = Operation::Ingestion;
        let points = batch.point_count() as u64;

        let start = Instant::now();
        let outcome = call.await;
        let elapsed_ns = elapsed_ns(start);

        match outcome {
            Ok(status) if status.is_ok() => {
                let latency_ms = self.record_ok(operation, points, elapsed_ns);
                if !self.config.is_quiet_mode {
                    let throughput = if latency_ms > 0.0 {
                        points as f64 * 1000.0 / latency_ms
                    } else {
                        0.0
                    };
                    info!(
                        device = batch.device().device(),
                        group = batch.device().group(),
                        latency_ms,
                        throughput,
                        "insert one batch"
                    );
                }
                Ok(status.with_elapsed(duration_from_ms(latency_ms)))
            }
            Ok(status) => {
                let reason = status.error().unwrap_or("backend reported a failure");
                self.record_write_failure(points, reason);
                Ok(status)
            }
            Err(DbError::Operation(reason)) => {
                self.record_write_failure(points, &reason);
                Ok(Status::failed(reason))
            }
            Err(e @ DbError::Connection(_)) => Err(e),
        }
    }

    async fn measure_query<F>(&self, operation: Operation, call: F) -> Result<Status>
    where
        F: Future<Output = Result<Status>> + Send,
    {
        let start = Instant::now();
        let outcome = call.await;
        let elapsed_ns = elapsed_ns(start);

        match outcome {
            Ok(status) if status.is_ok() => {
                let points = status.point_count() as u64;
                let latency_ms = self.record_ok(operation, points, elapsed_ns);
                if !self.config.is_quiet_mode {
                    info!(%operation, latency_ms, points, "query complete");
                }
                Ok(status.with_elapsed(duration_from_ms(latency_ms)))
            }
            Ok(status) => {
                let reason = status.error().unwrap_or("backend reported a failure");
                self.record_query_failure(operation, reason);
                Ok(status)
            }
            Err(DbError::Operation(reason)) => {
                self.record_query_failure(operation, &reason);
                Ok(Status::failed(reason))
            }
            Err(e @ DbError::Connection(_)) => Err(e),
        }
    }

    /// Latency in milliseconds. A negative elapsed time is recorded as zero.
    fn latency_ms(&self, what: &str, elapsed_ns: i64) -> f64 {
        if elapsed_ns < 0 {
            warn!(
                operation = what,
                elapsed_ns, "latency is negative, the clock may have moved; recording zero"
            );
            return 0.0;
        }
        elapsed_ns as f64 / 1_000_000.0
    }

    fn record_ok(&self, operation: Operation, points: u64, elapsed_ns: i64) -> f64 {
        let latency_ms = self.latency_ms(operation.name(), elapsed_ns);
        self.measurement.add_operation_latency(operation, latency_ms);
        self.measurement.add_ok_operation(operation);
        self.measurement.add_ok_points(operation, points);
        self.persist(operation, points, 0, latency_ms, "");
        latency_ms
    }

    fn record_write_failure(&self, points: u64, reason: &str) {
        let operation = Operation::Ingestion;
        error!(%operation, points, reason, "insert batch failed");
        self.measurement.add_fail_operation(operation);
        self.measurement.add_fail_points(operation, points);
        self.persist(operation, 0, points, 0.0, reason);
    }

    fn record_query_failure(&self, operation: Operation, reason: &str) {
        error!(%operation, reason, "query failed");
        self.measurement.add_fail_operation(operation);
        self.persist(operation, 0, 0, 0.0, reason);
    }

    fn persist(
        &self,
        operation: Operation,
        ok_points: u64,
        fail_points: u64,
        latency_ms: f64,
        remark: &str,
    ) {
        if let Err(e) =
            self.recorder
                .save_operation_result(operation, ok_points, fail_points, latency_ms, remark)
        {
            warn!(%operation, error = %e, "failed to persist operation result");
        }
    }
}

fn duration_from_ms(ms: f64) -> Duration {
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

fn elapsed_ns(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tsbench_measurement::persistence::{NoneRecorder, SystemMetric};
    use tsbench_workload::Record;

    use super::*;
    use crate::{MemoryDatabase, NoopDatabase};

    /// Sink that keeps every operation row in memory
    #[derive(Debug, Default)]
    struct CapturingRecorder {
        rows: Mutex<Vec<(Operation, u64, u64, String)>>,
    }

    impl TestDataPersistence for CapturingRecorder {
        fn insert_system_metrics(
            &self,
            _metrics: &std::collections::BTreeMap<SystemMetric, f64>,
        ) -> tsbench_measurement::persistence::Result<()> {
            Ok(())
        }

        fn save_test_config(
            &self,
            _config: &BenchmarkConfig,
        ) -> tsbench_measurement::persistence::Result<()> {
            Ok(())
        }

        fn save_operation_result(
            &self,
            operation: Operation,
            ok_points: u64,
            fail_points: u64,
            _latency_ms: f64,
            remark: &str,
        ) -> tsbench_measurement::persistence::Result<()> {
            self.rows
                .lock()
                .push((operation, ok_points, fail_points, remark.to_string()));
            Ok(())
        }

        fn save_result(
            &self,
            _operation: Operation,
            _key: &str,
            _value: &str,
        ) -> tsbench_measurement::persistence::Result<()> {
            Ok(())
        }

        fn close(&self) -> tsbench_measurement::persistence::Result<()> {
            Ok(())
        }
    }

    /// Backend that fails in a configurable way
    #[derive(Debug)]
    enum Failing {
        Status,
        Operation,
        Connection,
        /// Succeeds after 200 ms, counting completed calls
        Slow(AtomicUsize),
    }

    #[async_trait]
    impl Database for Failing {
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
            Err(DbError::Operation("schema rejected".to_string()))
        }

        async fn insert_one_batch(&self, _batch: &Batch) -> Result<Status> {
            self.fail().await
        }

        async fn precise_query(&self, _query: &PreciseQuery) -> Result<Status> {
            self.fail().await
        }

        async fn range_query(&self, _query: &RangeQuery) -> Result<Status> {
            self.fail().await
        }

        async fn value_range_query(&self, _query: &ValueRangeQuery) -> Result<Status> {
            self.fail().await
        }

        async fn agg_range_query(&self, _query: &AggRangeQuery) -> Result<Status> {
            self.fail().await
        }

        async fn agg_value_query(&self, _query: &AggValueQuery) -> Result<Status> {
            self.fail().await
        }

        async fn agg_range_value_query(&self, _query: &AggRangeValueQuery) -> Result<Status> {
            self.fail().await
        }

        async fn group_by_query(&self, _query: &GroupByQuery) -> Result<Status> {
            self.fail().await
        }

        async fn latest_point_query(&self, _query: &LatestPointQuery) -> Result<Status> {
            self.fail().await
        }
    }

    impl Failing {
        async fn fail(&self) -> Result<Status> {
            match self {
                Self::Status => Ok(Status::failed("rejected")),
                Self::Operation => Err(DbError::Operation("bad request".to_string())),
                Self::Connection => Err(DbError::Connection("refused".to_string())),
                Self::Slow(completed) => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(Status::ok_with_points(1))
                }
            }
        }
    }

    fn build(
        db: Arc<dyn Database>,
        config: BenchmarkConfig,
    ) -> (DbWrapper, Arc<CapturingRecorder>) {
        let recorder = Arc::new(CapturingRecorder::default());
        let wrapper = DbWrapper::new(
            db,
            Arc::new(Measurement::new()),
            Arc::clone(&recorder) as _,
            Arc::new(config),
        );
        (wrapper, recorder)
    }

    fn batch() -> Batch {
        let device = Arc::new(DeviceSchema::new(3, 0, vec!["s_0".into(), "s_1".into()]));
        let records = (0..5)
            .map(|i| Record {
                timestamp: i,
                values: vec![1.0, 2.0],
            })
            .collect();
        Batch::new(device, records)
    }

    fn range_query() -> RangeQuery {
        RangeQuery {
            devices: vec![DeviceSchema::new(0, 0, vec!["s_0".into()])],
            start_timestamp: 0,
            end_timestamp: 10,
            limit: None,
            offset: 0,
            slimit: None,
            soffset: 0,
            desc: false,
        }
    }

    #[test_log::test(tokio::test)]
    async fn successful_write_is_measured_and_persisted() {
        let (wrapper, recorder) = build(Arc::new(NoopDatabase), BenchmarkConfig::default());
        let status = wrapper.insert_one_batch(&batch()).await.unwrap();
        assert!(status.is_ok());

        let m = wrapper.measurement();
        assert_eq!(m.ok_operations(Operation::Ingestion), 1);
        assert_eq!(m.ok_points(Operation::Ingestion), 10);
        assert_eq!(m.fail_operations(Operation::Ingestion), 0);
        assert_eq!(
            *recorder.rows.lock(),
            vec![(Operation::Ingestion, 10, 0, String::new())]
        );
    }

    #[test_log::test(tokio::test)]
    async fn query_points_come_from_the_backend() {
        let db = Arc::new(MemoryDatabase::new());
        let config = BenchmarkConfig {
            is_quiet_mode: false,
            ..Default::default()
        };
        let (wrapper, _) = build(Arc::clone(&db) as _, config);

        let device = Arc::new(DeviceSchema::new(0, 0, vec!["s_0".into()]));
        let records = (0..4)
            .map(|i| Record {
                timestamp: i * 3,
                values: vec![0.5],
            })
            .collect();
        wrapper
            .insert_one_batch(&Batch::new(device, records))
            .await
            .unwrap();

        let status = wrapper
            .range_query_order_by_desc(range_query())
            .await
            .unwrap();
        assert_eq!(status.point_count(), 4);
        let m = wrapper.measurement();
        assert_eq!(m.ok_operations(Operation::RangeQueryOrderByTimeDesc), 1);
        assert_eq!(m.ok_points(Operation::RangeQueryOrderByTimeDesc), 4);
        assert_eq!(m.ok_operations(Operation::RangeQuery), 0);
    }

    #[test_log::test(tokio::test)]
    async fn failed_writes_count_batch_points() {
        for db in [Failing::Status, Failing::Operation] {
            let (wrapper, recorder) = build(Arc::new(db), BenchmarkConfig::default());
            let status = wrapper.insert_one_batch(&batch()).await.unwrap();
            assert!(!status.is_ok());

            let m = wrapper.measurement();
            assert_eq!(m.fail_operations(Operation::Ingestion), 1);
            assert_eq!(m.fail_points(Operation::Ingestion), 10);
            assert_eq!(m.ok_operations(Operation::Ingestion), 0);
            let rows = recorder.rows.lock();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].2, 10);
            assert!(!rows[0].3.is_empty());
        }
    }

    #[test_log::test(tokio::test)]
    async fn failed_queries_are_recorded_not_returned() {
        let (wrapper, recorder) = build(Arc::new(Failing::Operation), BenchmarkConfig::default());
        let status = wrapper.range_query(&range_query()).await.unwrap();
        assert_eq!(status.error(), Some("bad request"));
        assert_eq!(wrapper.measurement().fail_operations(Operation::RangeQuery), 1);
        assert_eq!(wrapper.measurement().fail_points(Operation::RangeQuery), 0);
        assert_eq!(
            *recorder.rows.lock(),
            vec![(Operation::RangeQuery, 0, 0, "bad request".to_string())]
        );
    }

    #[test_log::test(tokio::test)]
    async fn connection_errors_propagate() {
        let (wrapper, recorder) =
            build(Arc::new(Failing::Connection), BenchmarkConfig::default());
        assert!(matches!(
            wrapper.insert_one_batch(&batch()).await,
            Err(DbError::Connection(_))
        ));
        assert!(matches!(
            wrapper.latest_point_query(&LatestPointQuery { devices: vec![] }).await,
            Err(DbError::Connection(_))
        ));
        assert_eq!(wrapper.measurement().total_operations(), 0);
        assert!(recorder.rows.lock().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn slow_operations_run_to_completion() {
        let config = BenchmarkConfig {
            write_operation_timeout_ms: 50,
            read_operation_timeout_ms: 50,
            ..Default::default()
        };
        let db = Arc::new(Failing::Slow(AtomicUsize::new(0)));
        let (wrapper, _) = build(Arc::clone(&db) as _, config);

        let status = wrapper.insert_one_batch(&batch()).await.unwrap();
        assert!(status.is_ok());
        assert!(status.elapsed() > Duration::from_millis(150));

        let status = wrapper
            .precise_query(&PreciseQuery {
                devices: vec![],
                timestamp: 0,
            })
            .await
            .unwrap();
        assert!(status.is_ok());

        let Failing::Slow(completed) = db.as_ref() else {
            unreachable!()
        };
        assert_eq!(completed.load(Ordering::SeqCst), 2);
        let m = wrapper.measurement();
        assert_eq!(m.ok_operations(Operation::Ingestion), 1);
        assert_eq!(m.ok_operations(Operation::PreciseQuery), 1);
        assert_eq!(m.fail_operations(Operation::PreciseQuery), 0);
    }

    #[test_log::test(tokio::test)]
    async fn schema_registration_is_timed_when_enabled() {
        let schemas = vec![Arc::new(DeviceSchema::new(0, 0, vec!["s_0".into()]))];

        let (wrapper, _) = build(Arc::new(NoopDatabase), BenchmarkConfig::default());
        wrapper.register_schema(&schemas).await.unwrap();
        assert!(wrapper.measurement().create_schema_time().is_some());

        let config = BenchmarkConfig {
            create_schema: false,
            ..Default::default()
        };
        let (wrapper, _) = build(Arc::new(Failing::Status), config);
        wrapper.register_schema(&schemas).await.unwrap();
        assert_eq!(wrapper.measurement().create_schema_time(), None);

        let (wrapper, _) = build(Arc::new(Failing::Status), BenchmarkConfig::default());
        assert!(wrapper.register_schema(&schemas).await.is_err());
        assert_eq!(wrapper.measurement().create_schema_time(), Some(0.0));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn cleanup_waits_for_the_backend_to_settle() {
        let config = BenchmarkConfig {
            init_wait_time_ms: 5000,
            ..Default::default()
        };
        let (wrapper, _) = build(Arc::new(NoopDatabase), config);
        let start = tokio::time::Instant::now();
        wrapper.cleanup().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5000));
    }

    #[test]
    fn negative_latency_is_clamped() {
        let (wrapper, _) = build(Arc::new(NoopDatabase), BenchmarkConfig::default());
        assert_eq!(wrapper.latency_ms("test", -5), 0.0);
        assert_eq!(wrapper.latency_ms("test", 2_500_000), 2.5);
    }

    #[test_log::test(tokio::test)]
    async fn close_closes_backend_and_sink() {
        #[derive(Debug, Default)]
        struct CountingClose(AtomicUsize);

        #[async_trait]
        impl Database for CountingClose {
            async fn init(&self) -> Result<()> {
                Ok(())
            }
            async fn cleanup(&self) -> Result<()> {
                Ok(())
            }
            async fn close(&self) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn register_schema(&self, _schemas: &[Arc<DeviceSchema>]) -> Result<()> {
                Ok(())
            }
            async fn insert_one_batch(&self, _batch: &Batch) -> Result<Status> {
                Ok(Status::ok())
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
            async fn agg_range_value_query(
                &self,
                _query: &AggRangeValueQuery,
            ) -> Result<Status> {
                Ok(Status::ok())
            }
            async fn group_by_query(&self, _query: &GroupByQuery) -> Result<Status> {
                Ok(Status::ok())
            }
            async fn latest_point_query(&self, _query: &LatestPointQuery) -> Result<Status> {
                Ok(Status::ok())
            }
        }

        let db = Arc::new(CountingClose::default());
        let wrapper = DbWrapper::new(
            Arc::clone(&db) as _,
            Arc::new(Measurement::new()),
            Arc::new(NoneRecorder),
            Arc::new(BenchmarkConfig::default()),
        );
        wrapper.close().await.unwrap();
        assert_eq!(db.0.load(Ordering::SeqCst), 1);
    }
}
