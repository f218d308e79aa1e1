use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use tsbench_config::BenchmarkConfig;
use tsbench_db::{DbWrapper, Status};
use tsbench_measurement::Operation;
use tsbench_workload::{DataModel, DeviceSchema, OutOfOrderScheduler, SyntheticWorkload};

use crate::{OperationController, Result};

/// Write position of one device owned by a client
#[derive(Debug, Clone, Copy, Default)]
struct DeviceCursor {
    loop_index: u64,
    sensor_index: usize,
}

/// One worker of a run.
///
/// Issues exactly `loop_count` operations unless the run is cancelled. Writes visit the
/// leading `real_insert_rate` share of the client's devices round-robin. In single-sensor mode
/// (`is_sensor_ts_alignment` off) every sensor column of a device is written before that
/// device moves on to its next batch.
#[derive(Debug)]
pub struct Client {
    id: usize,
    config: Arc<BenchmarkConfig>,
    db: Arc<DbWrapper>,
    workload: SyntheticWorkload,
    out_of_order: OutOfOrderScheduler,
    operations: OperationController,
    devices: Vec<Arc<DeviceSchema>>,
    cursors: Vec<DeviceCursor>,
    next_device: usize,
    completed: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl Client {
    pub fn new(
        id: usize,
        model: Arc<DataModel>,
        db: Arc<DbWrapper>,
        mut devices: Vec<Arc<DeviceSchema>>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let config = Arc::clone(model.config());
        devices.truncate(config.written_device_count(devices.len()));
        let out_of_order = OutOfOrderScheduler::new(&config, id)?;
        let operations = OperationController::new(&config, id)?;
        Ok(Self {
            id,
            workload: SyntheticWorkload::new(model, id),
            out_of_order,
            operations,
            cursors: vec![DeviceCursor::default(); devices.len()],
            devices,
            next_device: 0,
            completed: Arc::new(AtomicU64::new(0)),
            db,
            config,
            shutdown,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of operations this client has finished, shared with progress reporting
    pub fn completed(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.completed)
    }

    /// Run the loop, returning how many operations were issued.
    ///
    /// A connection failure cancels the shared token, so the other clients stop before their
    /// next operation, and is returned.
    pub async fn run(mut self) -> Result<u64> {
        let loop_count = self.config.loop_count;
        let interval = Duration::from_millis(self.config.op_interval_ms);
        info!(client = self.id, devices = self.devices.len(), loop_count, "client started");

        let mut issued = 0;
        while issued < loop_count {
            if self.shutdown.is_cancelled() {
                info!(client = self.id, issued, "client cancelled");
                break;
            }

            let start = Instant::now();
            if let Err(e) = self.step().await {
                error!(client = self.id, error = %e, "client stopped");
                self.shutdown.cancel();
                return Err(e);
            }
            issued += 1;
            self.completed.store(issued, Ordering::Relaxed);

            let spent = start.elapsed();
            if !interval.is_zero() && spent < interval {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(interval - spent) => {}
                }
            }
        }

        debug!(client = self.id, issued, "client finished");
        Ok(issued)
    }

    /// Issue one sampled operation
    async fn step(&mut self) -> Result<()> {
        let operation = self.operations.next_operation();
        let status = match operation {
            Operation::Ingestion => self.write().await?,
            Operation::PreciseQuery => {
                let query = self.workload.precise_query()?;
                self.db.precise_query(&query).await?
            }
            Operation::RangeQuery => {
                let query = self.workload.range_query()?;
                self.db.range_query(&query).await?
            }
            Operation::ValueRangeQuery => {
                let query = self.workload.value_range_query()?;
                self.db.value_range_query(&query).await?
            }
            Operation::AggRangeQuery => {
                let query = self.workload.agg_range_query()?;
                self.db.agg_range_query(&query).await?
            }
            Operation::AggValueQuery => {
                let query = self.workload.agg_value_query()?;
                self.db.agg_value_query(&query).await?
            }
            Operation::AggRangeValueQuery => {
                let query = self.workload.agg_range_value_query()?;
                self.db.agg_range_value_query(&query).await?
            }
            Operation::GroupByQuery => {
                let query = self.workload.group_by_query()?;
                self.db.group_by_query(&query).await?
            }
            Operation::LatestPointQuery => {
                let query = self.workload.latest_point_query()?;
                self.db.latest_point_query(&query).await?
            }
            Operation::RangeQueryOrderByTimeDesc => {
                let query = self.workload.range_query()?;
                self.db.range_query_order_by_desc(query).await?
            }
            Operation::ValueRangeQueryOrderByTimeDesc => {
                let query = self.workload.value_range_query()?;
                self.db.value_range_query_order_by_desc(query).await?
            }
        };
        trace!(client = self.id, %operation, ok = status.is_ok(), "operation finished");
        Ok(())
    }

    async fn write(&mut self) -> Result<Status> {
        let position = self.next_device % self.devices.len();
        self.next_device = position + 1;
        let device = Arc::clone(&self.devices[position]);
        let cursor = self.cursors[position];

        if self.config.is_sensor_ts_alignment {
            let batch = self.workload.one_batch(&device, cursor.loop_index)?;
            let batch = self.out_of_order.apply(batch);
            let status = self.db.insert_one_batch(&batch).await?;
            self.cursors[position].loop_index += 1;
            Ok(status)
        } else {
            let batch = self
                .workload
                .one_sensor_batch(&device, cursor.loop_index, cursor.sensor_index)?;
            let batch = self.out_of_order.apply(batch);
            let status = self.db.insert_one_sensor_batch(&batch).await?;

            let next_sensor = cursor.sensor_index + 1;
            self.cursors[position] = if next_sensor == device.sensors().len() {
                DeviceCursor {
                    loop_index: cursor.loop_index + 1,
                    sensor_index: 0,
                }
            } else {
                DeviceCursor {
                    sensor_index: next_sensor,
                    ..cursor
                }
            };
            Ok(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tsbench_db::{Database, DbError, NoopDatabase};
    use tsbench_measurement::{Measurement, persistence::NoneRecorder};
    use tsbench_workload::{
        AggRangeQuery, AggRangeValueQuery, AggValueQuery, Batch, FunctionCatalog, GroupByQuery,
        LatestPointQuery, PreciseQuery, RangeQuery, ValueRangeQuery,
    };

    use super::*;

    /// Remembers which device, sensor column and first timestamp every write carried
    #[derive(Debug, Default)]
    struct RecordingDatabase {
        writes: Mutex<Vec<(String, Option<usize>, i64)>>,
    }

    #[async_trait]
    impl Database for RecordingDatabase {
        async fn init(&self) -> tsbench_db::Result<()> {
            Ok(())
        }

        async fn cleanup(&self) -> tsbench_db::Result<()> {
            Ok(())
        }

        async fn close(&self) -> tsbench_db::Result<()> {
            Ok(())
        }

        async fn register_schema(
            &self,
            _schemas: &[Arc<DeviceSchema>],
        ) -> tsbench_db::Result<()> {
            Ok(())
        }

        async fn insert_one_batch(&self, batch: &Batch) -> tsbench_db::Result<Status> {
            let first = batch.records().first().map_or(i64::MIN, |r| r.timestamp);
            self.writes.lock().push((
                batch.device().device().to_string(),
                batch.sensor_index(),
                first,
            ));
            Ok(Status::ok_with_points(batch.point_count()))
        }

        async fn precise_query(&self, _query: &PreciseQuery) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn range_query(&self, _query: &RangeQuery) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn value_range_query(
            &self,
            _query: &ValueRangeQuery,
        ) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn agg_range_query(&self, _query: &AggRangeQuery) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn agg_value_query(&self, _query: &AggValueQuery) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn agg_range_value_query(
            &self,
            _query: &AggRangeValueQuery,
        ) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn group_by_query(&self, _query: &GroupByQuery) -> tsbench_db::Result<Status> {
            Ok(Status::ok())
        }

        async fn latest_point_query(
            &self,
            _query: &LatestPointQuery,
        ) -> tsbench_db::Result<Status> {
            Err(DbError::Connection("gone".to_string()))
        }
    }

    fn client(
        config: BenchmarkConfig,
        db: Arc<dyn Database>,
        shutdown: CancellationToken,
    ) -> (Client, Arc<Measurement>) {
        let config = Arc::new(config);
        let model =
            Arc::new(DataModel::new(Arc::clone(&config), &FunctionCatalog::built_in()).unwrap());
        let measurement = Arc::new(Measurement::new());
        let wrapper = Arc::new(DbWrapper::new(
            db,
            Arc::clone(&measurement),
            Arc::new(NoneRecorder),
            config,
        ));
        let devices = model.devices().to_vec();
        let client = Client::new(0, model, wrapper, devices, shutdown).unwrap();
        (client, measurement)
    }

    #[test_log::test(tokio::test)]
    async fn writes_skip_devices_beyond_the_insert_rate() {
        let db = Arc::new(RecordingDatabase::default());
        let config = BenchmarkConfig {
            device_number: 5,
            real_insert_rate: 0.5,
            client_number: 1,
            loop_count: 9,
            ..Default::default()
        };
        let (client, _) = client(config, Arc::clone(&db) as _, CancellationToken::new());
        assert_eq!(client.run().await.unwrap(), 9);

        let writes = db.writes.lock();
        let devices: Vec<&str> = writes.iter().map(|(d, _, _)| d.as_str()).collect();
        assert_eq!(
            devices,
            vec!["d_0", "d_1", "d_2", "d_0", "d_1", "d_2", "d_0", "d_1", "d_2"]
        );
    }

    #[test_log::test(tokio::test)]
    async fn writes_visit_devices_round_robin() {
        let db = Arc::new(RecordingDatabase::default());
        let config = BenchmarkConfig {
            device_number: 2,
            client_number: 1,
            loop_count: 6,
            is_regular_frequency: true,
            ..Default::default()
        };
        let (client, measurement) =
            client(config, Arc::clone(&db) as _, CancellationToken::new());
        assert_eq!(client.run().await.unwrap(), 6);

        let step = 7000;
        let writes = db.writes.lock();
        let seen: Vec<_> = writes.iter().map(|(d, s, _)| (d.as_str(), *s)).collect();
        assert_eq!(
            seen,
            vec![
                ("d_0", None),
                ("d_1", None),
                ("d_0", None),
                ("d_1", None),
                ("d_0", None),
                ("d_1", None),
            ]
        );
        // every device advances one batch per visit
        assert_eq!(writes[2].2 - writes[0].2, step);
        assert_eq!(writes[5].2 - writes[3].2, step);
        assert_eq!(measurement.ok_points(Operation::Ingestion), 6 * 5);
    }

    #[test_log::test(tokio::test)]
    async fn single_sensor_mode_cycles_sensor_columns() {
        let db = Arc::new(RecordingDatabase::default());
        let config = BenchmarkConfig {
            device_number: 1,
            sensor_number: 3,
            client_number: 1,
            loop_count: 7,
            is_sensor_ts_alignment: false,
            ..Default::default()
        };
        let (client, measurement) =
            client(config, Arc::clone(&db) as _, CancellationToken::new());
        client.run().await.unwrap();

        let writes = db.writes.lock();
        let sensors: Vec<_> = writes.iter().map(|(_, s, _)| s.unwrap()).collect();
        assert_eq!(sensors, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(writes[0].2, writes[2].2);
        assert_eq!(writes[3].2 - writes[0].2, 7000);
        assert_eq!(measurement.ok_points(Operation::Ingestion), 7);
    }

    #[test_log::test(tokio::test)]
    async fn connection_failure_cancels_the_run() {
        let shutdown = CancellationToken::new();
        let config = BenchmarkConfig {
            operation_proportion: "0:0:0:0:0:0:0:0:1:0:0".parse().unwrap(),
            ..Default::default()
        };
        let (client, _) = client(
            config,
            Arc::new(RecordingDatabase::default()),
            shutdown.clone(),
        );
        let err = client.run().await.unwrap_err();
        assert!(err.is_connection());
        assert!(shutdown.is_cancelled());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn pacing_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let config = BenchmarkConfig {
            loop_count: 100,
            op_interval_ms: 1000,
            ..Default::default()
        };
        let (client, measurement) = client(config, Arc::new(NoopDatabase), shutdown.clone());
        let completed = client.completed();

        let cancel = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(4500)).await;
                shutdown.cancel();
            })
        };
        let issued = client.run().await.unwrap();
        cancel.await.unwrap();

        assert_eq!(issued, 5);
        assert_eq!(completed.load(Ordering::Relaxed), 5);
        assert_eq!(measurement.total_operations(), 5);
    }
}
