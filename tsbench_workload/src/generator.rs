//! Batches and queries generated for one client.

use std::sync::Arc;

use rand::{Rng, SeedableRng, seq::index};
use rand_chacha::ChaCha8Rng;
use tsbench_config::BenchmarkConfig;

use crate::{
    Result, WorkloadError,
    assigner::{SensorFunctions, assign_sensor_functions},
    batch::{Batch, Record},
    function::{FunctionCatalog, SensorFunction},
    query::{
        AggRangeQuery, AggRangeValueQuery, AggValueQuery, GroupByQuery, LatestPointQuery,
        PreciseQuery, RangeQuery, ValueRangeQuery,
    },
    schema::{DeviceSchema, build_device_schemas, sensor_names},
};

/// Everything clients share about the synthetic data set. Built once, never mutated.
#[derive(Debug)]
pub struct DataModel {
    config: Arc<BenchmarkConfig>,
    devices: Vec<Arc<DeviceSchema>>,
    functions: SensorFunctions,
    start_timestamp: i64,
}

impl DataModel {
    /// Lay out the devices described by `config` and bind a function to every sensor.
    pub fn new(config: Arc<BenchmarkConfig>, catalog: &FunctionCatalog) -> Result<Self> {
        let devices = build_device_schemas(&config);
        let functions = assign_sensor_functions(
            &sensor_names(config.sensor_number),
            &config.function_ratios,
            config.data_seed,
            catalog,
        )?;
        Self::from_parts(config, devices, functions)
    }

    pub fn from_parts(
        config: Arc<BenchmarkConfig>,
        devices: Vec<Arc<DeviceSchema>>,
        functions: SensorFunctions,
    ) -> Result<Self> {
        let start_timestamp = config.start_timestamp()?;
        Ok(Self {
            config,
            devices,
            functions,
            start_timestamp,
        })
    }

    pub fn config(&self) -> &Arc<BenchmarkConfig> {
        &self.config
    }

    pub fn devices(&self) -> &[Arc<DeviceSchema>] {
        &self.devices
    }

    pub fn functions(&self) -> &SensorFunctions {
        &self.functions
    }

    /// Timestamp of the first record of every device
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// Exclusive end of the range covered once every client finished its loop
    pub fn end_timestamp(&self) -> i64 {
        self.start_timestamp
            + self.config.total_steps() as i64 * self.config.point_step_in_precision()
    }
}

/// Per-client source of write batches and read queries.
///
/// Values and timestamp jitter come from a stream seeded with `data_seed + client_id`, query
/// selections from one seeded with `query.seed + client_id`, so a client replays the same
/// operations on every run.
#[derive(Debug)]
pub struct SyntheticWorkload {
    model: Arc<DataModel>,
    data_rng: ChaCha8Rng,
    query_rng: ChaCha8Rng,
}

impl SyntheticWorkload {
    pub fn new(model: Arc<DataModel>, client_id: usize) -> Self {
        let config = model.config();
        let data_rng = ChaCha8Rng::seed_from_u64(config.data_seed.wrapping_add(client_id as u64));
        let query_rng =
            ChaCha8Rng::seed_from_u64(config.query.seed.wrapping_add(client_id as u64));
        Self {
            model,
            data_rng,
            query_rng,
        }
    }

    pub fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    /// Records for every sensor of `device`, covering the `loop_index`-th batch interval
    pub fn one_batch(&mut self, device: &Arc<DeviceSchema>, loop_index: u64) -> Result<Batch> {
        let functions = self.bound_functions(device.sensors())?;
        let records = self.records(loop_index, &functions);
        Ok(Batch::new(Arc::clone(device), records))
    }

    /// Like [`Self::one_batch`], with a single sensor column
    pub fn one_sensor_batch(
        &mut self,
        device: &Arc<DeviceSchema>,
        loop_index: u64,
        sensor_index: usize,
    ) -> Result<Batch> {
        let sensor = device.sensors().get(sensor_index).ok_or_else(|| {
            WorkloadError::SensorOutOfRange {
                device: device.device().to_string(),
                index: sensor_index,
            }
        })?;
        let functions = self.bound_functions(std::slice::from_ref(sensor))?;
        let records = self.records(loop_index, &functions);
        Ok(Batch::single_sensor(
            Arc::clone(device),
            sensor_index,
            records,
        ))
    }

    fn bound_functions(&self, sensors: &[String]) -> Result<Vec<SensorFunction>> {
        sensors
            .iter()
            .map(|sensor| {
                self.model
                    .functions
                    .get(sensor)
                    .copied()
                    .ok_or_else(|| WorkloadError::FunctionNotBound(sensor.clone()))
            })
            .collect()
    }

    fn records(&mut self, loop_index: u64, functions: &[SensorFunction]) -> Vec<Record> {
        let model = Arc::clone(&self.model);
        let config = model.config();
        let step = config.point_step_in_precision();
        let per_milli = config.timestamp_precision.per_milli();
        let base = model.start_timestamp + loop_index as i64 * config.batch_interval();

        let mut records = Vec::with_capacity(config.batch_size_per_write);
        for j in 0..config.batch_size_per_write {
            let mut timestamp = base + j as i64 * step;
            if !config.is_regular_frequency {
                timestamp += self.data_rng.gen_range(0..step);
            }
            // function cycles are expressed in milliseconds
            let at_ms = timestamp / per_milli;
            let values = functions
                .iter()
                .map(|f| f.value_at(at_ms, &mut self.data_rng))
                .collect();
            records.push(Record { timestamp, values });
        }
        records
    }

    /// `query.device_num` distinct devices, each narrowed to the same `query.sensor_num`
    /// distinct sensors
    fn select_devices(&mut self) -> Result<Vec<DeviceSchema>> {
        let model = Arc::clone(&self.model);
        let query = &model.config.query;
        let sensor_number = model.config.sensor_number;

        if query.device_num > model.devices.len() {
            return Err(WorkloadError::NotEnoughDevices {
                requested: query.device_num,
                available: model.devices.len(),
            });
        }
        if query.sensor_num > sensor_number {
            return Err(WorkloadError::NotEnoughSensors {
                requested: query.sensor_num,
                available: sensor_number,
            });
        }

        let mut device_indexes =
            index::sample(&mut self.query_rng, model.devices.len(), query.device_num).into_vec();
        device_indexes.sort_unstable();
        let mut sensor_indexes =
            index::sample(&mut self.query_rng, sensor_number, query.sensor_num).into_vec();
        sensor_indexes.sort_unstable();

        device_indexes
            .into_iter()
            .map(|d| {
                let device = &model.devices[d];
                let sensors = sensor_indexes
                    .iter()
                    .map(|s| {
                        device.sensors().get(*s).cloned().ok_or_else(|| {
                            WorkloadError::SensorOutOfRange {
                                device: device.device().to_string(),
                                index: *s,
                            }
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(device.with_sensors(sensors))
            })
            .collect()
    }

    /// A step aligned start inside the written range and the end `query.interval` later
    fn time_window(&mut self) -> (i64, i64) {
        let config = Arc::clone(self.model.config());
        let step_index = self.query_rng.gen_range(0..config.total_steps());
        let start =
            self.model.start_timestamp + step_index as i64 * config.point_step_in_precision();
        let width = config.query.interval * config.timestamp_precision.per_milli();
        (start, start + width)
    }

    pub fn precise_query(&mut self) -> Result<PreciseQuery> {
        let devices = self.select_devices()?;
        let (timestamp, _) = self.time_window();
        Ok(PreciseQuery { devices, timestamp })
    }

    pub fn range_query(&mut self) -> Result<RangeQuery> {
        let devices = self.select_devices()?;
        let (start_timestamp, end_timestamp) = self.time_window();
        let query = &self.model.config.query;
        Ok(RangeQuery {
            devices,
            start_timestamp,
            end_timestamp,
            limit: query.limit_n,
            offset: query.limit_offset,
            slimit: query.slimit_n,
            soffset: query.slimit_offset,
            desc: false,
        })
    }

    pub fn value_range_query(&mut self) -> Result<ValueRangeQuery> {
        let devices = self.select_devices()?;
        let (start_timestamp, end_timestamp) = self.time_window();
        let query = &self.model.config.query;
        Ok(ValueRangeQuery {
            devices,
            start_timestamp,
            end_timestamp,
            value_threshold: query.lower_value,
            limit: query.limit_n,
            offset: query.limit_offset,
            slimit: query.slimit_n,
            soffset: query.slimit_offset,
            desc: false,
        })
    }

    pub fn agg_range_query(&mut self) -> Result<AggRangeQuery> {
        let devices = self.select_devices()?;
        let (start_timestamp, end_timestamp) = self.time_window();
        Ok(AggRangeQuery {
            devices,
            start_timestamp,
            end_timestamp,
            agg_fun: self.model.config.query.aggregate_fun.clone(),
        })
    }

    pub fn agg_value_query(&mut self) -> Result<AggValueQuery> {
        let devices = self.select_devices()?;
        let query = &self.model.config.query;
        Ok(AggValueQuery {
            devices,
            start_timestamp: self.model.start_timestamp(),
            end_timestamp: self.model.end_timestamp(),
            agg_fun: query.aggregate_fun.clone(),
            value_threshold: query.lower_value,
        })
    }

    pub fn agg_range_value_query(&mut self) -> Result<AggRangeValueQuery> {
        let devices = self.select_devices()?;
        let (start_timestamp, end_timestamp) = self.time_window();
        let query = &self.model.config.query;
        Ok(AggRangeValueQuery {
            devices,
            start_timestamp,
            end_timestamp,
            agg_fun: query.aggregate_fun.clone(),
            value_threshold: query.lower_value,
        })
    }

    pub fn group_by_query(&mut self) -> Result<GroupByQuery> {
        let devices = self.select_devices()?;
        let (start_timestamp, end_timestamp) = self.time_window();
        let config = self.model.config();
        let granularity = config.query.group_by_time_unit * config.timestamp_precision.per_milli();
        Ok(GroupByQuery {
            devices,
            start_timestamp,
            end_timestamp,
            agg_fun: config.query.aggregate_fun.clone(),
            granularity,
        })
    }

    pub fn latest_point_query(&mut self) -> Result<LatestPointQuery> {
        let devices = self.select_devices()?;
        Ok(LatestPointQuery { devices })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tsbench_config::{FunctionRatios, TimestampPrecision};

    use super::*;

    fn model(config: BenchmarkConfig) -> Arc<DataModel> {
        Arc::new(DataModel::new(Arc::new(config), &FunctionCatalog::built_in()).unwrap())
    }

    fn small_config() -> BenchmarkConfig {
        BenchmarkConfig {
            device_number: 4,
            sensor_number: 3,
            batch_size_per_write: 5,
            loop_count: 10,
            start_time: "1970-01-01T00:00:10Z".to_string(),
            point_step: 100,
            is_regular_frequency: true,
            ..Default::default()
        }
    }

    #[test]
    fn batch_timestamps_follow_loop_index() {
        let model = model(small_config());
        let device = Arc::clone(&model.devices()[1]);
        let mut workload = SyntheticWorkload::new(Arc::clone(&model), 0);

        let batch = workload.one_batch(&device, 2).unwrap();
        let timestamps: Vec<i64> = batch.records().iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![11_000, 11_100, 11_200, 11_300, 11_400]);
        assert_eq!(batch.point_count(), 15);
        assert_eq!(batch.device().device(), "d_1");
        assert!(batch.records().iter().all(|r| r.values.len() == 3));
    }

    #[test]
    fn single_sensor_batch_has_one_column() {
        let model = model(small_config());
        let device = Arc::clone(&model.devices()[0]);
        let mut workload = SyntheticWorkload::new(model, 0);

        let batch = workload.one_sensor_batch(&device, 0, 2).unwrap();
        assert_eq!(batch.sensors(), &["s_2".to_string()]);
        assert_eq!(batch.sensor_index(), Some(2));
        assert_eq!(batch.point_count(), 5);

        let err = workload.one_sensor_batch(&device, 0, 3).unwrap_err();
        assert!(matches!(err, WorkloadError::SensorOutOfRange { index: 3, .. }));
    }

    #[test]
    fn irregular_frequency_jitters_within_a_step() {
        let model = model(BenchmarkConfig {
            is_regular_frequency: false,
            timestamp_precision: TimestampPrecision::Us,
            ..small_config()
        });
        let device = Arc::clone(&model.devices()[0]);
        let mut workload = SyntheticWorkload::new(model, 0);

        let batch = workload.one_batch(&device, 0).unwrap();
        for (j, record) in batch.records().iter().enumerate() {
            let slot = 10_000_000 + j as i64 * 100_000;
            assert!(
                (slot..slot + 100_000).contains(&record.timestamp),
                "record {j} at {} outside its step",
                record.timestamp
            );
        }
    }

    #[test]
    fn constant_functions_give_constant_values() {
        let model = model(BenchmarkConfig {
            function_ratios: FunctionRatios {
                constant: 1.0,
                line: 0.0,
                random: 0.0,
                sine: 0.0,
                square: 0.0,
            },
            ..small_config()
        });
        let device = Arc::clone(&model.devices()[0]);
        let mut workload = SyntheticWorkload::new(model, 0);

        let a = workload.one_batch(&device, 0).unwrap();
        let b = workload.one_batch(&device, 7).unwrap();
        assert_eq!(a.records()[0].values, b.records()[4].values);
    }

    #[test]
    fn unbound_sensor_is_an_error() {
        let config = Arc::new(small_config());
        let devices = build_device_schemas(&config);
        let model =
            Arc::new(DataModel::from_parts(config, devices, SensorFunctions::default()).unwrap());
        let device = Arc::clone(&model.devices()[0]);
        let mut workload = SyntheticWorkload::new(model, 0);

        let err = workload.one_batch(&device, 0).unwrap_err();
        assert!(matches!(err, WorkloadError::FunctionNotBound(s) if s == "s_0"));
    }

    #[test]
    fn queries_select_configured_devices_and_sensors() {
        let mut config = small_config();
        config.query.device_num = 2;
        config.query.sensor_num = 2;
        config.query.limit_n = Some(3);
        config.query.slimit_n = Some(2);
        config.query.slimit_offset = 1;
        let model = model(config);
        let mut workload = SyntheticWorkload::new(Arc::clone(&model), 0);

        for _ in 0..50 {
            let query = workload.range_query().unwrap();
            assert_eq!(query.devices.len(), 2);
            assert_ne!(query.devices[0].device(), query.devices[1].device());
            assert!(query.devices.iter().all(|d| d.sensors().len() == 2));
            assert!(query.start_timestamp >= model.start_timestamp());
            assert!(query.start_timestamp < model.end_timestamp());
            assert_eq!(query.end_timestamp - query.start_timestamp, 10_000);
            assert_eq!((query.start_timestamp - model.start_timestamp()) % 100, 0);
            assert_eq!(query.limit, Some(3));
            assert_eq!((query.slimit, query.soffset), (Some(2), 1));
            assert!(!query.desc);
            assert!(query.into_desc().desc);
        }

        let group_by = workload.group_by_query().unwrap();
        assert_eq!(group_by.granularity, 5000);
        assert_eq!(group_by.agg_fun, "count");

        let agg_value = workload.agg_value_query().unwrap();
        assert_eq!(agg_value.start_timestamp, 10_000);
        assert_eq!(agg_value.end_timestamp, 10_000 + 50 * 100);
    }

    #[test]
    fn query_sequence_is_reproducible_per_client() {
        let model = model(small_config());
        let mut a = SyntheticWorkload::new(Arc::clone(&model), 1);
        let mut b = SyntheticWorkload::new(Arc::clone(&model), 1);
        let mut other = SyntheticWorkload::new(Arc::clone(&model), 2);

        let from_a: Vec<_> = (0..20).map(|_| a.precise_query().unwrap()).collect();
        let from_b: Vec<_> = (0..20).map(|_| b.precise_query().unwrap()).collect();
        let from_other: Vec<_> = (0..20).map(|_| other.precise_query().unwrap()).collect();
        assert_eq!(from_a, from_b);
        assert_ne!(from_a, from_other);
    }

    #[test]
    fn oversized_query_selection_is_an_error() {
        let mut config = small_config();
        config.query.device_num = 5;
        let mut workload = SyntheticWorkload::new(model(config), 0);
        assert!(matches!(
            workload.latest_point_query(),
            Err(WorkloadError::NotEnoughDevices {
                requested: 5,
                available: 4
            })
        ));
    }
}
