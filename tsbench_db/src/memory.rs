//! A backend that keeps every point in process memory.

use std::{
    collections::BTreeMap,
    ops::Range,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use tsbench_workload::{
    AggRangeQuery, AggRangeValueQuery, AggValueQuery, Batch, DeviceSchema, GroupByQuery,
    LatestPointQuery, PreciseQuery, RangeQuery, ValueRangeQuery,
};

use crate::{Database, DbError, OperationTimeouts, Result, Status};

/// `(device, sensor)`
type SeriesKey = (String, String);
type Series = BTreeMap<i64, f64>;

/// Aggregation functions understood by [`MemoryDatabase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
}

impl FromStr for Aggregation {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" | "mean" => Ok(Self::Avg),
            "min" | "min_value" => Ok(Self::Min),
            "max" | "max_value" => Ok(Self::Max),
            "first" | "first_value" => Ok(Self::First),
            "last" | "last_value" => Ok(Self::Last),
            _ => Err(DbError::Operation(format!(
                "unsupported aggregation function '{s}'"
            ))),
        }
    }
}

impl Aggregation {
    /// `None` when there is nothing to aggregate
    fn apply(self, values: impl Iterator<Item = f64>) -> Option<f64> {
        let mut count = 0usize;
        let mut acc: Option<f64> = None;
        for v in values {
            count += 1;
            acc = Some(match (self, acc) {
                (_, None) => v,
                (Self::Count, Some(_)) => 0.0,
                (Self::Sum | Self::Avg, Some(a)) => a + v,
                (Self::Min, Some(a)) => a.min(v),
                (Self::Max, Some(a)) => a.max(v),
                (Self::First, Some(a)) => a,
                (Self::Last, Some(_)) => v,
            });
        }
        let acc = acc?;
        Some(match self {
            Self::Count => count as f64,
            Self::Avg => acc / count as f64,
            _ => acc,
        })
    }
}

/// Stores every written value and answers all query kinds from it.
///
/// The number of points returned by a query is what a client would read back: raw points
/// for range queries, one point per series for aggregates and one per non-empty window for
/// group by queries.
///
/// An operation that reaches its [`OperationTimeouts`] limit, for instance while waiting for
/// the series lock, completes and is then reported as failed.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    series: RwLock<BTreeMap<SeriesKey, Series>>,
    devices: RwLock<BTreeMap<String, String>>,
    timeouts: OperationTimeouts,
}

impl MemoryDatabase {
    /// A backend without time limits
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(timeouts: OperationTimeouts) -> Self {
        Self {
            timeouts,
            ..Self::default()
        }
    }

    pub fn timeouts(&self) -> OperationTimeouts {
        self.timeouts
    }

    /// Number of values stored over all series
    pub fn point_count(&self) -> usize {
        self.series.read().values().map(BTreeMap::len).sum()
    }

    /// Storage group of every registered device
    pub fn registered_devices(&self) -> BTreeMap<String, String> {
        self.devices.read().clone()
    }

    /// Sum of `f` over every stored series the query selects
    fn fold_series<F>(&self, devices: &[DeviceSchema], f: F) -> usize
    where
        F: FnMut(&Series) -> usize,
    {
        self.fold_series_paged(devices, 0, None, f)
    }

    /// [`Self::fold_series`] over the stored series left after skipping `soffset` and keeping
    /// at most `slimit`
    fn fold_series_paged<F>(
        &self,
        devices: &[DeviceSchema],
        soffset: usize,
        slimit: Option<usize>,
        mut f: F,
    ) -> usize
    where
        F: FnMut(&Series) -> usize,
    {
        let series = self.series.read();
        devices
            .iter()
            .flat_map(|d| d.sensors().iter().map(move |s| (d.device(), s.as_str())))
            .filter_map(|(device, sensor)| series.get(&(device.to_string(), sensor.to_string())))
            .skip(soffset)
            .take(slimit.unwrap_or(usize::MAX))
            .map(&mut f)
            .sum()
    }
}

/// `status`, or a failure when the operation started at `started` reached `limit`
fn within(limit: Option<Duration>, started: Instant, status: Status) -> Status {
    match limit {
        Some(limit) if started.elapsed() >= limit => Status::failed(format!(
            "operation exceeded its {} ms limit",
            limit.as_millis()
        )),
        _ => status,
    }
}

fn window(start: i64, end: i64) -> Range<i64> {
    start..end.max(start)
}

fn paged(matching: usize, offset: usize, limit: Option<usize>) -> usize {
    let remaining = matching.saturating_sub(offset);
    limit.map_or(remaining, |limit| remaining.min(limit))
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let removed = {
            let mut series = self.series.write();
            let removed = series.len();
            series.clear();
            removed
        };
        self.devices.write().clear();
        debug!(removed, "cleared in-memory series");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn register_schema(&self, schemas: &[Arc<DeviceSchema>]) -> Result<()> {
        let mut devices = self.devices.write();
        for schema in schemas {
            devices.insert(schema.device().to_string(), schema.group().to_string());
        }
        Ok(())
    }

    async fn insert_one_batch(&self, batch: &Batch) -> Result<Status> {
        let started = Instant::now();
        let device = batch.device().device();
        let sensors = batch.sensors();
        let mut series = self.series.write();
        for record in batch.records() {
            if record.values.len() != sensors.len() {
                return Ok(Status::failed(format!(
                    "record at {} has {} values for {} sensors",
                    record.timestamp,
                    record.values.len(),
                    sensors.len()
                )));
            }
            for (sensor, value) in sensors.iter().zip(&record.values) {
                series
                    .entry((device.to_string(), sensor.clone()))
                    .or_default()
                    .insert(record.timestamp, *value);
            }
        }
        Ok(within(
            self.timeouts.write,
            started,
            Status::ok_with_points(batch.point_count()),
        ))
    }

    async fn precise_query(&self, query: &PreciseQuery) -> Result<Status> {
        let started = Instant::now();
        let points = self.fold_series(&query.devices, |s| {
            usize::from(s.contains_key(&query.timestamp))
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn range_query(&self, query: &RangeQuery) -> Result<Status> {
        let started = Instant::now();
        let range = window(query.start_timestamp, query.end_timestamp);
        let points = self.fold_series_paged(&query.devices, query.soffset, query.slimit, |s| {
            paged(s.range(range.clone()).count(), query.offset, query.limit)
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn value_range_query(&self, query: &ValueRangeQuery) -> Result<Status> {
        let started = Instant::now();
        let range = window(query.start_timestamp, query.end_timestamp);
        let points = self.fold_series_paged(&query.devices, query.soffset, query.slimit, |s| {
            let matching = s
                .range(range.clone())
                .filter(|(_, v)| **v > query.value_threshold)
                .count();
            paged(matching, query.offset, query.limit)
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn agg_range_query(&self, query: &AggRangeQuery) -> Result<Status> {
        let started = Instant::now();
        let aggregation: Aggregation = query.agg_fun.parse()?;
        let range = window(query.start_timestamp, query.end_timestamp);
        let points = self.fold_series(&query.devices, |s| {
            usize::from(aggregation.apply(s.range(range.clone()).map(|(_, v)| *v)).is_some())
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn agg_value_query(&self, query: &AggValueQuery) -> Result<Status> {
        let started = Instant::now();
        let aggregation: Aggregation = query.agg_fun.parse()?;
        let range = window(query.start_timestamp, query.end_timestamp);
        let points = self.fold_series(&query.devices, |s| {
            let values = s
                .range(range.clone())
                .map(|(_, v)| *v)
                .filter(|v| *v > query.value_threshold);
            usize::from(aggregation.apply(values).is_some())
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn agg_range_value_query(&self, query: &AggRangeValueQuery) -> Result<Status> {
        let started = Instant::now();
        let aggregation: Aggregation = query.agg_fun.parse()?;
        let range = window(query.start_timestamp, query.end_timestamp);
        let points = self.fold_series(&query.devices, |s| {
            let values = s
                .range(range.clone())
                .map(|(_, v)| *v)
                .filter(|v| *v > query.value_threshold);
            usize::from(aggregation.apply(values).is_some())
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn group_by_query(&self, query: &GroupByQuery) -> Result<Status> {
        let started = Instant::now();
        let aggregation: Aggregation = query.agg_fun.parse()?;
        if query.granularity <= 0 {
            return Ok(Status::failed(format!(
                "group by granularity must be positive, got {}",
                query.granularity
            )));
        }
        let points = self.fold_series(&query.devices, |s| {
            let mut groups = 0;
            let mut start = query.start_timestamp;
            while start < query.end_timestamp {
                let end = (start + query.granularity).min(query.end_timestamp);
                if aggregation
                    .apply(s.range(start..end).map(|(_, v)| *v))
                    .is_some()
                {
                    groups += 1;
                }
                start = end;
            }
            groups
        });
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }

    async fn latest_point_query(&self, query: &LatestPointQuery) -> Result<Status> {
        let started = Instant::now();
        let points = self.fold_series(&query.devices, |s| usize::from(!s.is_empty()));
        Ok(within(self.timeouts.read, started, Status::ok_with_points(points)))
    }
}
