//! The read query shapes handed to a backend.
//!
//! Every query selects a set of devices, each listing only the sensors the query touches.
//! Timestamps are in the configured precision. Time ranges are half-open,
//! `[start_timestamp, end_timestamp)`.

use crate::schema::DeviceSchema;

/// Values of the selected sensors at exactly one timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct PreciseQuery {
    pub devices: Vec<DeviceSchema>,
    pub timestamp: i64,
}

/// Raw points within a time range
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    /// Points per series
    pub limit: Option<usize>,
    pub offset: usize,
    /// Series, in selection order
    pub slimit: Option<usize>,
    pub soffset: usize,
    pub desc: bool,
}

impl RangeQuery {
    /// The same query, returning the newest points first
    pub fn into_desc(self) -> Self {
        Self { desc: true, ..self }
    }
}

/// Raw points within a time range whose value is above a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRangeQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub value_threshold: f64,
    /// Points per series
    pub limit: Option<usize>,
    pub offset: usize,
    /// Series, in selection order
    pub slimit: Option<usize>,
    pub soffset: usize,
    pub desc: bool,
}

impl ValueRangeQuery {
    pub fn into_desc(self) -> Self {
        Self { desc: true, ..self }
    }
}

/// One aggregate per sensor over a time range
#[derive(Debug, Clone, PartialEq)]
pub struct AggRangeQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub agg_fun: String,
}

/// One aggregate per sensor over every value above a threshold.
///
/// The time range spans all data the run writes.
#[derive(Debug, Clone, PartialEq)]
pub struct AggValueQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub agg_fun: String,
    pub value_threshold: f64,
}

/// One aggregate per sensor over a time range, only counting values above a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct AggRangeValueQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub agg_fun: String,
    pub value_threshold: f64,
}

/// One aggregate per sensor and per `granularity` wide window of a time range
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByQuery {
    pub devices: Vec<DeviceSchema>,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub agg_fun: String,
    pub granularity: i64,
}

/// The most recent point of every selected sensor
#[derive(Debug, Clone, PartialEq)]
pub struct LatestPointQuery {
    pub devices: Vec<DeviceSchema>,
}

/// Number of series a query touches
pub fn series_count(devices: &[DeviceSchema]) -> usize {
    devices.iter().map(|d| d.sensors().len()).sum()
}
