//! The parameter set for a benchmark run.
//!
//! A [`BenchmarkConfig`] is built once at startup, from defaults or from a JSON file, checked
//! with [`BenchmarkConfig::validate`] and then shared read-only by every client for the rest of
//! the run.

use std::{fmt, path::Path, str::FromStr};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod proportion;

pub use proportion::{OPERATION_KINDS, OperationProportion};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("function ratios must each be >= 0 and sum to a positive value, got {0}")]
    InvalidFunctionRatios(FunctionRatios),

    #[error(
        "client_number ({clients}) must be <= device_number ({devices}) when clients are bound \
         to devices"
    )]
    TooManyBoundClients { clients: usize, devices: usize },

    #[error("invalid operation proportion '{value}': {reason}")]
    InvalidOperationProportion { value: String, reason: String },

    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },

    #[error("group_number ({groups}) must be between 1 and device_number ({devices})")]
    InvalidGroupNumber { groups: usize, devices: usize },

    #[error("{name} must be positive, got {value}")]
    NonPositiveDuration { name: &'static str, value: i64 },

    #[error("real_insert_rate must be within (0, 1], got {0}")]
    InvalidRealInsertRate(f64),

    #[error("out_of_order.ratio must be within [0, 1], got {0}")]
    InvalidOutOfOrderRatio(f64),

    #[error("out_of_order.lambda must be positive, got {0}")]
    InvalidLambda(f64),

    #[error("query.{name} ({requested}) must be between 1 and {available}")]
    InvalidQuerySelection {
        name: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("invalid start_time '{value}': {source}")]
    InvalidStartTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Every knob of a benchmark run.
///
/// Field names are the snake_case keys of the JSON config file. Every field has a default, so a
/// config file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// Number of synthetic devices
    pub device_number: usize,
    /// Share of each client's devices that receive writes, within (0, 1]. Queries still
    /// select from every device.
    pub real_insert_rate: f64,
    /// Number of sensors on every device
    pub sensor_number: usize,
    /// Number of concurrent clients
    pub client_number: usize,
    /// Whether devices are partitioned between clients. When set, `client_number` must not
    /// exceed `device_number`.
    pub is_client_bind: bool,
    /// Whether several benchmark processes share one target. Offsets device ids by
    /// `benchmark_index * device_number`.
    pub benchmark_cluster: bool,
    pub benchmark_index: usize,
    /// Number of storage groups devices are spread over
    pub group_number: usize,
    pub sg_strategy: SgStrategy,

    /// Operations issued by each client
    #[serde(rename = "loop")]
    pub loop_count: u64,
    /// Records per write. Every record holds one value per sensor.
    pub batch_size_per_write: usize,
    /// When false, writes carry a single sensor column.
    pub is_sensor_ts_alignment: bool,
    /// RFC 3339 timestamp of the first generated record
    pub start_time: String,
    /// Milliseconds between two records of a device
    pub point_step: i64,
    pub timestamp_precision: TimestampPrecision,
    /// When false, records inside a batch get a random offset below one point step.
    pub is_regular_frequency: bool,
    pub out_of_order: OutOfOrderConfig,

    pub function_ratios: FunctionRatios,
    pub data_seed: u64,

    pub operation_proportion: OperationProportion,
    pub query: QueryConfig,

    /// Minimum time between the start of two operations of one client, 0 disables pacing
    pub op_interval_ms: u64,
    /// Passed through to the backend, which enforces it
    pub write_operation_timeout_ms: u64,
    /// Passed through to the backend, which enforces it
    pub read_operation_timeout_ms: u64,

    /// Clean up old data before the test starts
    pub is_delete_data: bool,
    /// Settling time after the cleanup
    pub init_wait_time_ms: u64,
    /// Register the device schema before writing
    pub create_schema: bool,

    pub db_switch: BackendKind,
    /// Size of the backend's session pool. Owned by the backend, not the harness.
    pub session_pool_size: usize,

    /// When false, every operation is logged with its latency
    pub is_quiet_mode: bool,
    /// Seconds between progress lines, 0 disables them
    pub log_print_interval_secs: u64,

    pub test_data_persistence: PersistenceKind,
    pub csv_output_dir: String,
    /// Rows per CSV file before rolling over to a new one
    pub csv_max_line: u64,
    pub csv_file_split: bool,
    /// Free text stored alongside the results
    pub remark: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            device_number: 2,
            real_insert_rate: 1.0,
            sensor_number: 5,
            client_number: 2,
            is_client_bind: true,
            benchmark_cluster: false,
            benchmark_index: 0,
            group_number: 1,
            sg_strategy: SgStrategy::Hash,
            loop_count: 10_000,
            batch_size_per_write: 1,
            is_sensor_ts_alignment: true,
            start_time: "2018-08-30T00:00:00+08:00".to_string(),
            point_step: 7000,
            timestamp_precision: TimestampPrecision::Ms,
            is_regular_frequency: false,
            out_of_order: OutOfOrderConfig::default(),
            function_ratios: FunctionRatios::default(),
            data_seed: 666,
            operation_proportion: OperationProportion::default(),
            query: QueryConfig::default(),
            op_interval_ms: 0,
            write_operation_timeout_ms: 120_000,
            read_operation_timeout_ms: 300_000,
            is_delete_data: false,
            init_wait_time_ms: 5000,
            create_schema: true,
            db_switch: BackendKind::Noop,
            session_pool_size: 50,
            is_quiet_mode: true,
            log_print_interval_secs: 5,
            test_data_persistence: PersistenceKind::None,
            csv_output_dir: "data/csv_output".to_string(),
            csv_max_line: 10_000_000,
            csv_file_split: true,
            remark: String::new(),
        }
    }
}

impl BenchmarkConfig {
    /// Load a config from a JSON file. The result is not validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        contents.parse()
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every cross-field invariant. Must pass before any client runs.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("device_number", self.device_number),
            ("sensor_number", self.sensor_number),
            ("client_number", self.client_number),
            ("batch_size_per_write", self.batch_size_per_write),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCount { name });
            }
        }

        if !(self.real_insert_rate > 0.0 && self.real_insert_rate <= 1.0) {
            return Err(ConfigError::InvalidRealInsertRate(self.real_insert_rate));
        }

        if !self.function_ratios.is_valid() {
            return Err(ConfigError::InvalidFunctionRatios(self.function_ratios));
        }

        if self.is_client_bind && self.client_number > self.device_number {
            return Err(ConfigError::TooManyBoundClients {
                clients: self.client_number,
                devices: self.device_number,
            });
        }

        self.operation_proportion.validate()?;

        if self.group_number == 0 || self.group_number > self.device_number {
            return Err(ConfigError::InvalidGroupNumber {
                groups: self.group_number,
                devices: self.device_number,
            });
        }

        for (name, value) in [
            ("point_step", self.point_step),
            ("query.interval", self.query.interval),
            ("query.group_by_time_unit", self.query.group_by_time_unit),
        ] {
            if value <= 0 {
                return Err(ConfigError::NonPositiveDuration { name, value });
            }
        }

        let ooo = &self.out_of_order;
        if !(0.0..=1.0).contains(&ooo.ratio) {
            return Err(ConfigError::InvalidOutOfOrderRatio(ooo.ratio));
        }
        if ooo.enabled
            && ooo.mode == OutOfOrderMode::Poisson
            && (ooo.lambda.is_nan() || ooo.lambda <= 0.0)
        {
            return Err(ConfigError::InvalidLambda(ooo.lambda));
        }

        if self.query.device_num == 0 || self.query.device_num > self.device_number {
            return Err(ConfigError::InvalidQuerySelection {
                name: "device_num",
                requested: self.query.device_num,
                available: self.device_number,
            });
        }
        if self.query.sensor_num == 0 || self.query.sensor_num > self.sensor_number {
            return Err(ConfigError::InvalidQuerySelection {
                name: "sensor_num",
                requested: self.query.sensor_num,
                available: self.sensor_number,
            });
        }

        self.start_timestamp()?;

        Ok(())
    }

    /// How many of a client's `devices` it writes to: `real_insert_rate` of them rounded up,
    /// and at least one
    pub fn written_device_count(&self, devices: usize) -> usize {
        let written = (devices as f64 * self.real_insert_rate).ceil() as usize;
        written.clamp(devices.min(1), devices)
    }

    /// Id of the first device owned by this benchmark process
    pub fn first_device_index(&self) -> u64 {
        if self.benchmark_cluster {
            (self.benchmark_index * self.device_number) as u64
        } else {
            0
        }
    }

    /// `start_time` as an epoch timestamp in the configured precision
    pub fn start_timestamp(&self) -> Result<i64> {
        let t = DateTime::parse_from_rfc3339(&self.start_time).map_err(|source| {
            ConfigError::InvalidStartTime {
                value: self.start_time.clone(),
                source,
            }
        })?;
        Ok(t.timestamp_millis() * self.timestamp_precision.per_milli())
    }

    /// `point_step` in the configured precision
    pub fn point_step_in_precision(&self) -> i64 {
        self.point_step * self.timestamp_precision.per_milli()
    }

    /// Time covered by one full batch, in the configured precision
    pub fn batch_interval(&self) -> i64 {
        self.point_step_in_precision() * self.batch_size_per_write as i64
    }

    /// Number of point steps one device covers when every client finishes its loop
    pub fn total_steps(&self) -> u64 {
        self.loop_count
            .saturating_mul(self.batch_size_per_write as u64)
            .max(1)
    }
}

impl FromStr for BenchmarkConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

/// How a device id maps onto a storage group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SgStrategy {
    /// Hash of the device name, modulo the group count
    Hash,
    /// Device id modulo the group count
    Mod,
    /// Devices split into contiguous ranges, one range per group
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPrecision {
    Ms,
    Us,
}

impl TimestampPrecision {
    /// Units of this precision in one millisecond
    pub fn per_milli(self) -> i64 {
        match self {
            Self::Ms => 1,
            Self::Us => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfOrderMode {
    /// Individual records are delayed by a Poisson distributed number of steps
    Poisson,
    /// Whole batches are moved back by one batch interval
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutOfOrderConfig {
    pub enabled: bool,
    pub mode: OutOfOrderMode,
    /// Probability that a record (poisson) or batch (batch) is moved back
    pub ratio: f64,
    /// Mean of the Poisson distribution
    pub lambda: f64,
    /// Upper bound on the number of steps a record is moved back
    pub max_k: u32,
}

impl Default for OutOfOrderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: OutOfOrderMode::Poisson,
            ratio: 0.5,
            lambda: 3.0,
            max_k: 10,
        }
    }
}

/// Relative weights of the five sensor function families
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FunctionRatios {
    pub constant: f64,
    pub line: f64,
    pub random: f64,
    pub sine: f64,
    pub square: f64,
}

impl FunctionRatios {
    /// Weights in assignment order: constant, line, random, sine, square
    pub fn as_array(&self) -> [f64; 5] {
        [self.constant, self.line, self.random, self.sine, self.square]
    }

    pub fn is_valid(&self) -> bool {
        let ratios = self.as_array();
        ratios.iter().all(|r| r.is_finite() && *r >= 0.0) && ratios.iter().sum::<f64>() > 0.0
    }
}

impl Default for FunctionRatios {
    fn default() -> Self {
        Self {
            constant: 0.352,
            line: 0.054,
            random: 0.512,
            sine: 0.036,
            square: 0.054,
        }
    }
}

impl fmt::Display for FunctionRatios {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "constant={} line={} random={} sine={} square={}",
            self.constant, self.line, self.random, self.sine, self.square
        )
    }
}

/// Shape of generated read queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Devices touched by each query
    pub device_num: usize,
    /// Sensors touched by each query
    pub sensor_num: usize,
    /// Aggregation function name passed to the backend
    pub aggregate_fun: String,
    /// Width of the time filter, in milliseconds
    pub interval: i64,
    /// Threshold of value filtered queries
    pub lower_value: f64,
    /// Width of a group in group-by queries, in milliseconds
    pub group_by_time_unit: i64,
    pub seed: u64,
    /// Points returned per series by range queries
    pub limit_n: Option<usize>,
    pub limit_offset: usize,
    /// Series returned by range queries
    pub slimit_n: Option<usize>,
    pub slimit_offset: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            device_num: 1,
            sensor_num: 1,
            aggregate_fun: "count".to_string(),
            interval: 10_000,
            lower_value: 0.0,
            group_by_time_unit: 5000,
            seed: 1_516_580_959_202,
            limit_n: None,
            limit_offset: 0,
            slimit_n: None,
            slimit_offset: 0,
        }
    }
}

/// Which backend the run talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Accepts every operation without storing anything
    Noop,
    /// Keeps every point in process memory and answers queries from it
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "memory" => Ok(Self::Memory),
            _ => Err(format!(
                "Invalid backend '{s}'. Valid options: noop, memory"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Where per-operation results are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceKind {
    None,
    Csv,
}

impl FromStr for PersistenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "csv" => Ok(Self::Csv),
            _ => Err(format!(
                "Invalid persistence '{s}'. Valid options: none, csv"
            )),
        }
    }
}

impl fmt::Display for PersistenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Csv => write!(f, "csv"),
        }
    }
}
