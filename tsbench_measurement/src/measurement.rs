use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tsbench_config::OPERATION_KINDS;

use crate::Operation;

/// Latencies are kept in microseconds with three significant digits.
const LATENCY_SIGFIGS: u8 = 3;

#[derive(Debug)]
struct OperationStats {
    ok_operations: AtomicU64,
    fail_operations: AtomicU64,
    ok_points: AtomicU64,
    fail_points: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
}

impl OperationStats {
    fn new() -> Self {
        Self {
            ok_operations: AtomicU64::new(0),
            fail_operations: AtomicU64::new(0),
            ok_points: AtomicU64::new(0),
            fail_points: AtomicU64::new(0),
            latency_us: Mutex::new(new_histogram()),
        }
    }
}

/// Auto-resizing, so no recorded value is ever out of range
fn new_histogram() -> Histogram<u64> {
    Histogram::new(LATENCY_SIGFIGS).expect("3 significant figures is a valid precision")
}

/// Process wide aggregate of every operation's outcome.
///
/// All updates go through `&self`, so one instance is shared by every client behind an `Arc`.
#[derive(Debug)]
pub struct Measurement {
    stats: [OperationStats; OPERATION_KINDS],
    create_schema_time_ms: Mutex<Option<f64>>,
}

impl Default for Measurement {
    fn default() -> Self {
        Self::new()
    }
}

impl Measurement {
    pub fn new() -> Self {
        Self {
            stats: std::array::from_fn(|_| OperationStats::new()),
            create_schema_time_ms: Mutex::new(None),
        }
    }

    fn stats(&self, operation: Operation) -> &OperationStats {
        &self.stats[operation.index()]
    }

    pub fn add_operation_latency(&self, operation: Operation, latency_ms: f64) {
        let micros = (latency_ms.max(0.0) * 1000.0).round() as u64;
        self.stats(operation).latency_us.lock().saturating_record(micros);
    }

    pub fn add_ok_operation(&self, operation: Operation) {
        self.stats(operation)
            .ok_operations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fail_operation(&self, operation: Operation) {
        self.stats(operation)
            .fail_operations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_ok_points(&self, operation: Operation, points: u64) {
        self.stats(operation)
            .ok_points
            .fetch_add(points, Ordering::Relaxed);
    }

    pub fn add_fail_points(&self, operation: Operation, points: u64) {
        self.stats(operation)
            .fail_points
            .fetch_add(points, Ordering::Relaxed);
    }

    pub fn set_create_schema_time(&self, latency_ms: f64) {
        *self.create_schema_time_ms.lock() = Some(latency_ms);
    }

    pub fn create_schema_time(&self) -> Option<f64> {
        *self.create_schema_time_ms.lock()
    }

    pub fn ok_operations(&self, operation: Operation) -> u64 {
        self.stats(operation).ok_operations.load(Ordering::Relaxed)
    }

    pub fn fail_operations(&self, operation: Operation) -> u64 {
        self.stats(operation).fail_operations.load(Ordering::Relaxed)
    }

    pub fn ok_points(&self, operation: Operation) -> u64 {
        self.stats(operation).ok_points.load(Ordering::Relaxed)
    }

    pub fn fail_points(&self, operation: Operation) -> u64 {
        self.stats(operation).fail_points.load(Ordering::Relaxed)
    }

    /// Operations finished so far, successful or not, over every kind
    pub fn total_operations(&self) -> u64 {
        Operation::ALL
            .iter()
            .map(|op| self.ok_operations(*op) + self.fail_operations(*op))
            .sum()
    }

    /// Snapshot of every counter, with throughput computed over `elapsed`
    pub fn summary(&self, elapsed: Duration) -> Summary {
        let elapsed_secs = elapsed.as_secs_f64();
        let operations = Operation::ALL
            .iter()
            .map(|op| {
                let ok_points = self.ok_points(*op);
                let throughput = if elapsed_secs > 0.0 {
                    ok_points as f64 / elapsed_secs
                } else {
                    0.0
                };
                OperationSummary {
                    operation: *op,
                    ok_operations: self.ok_operations(*op),
                    fail_operations: self.fail_operations(*op),
                    ok_points,
                    fail_points: self.fail_points(*op),
                    throughput,
                    latency: LatencySummary::from_histogram(&self.stats(*op).latency_us.lock()),
                }
            })
            .collect();

        Summary {
            elapsed_secs,
            create_schema_time_ms: self.create_schema_time(),
            operations,
        }
    }
}

/// Latency statistics of one operation kind, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub avg: f64,
    pub min: f64,
    pub p10: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub max: f64,
}

impl LatencySummary {
    fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        let q = |quantile: f64| ms(histogram.value_at_quantile(quantile));
        Self {
            avg: histogram.mean() / 1000.0,
            min: ms(histogram.min()),
            p10: q(0.10),
            p25: q(0.25),
            median: q(0.50),
            p75: q(0.75),
            p90: q(0.90),
            p95: q(0.95),
            p99: q(0.99),
            p999: q(0.999),
            max: ms(histogram.max()),
        }
    }

    /// Statistic names and values, in display order
    pub fn entries(&self) -> [(&'static str, f64); 11] {
        [
            ("AVG", self.avg),
            ("MIN", self.min),
            ("P10", self.p10),
            ("P25", self.p25),
            ("MEDIAN", self.median),
            ("P75", self.p75),
            ("P90", self.p90),
            ("P95", self.p95),
            ("P99", self.p99),
            ("P999", self.p999),
            ("MAX", self.max),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub operation: Operation,
    pub ok_operations: u64,
    pub fail_operations: u64,
    pub ok_points: u64,
    pub fail_points: u64,
    /// Successful points per second
    pub throughput: f64,
    pub latency: LatencySummary,
}

impl OperationSummary {
    /// Every value of this row as `(key, value)` pairs
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![
            ("okOperation", self.ok_operations.to_string()),
            ("okPoint", self.ok_points.to_string()),
            ("failOperation", self.fail_operations.to_string()),
            ("failPoint", self.fail_points.to_string()),
            ("throughput", format!("{:.2}", self.throughput)),
        ];
        entries.extend(
            self.latency
                .entries()
                .into_iter()
                .map(|(k, v)| (k, format!("{v:.2}"))),
        );
        entries
    }
}

/// Final results of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Wall clock time of the client phase, excluding schema registration
    pub elapsed_secs: f64,
    pub create_schema_time_ms: Option<f64>,
    pub operations: Vec<OperationSummary>,
}

impl Summary {
    pub fn operation(&self, operation: Operation) -> Option<&OperationSummary> {
        self.operations.iter().find(|s| s.operation == operation)
    }

    pub fn total_ok_operations(&self) -> u64 {
        self.operations.iter().map(|s| s.ok_operations).sum()
    }

    pub fn total_fail_operations(&self) -> u64 {
        self.operations.iter().map(|s| s.fail_operations).sum()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Test elapsed time (not including schema creation): {:.2} second",
            self.elapsed_secs
        )?;
        if let Some(ms) = self.create_schema_time_ms {
            writeln!(f, "Create schema cost {:.2} second", ms / 1000.0)?;
        }

        writeln!(f, "{:-^120}", " Result Matrix ")?;
        writeln!(
            f,
            "{:<40}{:>14}{:>14}{:>16}{:>14}{:>22}",
            "Operation",
            "okOperation",
            "okPoint",
            "failOperation",
            "failPoint",
            "throughput(point/s)"
        )?;
        for s in &self.operations {
            writeln!(
                f,
                "{:<40}{:>14}{:>14}{:>16}{:>14}{:>22.2}",
                s.operation.name(),
                s.ok_operations,
                s.ok_points,
                s.fail_operations,
                s.fail_points,
                s.throughput
            )?;
        }

        writeln!(f, "{:-^120}", " Latency (ms) Matrix ")?;
        write!(f, "{:<40}", "Operation")?;
        for (name, _) in LatencySummary::default().entries() {
            write!(f, "{name:>10}")?;
        }
        writeln!(f)?;
        for s in &self.operations {
            write!(f, "{:<40}", s.operation.name())?;
            for (_, value) in s.latency.entries() {
                write!(f, "{value:>10.2}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
