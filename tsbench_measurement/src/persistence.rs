//! Sinks that store per-operation results outside the process.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use tsbench_config::{BenchmarkConfig, PersistenceKind};

use crate::Operation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create output directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write csv row: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize the test configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Host metrics that can be stored next to the operation results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemMetric {
    CpuUsage,
    MemUsage,
    DiskIoUsage,
    NetworkReceiveRate,
    NetworkSendRate,
}

impl SystemMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::CpuUsage => "cpu_usage",
            Self::MemUsage => "mem_usage",
            Self::DiskIoUsage => "disk_io_usage",
            Self::NetworkReceiveRate => "net_recv_rate",
            Self::NetworkSendRate => "net_send_rate",
        }
    }
}

/// Destination of everything a run records.
///
/// Calls happen synchronously on the client that produced the result, from many clients
/// at once. A row is on its destination when the call returns.
pub trait TestDataPersistence: fmt::Debug + Send + Sync + 'static {
    fn insert_system_metrics(&self, metrics: &BTreeMap<SystemMetric, f64>) -> Result<()>;

    fn save_test_config(&self, config: &BenchmarkConfig) -> Result<()>;

    fn save_operation_result(
        &self,
        operation: Operation,
        ok_points: u64,
        fail_points: u64,
        latency_ms: f64,
        remark: &str,
    ) -> Result<()>;

    fn save_result(&self, operation: Operation, key: &str, value: &str) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Build the sink selected by `test_data_persistence`
pub fn create_persistence(config: &BenchmarkConfig) -> Result<Arc<dyn TestDataPersistence>> {
    Ok(match config.test_data_persistence {
        PersistenceKind::None => Arc::new(NoneRecorder),
        PersistenceKind::Csv => Arc::new(CsvRecorder::new(config)?),
    })
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneRecorder;

impl TestDataPersistence for NoneRecorder {
    fn insert_system_metrics(&self, _metrics: &BTreeMap<SystemMetric, f64>) -> Result<()> {
        Ok(())
    }

    fn save_test_config(&self, _config: &BenchmarkConfig) -> Result<()> {
        Ok(())
    }

    fn save_operation_result(
        &self,
        _operation: Operation,
        _ok_points: u64,
        _fail_points: u64,
        _latency_ms: f64,
        _remark: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn save_result(&self, _operation: Operation, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

const OPERATION_HEADER: [&str; 6] =
    ["id", "operation", "ok_point", "fail_point", "latency_ms", "remark"];

struct CsvFile {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvFile {
    fn create<I, T>(path: PathBuf, header: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut writer = csv::Writer::from_path(&path).map_err(|source| Error::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mut file = Self { path, writer };
        file.append(header)?;
        Ok(file)
    }

    /// Write one row and flush it to the file before returning
    fn append<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for CsvFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvFile").field("path", &self.path).finish()
    }
}

#[derive(Debug)]
struct OperationFiles {
    index: usize,
    current: CsvFile,
}

/// Writes results to CSV files under one directory.
///
/// Every file name starts with a project id made of the backend name and the start time.
/// Operation rows are numbered by a line counter shared by every client. With
/// `csv_file_split` on, a new operation file is started every `csv_max_line` rows.
#[derive(Debug)]
pub struct CsvRecorder {
    dir: PathBuf,
    project_id: String,
    max_lines: u64,
    split: bool,
    lines: AtomicU64,
    operations: Mutex<OperationFiles>,
    results: Mutex<Option<CsvFile>>,
    system: Mutex<Option<CsvFile>>,
}

impl CsvRecorder {
    pub fn new(config: &BenchmarkConfig) -> Result<Self> {
        let project_id = format!(
            "{}_{}",
            config.db_switch,
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );
        Self::with_project(
            &config.csv_output_dir,
            project_id,
            config.csv_max_line,
            config.csv_file_split,
        )
    }

    pub fn with_project(
        dir: impl AsRef<Path>,
        project_id: impl Into<String>,
        max_lines: u64,
        split: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::CreateDir {
            path: dir.display().to_string(),
            source,
        })?;
        let project_id = project_id.into();
        let current = CsvFile::create(operation_path(&dir, &project_id, 0), OPERATION_HEADER)?;
        info!(dir = %dir.display(), %project_id, "writing results as csv");

        Ok(Self {
            dir,
            project_id,
            max_lines: max_lines.max(1),
            split,
            lines: AtomicU64::new(0),
            operations: Mutex::new(OperationFiles { index: 0, current }),
            results: Mutex::new(None),
            system: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Operation rows written so far
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    fn file_path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{kind}.csv", self.project_id))
    }

    fn write_lazily<I, T>(
        &self,
        slot: &Mutex<Option<CsvFile>>,
        kind: &str,
        header: &[&str],
        record: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut slot = slot.lock();
        if slot.is_none() {
            *slot = Some(CsvFile::create(self.file_path(kind), header)?);
        }
        if let Some(file) = slot.as_mut() {
            file.append(record)?;
        }
        Ok(())
    }
}

fn operation_path(dir: &Path, project_id: &str, index: usize) -> PathBuf {
    dir.join(format!("{project_id}.operation.{index}.csv"))
}

impl TestDataPersistence for CsvRecorder {
    fn insert_system_metrics(&self, metrics: &BTreeMap<SystemMetric, f64>) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        for (metric, value) in metrics {
            let value = value.to_string();
            self.write_lazily(
                &self.system,
                "system",
                &["timestamp", "metric", "value"],
                [timestamp.as_str(), metric.name(), value.as_str()],
            )?;
        }
        Ok(())
    }

    fn save_test_config(&self, config: &BenchmarkConfig) -> Result<()> {
        let mut file = CsvFile::create(self.file_path("config"), ["key", "value"])?;
        if let serde_json::Value::Object(fields) = serde_json::to_value(config)? {
            for (key, value) in fields {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                file.writer.write_record([key.as_str(), value.as_str()])?;
            }
        }
        file.writer.flush()?;
        Ok(())
    }

    fn save_operation_result(
        &self,
        operation: Operation,
        ok_points: u64,
        fail_points: u64,
        latency_ms: f64,
        remark: &str,
    ) -> Result<()> {
        let mut files = self.operations.lock();
        let line = self.lines.fetch_add(1, Ordering::Relaxed);
        if self.split && line > 0 && line % self.max_lines == 0 {
            files.index += 1;
            let path = operation_path(&self.dir, &self.project_id, files.index);
            debug!(path = %path.display(), line, "rolling over to a new csv file");
            files.current = CsvFile::create(path, OPERATION_HEADER)?;
        }
        files.current.append([
            line.to_string(),
            operation.name().to_string(),
            ok_points.to_string(),
            fail_points.to_string(),
            format!("{latency_ms:.3}"),
            remark.to_string(),
        ])
    }

    fn save_result(&self, operation: Operation, key: &str, value: &str) -> Result<()> {
        self.write_lazily(
            &self.results,
            "result",
            &["operation", "key", "value"],
            [operation.name(), key, value],
        )
    }

    fn close(&self) -> Result<()> {
        self.operations.lock().current.writer.flush()?;
        for slot in [&self.results, &self.system] {
            if let Some(file) = slot.lock().as_mut() {
                file.writer.flush()?;
            }
        }
        debug!(lines = self.lines(), "closed csv recorder");
        Ok(())
    }
}
