use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tsbench_config::{BackendKind, BenchmarkConfig, OperationProportion, PersistenceKind};
use tsbench_workload::FunctionCatalog;

/// Where the benchmark configuration comes from, and the fields most often overridden.
///
/// A config file is read first (defaults when absent), then every flag given here replaces the
/// matching field.
#[derive(Debug, Parser)]
pub(crate) struct BenchmarkArgs {
    /// JSON benchmark configuration. Every field is optional.
    #[clap(short = 'c', long = "config", env = "TSBENCH_CONFIG", action)]
    pub(crate) config_path: Option<PathBuf>,

    /// JSON sensor function catalog replacing the built-in one
    #[clap(long = "function-catalog", env = "TSBENCH_FUNCTION_CATALOG", action)]
    pub(crate) function_catalog: Option<PathBuf>,

    /// Backend under test: noop, memory
    #[clap(long = "db", env = "TSBENCH_DB_SWITCH", action)]
    db_switch: Option<BackendKind>,

    #[clap(long = "device-number", env = "TSBENCH_DEVICE_NUMBER", action)]
    device_number: Option<usize>,

    #[clap(long = "sensor-number", env = "TSBENCH_SENSOR_NUMBER", action)]
    sensor_number: Option<usize>,

    #[clap(long = "client-number", env = "TSBENCH_CLIENT_NUMBER", action)]
    client_number: Option<usize>,

    /// Operations issued by every client
    #[clap(long = "loop", env = "TSBENCH_LOOP", action)]
    loop_count: Option<u64>,

    #[clap(long = "batch-size", env = "TSBENCH_BATCH_SIZE_PER_WRITE", action)]
    batch_size_per_write: Option<usize>,

    /// Relative weights of the 11 operation kinds, e.g. `1:1:0:0:0:0:0:0:0:0:0`
    #[clap(
        long = "operation-proportion",
        env = "TSBENCH_OPERATION_PROPORTION",
        action
    )]
    operation_proportion: Option<OperationProportion>,

    #[clap(long = "data-seed", env = "TSBENCH_DATA_SEED", action)]
    data_seed: Option<u64>,

    /// Minimum time between two operations of one client, e.g. `10ms`
    #[clap(long = "op-interval", env = "TSBENCH_OP_INTERVAL", action)]
    op_interval: Option<humantime::Duration>,

    /// Wait after deleting old data, e.g. `5s`
    #[clap(long = "init-wait", env = "TSBENCH_INIT_WAIT_TIME", action)]
    init_wait: Option<humantime::Duration>,

    /// Delete data left by previous runs before starting
    #[clap(long = "delete-data", env = "TSBENCH_IS_DELETE_DATA", action)]
    delete_data: bool,

    /// Log every operation
    #[clap(long = "verbose-operations", env = "TSBENCH_VERBOSE_OPERATIONS", action)]
    verbose_operations: bool,

    /// Where per-operation results go: none, csv
    #[clap(long = "persistence", env = "TSBENCH_TEST_DATA_PERSISTENCE", action)]
    persistence: Option<PersistenceKind>,

    #[clap(long = "csv-output-dir", env = "TSBENCH_CSV_OUTPUT_DIR", action)]
    csv_output_dir: Option<String>,
}

impl BenchmarkArgs {
    /// The configuration file (or defaults) with every override applied. Not validated.
    pub(crate) fn load(&self) -> anyhow::Result<BenchmarkConfig> {
        let mut config = match &self.config_path {
            Some(path) => BenchmarkConfig::from_path(path)
                .with_context(|| format!("failed to load '{}'", path.display()))?,
            None => BenchmarkConfig::default(),
        };

        if let Some(v) = self.db_switch {
            config.db_switch = v;
        }
        if let Some(v) = self.device_number {
            config.device_number = v;
        }
        if let Some(v) = self.sensor_number {
            config.sensor_number = v;
        }
        if let Some(v) = self.client_number {
            config.client_number = v;
        }
        if let Some(v) = self.loop_count {
            config.loop_count = v;
        }
        if let Some(v) = self.batch_size_per_write {
            config.batch_size_per_write = v;
        }
        if let Some(v) = &self.operation_proportion {
            config.operation_proportion = v.clone();
        }
        if let Some(v) = self.data_seed {
            config.data_seed = v;
        }
        if let Some(v) = self.op_interval {
            config.op_interval_ms = millis(v);
        }
        if let Some(v) = self.init_wait {
            config.init_wait_time_ms = millis(v);
        }
        if self.delete_data {
            config.is_delete_data = true;
        }
        if self.verbose_operations {
            config.is_quiet_mode = false;
        }
        if let Some(v) = self.persistence {
            config.test_data_persistence = v;
        }
        if let Some(v) = &self.csv_output_dir {
            config.csv_output_dir = v.clone();
        }

        Ok(config)
    }

    pub(crate) fn catalog(&self) -> anyhow::Result<FunctionCatalog> {
        match &self.function_catalog {
            Some(path) => FunctionCatalog::from_path(path)
                .with_context(|| format!("failed to load function catalog '{}'", path.display())),
            None => Ok(FunctionCatalog::built_in()),
        }
    }
}

fn millis(d: humantime::Duration) -> u64 {
    u64::try_from(std::time::Duration::from(d).as_millis()).unwrap_or(u64::MAX)
}
