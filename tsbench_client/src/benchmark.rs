use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsbench_config::BenchmarkConfig;
use tsbench_db::{Database, DbWrapper};
use tsbench_measurement::{Measurement, Summary, persistence::TestDataPersistence};
use tsbench_workload::{DataModel, DeviceSchema, FunctionCatalog};

use crate::{Client, Result};

/// Split `devices` over `clients`.
///
/// Bound clients get disjoint contiguous chunks, the remainder spread one device each over
/// the first clients. Unbound clients all share the full device list.
pub fn partition_devices(
    devices: &[Arc<DeviceSchema>],
    clients: usize,
    bind: bool,
) -> Vec<Vec<Arc<DeviceSchema>>> {
    if !bind {
        return vec![devices.to_vec(); clients];
    }

    let base = devices.len() / clients.max(1);
    let remainder = devices.len() % clients.max(1);
    let mut rest = devices;
    (0..clients)
        .map(|i| {
            let take = base + usize::from(i < remainder);
            let (chunk, tail) = rest.split_at(take.min(rest.len()));
            rest = tail;
            chunk.to_vec()
        })
        .collect()
}

/// One benchmark run: backend preparation, the concurrent client phase and the final report.
#[derive(Debug)]
pub struct Benchmark {
    config: Arc<BenchmarkConfig>,
    model: Arc<DataModel>,
    db: Arc<DbWrapper>,
    recorder: Arc<dyn TestDataPersistence>,
}

impl Benchmark {
    /// Validate `config` and lay out the devices and their sensor functions
    pub fn new(
        config: BenchmarkConfig,
        db: Arc<dyn Database>,
        recorder: Arc<dyn TestDataPersistence>,
        catalog: &FunctionCatalog,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let model = Arc::new(DataModel::new(Arc::clone(&config), catalog)?);
        let db = Arc::new(DbWrapper::new(
            db,
            Arc::new(Measurement::new()),
            Arc::clone(&recorder),
            Arc::clone(&config),
        ));
        Ok(Self {
            config,
            model,
            db,
            recorder,
        })
    }

    pub fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    pub fn measurement(&self) -> &Arc<Measurement> {
        self.db.measurement()
    }

    /// Run every client to completion and summarize the results.
    ///
    /// Cancelling `shutdown` stops the clients at their next iteration; the run still
    /// reports what was done up to that point. The backend and the persistence sink are
    /// closed whatever the outcome.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Summary> {
        if let Err(e) = self.recorder.save_test_config(&self.config) {
            warn!(error = %e, "failed to persist the test configuration");
        }

        let summary = match self.execute(shutdown).await {
            Ok(elapsed) => {
                let summary = self.measurement().summary(elapsed);
                self.save_summary(&summary);
                summary
            }
            Err(e) => {
                if let Err(close_error) = self.db.close().await {
                    warn!(error = %close_error, "failed to close the backend");
                }
                return Err(e);
            }
        };

        self.db.close().await?;
        Ok(summary)
    }

    /// Prepare the backend and run the clients, returning the duration of the client phase
    async fn execute(&self, shutdown: CancellationToken) -> Result<Duration> {
        self.db.init().await?;
        if self.config.is_delete_data {
            self.db.cleanup().await?;
        }
        self.db.register_schema(self.model.devices()).await?;

        let token = shutdown.child_token();
        let clients = partition_devices(
            self.model.devices(),
            self.config.client_number,
            self.config.is_client_bind,
        )
        .into_iter()
        .enumerate()
        .map(|(id, devices)| {
            Client::new(
                id,
                Arc::clone(&self.model),
                Arc::clone(&self.db),
                devices,
                token.clone(),
            )
        })
        .collect::<Result<Vec<_>>>()?;

        let stop_progress = CancellationToken::new();
        let progress = tokio::spawn(report_progress(
            clients.iter().map(|c| (c.id(), c.completed())).collect(),
            self.config.loop_count,
            Duration::from_secs(self.config.log_print_interval_secs),
            stop_progress.clone(),
        ));

        info!(clients = clients.len(), loop_count = self.config.loop_count, "starting clients");
        let start = Instant::now();
        let tasks: Vec<_> = clients
            .into_iter()
            .map(|client| tokio::spawn(client.run()))
            .collect();
        let results = futures::future::join_all(tasks).await;
        let elapsed = start.elapsed();
        stop_progress.cancel();
        progress.await?;

        let mut issued = 0;
        let mut first_error = None;
        for result in results {
            match result? {
                Ok(n) => issued += n,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!(issued, elapsed_secs = elapsed.as_secs_f64(), "all clients finished");
        Ok(elapsed)
    }

    fn save_summary(&self, summary: &Summary) {
        let active = summary
            .operations
            .iter()
            .filter(|s| s.ok_operations + s.fail_operations > 0);
        for operation in active {
            for (key, value) in operation.entries() {
                if let Err(e) = self.recorder.save_result(operation.operation, key, &value) {
                    warn!(error = %e, "failed to persist the final results");
                    return;
                }
            }
        }
    }
}

/// Log how far every client got, every `every` until `stop` is cancelled. Zero disables.
async fn report_progress(
    clients: Vec<(usize, Arc<AtomicU64>)>,
    loop_count: u64,
    every: Duration,
    stop: CancellationToken,
) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        for (client, completed) in &clients {
            let done = completed.load(Ordering::Relaxed);
            let percent = if loop_count == 0 {
                100.0
            } else {
                done as f64 * 100.0 / loop_count as f64
            };
            info!(client, done, loop_count, "{percent:.2}% workload is done");
        }
    }
}
