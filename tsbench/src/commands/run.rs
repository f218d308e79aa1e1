use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsbench_client::Benchmark;
use tsbench_db::create_database;
use tsbench_logging::cli::LoggingConfig;
use tsbench_measurement::persistence::create_persistence;

use super::common::BenchmarkArgs;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    #[clap(flatten)]
    bench: BenchmarkArgs,

    /// Print the summary as JSON instead of the result tables
    #[clap(long = "json", action)]
    json: bool,
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let bench_config = config.bench.load()?;
    bench_config
        .validate()
        .context("invalid benchmark configuration")?;
    let catalog = config.bench.catalog()?;

    info!(
        db = %bench_config.db_switch,
        devices = bench_config.device_number,
        sensors = bench_config.sensor_number,
        clients = bench_config.client_number,
        loop_count = bench_config.loop_count,
        "starting benchmark"
    );

    let db = create_database(&bench_config);
    let recorder =
        create_persistence(&bench_config).context("failed to open the result destination")?;
    let benchmark = Benchmark::new(bench_config, db, recorder, &catalog)
        .context("failed to prepare the workload")?;

    let shutdown = CancellationToken::new();
    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            warn!("stopping clients, partial results follow");
            shutdown.cancel();
        })
    };
    let outcome = benchmark.run(shutdown).await;
    signal.abort();
    let summary = outcome.context("benchmark failed")?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the run on UNIX systems
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to register signal handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
}

/// Wait for a `ctrl+c` to stop the run on Windows systems
#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT");
}
