use std::collections::BTreeMap;

use anyhow::Context;
use tsbench_workload::{FunctionFamily, assign_sensor_functions, schema::sensor_names};

use super::common::BenchmarkArgs;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    bench: BenchmarkArgs,
}

/// Prints one `<sensor> <function as JSON>` line per sensor, then the size of every family
/// on stderr
pub(crate) fn command(config: Config) -> anyhow::Result<()> {
    let bench_config = config.bench.load()?;
    let catalog = config.bench.catalog()?;

    let sensors = sensor_names(bench_config.sensor_number);
    let functions = assign_sensor_functions(
        &sensors,
        &bench_config.function_ratios,
        bench_config.data_seed,
        &catalog,
    )
    .context("failed to assign sensor functions")?;

    for sensor in &sensors {
        if let Some(f) = functions.get(sensor) {
            println!("{sensor} {}", serde_json::to_string(f)?);
        }
    }

    let mut families: BTreeMap<String, usize> = FunctionFamily::ALL
        .iter()
        .map(|f| (f.to_string(), 0))
        .collect();
    for (_, f) in functions.iter() {
        *families.entry(f.family().to_string()).or_default() += 1;
    }
    for (family, count) in families {
        eprintln!("{family}: {count}");
    }
    Ok(())
}
