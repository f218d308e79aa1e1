use anyhow::Context;

use super::common::BenchmarkArgs;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    bench: BenchmarkArgs,

    /// Fail unless the configuration is valid for a run
    #[clap(long = "check", action)]
    check: bool,
}

pub(crate) fn command(config: Config) -> anyhow::Result<()> {
    let bench_config = config.bench.load()?;
    if config.check {
        bench_config
            .validate()
            .context("invalid benchmark configuration")?;
    }
    println!("{}", bench_config.to_json_string_pretty()?);
    Ok(())
}
