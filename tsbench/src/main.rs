//! Entrypoint of the tsbench binary

use std::num::NonZeroUsize;

use dotenvy::dotenv;

mod commands {
    pub(crate) mod common;
    pub(crate) mod config;
    pub(crate) mod functions;
    pub(crate) mod run;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "tsbench",
    version,
    about = "Benchmark harness for time-series databases",
    long_about = r#"Benchmark harness for time-series databases

Examples:
    # Run the default workload against the in-memory backend
    tsbench run --db memory

    # Run a workload described by a config file, with more clients
    tsbench run --config bench.json --client-number 8

    # Print the effective configuration, a good starting point for a config file
    tsbench config > bench.json

    # Show which function drives every sensor
    tsbench functions --config bench.json
"#
)]
struct Config {
    /// Worker threads of the async runtime. Defaults to the number of cores.
    #[clap(long = "num-threads", env = "TSBENCH_NUM_THREADS", action)]
    num_threads: Option<NonZeroUsize>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Run a benchmark and print its results
    Run(commands::run::Config),

    /// Print the effective benchmark configuration as JSON
    Config(commands::config::Config),

    /// Print the function bound to every sensor
    Functions(commands::functions::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("tsbench-worker");
    if let Some(n) = config.num_threads {
        builder.worker_threads(n.get());
    }
    let tokio_runtime = builder.build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Run(config)) => {
                if let Err(e) = config.logging_config.install_global_subscriber() {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
                if let Err(e) = commands::run::command(config).await {
                    eprintln!("Run command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Config(config)) => {
                if let Err(e) = commands::config::command(config) {
                    eprintln!("Config command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Functions(config)) => {
                if let Err(e) = commands::functions::command(config) {
                    eprintln!("Functions command failed: {e:#}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // a missing .env file is fine, defaults apply
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
