//! Common CLI flags for logging
use crate::{Builder, LogDestination, LogFormat, Result};

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,tsbench_db=info` specifies debug logging for everything except the
    /// backend adapters, which only log at info level.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'debug'
    ///
    /// -vv  'trace'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub log_verbose_count: u8,

    /// Logs: destination
    ///
    /// Can be one of: stdout, stderr
    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value = "stdout",
        action
    )]
    pub log_destination: LogDestination,

    /// Logs: message format
    ///
    /// Can be one of:
    ///
    /// full: human-readable, single line
    ///
    /// pretty: human-readable, multi line
    ///
    /// json: machine-parseable, one object per line
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value = "full",
        verbatim_doc_comment,
        action
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    pub fn to_builder(&self) -> Result<Builder> {
        self.with_builder(Builder::new())
    }

    pub fn with_builder(&self, builder: Builder) -> Result<Builder> {
        Ok(builder
            .with_log_filter(self.log_filter.as_deref())?
            // applied after the filter: `-v` overrides `--log-filter`
            .with_log_verbose_count(self.log_verbose_count)
            .with_log_destination(self.log_destination)
            .with_log_format(self.log_format))
    }

    pub fn install_global_subscriber(&self) -> Result<()> {
        self.to_builder()?.install_global()
    }
}
