//! Log initialization and setup

#[cfg(feature = "clap")]
pub mod cli;
pub mod config;

pub use config::*;

use std::{
    cmp::min,
    io::{self, Write},
};

use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter,
    filter::ParseError,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
};

/// Maximum length of a log line.
/// Space for a final trailing newline if truncated.
///
/// Longer lines are cut so that one event is always written with a single call.
const MAX_LINE_LENGTH: usize = 16 * 1024 - 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("Cannot set global tracing subscriber")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn parse_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|source| Error::InvalidFilter {
        filter: filter.to_string(),
        source,
    })
}

/// Builder for logging.
#[derive(Debug)]
pub struct Builder {
    log_format: LogFormat,
    log_filter: Option<EnvFilter>,
    // used when log_filter is none.
    default_log_filter: String,
    make_writer: BoxMakeWriter,
    with_target: bool,
    with_ansi: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Full,
            log_filter: None,
            default_log_filter: Self::DEFAULT_LOG_FILTER.to_string(),
            make_writer: make_writer(io::stdout),
            with_target: true,
            with_ansi: true,
        }
    }
}

impl Builder {
    /// Benchmark progress and the final report are logged at info
    pub const DEFAULT_LOG_FILTER: &'static str = "info";

    pub fn new() -> Self {
        Self::default()
    }

    /// Set log_filter using a simple numeric "verbosity level".
    ///
    /// 0 means, keep existing `log_filter` value.
    pub fn with_log_verbose_count(self, log_verbose_count: u8) -> Self {
        let log_filter = match log_verbose_count {
            0 => self.log_filter,
            1 => Some(EnvFilter::new("debug")),
            _ => Some(EnvFilter::new("trace")),
        };
        Self { log_filter, ..self }
    }

    pub fn with_log_filter(self, log_filter: Option<&str>) -> Result<Self> {
        let log_filter = log_filter.map(parse_filter).transpose()?;
        Ok(Self { log_filter, ..self })
    }

    /// Filter used when no explicit filter or verbosity is given
    pub fn with_default_log_filter(self, default_log_filter: impl AsRef<str>) -> Result<Self> {
        let default_log_filter = default_log_filter.as_ref();
        parse_filter(default_log_filter)?;
        Ok(Self {
            default_log_filter: default_log_filter.to_string(),
            ..self
        })
    }

    pub fn with_log_format(self, log_format: LogFormat) -> Self {
        Self { log_format, ..self }
    }

    pub fn with_log_destination(self, log_destination: LogDestination) -> Self {
        let make_writer = match log_destination {
            LogDestination::Stdout => make_writer(io::stdout),
            LogDestination::Stderr => make_writer(io::stderr),
        };
        Self {
            make_writer,
            ..self
        }
    }

    /// Write to an arbitrary destination, one writer per event
    pub fn with_writer<F, W>(self, writer: F) -> Self
    where
        F: Fn() -> W + Send + Sync + 'static,
        W: Write + 'static,
    {
        Self {
            make_writer: make_writer(writer),
            ..self
        }
    }

    /// Sets whether or not an event's target is displayed. Defaults to true.
    pub fn with_target(self, with_target: bool) -> Self {
        Self {
            with_target,
            ..self
        }
    }

    /// Enable/disable ANSI encoding for formatted events (i.e. colors). Defaults to true.
    pub fn with_ansi(self, with_ansi: bool) -> Self {
        Self { with_ansi, ..self }
    }

    pub fn build(self) -> Result<impl Subscriber + Send + Sync + 'static> {
        let log_filter = match self.log_filter {
            Some(filter) => filter,
            None => parse_filter(&self.default_log_filter)?,
        };
        let log_writer = self.make_writer;
        let with_target = self.with_target;
        let with_ansi = self.with_ansi;

        let (log_format_full, log_format_pretty, log_format_json) = match self.log_format {
            LogFormat::Full => (
                Some(
                    fmt::layer()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
                None,
                None,
            ),
            LogFormat::Pretty => (
                None,
                Some(
                    fmt::layer()
                        .pretty()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
                None,
            ),
            LogFormat::Json => (
                None,
                None,
                Some(
                    fmt::layer()
                        .json()
                        .with_writer(log_writer)
                        .with_target(with_target)
                        .with_ansi(with_ansi),
                ),
            ),
        };

        Ok(tracing_subscriber::registry()
            .with(log_filter)
            .with(log_format_full)
            .with(log_format_pretty)
            .with(log_format_json))
    }

    /// Build a subscriber and install it as the global default subscriber for all threads.
    pub fn install_global(self) -> Result<()> {
        let subscriber = self.build()?;
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}

fn make_writer<F, W>(writer: F) -> BoxMakeWriter
where
    F: Fn() -> W + Send + Sync + 'static,
    W: Write + 'static,
{
    BoxMakeWriter::new(move || {
        io::LineWriter::with_capacity(MAX_LINE_LENGTH, LimitedWriter(MAX_LINE_LENGTH, writer()))
    })
}

/// Truncates every write to `.0` bytes, keeping a trailing newline.
struct LimitedWriter<W: Write>(usize, W);

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let truncated = &buf[..min(self.0, buf.len())];
        let had_trailing_newline = buf[buf.len() - 1] == b'\n';
        if had_trailing_newline && (truncated[truncated.len() - 1] != b'\n') {
            // copy so the line still goes out in a single write
            let mut tmp = truncated.to_vec();
            tmp.push(b'\n');
            self.1.write_all(&tmp).map(|_| buf.len())
        } else {
            self.1.write_all(truncated).map(|_| buf.len())
        }
        // a garbled line beats a missing one if the write is interrupted
    }

    fn flush(&mut self) -> io::Result<()> {
        self.1.flush()
    }
}
