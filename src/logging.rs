//! Structured logging for binscript
//!
//! The launcher shares stderr with the program it runs, so logging is quiet by
//! default: only warnings and errors are shown unless `RUST_LOG` or `-v` asks
//! for more.
//!
//! # Log Format Conventions
//!
//! - `operation`: What the cache is doing (see [`operations`])
//! - `status`: Result of the operation (see [`status`])
//! - `fingerprint`: Short cache key of the script
//! - `path` / `script` / `scaffold`: Filesystem locations involved
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     operation = operations::BUILD,
//!     status = status::READY,
//!     fingerprint = %fingerprint.short(),
//!     "build finished"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "BINSCRIPT_LOG_FORMAT";

/// Shows "(binscript)" instead of the full module path
struct BinscriptFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for BinscriptFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(binscript)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(binscript): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, for terminals
    Pretty,
    /// Plain, for CI logs
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    pub fn parse(value: &str, ci: bool) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }

    /// Read `BINSCRIPT_LOG_FORMAT`, defaulting to compact under `CI`
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var(LOG_FORMAT_ENV).unwrap_or_default(),
            std::env::var("CI").is_ok(),
        )
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log filter (e.g. "debug", "binscript=trace"); wins over `verbose`
/// - `BINSCRIPT_LOG_FORMAT`: "pretty", "compact", or "json"
/// - `CI`: If set, defaults to compact format
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    // try_init: acceptance tests may run several commands in one process
    let _ = match LogFormat::from_env() {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .event_format(BinscriptFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .event_format(BinscriptFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
}

/// Operation names for consistent logging
pub mod operations {
    pub const LOOKUP: &str = "lookup";
    pub const BUILD: &str = "build";
    pub const LAUNCH: &str = "launch";
    pub const GC: &str = "gc";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const READY: &str = "ready";
    pub const FAILED: &str = "failed";
}
