//! Console and file logging

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use rv_core::time::utc_date_stamp;

/// Directory the log file is written to, relative to the working directory
pub const LOG_DIR: &str = "logs";

/// Holds the file writer open. Drop it last so buffered lines are flushed.
pub struct LogHandle {
    /// File receiving the full DEBUG log
    pub path: PathBuf,
    _guard: WorkerGuard,
}

/// Log file name for a `YYYYMMDD` stamp
pub fn log_file_name(date_stamp: &str) -> String {
    format!("rovnc-utc-{}.log", date_stamp)
}

/// Console level for a `-v` count
pub fn console_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the console and file subscribers.
///
/// `RUST_LOG` overrides the console level; the file always gets DEBUG.
pub fn init_logging(dir: &Path, verbose: u8) -> io::Result<LogHandle> {
    std::fs::create_dir_all(dir)?;
    let name = log_file_name(&utc_date_stamp());
    let path = dir.join(&name);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&name)
        .build(dir)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console_filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| console_level(verbose).into()),
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .without_time()
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG),
        )
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(LogHandle {
        path,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        assert_eq!(log_file_name("20261018"), "rovnc-utc-20261018.log");
    }

    #[test]
    fn test_console_level() {
        assert_eq!(console_level(0), "info");
        assert_eq!(console_level(1), "debug");
        assert_eq!(console_level(5), "trace");
    }
}
