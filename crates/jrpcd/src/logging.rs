//! Logging bootstrap: stderr subscriber plus an optional rolling file sink.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jrpcd_core::config::LogLevel;

/// Installs the global subscriber.
///
/// Logs always go to stderr. When a log file is configured, a second
/// non-blocking layer writes to a daily-rolling file next to it; the
/// returned guard must be kept alive for buffered lines to be flushed on
/// shutdown.
pub fn init(level: LogLevel, logfile: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::new(level.as_str());
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

    match logfile {
        Some(path) => {
            let directory = match path.parent() {
                Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
                Some(parent) => parent,
                None => Path::new("."),
            };
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "jrpcd.log".to_string());

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(false);

            registry.with(file_layer).init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
