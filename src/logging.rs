//! Logging (C10)
//!
//! Structured logger initialized once at process start: a console sink and,
//! when `log_path` is set, an additional rotating file sink. `RUST_LOG`
//! overrides the configured level when present.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Must be kept alive for the lifetime of the process; dropping it stops
/// the non-blocking file writer from flushing.
pub struct LoggingHandle {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(log_path: Option<&Path>, log_level: &str) -> LoggingHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match log_path {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let appender = tracing_appender::rolling::daily(dir, "shuttle.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_target(false).with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    LoggingHandle { _file_guard: guard }
}
