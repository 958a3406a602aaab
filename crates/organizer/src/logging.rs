use std::env;
use std::path::Path;

use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Overrides the verbosity flags, e.g. `NOVEL_SHELF_LOG=novel_shelf=debug`.
pub const FILTER_ENV: &str = "NOVEL_SHELF_LOG";

pub const LOG_FILE: &str = "novel-shelf.log";

/// Install the process-wide subscriber: compact stderr output plus, when `logs_dir` can be
/// created, a plain-text file at `logs_dir/novel-shelf.log`.
///
/// Keep the returned guard alive until exit or buffered file lines are lost.
pub fn init(logs_dir: Option<&Path>, verbosity: u8) -> Option<WorkerGuard> {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = env::var(FILTER_ENV)
        .ok()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    let (file_layer, guard) = match logs_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .with(file_layer)
        .with(filter)
        .init();

    debug!(file_logging = guard.is_some(), "logging initialized");
    guard
}
