use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::dashboard::Diagnostics;

/// Keeps the non-blocking writers flushing. Drop at the very end of `main`.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initialize structured logging.
///
/// Sets up:
/// - File output: `{log_dir}/narrator.log.<date>`, daily rotation, latest 5 kept.
/// - Console output (stderr), only when `console` is set. The dashboard owns
///   the terminal otherwise.
/// - Environment filter: defaults to `info`, configurable via `RUST_LOG`.
///
/// Also opens the dashboard diagnostics sink, `{log_dir}/dashboard_error.log`.
pub fn init(log_dir: &Path, console: bool) -> anyhow::Result<(LogGuards, Diagnostics)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("narrator")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir)
        .context("Failed to create log file appender")?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .compact()
    });

    // The AWS SDK and its HTTP stack are chatty at info.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,aws_config=warn,aws_smithy_runtime=warn,aws_sdk_polly=warn,hyper=warn,rustls=warn",
        )
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logger already initialized")?;

    let diagnostics_appender = tracing_appender::rolling::never(log_dir, "dashboard_error.log");
    let (diagnostics_writer, diagnostics_guard) =
        tracing_appender::non_blocking(diagnostics_appender);

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");

    Ok((
        LogGuards {
            _guards: vec![file_guard, diagnostics_guard],
        },
        Diagnostics::new(diagnostics_writer),
    ))
}
