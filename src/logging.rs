use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file prefix used by the command-line tool.
pub const LOG_PREFIX: &str = "qtversions";

/// Options for [`setup_logging_with_console`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// `debug` instead of `info` when `RUST_LOG` is unset
    pub debug_mode: bool,
    /// Also log to stderr with ANSI colors
    pub console_output: bool,
    /// Write JSON lines to the log file instead of plain text
    pub json: bool,
}

/// Level filter: `RUST_LOG` when set, otherwise `debug` or `info`.
fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

/// Setup logging with a daily rotating file appender.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(log_dir: &Utf8Path, log_prefix: &str, debug_mode: bool) -> Result<WorkerGuard> {
    setup_logging_with_console(
        log_dir,
        log_prefix,
        LogOptions {
            debug_mode,
            ..LogOptions::default()
        },
    )
}

/// Setup file logging plus optional console output.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging_with_console(
    log_dir: &Utf8Path,
    log_prefix: &str,
    options: LogOptions,
) -> Result<WorkerGuard> {
    ensure_log_dir(log_dir)?;

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let text_layer = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });
    let json_layer = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_ids(true)
    });
    let console_layer = options.console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(options.debug_mode))
        .with(text_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}, json={}",
        log_dir,
        log_prefix,
        options.debug_mode,
        options.console_output,
        options.json
    );

    Ok(guard)
}
