use std::ffi::OsStr;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogConfig;

static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber writing to `config.file_path`, echoed to
/// stdout when `config.stdout` is set. `RUST_LOG` overrides `config.level`.
pub fn init_tracing(config: &LogConfig) -> Result<(), String> {
    let (log_dir, file_name) = split_log_path(&config.file_path)?;
    std::fs::create_dir_all(log_dir)
        .map_err(|error| format!("cannot create log directory {}: {error}", log_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));
    // Dropping the guard would stop the background writer.
    let _ = WRITER_GUARD.set(guard);

    let stdout_layer = config.stdout.then(|| fmt::layer().with_ansi(false));
    tracing_subscriber::registry()
        .with(level_filter(&config.level))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(stdout_layer)
        .try_init()
        .map_err(|error| format!("cannot install tracing subscriber: {error}"))
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn split_log_path(path: &Path) -> Result<(&Path, &OsStr), String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("log path {} has no file name", path.display()))?;
    let log_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((log_dir, file_name))
}
