use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Default log file prefix (`logs/brawlbuilder.YYYY-MM-DD`)
pub const LOG_PREFIX: &str = "brawlbuilder";

/// Create `log_dir` if needed
fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

/// `RUST_LOG` wins when set; otherwise debug or info.
fn level_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug_mode { "debug" } else { "info" }))
}

/// Keeps the file writer flushing and lets the level change after startup.
///
/// Must be held for the duration of the program.
pub struct LoggingGuard {
    _writer: WorkerGuard,
    level: reload::Handle<EnvFilter, Registry>,
}

impl LoggingGuard {
    /// Switch between debug and info. `RUST_LOG` still wins when set.
    pub fn set_debug(&self, debug_mode: bool) -> Result<()> {
        self.level
            .reload(level_filter(debug_mode))
            .context("Failed to change the log level")
    }
}

/// Setup logging to a daily rolling file, optionally mirrored to the console.
///
/// # Arguments
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_prefix` - Prefix for log files (e.g., "brawlbuilder")
/// * `debug_mode` - If true, use debug level; otherwise use info level
/// * `console_output` - If true, also log to stderr with ANSI colors
///
/// # Returns
/// A [`LoggingGuard`] that must be held for the duration of the program to keep logging active
pub fn setup_logging_with_console(
    log_dir: &Utf8Path,
    log_prefix: &str,
    debug_mode: bool,
    console_output: bool,
) -> Result<LoggingGuard> {
    ensure_log_dir(log_dir)?;

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking, writer_guard) = tracing_appender::non_blocking(file_appender);
    let (level_layer, level) = reload::Layer::new(level_filter(debug_mode));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI codes in log files
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // The console prints build events itself; only warnings and errors go to stderr
    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(level_layer)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        log_dir,
        log_prefix,
        debug_mode,
        console_output
    );

    Ok(LoggingGuard {
        _writer: writer_guard,
        level,
    })
}

/// File-only logging
pub fn setup_logging(log_dir: &Utf8Path, log_prefix: &str, debug_mode: bool) -> Result<LoggingGuard> {
    setup_logging_with_console(log_dir, log_prefix, debug_mode, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_log_directory_created() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().join("logs")).unwrap();

        ensure_log_dir(&log_dir).unwrap();
        assert!(log_dir.is_dir());

        // Existing directory is fine
        ensure_log_dir(&log_dir).unwrap();
    }

    #[test]
    fn test_setup_logging() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

        // A second global subscriber in the same process is an error, not a panic
        if let Ok(guard) = setup_logging(&log_dir, "test", false) {
            guard.set_debug(true).unwrap();
            guard.set_debug(false).unwrap();
        }
        assert!(log_dir.exists());
    }
}
