use std::path::Path;

use regime_switcher::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Console logging plus, when `logging.dir` is set and writable, a daily
/// rolling file. Hold the returned guard until shutdown so buffered file
/// lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},regime_switcher=debug,sqlx=warn", config.level))
    });

    let mut guard = None;
    let file_layer = match config.dir.as_deref().map(Path::new) {
        Some(dir) => match ensure_writable(dir) {
            Ok(()) => {
                // rolling::daily panics when the first file cannot be created
                let appender = tracing_appender::rolling::daily(dir, &config.file_name);
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: log directory {} is not writable ({}), file logging disabled",
                    dir.display(),
                    e
                );
                None
            }
        },
        None => None,
    };

    let (plain_console, json_console) = if config.json {
        (None, Some(fmt::layer().json().with_target(true).with_current_span(false)))
    } else {
        (Some(fmt::layer().with_target(true).with_thread_ids(false)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_console)
        .with(json_console)
        .with(file_layer)
        .init();

    if let (Some(dir), Some(_)) = (&config.dir, &guard) {
        tracing::info!("Logging to {}/{}", dir, config.file_name);
    }
    guard
}

pub fn init_logging_simple() {
    // Operator commands only surface warnings
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn ensure_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(".switcher_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)?;
    std::fs::remove_file(&marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_dir_is_created() {
        let dir = std::env::temp_dir().join(format!("switcher-logs-{}", std::process::id()));
        assert!(ensure_writable(&dir).is_ok());
        assert!(dir.is_dir());
        assert!(!dir.join(".switcher_write_test").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dir_below_a_file_is_rejected() {
        let file = std::env::temp_dir().join(format!("switcher-not-a-dir-{}", std::process::id()));
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_writable(&file.join("logs")).is_err());
        let _ = std::fs::remove_file(&file);
    }
}
