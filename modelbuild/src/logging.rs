//! Logging setup
//!
//! Console output always, plus a daily rolling file when a log directory is
//! given. The level comes from `RUST_LOG` and defaults to debug.

use crate::error::{ModelBuildError, ModelBuildResult};
use chrono::NaiveDate;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "modelbuild.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept
/// alive for as long as logging is needed.
pub fn init_logging(log_directory: Option<&Path>) -> ModelBuildResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let Some(log_dir) = log_directory else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .map_err(|e| ModelBuildError::Logging(e.to_string()))?;
        tracing::info!("Model build logging initialized (console only)");
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(false).with_ansi(true);
    let file_layer = fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ModelBuildError::Logging(e.to_string()))?;

    tracing::info!("Model build logging initialized, log directory: {}", log_dir.display());

    let today = chrono::Local::now().date_naive();
    let removed = cleanup_old_logs(log_dir, today, 7);
    if removed > 0 {
        tracing::debug!("Removed {} old log files", removed);
    }

    Ok(Some(guard))
}

/// Delete rolled log files older than `keep_days` before `today`.
/// Returns the number of files removed.
pub fn cleanup_old_logs(log_dir: &Path, today: NaiveDate, keep_days: i64) -> usize {
    let cutoff = today - chrono::Duration::days(keep_days);

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot read log directory for cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // "modelbuild.log.2024-01-15"
        let Some(date_str) = name.strip_prefix(LOG_FILE_PREFIX).and_then(|s| s.strip_prefix('.')) else {
            continue;
        };
        let Ok(file_date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Failed to remove old log {}: {}", path.display(), e),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        for name in [
            "modelbuild.log.2024-03-19",
            "modelbuild.log.2024-03-13",
            "modelbuild.log.2024-03-01",
            "modelbuild.log.garbage",
            "other.log.2024-01-01",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), today, 7), 1);
        assert!(dir.path().join("modelbuild.log.2024-03-19").exists());
        assert!(dir.path().join("modelbuild.log.2024-03-13").exists());
        assert!(!dir.path().join("modelbuild.log.2024-03-01").exists());
        assert!(dir.path().join("modelbuild.log.garbage").exists());
        assert!(dir.path().join("other.log.2024-01-01").exists());
    }

    #[test]
    fn test_cleanup_missing_directory() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        assert_eq!(cleanup_old_logs(Path::new("/nonexistent/logs"), today, 7), 0);
    }

    #[test]
    fn test_second_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = init_logging(Some(dir.path()));
        assert!(matches!(init_logging(None), Err(ModelBuildError::Logging(_))));
    }
}
