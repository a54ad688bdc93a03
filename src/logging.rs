use std::fs;
use std::path::Path;
use std::sync::{LazyLock, Mutex};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Install the global subscriber: compact console output plus an optional log file.
///
/// `RUST_LOG` overrides the default `info` filter. Calling this more than once is a no-op.
pub fn init_logging(log_dir: Option<&Path>) -> Result<(), std::io::Error> {
    if let Some(dir) = log_dir {
        ensure_logs_dir(dir)?;
    }

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        let file_layer = log_dir.map(|dir| {
            let file_appender = tracing_appender::rolling::daily(dir, "uploader.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
                *guard_mutex = Some(guard);
            }

            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter)
        });

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    });

    Ok(())
}

fn ensure_logs_dir(dir: &Path) -> Result<(), std::io::Error> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(dir)?.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_logs_dir_creates_nested() {
        let temp_dir = tempdir().unwrap();
        let logs = temp_dir.path().join("a").join("logs");

        ensure_logs_dir(&logs).unwrap();
        assert!(logs.is_dir());

        // second call is a no-op
        ensure_logs_dir(&logs).unwrap();
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        init_logging(Some(temp_dir.path())).unwrap();
        init_logging(None).unwrap();
        tracing::info!("logging initialized twice without panicking");
    }
}
