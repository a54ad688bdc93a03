use crate::config::{load_config, StaticConfigurator};
use crate::error::UploadError;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Reloads the configuration file and publishes each new snapshot.
///
/// The parent directory is watched so editors that replace the file are seen.
/// Dropping the watcher stops the background thread.
pub struct ConfigFileWatcher {
    _watcher: RecommendedWatcher,
    _thread_handle: std::thread::JoinHandle<()>,
}

impl ConfigFileWatcher {
    pub fn new(
        config_file_path: PathBuf,
        configurator: StaticConfigurator,
    ) -> Result<Self, UploadError> {
        let watch_dir = config_file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or_else(|| UploadError::Config("Could not determine config directory".to_string()))?;

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            tx,
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(|e| UploadError::Config(format!("Failed to create config watcher: {}", e)))?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                UploadError::Config(format!("Failed to watch {}: {}", watch_dir.display(), e))
            })?;

        info!(path = %config_file_path.display(), "watching configuration file");

        let thread_handle = std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                match result {
                    Ok(event) if Self::is_config_file_event(&event, &config_file_path) => {
                        // wait for the burst of writes to settle
                        loop {
                            match rx.recv_timeout(DEBOUNCE_DURATION) {
                                Ok(_) => continue,
                                Err(mpsc::RecvTimeoutError::Timeout) => break,
                                Err(mpsc::RecvTimeoutError::Disconnected) => return,
                            }
                        }
                        reload(&config_file_path, &configurator);
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(error = ?error, "config file watcher error");
                    }
                }
            }
            debug!("config file watcher stopped");
        });

        Ok(ConfigFileWatcher {
            _watcher: watcher,
            _thread_handle: thread_handle,
        })
    }

    fn is_config_file_event(event: &Event, config_file_path: &Path) -> bool {
        match &event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
                .paths
                .iter()
                .any(|path| path.file_name() == config_file_path.file_name()),
            _ => false,
        }
    }
}

/// Load `path` and publish it; on failure the previous snapshot stays active
pub fn reload(path: &Path, configurator: &StaticConfigurator) -> bool {
    match load_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "configuration reloaded");
            configurator.update(config);
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to reload configuration, keeping previous");
            false
        }
    }
}
