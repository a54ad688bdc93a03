//! Persistence of the upload watermark across restarts.

use crate::error::UploadError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Watermark and first-run flag shared with the controller
pub trait StatusReporter: Send + Sync {
    /// Time of the last confirmed upload, `None` if nothing was ever reported
    fn last_reported_time(&self) -> Option<DateTime<Utc>>;
    fn set_last_reported_time(&self, at: DateTime<Utc>);
    fn safe_initial_start(&self) -> bool;
    fn set_safe_initial_start(&self, safe: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterState {
    #[serde(rename = "lastReportedTime")]
    pub last_reported_time: Option<DateTime<Utc>>,
    #[serde(rename = "safeInitialStart")]
    pub safe_initial_start: bool,
}

impl Default for ReporterState {
    fn default() -> Self {
        Self {
            last_reported_time: None,
            safe_initial_start: true,
        }
    }
}

fn lock(state: &Mutex<ReporterState>) -> std::sync::MutexGuard<'_, ReporterState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process reporter; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStatusReporter {
    state: Mutex<ReporterState>,
}

impl MemoryStatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_reported(at: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ReporterState {
                last_reported_time: Some(at),
                ..Default::default()
            }),
        }
    }
}

impl StatusReporter for MemoryStatusReporter {
    fn last_reported_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_reported_time
    }

    fn set_last_reported_time(&self, at: DateTime<Utc>) {
        lock(&self.state).last_reported_time = Some(at);
    }

    fn safe_initial_start(&self) -> bool {
        lock(&self.state).safe_initial_start
    }

    fn set_safe_initial_start(&self, safe: bool) {
        lock(&self.state).safe_initial_start = safe;
    }
}

/// Reporter backed by a JSON file (mode 0600 on unix).
///
/// Write failures are logged and the in-memory state stays authoritative.
#[derive(Debug)]
pub struct FileStatusReporter {
    path: PathBuf,
    state: Mutex<ReporterState>,
}

impl FileStatusReporter {
    /// Load state from `path`; a missing file starts from defaults
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            ReporterState::default()
        };
        debug!(path = %path.display(), ?state, "loaded reporter state");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: ReporterState) {
        if let Err(e) = write_state(&self.path, &state) {
            warn!(path = %self.path.display(), error = %e, "failed to persist reporter state");
        }
    }
}

fn write_state(path: &Path, state: &ReporterState) -> Result<(), UploadError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(state)?;
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

impl StatusReporter for FileStatusReporter {
    fn last_reported_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_reported_time
    }

    fn set_last_reported_time(&self, at: DateTime<Utc>) {
        let snapshot = {
            let mut state = lock(&self.state);
            if state.last_reported_time == Some(at) {
                return;
            }
            state.last_reported_time = Some(at);
            *state
        };
        self.persist(snapshot);
    }

    fn safe_initial_start(&self) -> bool {
        lock(&self.state).safe_initial_start
    }

    fn set_safe_initial_start(&self, safe: bool) {
        let snapshot = {
            let mut state = lock(&self.state);
            if state.safe_initial_start == safe {
                return;
            }
            state.safe_initial_start = safe;
            *state
        };
        self.persist(snapshot);
    }
}
