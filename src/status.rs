//! Thread-safe health summary for the upload pipeline.
//!
//! The polling loop writes, an external health surface reads a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::info;

/// Operation a summary refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Operation {
    #[default]
    Uploading,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Uploading => write!(f, "Uploading"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Summary {
    pub operation: Operation,
    pub healthy: bool,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: Option<DateTime<Utc>>,
    pub count: u32,
}

impl Summary {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn unhealthy(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Read side consumed by health reporting
pub trait StatusSource: Send + Sync {
    /// Snapshot of the current summary, `None` until a status has been recorded
    fn current_status(&self) -> Option<Summary>;
}

/// Tracks a named summary under a single mutex
#[derive(Debug, Default)]
pub struct StatusTracker {
    name: String,
    summary: Mutex<Summary>,
}

impl StatusTracker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: Mutex::new(Summary::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record an observation.
    ///
    /// A healthy/unhealthy flip (or the first observation) replaces the summary and
    /// resets the count to 1. A repeated healthy observation only bumps the count.
    /// A repeated unhealthy observation with a new reason or message updates those
    /// fields and restarts the count, keeping the transition time.
    pub fn update_status(&self, mut summary: Summary) {
        let mut current = match self.summary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if current.count == 0 || current.healthy != summary.healthy {
            info!(
                name = %self.name,
                healthy = summary.healthy,
                reason = %summary.reason,
                message = %summary.message,
                "status transition"
            );
            if summary.last_transition_time.is_none() {
                summary.last_transition_time = Some(Utc::now());
            }
            summary.count = 1;
            *current = summary;
            return;
        }

        if summary.healthy {
            current.count += 1;
            return;
        }

        if current.reason != summary.reason || current.message != summary.message {
            info!(
                name = %self.name,
                healthy = summary.healthy,
                reason = %summary.reason,
                message = %summary.message,
                "status changed"
            );
            current.reason = summary.reason;
            current.message = summary.message;
            current.count = 1;
            return;
        }

        current.count += 1;
    }

    pub fn current_status(&self) -> Option<Summary> {
        let current = match self.summary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.count == 0 {
            return None;
        }
        Some(current.clone())
    }
}

impl StatusSource for StatusTracker {
    fn current_status(&self) -> Option<Summary> {
        StatusTracker::current_status(self)
    }
}
