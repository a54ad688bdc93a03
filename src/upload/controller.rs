//! Periodic upload loop.
//!
//! Each tick takes a configuration snapshot, walks the summarizer's candidates
//! and either sends them or lists them (when reporting is disabled). The
//! watermark only moves after a tick in which at least one upload was accepted
//! and nothing failed.

use super::archive::report_to_logs;
use super::client::UploadClient;
use super::retry::{counts_as_failure, RetryStrategy};
use super::source::Source;
use super::summarizer::{Candidate, Summarizer};
use crate::config::{Configuration, Configurator};
use crate::error::{ErrorType, UploadError};
use crate::reporter::StatusReporter;
use crate::status::{StatusTracker, Summary};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive `ObtainingVersion` ticks tolerated before the status turns unhealthy
pub const OBTAINING_VERSION_ESCALATION: u32 = 5;

/// Name the status tracker is registered under
pub const CONTROLLER_NAME: &str = "insightsuploader";

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No endpoint configured
    Skipped,
    NothingToReport,
    /// Number of archives accepted by the endpoint
    Uploaded(usize),
    /// Number of archives listed instead of sent
    DryRun(usize),
    /// Cluster identity not available; retried next tick
    VersionUnavailable,
    Failed(ErrorType),
}

impl TickOutcome {
    fn is_failure(&self) -> bool {
        matches!(self, TickOutcome::Failed(_))
    }
}

#[derive(Debug, Default)]
struct LoopState {
    consecutive_failures: u32,
    obtaining_version_ticks: u32,
}

pub struct UploadController {
    status: Arc<StatusTracker>,
    summarizer: Arc<Mutex<Box<dyn Summarizer>>>,
    client: Option<UploadClient>,
    configurator: Arc<dyn Configurator>,
    reporter: Arc<dyn StatusReporter>,
    state: Mutex<LoopState>,
}

impl UploadController {
    pub fn new(
        summarizer: Box<dyn Summarizer>,
        client: Option<UploadClient>,
        configurator: Arc<dyn Configurator>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            status: Arc::new(StatusTracker::new(CONTROLLER_NAME)),
            summarizer: Arc::new(Mutex::new(summarizer)),
            client,
            configurator,
            reporter,
            state: Mutex::new(LoopState::default()),
        }
    }

    /// Health summary read by the status surface
    pub fn status(&self) -> Arc<StatusTracker> {
        self.status.clone()
    }

    /// Run ticks until `shutdown` is cancelled.
    ///
    /// A tick is bounded by the configured tick timeout; cancelling mid-tick
    /// drops the in-flight request.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.status.update_status(Summary::healthy());

        if self.client.is_none() {
            info!("No reporting possible without a configured client");
            return;
        }

        let mut changes = Some(self.configurator.subscribe());
        info!("upload controller started");

        loop {
            let config = self.configurator.config();

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.bounded_tick(&config) => outcome,
            };
            let delay = self.next_delay(&config, outcome);
            debug!(?outcome, delay_secs = delay.as_secs(), "tick finished");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
                _ = config_changed(&mut changes) => {
                    info!("configuration changed, running next tick now");
                }
            }
        }

        info!("upload controller stopped");
    }

    async fn bounded_tick(&self, config: &Configuration) -> TickOutcome {
        let limit = config.tick_timeout();
        match timeout(limit, self.tick()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = UploadError::Timeout(limit);
                warn!(error = %err, "tick timed out");
                self.record_upload_error(&err)
            }
        }
    }

    /// Run one tick against the current configuration snapshot
    pub async fn tick(&self) -> TickOutcome {
        let config = self.configurator.config();
        if config.endpoint.is_empty() {
            debug!("no endpoint configured, skipping tick");
            return TickOutcome::Skipped;
        }
        let Some(client) = self.client.as_ref() else {
            return TickOutcome::Skipped;
        };

        let last_reported = self.reporter.last_reported_time();
        let since = last_reported.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = Utc::now();
        lock_summarizer(&self.summarizer).reset(&config);

        let mut index = 0usize;
        let mut uploaded = 0usize;
        let mut listed = 0usize;

        loop {
            let candidate = match self.next_candidate(since).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "unable to retrieve local data");
                    self.status.update_status(Summary::unhealthy(
                        "SummaryFailed",
                        format!("Unable to retrieve local data: {}", e),
                    ));
                    return TickOutcome::Failed(e.classify());
                }
            };

            let id = format!("{}-{}", start.to_rfc3339(), index);
            let source = candidate.into_source(id, config.mime_type.clone());

            if config.report {
                debug!(since = ?last_reported, "uploading latest report");
                if let Err(e) = client.send(&config, &config.endpoint, source).await {
                    info!(
                        elapsed_ms = (Utc::now() - start).num_milliseconds(),
                        error = %e,
                        "unable to upload report"
                    );
                    return self.record_upload_error(&e);
                }
                self.reporter.set_safe_initial_start(false);
                uploaded += 1;
                debug!(
                    elapsed_ms = (Utc::now() - start).num_milliseconds(),
                    "uploaded report successfully"
                );
            } else {
                debug!("display report that would be sent");
                dry_run(source).await;
                listed += 1;
            }
            index += 1;
        }

        self.lock_state().obtaining_version_ticks = 0;

        if config.report && uploaded > 0 {
            let watermark = match last_reported {
                Some(previous) if previous > start => previous,
                _ => start,
            };
            self.reporter.set_last_reported_time(watermark);
            self.status.update_status(Summary::healthy());
            return TickOutcome::Uploaded(uploaded);
        }

        if listed > 0 {
            return TickOutcome::DryRun(listed);
        }
        debug!(since = ?last_reported, "nothing to report");
        TickOutcome::NothingToReport
    }

    /// Send `source` once, outside the polling schedule.
    ///
    /// Updates the health status like a tick would but never moves the watermark.
    pub async fn upload(&self, source: Source) -> Result<(), UploadError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| UploadError::Config("no upload client configured".to_string()))?;
        let config = self.configurator.config();
        if config.endpoint.is_empty() {
            return Err(UploadError::Config("no endpoint configured".to_string()));
        }

        match client.send(&config, &config.endpoint, source).await {
            Ok(()) => {
                self.reporter.set_safe_initial_start(false);
                self.status.update_status(Summary::healthy());
                Ok(())
            }
            Err(e) => {
                self.record_upload_error(&e);
                Err(e)
            }
        }
    }

    /// Apply the status consequences of a failed send
    fn record_upload_error(&self, err: &UploadError) -> TickOutcome {
        if !counts_as_failure(err) {
            if let UploadError::ObtainingVersion(_) = err {
                let ticks = {
                    let mut state = self.lock_state();
                    state.obtaining_version_ticks += 1;
                    state.obtaining_version_ticks
                };
                if ticks >= OBTAINING_VERSION_ESCALATION {
                    self.status.update_status(Summary::unhealthy(
                        "ClusterIdUnavailable",
                        format!("Unable to obtain the cluster ID: {}", err),
                    ));
                }
            } else {
                self.lock_state().obtaining_version_ticks = 0;
            }
            return TickOutcome::VersionUnavailable;
        }

        self.lock_state().obtaining_version_ticks = 0;
        self.reporter.set_safe_initial_start(false);

        let kind = err.classify();
        if kind == ErrorType::Auth {
            self.status.update_status(Summary::unhealthy(
                "NotAuthorized",
                format!("Reporting was not allowed: {}", err),
            ));
        } else {
            self.status.update_status(Summary::unhealthy(
                "UploadFailed",
                format!("Unable to report: {}", err),
            ));
        }
        TickOutcome::Failed(kind)
    }

    fn next_delay(&self, config: &Configuration, outcome: TickOutcome) -> Duration {
        let strategy = RetryStrategy::from_config(config);
        let mut state = self.lock_state();
        if outcome.is_failure() {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        } else if outcome != TickOutcome::VersionUnavailable {
            state.consecutive_failures = 0;
        }
        strategy.calculate_backoff(state.consecutive_failures.saturating_sub(1))
    }

    /// Directory scans and file opens run off the async workers
    async fn next_candidate(&self, since: DateTime<Utc>) -> Result<Option<Candidate>, UploadError> {
        let summarizer = self.summarizer.clone();
        tokio::task::spawn_blocking(move || lock_summarizer(&summarizer).next(since))
            .await
            .map_err(|e| UploadError::Summary(std::io::Error::other(e.to_string())))?
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock_summarizer(summarizer: &Mutex<Box<dyn Summarizer>>) -> MutexGuard<'_, Box<dyn Summarizer>> {
    match summarizer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn dry_run(source: Source) {
    let id = source.id.clone();
    let contents = source.contents;
    match tokio::task::spawn_blocking(move || report_to_logs(contents)).await {
        Ok(Ok(entries)) => debug!(id = %id, entries = entries.len(), "dry-run listing complete"),
        Ok(Err(e)) => error!(id = %id, error = %e, "Unable to log upload"),
        Err(e) => error!(id = %id, error = %e, "dry-run task failed"),
    }
}

/// Resolves when a new snapshot is published; never resolves once the sender is gone
async fn config_changed(changes: &mut Option<watch::Receiver<Arc<Configuration>>>) {
    if let Some(rx) = changes.as_mut() {
        if rx.changed().await.is_ok() {
            return;
        }
        *changes = None;
    }
    std::future::pending::<()>().await
}
