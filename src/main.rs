use anyhow::{Context, Result};
use ingress_uploader::config::{get_config_file_path, load_config, Configuration, StaticConfigurator};
use ingress_uploader::credentials::{ClusterIdentity, FileClusterIdentity, StaticClusterIdentity};
use ingress_uploader::file_watcher::ConfigFileWatcher;
use ingress_uploader::logging;
use ingress_uploader::metrics::RequestCounterVec;
use ingress_uploader::reporter::{FileStatusReporter, MemoryStatusReporter, StatusReporter};
use ingress_uploader::shutdown::ShutdownCoordinator;
use ingress_uploader::upload::{DiskSummarizer, RequestDecorator, UploadClient, UploadController};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

const METRICS_CLIENT_NAME: &str = "insightsclient";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => get_config_file_path()?,
    };
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if let Err(e) = logging::init_logging(config.log_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!(
        config = %config_path.display(),
        endpoint = %config.endpoint,
        report = config.report,
        storage = %config.storage_path.display(),
        "starting ingress uploader"
    );

    let identity = cluster_identity(&config);
    let reporter = status_reporter(&config);
    let metrics = Arc::new(RequestCounterVec::new());

    let decorator = RequestDecorator::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        identity,
    );
    let client = UploadClient::new(METRICS_CLIENT_NAME, decorator, metrics.clone());
    let summarizer = DiskSummarizer::from_config(&config);

    let configurator = StaticConfigurator::new(config);
    // keep the watcher alive for the life of the process
    let _watcher = match ConfigFileWatcher::new(config_path.clone(), configurator.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "config file watcher not started");
            None
        }
    };

    let controller = Arc::new(UploadController::new(
        Box::new(summarizer),
        Some(client),
        Arc::new(configurator),
        reporter,
    ));

    let coordinator = ShutdownCoordinator::new();
    let token = coordinator.subscribe();
    let worker = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(token).await })
    };

    wait_for_signal().await;
    info!("shutdown requested");
    coordinator.shutdown();

    if let Err(e) = worker.await {
        error!(error = %e, "upload controller task failed");
    }
    if let Some(status) = controller.status().current_status() {
        info!(healthy = status.healthy, reason = %status.reason, count = status.count, "final status");
    }
    for (client, code, count) in metrics.snapshot() {
        info!(client = %client, status_code = %code, count, "request totals");
    }
    Ok(())
}

fn cluster_identity(config: &Configuration) -> Arc<dyn ClusterIdentity> {
    match &config.cluster_id_path {
        Some(path) => Arc::new(FileClusterIdentity::new(path.clone())),
        None => Arc::new(StaticClusterIdentity::new(config.cluster_id.clone())),
    }
}

fn status_reporter(config: &Configuration) -> Arc<dyn StatusReporter> {
    if let Some(path) = &config.status_path {
        match FileStatusReporter::load(path.clone()) {
            Ok(reporter) => return Arc::new(reporter),
            Err(e) => warn!(path = %path.display(), error = %e, "unable to load reporter state, starting fresh"),
        }
    }
    Arc::new(MemoryStatusReporter::new())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "unable to listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
