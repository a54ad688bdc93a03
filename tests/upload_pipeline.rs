use chrono::{Duration as ChronoDuration, Utc};
use ingress_uploader::config::{Configuration, Configurator, ReportingType, StaticConfigurator};
use ingress_uploader::credentials::StaticClusterIdentity;
use ingress_uploader::metrics::RequestCounterVec;
use ingress_uploader::reporter::{MemoryStatusReporter, StatusReporter};
use ingress_uploader::upload::{
    DiskSummarizer, RequestDecorator, Source, TickOutcome, UploadClient, UploadController,
};
use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::Filter;

struct MockIngress {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockIngress {
    async fn start(status: u16) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let route = warp::post()
            .and(warp::path("upload"))
            .and(warp::body::bytes())
            .map(move |_body: bytes::Bytes| {
                counter.fetch_add(1, Ordering::SeqCst);
                warp::reply::with_status("ok", StatusCode::from_u16(status).unwrap())
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self { addr, hits }
    }

    fn endpoint(&self) -> String {
        format!("http://{}/upload", self.addr)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn stage(dir: &TempDir, name: &str, age_secs: u64) {
    let path = dir.path().join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(&tar_gz(&[("config/id", b"cluster"), ("config/nodes.json", b"[]")]))
        .unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
        .unwrap();
}

fn config(dir: &TempDir, endpoint: String, report: bool, reporting_type: ReportingType) -> Configuration {
    Configuration {
        report,
        endpoint,
        storage_path: dir.path().to_path_buf(),
        reporting_type,
        token: "test-token".into(),
        ..Default::default()
    }
}

fn build_controller(
    config: Configuration,
    reporter: Arc<MemoryStatusReporter>,
) -> (UploadController, StaticConfigurator) {
    let configurator = StaticConfigurator::new(config.clone());
    let client = UploadClient::new(
        "insightsclient",
        RequestDecorator::new(
            "ingress-uploader",
            "test",
            Arc::new(StaticClusterIdentity::new(Some("test-cluster".into()))),
        ),
        Arc::new(RequestCounterVec::new()),
    );
    let controller = UploadController::new(
        Box::new(DiskSummarizer::from_config(&config)),
        Some(client),
        Arc::new(configurator.clone()),
        reporter,
    );
    (controller, configurator)
}

#[tokio::test]
async fn test_successful_tick_advances_watermark() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 120);
    stage(&dir, "insights-2.tar.gz", 60);

    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::Latest),
        reporter.clone(),
    );

    let before = Utc::now();
    assert_eq!(controller.tick().await, TickOutcome::Uploaded(1));
    assert_eq!(server.hits(), 1);

    let watermark = reporter.last_reported_time().unwrap();
    assert!(watermark >= before);
    assert!(!reporter.safe_initial_start());
    assert!(controller.status().current_status().unwrap().healthy);

    // nothing newer than the watermark: no upload and no movement
    assert_eq!(controller.tick().await, TickOutcome::NothingToReport);
    assert_eq!(server.hits(), 1);
    assert_eq!(reporter.last_reported_time(), Some(watermark));
}

#[tokio::test]
async fn test_all_mode_sends_every_newer_archive() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 120);
    stage(&dir, "insights-2.tar.gz", 60);
    stage(&dir, "insights-0.tar.gz", 7200);

    let reporter = Arc::new(MemoryStatusReporter::with_last_reported(
        Utc::now() - ChronoDuration::hours(1),
    ));
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::All),
        reporter,
    );

    assert_eq!(controller.tick().await, TickOutcome::Uploaded(2));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 60);

    let future = Utc::now() + ChronoDuration::hours(1);
    let reporter = Arc::new(MemoryStatusReporter::with_last_reported(future));
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::Latest),
        reporter.clone(),
    );

    assert_eq!(controller.tick().await, TickOutcome::NothingToReport);
    assert_eq!(reporter.last_reported_time(), Some(future));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_disabled_reporting_makes_no_requests() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 120);
    stage(&dir, "insights-2.tar.gz", 60);

    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), false, ReportingType::All),
        reporter.clone(),
    );

    assert_eq!(controller.tick().await, TickOutcome::DryRun(2));
    assert_eq!(server.hits(), 0);
    assert!(reporter.last_reported_time().is_none());
    assert!(reporter.safe_initial_start());
}

#[tokio::test]
async fn test_authorization_error_aborts_batch() {
    let server = MockIngress::start(401).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 180);
    stage(&dir, "insights-2.tar.gz", 120);
    stage(&dir, "insights-3.tar.gz", 60);

    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::All),
        reporter.clone(),
    );

    assert!(matches!(controller.tick().await, TickOutcome::Failed(_)));
    assert_eq!(server.hits(), 1);

    let status = controller.status().current_status().unwrap();
    assert!(!status.healthy);
    assert_eq!(status.reason, "NotAuthorized");
    assert!(status.message.starts_with("Reporting was not allowed"));
    assert!(reporter.last_reported_time().is_none());
}

#[tokio::test]
async fn test_server_error_reports_upload_failed() {
    let server = MockIngress::start(500).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 60);

    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::Latest),
        reporter.clone(),
    );

    assert!(matches!(controller.tick().await, TickOutcome::Failed(_)));
    let status = controller.status().current_status().unwrap();
    assert_eq!(status.reason, "UploadFailed");
    assert!(status.message.starts_with("Unable to report"));
    assert!(reporter.last_reported_time().is_none());
}

#[tokio::test]
async fn test_unreadable_storage_reports_summary_failed() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir, server.endpoint(), true, ReportingType::Latest);
    cfg.storage_path = dir.path().join("does-not-exist");

    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(cfg, reporter);

    assert!(matches!(controller.tick().await, TickOutcome::Failed(_)));
    assert_eq!(
        controller.status().current_status().unwrap().reason,
        "SummaryFailed"
    );
}

#[tokio::test]
async fn test_single_upload_leaves_watermark() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(MemoryStatusReporter::new());
    let (controller, _) = build_controller(
        config(&dir, server.endpoint(), true, ReportingType::Latest),
        reporter.clone(),
    );

    controller
        .upload(Source::new("manual-0", "application/gzip", std::io::Cursor::new(tar_gz(&[]))))
        .await
        .unwrap();

    assert_eq!(server.hits(), 1);
    assert!(reporter.last_reported_time().is_none());
    assert!(controller.status().current_status().unwrap().healthy);
}

#[tokio::test]
async fn test_config_change_wakes_loop() {
    let server = MockIngress::start(202).await;
    let dir = tempfile::tempdir().unwrap();
    stage(&dir, "insights-1.tar.gz", 60);

    let reporter = Arc::new(MemoryStatusReporter::new());
    // no endpoint yet: the first tick is skipped and the loop sleeps a full interval
    let (controller, configurator) = build_controller(
        config(&dir, String::new(), true, ReportingType::Latest),
        reporter.clone(),
    );
    let controller = Arc::new(controller);
    let token = CancellationToken::new();
    let task = {
        let controller = controller.clone();
        let token = token.clone();
        tokio::spawn(async move { controller.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.hits(), 0);

    let mut updated = (*configurator.config()).clone();
    updated.endpoint = server.endpoint();
    configurator.update(updated);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.hits() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(server.hits(), 1);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(reporter.last_reported_time().is_some());
}
