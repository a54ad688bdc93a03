//! HTTP client for the ingestion endpoint.
//!
//! Every `send` builds its own transport so proxy and CA changes are picked up
//! on the next attempt; pooled connections are never reused.

use super::authorizer::Credentials;
use super::decorator::RequestDecorator;
use super::multipart::MultipartBody;
use super::proxy::ProxyResolver;
use super::source::Source;
use crate::config::Configuration;
use crate::error::UploadError;
use crate::metrics::{RequestCounter, NO_RESPONSE_STATUS};
use reqwest::{Certificate, Client, StatusCode};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Error bodies are cut to this many bytes before being surfaced
pub const RESPONSE_BODY_LOG_LEN: usize = 1024;
pub const REQUEST_ID_HEADER: &str = "x-rh-insights-request-id";

/// Sends one source per call as a streamed multipart POST
#[derive(Clone)]
pub struct UploadClient {
    metrics_name: String,
    decorator: RequestDecorator,
    metrics: Arc<dyn RequestCounter>,
}

impl UploadClient {
    pub fn new(
        metrics_name: impl Into<String>,
        decorator: RequestDecorator,
        metrics: Arc<dyn RequestCounter>,
    ) -> Self {
        Self {
            metrics_name: metrics_name.into(),
            decorator,
            metrics,
        }
    }

    pub fn metrics_name(&self) -> &str {
        &self.metrics_name
    }

    /// Post `source` to `endpoint` using the transport and credentials from `config`.
    ///
    /// The payload is capped at `config.max_bytes`; anything beyond is dropped
    /// silently. Dropping the returned future aborts the request.
    pub async fn send(
        &self,
        config: &Configuration,
        endpoint: &str,
        source: Source,
    ) -> Result<(), UploadError> {
        let credentials = Credentials::from_config(config)?;
        let body = MultipartBody::new(source, config.max_bytes);
        let headers = self.decorator.headers(&body.content_type(), &credentials)?;
        let client = build_client(config)?;

        let source_id = body.source_id().to_string();
        let written = body.written();
        debug!(id = %source_id, endpoint = %endpoint, "uploading payload");

        let response = match client
            .post(endpoint)
            .headers(headers)
            .body(body.into_body())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "request failed before a response");
                self.metrics.inc(&self.metrics_name, NO_RESPONSE_STATUS);
                return Err(UploadError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        let url = response.url().to_string();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.metrics.inc(&self.metrics_name, status.as_str());

        // always drain so the connection is released
        let body = match response.bytes().await {
            Ok(bytes) => truncate_body(&bytes),
            Err(e) => {
                debug!(error = %e, "failed to read response body");
                String::new()
            }
        };

        match status {
            StatusCode::UNAUTHORIZED => {
                info!(url = %url, request_id = %request_id, "gateway returned 401");
                Err(UploadError::Authorization(format!(
                    "your Red Hat account is not enabled for remote support or your token has expired: {}",
                    body
                )))
            }
            StatusCode::FORBIDDEN => {
                info!(url = %url, request_id = %request_id, "gateway returned 403");
                Err(UploadError::Authorization(
                    "your Red Hat account is not enabled for remote support".to_string(),
                ))
            }
            StatusCode::BAD_REQUEST => Err(UploadError::BadRequest {
                url,
                request_id,
                body,
            }),
            s if !s.is_success() => Err(UploadError::UnexpectedStatus {
                status: s.as_u16(),
                url,
                request_id,
                body,
            }),
            _ => {
                info!(
                    id = %source_id,
                    request_id = %request_id,
                    wrote = written.load(Ordering::Relaxed),
                    "successfully reported"
                );
                Ok(())
            }
        }
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    let end = bytes.len().min(RESPONSE_BODY_LOG_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Fresh transport for one attempt
pub fn build_client(config: &Configuration) -> Result<Client, UploadError> {
    let resolver = ProxyResolver::new(&config.http_config)?;

    let mut builder = Client::builder()
        .proxy(resolver.into_reqwest_proxy())
        .connect_timeout(DIAL_TIMEOUT)
        .tcp_keepalive(KEEP_ALIVE)
        .pool_max_idle_per_host(0);

    if let Some(path) = &config.ca_bundle_path {
        match load_ca_bundle(path) {
            Ok(Some(certs)) => {
                builder = builder.tls_built_in_root_certs(false);
                for cert in certs {
                    builder = builder.add_root_certificate(cert);
                }
            }
            Ok(None) => {}
            Err(e) => error!(path = %path.display(), error = %e, "failed to load proxy trusted CA"),
        }
    }

    builder.build().map_err(|e| UploadError::TransportConfig(e.to_string()))
}

/// Certificates from a PEM bundle; `None` when the file is missing or empty.
///
/// Blocks that fail to parse are skipped. The bundle is only rejected when
/// nothing in it loads.
pub fn load_ca_bundle(path: &Path) -> Result<Option<Vec<Certificate>>, UploadError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(UploadError::TransportConfig(e.to_string())),
    };
    if data.is_empty() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&data);
    let mut certs = Vec::new();
    for (index, block) in pem_blocks(&text).into_iter().enumerate() {
        match Certificate::from_pem(block.as_bytes()) {
            Ok(cert) => certs.push(cert),
            Err(e) => warn!(path = %path.display(), index, error = %e, "skipping unparseable certificate"),
        }
    }

    if certs.is_empty() {
        return Err(UploadError::TransportConfig(
            "error loading cert pool from ca data".to_string(),
        ));
    }
    Ok(Some(certs))
}

fn pem_blocks(text: &str) -> Vec<String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let Some(len) = rest[start..].find(END) else {
            break;
        };
        let stop = start + len + END.len();
        blocks.push(format!("{}\n", &rest[start..stop]));
        rest = &rest[stop..];
    }
    blocks
}
