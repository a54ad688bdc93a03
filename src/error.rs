use thiserror::Error;

/// Errors produced by the upload pipeline
#[derive(Debug, Error)]
pub enum UploadError {
    /// Credentials rejected or expired by the ingestion service (HTTP 401/403)
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Cluster identity has not been published yet
    #[error("waiting for the cluster version to be loaded")]
    WaitingForVersion,

    /// Cluster identity lookup failed
    #[error("unable to obtain the cluster version: {0}")]
    ObtainingVersion(String),

    /// Gateway rejected the request as malformed (HTTP 400)
    #[error("gateway server bad request: {url} (request={request_id}): {body}")]
    BadRequest {
        url: String,
        request_id: String,
        body: String,
    },

    /// Any other non-2xx response
    #[error("gateway server reported unexpected error code: {status} (request={request_id}): {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        request_id: String,
        body: String,
    },

    /// Network, TLS or dial failure before a response was obtained
    #[error("unable to build request to connect to Insights server: {0}")]
    Transport(String),

    /// Tick exceeded its time bound; the in-flight request was dropped
    #[error("upload timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Locally detected malformed credential; the request is never sent
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Malformed trusted CA bundle or proxy configuration
    #[error("Transport configuration error: {0}")]
    TransportConfig(String),

    /// Watch directory could not be scanned
    #[error("Unable to retrieve local data: {0}")]
    Summary(#[source] std::io::Error),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used for status reasons and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Credentials were rejected or are malformed
    Auth,
    /// Client errors (4xx other than auth) - the payload itself is rejected
    Client,
    /// Server errors (5xx and other unexpected statuses)
    Server,
    /// Connection issues, timeouts, TLS failures
    Network,
    /// Upstream identity not yet available, retried silently
    Pending,
    /// Local configuration or filesystem problems
    Local,
}

impl UploadError {
    /// Returns true if the error means the credentials are not usable
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, UploadError::Authorization(_))
    }

    /// Returns true for the cluster-identity sentinels that are retried on the next tick
    pub fn is_version_unavailable(&self) -> bool {
        matches!(
            self,
            UploadError::WaitingForVersion | UploadError::ObtainingVersion(_)
        )
    }

    pub fn classify(&self) -> ErrorType {
        match self {
            UploadError::Authorization(_) | UploadError::InvalidCredential(_) => ErrorType::Auth,
            UploadError::WaitingForVersion | UploadError::ObtainingVersion(_) => {
                ErrorType::Pending
            }
            UploadError::BadRequest { .. } => ErrorType::Client,
            UploadError::UnexpectedStatus { status, .. } if (400..500).contains(status) => {
                ErrorType::Client
            }
            UploadError::UnexpectedStatus { .. } => ErrorType::Server,
            UploadError::Transport(_) | UploadError::Timeout(_) => ErrorType::Network,
            UploadError::TransportConfig(_)
            | UploadError::Summary(_)
            | UploadError::Config(_)
            | UploadError::Io(_)
            | UploadError::Json(_) => ErrorType::Local,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport(err.to_string())
    }
}
