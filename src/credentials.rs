//! Credential and cluster-identity material consumed by the upload client.

use crate::error::UploadError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const PULL_SECRET_AUTH_KEY: &str = "cloud.openshift.com";

#[derive(Debug, Deserialize)]
struct SerializedAuthMap {
    #[serde(default)]
    auths: HashMap<String, SerializedAuth>,
}

#[derive(Debug, Deserialize)]
struct SerializedAuth {
    #[serde(default)]
    auth: String,
}

/// Validate a bearer token: trimmed, non-empty, no embedded line breaks
pub fn validate_token(raw: &str) -> Result<String, UploadError> {
    let token = raw.trim();
    if token.contains('\n') || token.contains('\r') {
        return Err(UploadError::InvalidCredential(
            "cluster authorization token is not valid: contains newlines".to_string(),
        ));
    }
    if token.is_empty() {
        return Err(UploadError::InvalidCredential(
            "cluster authorization token is empty".to_string(),
        ));
    }
    Ok(token.to_string())
}

/// Extract the ingestion token from a docker-config style pull secret
pub fn token_from_pull_secret(data: &[u8]) -> Result<String, UploadError> {
    if data.is_empty() {
        return Err(UploadError::InvalidCredential(
            "cluster authorization secret did not have data".to_string(),
        ));
    }
    let secret: SerializedAuthMap = serde_json::from_slice(data)?;
    let auth = secret.auths.get(PULL_SECRET_AUTH_KEY).ok_or_else(|| {
        UploadError::InvalidCredential("cluster authorization token is not found".to_string())
    })?;
    validate_token(&auth.auth).map_err(|e| match e {
        UploadError::InvalidCredential(msg) if msg.ends_with("empty") => {
            UploadError::InvalidCredential("cluster authorization token is not found".to_string())
        }
        other => other,
    })
}

/// Read a mounted pull secret file and extract the token
pub fn token_from_pull_secret_file(path: &Path) -> Result<String, UploadError> {
    let data = fs::read(path)?;
    token_from_pull_secret(&data)
}

/// Provides the opaque cluster identifier used in the user agent
pub trait ClusterIdentity: Send + Sync {
    fn cluster_id(&self) -> Result<String, UploadError>;
}

/// Identity known up front (from configuration)
#[derive(Debug, Clone)]
pub struct StaticClusterIdentity {
    cluster_id: Option<String>,
}

impl StaticClusterIdentity {
    pub fn new(cluster_id: Option<String>) -> Self {
        Self { cluster_id }
    }
}

impl ClusterIdentity for StaticClusterIdentity {
    fn cluster_id(&self) -> Result<String, UploadError> {
        match self.cluster_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(UploadError::WaitingForVersion),
        }
    }
}

/// Identity published to a file by another component; cached once read
#[derive(Debug)]
pub struct FileClusterIdentity {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl FileClusterIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }
}

impl ClusterIdentity for FileClusterIdentity {
    fn cluster_id(&self) -> Result<String, UploadError> {
        if let Some(id) = self.cached.lock().ok().and_then(|c| c.clone()) {
            return Ok(id);
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(UploadError::WaitingForVersion),
            Err(e) => return Err(UploadError::ObtainingVersion(e.to_string())),
        };

        let id = content.trim();
        if id.is_empty() {
            return Err(UploadError::ObtainingVersion(
                "No cluster ID found in ClusterVersion Spec".to_string(),
            ));
        }

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(id.to_string());
        }
        Ok(id.to_string())
    }
}
