//! User agent and common headers for ingestion requests.

use super::authorizer::Credentials;
use crate::credentials::ClusterIdentity;
use crate::error::UploadError;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;

/// Adds the content type, user agent and credentials to outgoing uploads
#[derive(Clone)]
pub struct RequestDecorator {
    operator_name: String,
    operator_commit: String,
    identity: Arc<dyn ClusterIdentity>,
}

impl RequestDecorator {
    pub fn new(
        operator_name: impl Into<String>,
        operator_commit: impl Into<String>,
        identity: Arc<dyn ClusterIdentity>,
    ) -> Self {
        Self {
            operator_name: operator_name.into(),
            operator_commit: operator_commit.into(),
            identity,
        }
    }

    /// `<name>/<commit> cluster/<id>`; fails while the cluster id is unavailable
    pub fn user_agent(&self) -> Result<String, UploadError> {
        let cluster_id = self.identity.cluster_id()?;
        Ok(format!(
            "{}/{} cluster/{}",
            self.operator_name, self.operator_commit, cluster_id
        ))
    }

    /// Build the request headers. Nothing is returned unless every header could be set.
    pub fn headers(
        &self,
        content_type: &str,
        credentials: &Credentials,
    ) -> Result<HeaderMap, UploadError> {
        let user_agent = self.user_agent()?;

        let mut headers = HeaderMap::new();
        if !content_type.is_empty() {
            let value = HeaderValue::from_str(content_type)
                .map_err(|e| UploadError::Transport(format!("invalid content type: {}", e)))?;
            headers.insert(CONTENT_TYPE, value);
        }
        let value = HeaderValue::from_str(&user_agent)
            .map_err(|e| UploadError::Transport(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, value);

        credentials.authorize(&mut headers)?;
        Ok(headers)
    }
}

impl std::fmt::Debug for RequestDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDecorator")
            .field("operator_name", &self.operator_name)
            .field("operator_commit", &self.operator_commit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticClusterIdentity;
    use reqwest::header::AUTHORIZATION;

    fn decorator(cluster_id: Option<&str>) -> RequestDecorator {
        RequestDecorator::new(
            "ingress-uploader",
            "abc123",
            Arc::new(StaticClusterIdentity::new(cluster_id.map(String::from))),
        )
    }

    #[test]
    fn test_user_agent_format() {
        assert_eq!(
            decorator(Some("c-1")).user_agent().unwrap(),
            "ingress-uploader/abc123 cluster/c-1"
        );
    }

    #[test]
    fn test_headers() {
        let headers = decorator(Some("c-1"))
            .headers(
                "multipart/form-data; boundary=xyz",
                &Credentials::Bearer("tok".into()),
            )
            .unwrap();

        assert_eq!(headers[CONTENT_TYPE], "multipart/form-data; boundary=xyz");
        assert_eq!(headers[USER_AGENT], "ingress-uploader/abc123 cluster/c-1");
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn test_missing_cluster_id_aborts() {
        let err = decorator(None)
            .headers("text/plain", &Credentials::None)
            .unwrap_err();
        assert!(matches!(err, UploadError::WaitingForVersion));
    }

    #[test]
    fn test_invalid_token_aborts() {
        let err = decorator(Some("c-1"))
            .headers("text/plain", &Credentials::Bearer("a\nb".into()))
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidCredential(_)));
    }
}
