use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_TICK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MIME_TYPE: &str = "application/vnd.redhat.openshift.periodic+tar";

/// How many candidate archives a tick may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportingType {
    /// Only the most recent archive
    #[default]
    Latest,
    /// Every archive newer than the watermark
    All,
}

/// Proxy settings that take precedence over the process environment
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HttpConfig {
    #[serde(rename = "httpProxy", default)]
    pub http_proxy: String,
    #[serde(rename = "httpsProxy", default)]
    pub https_proxy: String,
    #[serde(rename = "noProxy", default)]
    pub no_proxy: String,
}

impl HttpConfig {
    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_empty() && self.https_proxy.is_empty() && self.no_proxy.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Configuration {
    pub report: bool,
    pub endpoint: String,
    #[serde(rename = "storagePath")]
    pub storage_path: PathBuf,
    #[serde(rename = "filePrefix")]
    pub file_prefix: String,
    #[serde(rename = "fileSuffix")]
    pub file_suffix: String,
    #[serde(rename = "reportingType")]
    pub reporting_type: ReportingType,
    #[serde(rename = "intervalSecs")]
    pub interval_secs: u64,
    #[serde(rename = "tickTimeoutSecs")]
    pub tick_timeout_secs: u64,
    #[serde(rename = "maxBackoffSecs")]
    pub max_backoff_secs: Option<u64>,
    #[serde(rename = "maxBytes")]
    pub max_bytes: u64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,

    pub username: String,
    pub password: String,
    pub token: String,
    #[serde(rename = "pullSecretPath")]
    pub pull_secret_path: Option<PathBuf>,

    #[serde(rename = "httpConfig")]
    pub http_config: HttpConfig,
    #[serde(rename = "caBundlePath")]
    pub ca_bundle_path: Option<PathBuf>,

    #[serde(rename = "clusterId")]
    pub cluster_id: Option<String>,
    #[serde(rename = "clusterIdPath")]
    pub cluster_id_path: Option<PathBuf>,
    #[serde(rename = "statusPath")]
    pub status_path: Option<PathBuf>,
    #[serde(rename = "logDir")]
    pub log_dir: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            report: false,
            endpoint: String::new(),
            storage_path: PathBuf::from("/var/lib/insights-operator"),
            file_prefix: "insights-".to_string(),
            file_suffix: ".tar.gz".to_string(),
            reporting_type: ReportingType::Latest,
            interval_secs: DEFAULT_INTERVAL_SECS,
            tick_timeout_secs: DEFAULT_TICK_TIMEOUT_SECS,
            max_backoff_secs: None,
            max_bytes: DEFAULT_MAX_BYTES,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            pull_secret_path: None,
            http_config: HttpConfig::default(),
            ca_bundle_path: None,
            cluster_id: None,
            cluster_id_path: None,
            status_path: None,
            log_dir: None,
        }
    }
}

impl Configuration {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs.max(1))
    }

    /// Upper bound for the failure backoff; defaults to the interval itself
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.interval())
            .max(self.interval())
    }

    fn expand_paths(&mut self) {
        self.storage_path = expand(&self.storage_path);
        for path in [
            &mut self.pull_secret_path,
            &mut self.ca_bundle_path,
            &mut self.cluster_id_path,
            &mut self.status_path,
            &mut self.log_dir,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand(path);
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("INSIGHTS_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(report) = lookup("INSIGHTS_REPORT") {
            self.report = matches!(report.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Some(token) = lookup("INSIGHTS_TOKEN") {
            self.token = token;
        }
        if let Some(path) = lookup("INSIGHTS_STORAGE_PATH") {
            self.storage_path = PathBuf::from(path);
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}

pub fn get_config_dir() -> Result<PathBuf, UploadError> {
    dirs::config_dir()
        .map(|dir| dir.join("ingress-uploader"))
        .ok_or_else(|| UploadError::Config("Could not find config directory".to_string()))
}

pub fn get_config_file_path() -> Result<PathBuf, UploadError> {
    Ok(get_config_dir()?.join("config.json"))
}

/// Load configuration from `path` (defaults when absent) with environment overrides applied
pub fn load_config(path: &Path) -> Result<Configuration, UploadError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

pub fn load_config_with_env<F>(path: &Path, lookup: F) -> Result<Configuration, UploadError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str::<Configuration>(&content).map_err(|e| {
            UploadError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?
    } else {
        Configuration::default()
    };

    config.apply_env(lookup);
    config.expand_paths();
    Ok(config)
}

/// Source of the current configuration snapshot
pub trait Configurator: Send + Sync {
    fn config(&self) -> Arc<Configuration>;

    /// Receiver notified whenever a new snapshot is published
    fn subscribe(&self) -> watch::Receiver<Arc<Configuration>>;
}

/// Configurator backed by a watch channel; `update` publishes a new snapshot
#[derive(Debug, Clone)]
pub struct StaticConfigurator {
    tx: Arc<watch::Sender<Arc<Configuration>>>,
}

impl StaticConfigurator {
    pub fn new(config: Configuration) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, config: Configuration) {
        self.tx.send_replace(Arc::new(config));
    }
}

impl Configurator for StaticConfigurator {
    fn config(&self) -> Arc<Configuration> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Configuration>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let config = load_config_with_env(&dir.path().join("missing.json"), |_| None).unwrap();

        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.tick_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.reporting_type, ReportingType::Latest);
        assert!(!config.report);
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "report": true,
                "endpoint": "https://ingress.example.com/upload",
                "reportingType": "all",
                "intervalSecs": 30,
                "httpConfig": {"httpsProxy": "proxy.local:3128", "noProxy": "10.0.0.0/8"}
            }"#,
        )
        .unwrap();

        let config = load_config_with_env(&path, |_| None).unwrap();
        assert!(config.report);
        assert_eq!(config.endpoint, "https://ingress.example.com/upload");
        assert_eq!(config.reporting_type, ReportingType::All);
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.http_config.https_proxy, "proxy.local:3128");
        assert!(config.http_config.http_proxy.is_empty());
        // unspecified fields keep defaults
        assert_eq!(config.file_suffix, ".tar.gz");
    }

    #[test]
    fn test_env_overrides() {
        let dir = tempdir().unwrap();
        let env: HashMap<&str, &str> = [
            ("INSIGHTS_ENDPOINT", "https://env.example.com"),
            ("INSIGHTS_REPORT", "true"),
            ("INSIGHTS_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with_env(&dir.path().join("none.json"), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.endpoint, "https://env.example.com");
        assert!(config.report);
        assert_eq!(config.token, "secret");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_config_with_env(&path, |_| None).unwrap_err();
        assert!(matches!(err, UploadError::Config(_)));
    }

    #[test]
    fn test_max_backoff_never_below_interval() {
        let config = Configuration {
            interval_secs: 20,
            max_backoff_secs: Some(5),
            ..Default::default()
        };
        assert_eq!(config.max_backoff(), Duration::from_secs(20));

        let config = Configuration {
            interval_secs: 20,
            max_backoff_secs: Some(300),
            ..Default::default()
        };
        assert_eq!(config.max_backoff(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_static_configurator_publishes_updates() {
        let configurator = StaticConfigurator::new(Configuration::default());
        let mut rx = configurator.subscribe();

        configurator.update(Configuration {
            endpoint: "https://new.example.com".to_string(),
            ..Default::default()
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().endpoint, "https://new.example.com");
        assert_eq!(configurator.config().endpoint, "https://new.example.com");
    }
}
