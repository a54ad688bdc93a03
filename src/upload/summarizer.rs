//! Selection of archives staged on disk.

use super::source::Source;
use crate::config::{Configuration, ReportingType};
use crate::error::UploadError;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Archive picked for the current tick
#[derive(Debug)]
pub struct Candidate {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub file: File,
}

impl Candidate {
    pub fn into_source(self, id: impl Into<String>, content_type: impl Into<String>) -> Source {
        Source::new(id, content_type, self.file).with_filename(self.name)
    }
}

/// Yields candidates one at a time within a tick
pub trait Summarizer: Send {
    /// Forget the previous scan and pick up settings from `config`. Called at the start of every tick.
    fn reset(&mut self, config: &Configuration);

    /// Next candidate modified strictly after `since`, or `None` when the tick has nothing left
    fn next(&mut self, since: DateTime<Utc>) -> Result<Option<Candidate>, UploadError>;
}

#[derive(Debug, Clone)]
struct ScannedFile {
    name: String,
    modified: DateTime<Utc>,
}

/// Scans a directory for `<prefix>*<suffix>` regular files, newest first
#[derive(Debug)]
pub struct DiskSummarizer {
    base_path: PathBuf,
    file_prefix: String,
    file_suffix: String,
    reporting_type: ReportingType,
    recent: Option<Vec<ScannedFile>>,
    cursor: usize,
}

impl DiskSummarizer {
    pub fn new(
        base_path: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
        file_suffix: impl Into<String>,
        reporting_type: ReportingType,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            file_prefix: file_prefix.into(),
            file_suffix: file_suffix.into(),
            reporting_type,
            recent: None,
            cursor: 0,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(
            config.storage_path.clone(),
            config.file_prefix.clone(),
            config.file_suffix.clone(),
            config.reporting_type,
        )
    }

    fn scan(&self, since: DateTime<Utc>) -> Result<Vec<ScannedFile>, UploadError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.base_path).map_err(UploadError::Summary)? {
            let entry = entry.map_err(UploadError::Summary)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.file_prefix) || !name.ends_with(&self.file_suffix) {
                continue;
            }

            let metadata = match fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(file = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(time) => time.into(),
                Err(_) => continue,
            };
            if modified <= since {
                continue;
            }
            files.push(ScannedFile { name, modified });
        }

        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(files)
    }
}

impl Summarizer for DiskSummarizer {
    fn reset(&mut self, config: &Configuration) {
        self.base_path = config.storage_path.clone();
        self.file_prefix = config.file_prefix.clone();
        self.file_suffix = config.file_suffix.clone();
        self.reporting_type = config.reporting_type;
        self.recent = None;
        self.cursor = 0;
    }

    fn next(&mut self, since: DateTime<Utc>) -> Result<Option<Candidate>, UploadError> {
        if self.recent.is_none() {
            self.recent = Some(self.scan(since)?);
            self.cursor = 0;
        }

        if self.reporting_type == ReportingType::Latest && self.cursor > 0 {
            return Ok(None);
        }
        let Some(next) = self
            .recent
            .as_ref()
            .and_then(|files| files.get(self.cursor))
            .cloned()
        else {
            return Ok(None);
        };
        self.cursor += 1;

        debug!(file = %next.name, "found file to send");
        let path = self.base_path.join(&next.name);
        match File::open(&path) {
            Ok(file) => Ok(Some(Candidate {
                name: next.name,
                modified: next.modified,
                file,
            })),
            Err(e) => {
                // reported as "nothing left" for this tick
                warn!(file = %path.display(), error = %e, "unable to open archive");
                Ok(None)
            }
        }
    }
}
