//! Payload handed to the client for one upload.

use std::fmt;
use std::io::Read;

/// Filename sent in the multipart part when the source has none
pub const DEFAULT_FILENAME: &str = "payload.tar.gz";

/// One payload eligible for upload.
///
/// The contents are consumed by whoever sends (or dry-runs) the source and
/// closed when that owner drops it.
pub struct Source {
    /// Correlation id used in logs
    pub id: String,
    /// MIME type of the part
    pub content_type: String,
    pub filename: Option<String>,
    pub contents: Box<dyn Read + Send>,
}

impl Source {
    pub fn new(
        id: impl Into<String>,
        content_type: impl Into<String>,
        contents: impl Read + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            content_type: content_type.into(),
            filename: None,
            contents: Box::new(contents),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Filename used in `Content-Disposition`
    pub fn part_filename(&self) -> &str {
        match self.filename.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_FILENAME,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}
