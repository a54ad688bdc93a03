//! Dry-run listing of a gzip-compressed tar payload.
//!
//! Used when reporting is disabled so the payload is still decoded the way a
//! real upload would read it.

use crate::error::UploadError;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::io::Read;
use tar::Archive;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Decode `reader` as tar.gz and log every entry at debug level
pub fn report_to_logs(reader: impl Read) -> Result<Vec<ArchiveEntry>, UploadError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut listed = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        let name = entry.path()?.to_string_lossy().into_owned();
        let size = header.size()?;
        let modified = header
            .mtime()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

        debug!(
            "Dry-run: {} {:>7} {}",
            modified.map(|m| m.to_rfc3339()).unwrap_or_default(),
            size,
            name
        );
        listed.push(ArchiveEntry {
            name,
            size,
            modified,
        });
    }

    Ok(listed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// tar.gz bytes holding `files` with a fixed mtime
    pub(crate) fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_700_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_lists_every_entry() {
        let data = build_archive(&[
            ("config/version.json", b"{\"v\":1}"),
            ("config/nodes.json", b"[]"),
        ]);

        let entries = report_to_logs(data.as_slice()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "config/version.json");
        assert_eq!(entries[0].size, 7);
        assert_eq!(entries[1].name, "config/nodes.json");
        assert_eq!(entries[1].size, 2);
        assert_eq!(
            entries[0].modified,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn test_empty_archive() {
        let data = build_archive(&[]);
        assert!(report_to_logs(data.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_not_gzip_is_error() {
        let err = report_to_logs(&b"plain text, not gzip"[..]).unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
