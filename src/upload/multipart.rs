//! Single-part `multipart/form-data` body streamed from a blocking reader.
//!
//! A producer on the blocking pool reads the source (capped at `max_bytes`)
//! and pushes framed chunks through a bounded channel. The HTTP body drains the
//! channel, so reading and sending overlap and the archive is never buffered
//! whole. A read error is forwarded as the stream's last item and ends it.

use super::source::Source;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

const CHUNK_SIZE: usize = 32 * 1024;
const CHANNEL_CAPACITY: usize = 8;

/// Form field name of the payload part
pub const FIELD_NAME: &str = "file";

pub struct MultipartBody {
    boundary: String,
    source: Source,
    max_bytes: u64,
    written: Arc<AtomicU64>,
}

impl MultipartBody {
    pub fn new(source: Source, max_bytes: u64) -> Self {
        Self {
            boundary: Uuid::new_v4().simple().to_string(),
            source,
            max_bytes,
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source.id
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Shared count of payload bytes written into the part so far
    pub fn written(&self) -> Arc<AtomicU64> {
        self.written.clone()
    }

    /// Start the producer and return the consuming end.
    ///
    /// Must be called inside a tokio runtime. Dropping the stream stops the producer.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let head = part_head(
            &self.boundary,
            self.source.part_filename(),
            &self.source.content_type,
        );
        let tail = format!("\r\n--{}--\r\n", self.boundary);
        let Source { id, contents, .. } = self.source;
        let max_bytes = self.max_bytes;
        let counter = self.written;

        tokio::task::spawn_blocking(move || {
            match produce(contents, max_bytes, head, tail, &tx, &counter) {
                Ok(()) => debug!(id = %id, bytes = counter.load(Ordering::Relaxed), "payload streamed"),
                Err(e) => {
                    debug!(id = %id, error = %e, "payload stream aborted");
                    // the consumer may already be gone
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        let mut rx = rx;
        stream::poll_fn(move |cx| rx.poll_recv(cx))
    }

    pub fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(self.into_stream())
    }
}

fn part_head(boundary: &str, filename: &str, content_type: &str) -> String {
    format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n",
        boundary = boundary,
        field = FIELD_NAME,
        filename = escape_quotes(filename),
        content_type = content_type,
    )
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Returns Ok early, without error, once the receiver is dropped
fn produce(
    contents: Box<dyn Read + Send>,
    max_bytes: u64,
    head: String,
    tail: String,
    tx: &mpsc::Sender<io::Result<Bytes>>,
    written: &AtomicU64,
) -> io::Result<()> {
    if tx.blocking_send(Ok(Bytes::from(head))).is_err() {
        return Ok(());
    }

    let mut reader = contents.take(max_bytes);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        written.fetch_add(n as u64, Ordering::Relaxed);
        if tx
            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .is_err()
        {
            return Ok(());
        }
    }

    let _ = tx.blocking_send(Ok(Bytes::from(tail)));
    Ok(())
}
