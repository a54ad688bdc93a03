//! Upload pipeline.
//!
//! The controller pulls archives from a summarizer and hands them to the
//! client, which resolves proxies and credentials per attempt.

pub mod archive;
pub mod authorizer;
pub mod client;
pub mod controller;
pub mod decorator;
pub mod multipart;
pub mod proxy;
pub mod retry;
pub mod source;
pub mod summarizer;

pub use archive::{report_to_logs, ArchiveEntry};
pub use authorizer::Credentials;
pub use client::UploadClient;
pub use controller::{TickOutcome, UploadController};
pub use decorator::RequestDecorator;
pub use proxy::ProxyResolver;
pub use retry::RetryStrategy;
pub use source::Source;
pub use summarizer::{Candidate, DiskSummarizer, Summarizer};
