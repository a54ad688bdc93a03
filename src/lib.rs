// Library exports for the binary and integration tests

pub mod config;
pub mod credentials;
pub mod error;
pub mod file_watcher;
pub mod logging;
pub mod metrics;
pub mod reporter;
pub mod shutdown;
pub mod status;
pub mod upload;

pub use error::UploadError;
