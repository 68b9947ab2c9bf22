// Downloader module - job registry, worker pool and the tool plumbing behind it

pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod sweeper;
pub mod tools;
pub mod traits;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::DownloadError;
pub use models::{DownloadMode, DownloadOptions, DownloadRequest, Job, JobStatus, NetworkConfig};
pub use orchestrator::Dispatcher;
pub use registry::JobRegistry;
pub use traits::{MediaBackend, ProgressSink};
