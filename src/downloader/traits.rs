// Media backend trait definition

use std::path::PathBuf;

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::{DownloadOptions, FormatsListing, ProgressUpdate, SearchResult};

/// The external extraction/download tool, seen from the dispatcher
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Search the default site for `query`
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, DownloadError>;

    /// List the formats available for a URL
    async fn get_formats(&self, url: &str) -> Result<FormatsListing, DownloadError>;

    /// Download according to `options`, reporting progress as it goes.
    /// Returns the path of the final file.
    async fn download(
        &self,
        options: &DownloadOptions,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, DownloadError>;
}

/// Receives progress while a backend runs
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}
