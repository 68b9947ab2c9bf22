// Job dispatcher - hands out job ids and runs downloads on a bounded pool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::errors::DownloadError;
use super::models::{DownloadOptions, DownloadRequest};
use super::progress::JobProgress;
use super::registry::JobRegistry;
use super::traits::{MediaBackend, ProgressSink};

#[derive(Clone)]
pub struct Dispatcher {
    registry: JobRegistry,
    backend: Arc<dyn MediaBackend>,
    permits: Arc<Semaphore>,
    download_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(
        registry: JobRegistry,
        backend: Arc<dyn MediaBackend>,
        max_concurrent: usize,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            backend,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            download_dir,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Validate the request, register a job and queue it. Returns as soon as
    /// the job exists; the download itself runs in the background.
    pub fn start(&self, request: DownloadRequest) -> Result<String, DownloadError> {
        let job_id = Uuid::new_v4().to_string();
        let options = DownloadOptions::from_request(job_id.clone(), request, self.download_dir.clone())?;
        self.registry
            .create(job_id.clone(), options.url.clone(), options.mode)?;

        info!(
            "[dispatcher] Job {} queued: {} ({}, {:?})",
            job_id, options.url, options.mode, options.quality
        );

        let registry = self.registry.clone();
        let backend = self.backend.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            run_job(registry, backend, permits, options).await;
        });

        Ok(job_id)
    }
}

/// Waits for a pool slot, runs the download and records the outcome.
/// Every path out of here leaves the job completed or failed.
async fn run_job(
    registry: JobRegistry,
    backend: Arc<dyn MediaBackend>,
    permits: Arc<Semaphore>,
    options: DownloadOptions,
) {
    let job_id = options.job_id.clone();

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            registry.mark_failed(&job_id, "Download pool is shut down".to_string());
            return;
        }
    };

    // Separate task so a panicking backend still ends the job
    let worker = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let sink = JobProgress::new(registry, options.job_id.clone());
            execute(backend.as_ref(), &options, &sink).await
        })
    };

    match worker.await {
        Ok(Ok(path)) => {
            info!("[dispatcher] Job {} completed: {}", job_id, path.display());
            registry.mark_completed(&job_id, path);
        }
        Ok(Err(e)) => {
            warn!("[dispatcher] Job {} failed: {}", job_id, e);
            registry.mark_failed(&job_id, e.job_message());
        }
        Err(e) => {
            error!("[dispatcher] Job {} worker crashed: {}", job_id, e);
            registry.mark_failed(&job_id, "Internal error while downloading".to_string());
        }
    }
}

/// Run one download to a verified file. Shared by the HTTP workers and the
/// command-line `fetch`.
pub async fn execute(
    backend: &dyn MediaBackend,
    options: &DownloadOptions,
    progress: &dyn ProgressSink,
) -> Result<PathBuf, DownloadError> {
    tokio::fs::create_dir_all(&options.output_dir).await?;
    info!("[dispatcher] Downloading {} with {}", options.url, backend.name());
    let path = backend.download(options, progress).await?;
    verify_output(&path).await?;
    Ok(path)
}

/// A finished download must exist and hold at least one byte
pub async fn verify_output(path: &Path) -> Result<(), DownloadError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(DownloadError::MissingOutput),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(DownloadError::MissingOutput);
    }
    if meta.len() == 0 {
        return Err(DownloadError::EmptyOutput(path.to_path_buf()));
    }
    Ok(())
}
