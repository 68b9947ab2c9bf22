// In-process stand-in for yt-dlp used by dispatcher and handler tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::errors::DownloadError;
use super::models::{
    DownloadOptions, FormatDescriptor, FormatsListing, ProgressUpdate, SearchResult,
};
use super::traits::{MediaBackend, ProgressSink};

pub(crate) enum FakeOutcome {
    /// Write these bytes to `{job_id}_Fake Title.mp4`
    Succeed(Vec<u8>),
    /// Fail as if the tool printed this to stderr
    Fail(String),
    /// Write a zero-byte file
    Empty,
    /// Report a path that was never written
    NoFile,
    Panic,
}

pub(crate) struct FakeBackend {
    outcome: FakeOutcome,
    gate: Option<Arc<Semaphore>>,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeBackend {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            gate: None,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Hold every download until the gate hands out a permit
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, DownloadError> {
        Ok((0..limit.min(3))
            .map(|i| SearchResult {
                id: format!("vid{}", i),
                title: format!("{} #{}", query, i),
                thumbnail: None,
                channel: Some("Channel".to_string()),
                duration: Some("3:32".to_string()),
                url: format!("https://www.youtube.com/watch?v=vid{}", i),
            })
            .collect())
    }

    async fn get_formats(&self, url: &str) -> Result<FormatsListing, DownloadError> {
        if url.contains("unsupported") {
            return Err(DownloadError::from(format!("ERROR: Unsupported URL: {}", url)));
        }
        Ok(FormatsListing {
            title: "Fake Title".to_string(),
            thumbnail: None,
            duration: Some(212.0),
            formats: vec![FormatDescriptor {
                id: "22".to_string(),
                ext: "mp4".to_string(),
                quality: "720p".to_string(),
                height: 720,
                fps: Some(30.0),
                note: "H.264".to_string(),
                filesize: Some(1024),
                has_audio: true,
            }],
            video_formats: vec!["720p".to_string()],
            audio_formats: vec!["128kbps".to_string()],
        })
    }

    async fn download(
        &self,
        options: &DownloadOptions,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, DownloadError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        progress.report(ProgressUpdate::Downloading {
            percent: 10.0,
            downloaded_bytes: Some(10),
            total_bytes: Some(100),
        });

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let path = options
            .output_dir
            .join(format!("{}Fake Title.mp4", options.file_prefix()));
        let result = match &self.outcome {
            FakeOutcome::Succeed(bytes) => {
                progress.report(ProgressUpdate::Processing {
                    message: "Processing: Merger".to_string(),
                });
                tokio::fs::write(&path, bytes).await?;
                Ok(path)
            }
            FakeOutcome::Fail(stderr) => Err(DownloadError::from(stderr.clone())),
            FakeOutcome::Empty => {
                tokio::fs::write(&path, b"").await?;
                Ok(path)
            }
            FakeOutcome::NoFile => Ok(path),
            FakeOutcome::Panic => panic!("backend blew up"),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
