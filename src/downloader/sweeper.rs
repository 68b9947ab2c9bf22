// Expiry sweep - drops finished jobs past their TTL along with their files

use std::path::{Path, PathBuf};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::JobRegistry;

/// What one sweep pass removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs: usize,
    pub files: Vec<PathBuf>,
}

/// Remove expired jobs and every file in `dir` that belongs to them.
///
/// A job owns all files named `{job_id}_*`, so partial downloads left by a
/// failed job go too.
pub async fn sweep_once(
    registry: &JobRegistry,
    dir: &Path,
    ttl: Duration,
    now: OffsetDateTime,
) -> SweepReport {
    let expired = registry.remove_expired(now, ttl);
    if expired.is_empty() {
        return SweepReport::default();
    }

    let prefixes: Vec<String> = expired.iter().map(|job| format!("{}_", job.id)).collect();
    let mut files = Vec::new();

    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("[sweeper] Failed to read {}: {}", dir.display(), e);
                    break;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("[sweeper] Removed {}", path.display());
                    files.push(path);
                }
                Err(e) => warn!("[sweeper] Failed to remove {}: {}", path.display(), e),
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[sweeper] Failed to read {}: {}", dir.display(), e),
    }

    // Completed files can live outside the download dir (CLI output dir)
    for job in &expired {
        if let Some(path) = &job.file_path {
            if !files.contains(path) && tokio::fs::remove_file(path).await.is_ok() {
                files.push(path.clone());
            }
        }
    }

    info!(
        "[sweeper] Expired {} job(s), removed {} file(s)",
        expired.len(),
        files.len()
    );
    SweepReport {
        jobs: expired.len(),
        files,
    }
}

/// Run `sweep_once` every `interval` until the runtime shuts down
pub fn spawn_sweeper(
    registry: JobRegistry,
    dir: PathBuf,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&registry, &dir, ttl, OffsetDateTime::now_utc()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::DownloadMode;

    fn job(registry: &JobRegistry, id: &str) {
        registry
            .create(id.to_string(), "https://example.com".to_string(), DownloadMode::VideoAudio)
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_job_files_removed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();
        job(&registry, "old");
        job(&registry, "live");

        let done = dir.path().join("old_Title.mp4");
        let partial = dir.path().join("old_Title.f137.mp4.part");
        let other = dir.path().join("live_Title.mp4");
        let stranger = dir.path().join("older_Title.mp4");
        for path in [&done, &partial, &other, &stranger] {
            std::fs::write(path, b"x").unwrap();
        }
        registry.mark_completed("old", done.clone());

        let ttl = Duration::from_secs(3600);
        let later = OffsetDateTime::now_utc() + Duration::from_secs(3601);
        let report = sweep_once(&registry, dir.path(), ttl, later).await;

        assert_eq!(report.jobs, 1);
        assert_eq!(report.files.len(), 2);
        assert!(!done.exists());
        assert!(!partial.exists());
        assert!(other.exists());
        assert!(stranger.exists());
        assert!(registry.get("old").is_none());
        // still running, so kept
        assert!(registry.get("live").is_some());
    }

    #[tokio::test]
    async fn test_nothing_expired_before_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();
        job(&registry, "a");
        let file = dir.path().join("a_Title.mp3");
        std::fs::write(&file, b"x").unwrap();
        registry.mark_failed("a", "boom".to_string());

        let report = sweep_once(&registry, dir.path(), Duration::from_secs(3600), OffsetDateTime::now_utc()).await;
        assert_eq!(report, SweepReport::default());
        assert!(file.exists());
        assert!(registry.get("a").is_some());
    }

    #[tokio::test]
    async fn test_missing_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();
        job(&registry, "a");
        registry.mark_failed("a", "boom".to_string());
        let later = OffsetDateTime::now_utc() + Duration::from_secs(10);
        let report = sweep_once(&registry, &dir.path().join("gone"), Duration::from_secs(1), later).await;
        assert_eq!(report.jobs, 1);
        assert!(report.files.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new();
        job(&registry, "a");
        registry.mark_failed("a", "boom".to_string());

        let handle = spawn_sweeper(
            registry.clone(),
            dir.path().to_path_buf(),
            Duration::ZERO,
            Duration::from_secs(300),
        );
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(registry.get("a").is_none());
        handle.abort();
    }
}
