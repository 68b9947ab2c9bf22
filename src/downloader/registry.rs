// Job registry - in-memory status store shared by handlers, workers and the sweeper

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use super::errors::DownloadError;
use super::models::{DownloadMode, Job, JobStatus};

/// Cloning is cheap; all clones share one map.
///
/// The lock is never held across an `.await`: every method takes it, does a
/// bounded amount of work and releases it.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `starting` state. An id can only be used once.
    pub fn create(&self, id: String, url: String, mode: DownloadMode) -> Result<Job, DownloadError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&id) {
            return Err(DownloadError::InvalidRequest(format!(
                "Job {} already exists",
                id
            )));
        }
        let job = Job::new(id.clone(), url, mode);
        jobs.insert(id, job.clone());
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    /// Mutate a job in place and bump its timestamp. Returns the new state,
    /// or None if the job is unknown (e.g. already swept).
    pub fn update<F>(&self, id: &str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id)?;
        f(job);
        job.updated_at = OffsetDateTime::now_utc();
        Some(job.clone())
    }

    pub fn mark_completed(&self, id: &str, path: PathBuf) -> Option<Job> {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            job.file_path = Some(path);
            job.error = None;
            job.message = "Completed successfully!".to_string();
        })
    }

    pub fn mark_failed(&self, id: &str, error: String) -> Option<Job> {
        self.update(id, |job| {
            job.status = JobStatus::Error;
            job.message = format!("Error: {}", error);
            job.error = Some(error);
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs not yet finished
    pub fn active_count(&self) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    /// Remove finished jobs whose last update is at least `ttl` old.
    /// In-flight jobs are kept no matter how old they are, and a TTL too
    /// large to represent never expires anything.
    pub fn remove_expired(&self, now: OffsetDateTime, ttl: Duration) -> Vec<Job> {
        let mut jobs = self.jobs.lock();
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.status.is_terminal() && has_expired(job.updated_at, ttl, now))
            .map(|job| job.id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .collect()
    }
}

fn has_expired(updated_at: OffsetDateTime, ttl: Duration, now: OffsetDateTime) -> bool {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| updated_at.checked_add(ttl))
        .map_or(false, |deadline| deadline <= now)
}
