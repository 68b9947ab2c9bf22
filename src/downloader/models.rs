// Common data models for the download pipeline

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::errors::DownloadError;
use super::utils::format_bytes;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Terminal jobs never change again and are eligible for expiry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What ends up in the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Best video merged with best audio into mp4
    #[default]
    VideoAudio,
    /// Video stream only, no audio
    VideoOnly,
    /// Audio extracted to mp3
    AudioOnly,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoAudio => "video_audio",
            Self::VideoOnly => "video_only",
            Self::AudioOnly => "audio_only",
        }
    }

    /// Accepts both request shapes: `mode` (`video_audio`, `video_only`,
    /// `audio_only`) and the shorter `type` (`audio`, `video`).
    pub fn from_request(mode: Option<&str>, kind: Option<&str>) -> Result<Self, DownloadError> {
        if let Some(mode) = mode.map(str::trim).filter(|m| !m.is_empty()) {
            return mode.parse();
        }

        match kind.map(|k| k.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("video") => Ok(Self::VideoAudio),
            Some("audio") => Ok(Self::AudioOnly),
            Some(other) => Err(DownloadError::InvalidRequest(format!(
                "Unknown download type: {}",
                other
            ))),
        }
    }

    /// Merging and audio extraction both go through ffmpeg
    pub fn needs_transcoder(&self) -> bool {
        matches!(self, Self::VideoAudio | Self::AudioOnly)
    }
}

impl std::str::FromStr for DownloadMode {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video_audio" | "video+audio" | "both" => Ok(Self::VideoAudio),
            "video_only" | "video" => Ok(Self::VideoOnly),
            "audio_only" | "audio" => Ok(Self::AudioOnly),
            other => Err(DownloadError::InvalidRequest(format!(
                "Unknown download mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested quality, parsed leniently from labels like "1080p" or "192kbps"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    /// No limit
    #[default]
    Best,
    /// Maximum video height in pixels
    Height(u32),
    /// Target audio bitrate in kbps
    Bitrate(u32),
}

impl Quality {
    /// Unparseable labels mean "no limit" rather than an error
    pub fn parse(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.is_empty() || lower == "best" {
            return Self::Best;
        }

        if let Some(kbps) = lower.strip_suffix("kbps").or_else(|| lower.strip_suffix('k')) {
            return kbps.trim().parse().map(Self::Bitrate).unwrap_or(Self::Best);
        }

        let digits = lower.strip_suffix('p').unwrap_or(&lower);
        digits.trim().parse().map(Self::Height).unwrap_or(Self::Best)
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Self::Height(h) => Some(*h),
            _ => None,
        }
    }

    pub fn bitrate(&self) -> Option<u32> {
        match self {
            Self::Bitrate(b) => Some(*b),
            _ => None,
        }
    }
}

/// Body of a start-download request (both client variants)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    pub url: Option<String>,
    pub mode: Option<String>,
    pub quality: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub format_id: Option<String>,
}

/// Validated download parameters handed to a backend
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub job_id: String,
    pub url: String,
    pub mode: DownloadMode,
    pub quality: Quality,
    pub format_id: Option<String>,
    pub output_dir: PathBuf,
}

impl DownloadOptions {
    pub fn from_request(
        job_id: String,
        request: DownloadRequest,
        output_dir: PathBuf,
    ) -> Result<Self, DownloadError> {
        let url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DownloadError::InvalidRequest("URL is required".to_string()))?;

        let mode = DownloadMode::from_request(request.mode.as_deref(), request.kind.as_deref())?;
        let quality = request
            .quality
            .as_deref()
            .map(Quality::parse)
            .unwrap_or_default();
        let format_id = request
            .format_id
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        Ok(Self {
            job_id,
            url: normalize_url(url)?,
            mode,
            quality,
            format_id,
            output_dir,
        })
    }

    /// Every file the tool writes for this job starts with this prefix
    pub fn file_prefix(&self) -> String {
        format!("{}_", self.job_id)
    }
}

/// Bare video ids become full watch URLs. Other schemes and ids with
/// characters no video id carries are rejected.
pub fn normalize_url(url_or_id: &str) -> Result<String, DownloadError> {
    let trimmed = url_or_id.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let host = trimmed.split_once("://").map_or("", |(_, rest)| rest);
        if host.is_empty() || host.starts_with('/') || trimmed.chars().any(char::is_whitespace) {
            return Err(DownloadError::InvalidUrl(trimmed.to_string()));
        }
        return Ok(trimmed.to_string());
    }

    let is_id = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !is_id {
        return Err(DownloadError::InvalidUrl(trimmed.to_string()));
    }
    Ok(format!("https://www.youtube.com/watch?v={}", trimmed))
}

/// One tracked download request
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub mode: DownloadMode,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
    pub filename: Option<String>,
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    pub fn new(id: String, url: String, mode: DownloadMode) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            url,
            mode,
            status: JobStatus::Starting,
            progress: 0.0,
            message: "Initializing...".to_string(),
            filename: None,
            file_path: None,
            error: None,
            downloaded_bytes: None,
            total_bytes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of a status query: the job plus the keys the bundled web page reads
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: Job,
    /// Same as `message`
    pub text: String,
    /// "12.00 MB", or "? MB" while unknown
    pub downloaded_mb: String,
    pub total_mb: String,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            text: job.message.clone(),
            downloaded_mb: format_bytes(job.downloaded_bytes),
            total_mb: format_bytes(job.total_bytes),
            job,
        }
    }
}

/// Format descriptor as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub id: String,
    pub ext: String,
    /// "1080p"
    pub quality: String,
    pub height: u32,
    pub fps: Option<f32>,
    pub note: String,
    /// Exact or approximate size in bytes
    pub filesize: Option<u64>,
    pub has_audio: bool,
}

/// Everything a client needs to pick a quality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsListing {
    pub title: String,
    pub thumbnail: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub formats: Vec<FormatDescriptor>,
    /// Distinct resolutions, highest first ("1080p", "720p", ...)
    pub video_formats: Vec<String>,
    /// Distinct audio bitrates, highest first ("160kbps", ...)
    pub audio_formats: Vec<String>,
}

/// Search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<String>,
    pub url: String,
}

/// Progress reported by a backend while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Downloading {
        percent: f32,
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    },
    /// Merging, remuxing or extracting audio
    Processing { message: String },
}

/// Network pass-through options for the tool
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Socket timeout in seconds
    pub timeout: Option<u32>,

    pub retries: u32,
    pub fragment_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
            retries: 5,
            fragment_retries: 10,
        }
    }
}
