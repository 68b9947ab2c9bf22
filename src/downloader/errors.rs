// Error types for the download pipeline

use std::path::PathBuf;

use thiserror::Error;

use super::diagnostics::{diagnose_error, summarize, FailureReason};

#[derive(Debug, Error)]
pub enum DownloadError {
    /// yt-dlp or ffmpeg could not be located or fetched
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Request was missing a field or carried a bad value
    #[error("{0}")]
    InvalidRequest(String),

    /// URL could not be used at all
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command could not be spawned or waited on
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// The tool ran and reported a failure
    #[error("{}", .reason.with_details(details))]
    Extraction {
        reason: FailureReason,
        details: String,
    },

    /// The tool reported success but the output has no bytes
    #[error("Downloaded file is empty: {}", .0.display())]
    EmptyOutput(PathBuf),

    /// The tool reported success but never told us where the file went
    #[error("Download finished but no output file was reported")]
    MissingOutput,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DownloadError {
    /// Reason behind a tool failure, if this is one
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Extraction { reason, .. } => Some(*reason),
            Self::Timeout(_) => Some(FailureReason::Network),
            _ => None,
        }
    }

    /// Whether the caller (not the tool) is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::InvalidUrl(_))
            || matches!(
                self,
                Self::Extraction {
                    reason: FailureReason::UnsupportedUrl,
                    ..
                }
            )
    }

    /// Message stored on the job record
    pub fn job_message(&self) -> String {
        match self.reason().and_then(|r| r.hint()) {
            Some(hint) => format!("{} ({})", self, hint),
            None => self.to_string(),
        }
    }
}

// Raw stderr from the tool becomes a classified failure
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        match diagnose_error(&s) {
            Some(reason) => Self::Extraction {
                reason,
                details: summarize(reason, &s),
            },
            None => Self::ExecutionError("tool exited without output".to_string()),
        }
    }
}
