// Failure diagnostics - classifies yt-dlp / ffmpeg stderr
//
// The job record only carries a string, so the classification is used to
// put a readable reason in front of the raw tool output.

use serde::{Deserialize, Serialize};

/// Why the external tool gave up on a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No extractor matches the URL
    UnsupportedUrl,

    /// Deleted, removed for copyright, or otherwise gone
    Unavailable,

    /// Private video requiring authorization
    Private,

    /// Age gate requiring a logged-in session
    AgeRestricted,

    /// Not available from this country
    GeoBlocked,

    /// HTTP 429 or similar throttling
    RateLimited,

    /// HTTP 403, bot checks and friends
    Forbidden,

    /// Timeouts, refused connections, DNS failures
    Network,

    /// The requested format selector matched nothing
    FormatUnavailable,

    /// Merging or audio extraction needed ffmpeg and none was usable
    TranscoderMissing,

    /// Anything else
    Unknown,
}

impl FailureReason {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnsupportedUrl => "Unsupported URL",
            Self::Unavailable => "Video unavailable",
            Self::Private => "Private video",
            Self::AgeRestricted => "Age-restricted content",
            Self::GeoBlocked => "Not available in this region",
            Self::RateLimited => "Rate limited by the site",
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::Network => "Network error",
            Self::FormatUnavailable => "Requested format is not available",
            Self::TranscoderMissing => "ffmpeg is required but was not found",
            Self::Unknown => "Download failed",
        }
    }

    /// "Description: details", or the bare description when there are none
    pub fn with_details(&self, details: &str) -> String {
        if details.is_empty() {
            self.description().to_string()
        } else {
            format!("{}: {}", self.description(), details)
        }
    }

    /// Short hint for the client, if there is anything useful to say
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::FormatUnavailable => Some("Pick a lower quality or list formats again"),
            Self::RateLimited => Some("Wait a few minutes before retrying"),
            Self::Forbidden => Some("Retry later or configure a proxy"),
            Self::GeoBlocked => Some("Configure a proxy in an allowed region"),
            Self::Network => Some("Check connectivity and retry"),
            Self::TranscoderMissing => Some("Install ffmpeg or set --ffmpeg-path"),
            _ => None,
        }
    }
}

/// Analyze tool output and return the most specific reason
pub fn diagnose_error(error: &str) -> Option<FailureReason> {
    if error.trim().is_empty() {
        return None;
    }

    let lower = error.to_lowercase();

    // Checked in order of specificity

    if lower.contains("ffmpeg") || lower.contains("ffprobe") {
        if lower.contains("not found")
            || lower.contains("not installed")
            || lower.contains("no such file")
        {
            return Some(FailureReason::TranscoderMissing);
        }
    }

    if lower.contains("unsupported url") || lower.contains("is not a valid url") {
        return Some(FailureReason::UnsupportedUrl);
    }

    if lower.contains("requested format is not available")
        || lower.contains("no video formats found")
    {
        return Some(FailureReason::FormatUnavailable);
    }

    if lower.contains("private video") || lower.contains("video is private") {
        return Some(FailureReason::Private);
    }

    if lower.contains("sign in to confirm your age") || lower.contains("age-restricted") {
        return Some(FailureReason::AgeRestricted);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("no longer available")
        || lower.contains("http error 404")
    {
        return Some(FailureReason::Unavailable);
    }

    if lower.contains("not available in your country")
        || lower.contains("blocked in your country")
        || lower.contains("geo restriction")
        || lower.contains("geo-restricted")
    {
        return Some(FailureReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
        return Some(FailureReason::RateLimited);
    }

    if lower.contains("403")
        || lower.contains("forbidden")
        || lower.contains("confirm you're not a bot")
        || lower.contains("captcha")
    {
        return Some(FailureReason::Forbidden);
    }

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("network is unreachable")
        || lower.contains("name or service not known")
        || lower.contains("getaddrinfo failed")
    {
        return Some(FailureReason::Network);
    }

    Some(FailureReason::Unknown)
}

/// First line worth showing to a client: the `ERROR:` line if present,
/// otherwise the last non-empty line. Text that only repeats the reason's
/// description is dropped.
pub fn summarize(reason: FailureReason, error: &str) -> String {
    let line = error
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| error.lines().map(str::trim).rev().find(|l| !l.is_empty()))
        .unwrap_or("");
    let line = line.trim_start_matches("ERROR:").trim();

    let description = reason.description();
    let line = match line.get(..description.len()) {
        Some(head) if head.eq_ignore_ascii_case(description) => line[description.len()..]
            .trim_start_matches(|c: char| c == ':' || c == '.' || c.is_whitespace()),
        _ => line,
    };

    line.chars().take(300).collect()
}
