// Progress adapter - turns yt-dlp output lines into job updates
//
// yt-dlp is asked for a machine-readable progress template (see
// DOWNLOAD_PROGRESS_TEMPLATE). Human-readable `[download]` lines are still
// understood so older builds and unusual extractors keep reporting.

use std::path::PathBuf;

use regex::Regex;

use super::models::{Job, JobStatus, ProgressUpdate};
use super::registry::JobRegistry;
use super::traits::ProgressSink;
use super::utils::format_bytes;

/// `[progress] status|downloaded|total|estimate|percent`, missing fields print as NA
pub const DOWNLOAD_PROGRESS_TEMPLATE: &str = "download:[progress] %(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress._percent_str)s";

/// `[processing] postprocessor|status`
pub const POSTPROCESS_PROGRESS_TEMPLATE: &str =
    "postprocess:[processing] %(progress.postprocessor)s|%(progress.status)s";

/// Printed once the final file is in place
pub const OUTPUT_FILE_TEMPLATE: &str = "after_move:[file] %(filepath)s";

const FILE_MARKER: &str = "[file] ";

/// What a single line of tool output means to us
#[derive(Debug, Clone, PartialEq)]
pub enum ToolLine {
    Progress(ProgressUpdate),
    OutputFile(PathBuf),
}

lazy_static::lazy_static! {
    static ref ANSI_RE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
    static ref TEMPLATE_RE: Regex = Regex::new(
        r"^\[progress\]\s*([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|(.*)$"
    ).unwrap();
    static ref POSTPROCESS_RE: Regex = Regex::new(r"^\[processing\]\s*([^|]*)\|(.*)$").unwrap();
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref HUMAN_RE: Regex = Regex::new(
        r"\[download\]\s+(\S+)%\s+of\s+~?\s*(\d+\.?\d*\s*[KMGT]?i?B)"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref PROCESSING_RE: Regex = Regex::new(
        r"^\[(Merger|ExtractAudio|VideoConvertor|VideoRemuxer|FixupM3u8|FixupM4a)\]"
    ).unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

/// Percent strings like " 42.5%", "\x1b[0;94m 42.5%\x1b[0m" or "Unknown %".
/// Anything that is not a number counts as 0.
pub fn parse_percent(raw: &str) -> f32 {
    let cleaned = ANSI_RE.replace_all(raw, "");
    cleaned
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

/// Percent from whatever the tool managed to report: the percent string
/// first, then downloaded/total, then downloaded/estimate, else 0.
pub fn resolve_percent(
    percent: Option<&str>,
    downloaded: Option<u64>,
    total: Option<u64>,
    estimate: Option<u64>,
) -> f32 {
    let from_string = percent.map(parse_percent).filter(|p| *p > 0.0);
    if let Some(p) = from_string {
        return p;
    }

    match (downloaded, total.or(estimate)) {
        (Some(done), Some(all)) if all > 0 => ((done as f64 / all as f64) * 100.0).clamp(0.0, 100.0) as f32,
        _ => 0.0,
    }
}

/// Numeric template fields: "NA", "None" and garbage become None
fn parse_bytes_field(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|b| b.is_finite() && *b >= 0.0)
        .map(|b| b as u64)
}

/// "310.04MiB" -> bytes
fn parse_human_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Parse one line of yt-dlp output
pub fn parse_tool_line(line: &str) -> Option<ToolLine> {
    let line = ANSI_RE.replace_all(line.trim_end(), "");
    let line = line.trim_start();

    if let Some(path) = line.strip_prefix(FILE_MARKER) {
        let path = path.trim();
        if path.is_empty() || path == "NA" {
            return None;
        }
        return Some(ToolLine::OutputFile(PathBuf::from(path)));
    }

    if let Some(caps) = TEMPLATE_RE.captures(line) {
        let status = caps.get(1).map_or("", |m| m.as_str().trim());
        if status == "finished" {
            return Some(ToolLine::Progress(ProgressUpdate::Processing {
                message: "Processing and merging files...".to_string(),
            }));
        }
        if status == "error" {
            return None;
        }

        let downloaded = caps.get(2).and_then(|m| parse_bytes_field(m.as_str()));
        let total = caps.get(3).and_then(|m| parse_bytes_field(m.as_str()));
        let estimate = caps.get(4).and_then(|m| parse_bytes_field(m.as_str()));
        let percent = resolve_percent(caps.get(5).map(|m| m.as_str()), downloaded, total, estimate);

        return Some(ToolLine::Progress(ProgressUpdate::Downloading {
            percent,
            downloaded_bytes: downloaded,
            total_bytes: total.or(estimate),
        }));
    }

    if let Some(caps) = POSTPROCESS_RE.captures(line) {
        let name = caps.get(1).map_or("", |m| m.as_str().trim());
        let message = if name.is_empty() || name == "NA" {
            "Processing...".to_string()
        } else {
            format!("Processing: {}", name)
        };
        return Some(ToolLine::Progress(ProgressUpdate::Processing { message }));
    }

    if let Some(caps) = HUMAN_RE.captures(line) {
        let percent = parse_percent(caps.get(1).map_or("", |m| m.as_str()));
        let total = caps.get(2).and_then(|m| parse_human_size(m.as_str()));
        let downloaded = total.map(|t| (t as f64 * percent as f64 / 100.0) as u64);
        return Some(ToolLine::Progress(ProgressUpdate::Downloading {
            percent,
            downloaded_bytes: downloaded,
            total_bytes: total,
        }));
    }

    if DEST_RE.is_match(line) {
        return Some(ToolLine::Progress(ProgressUpdate::Downloading {
            percent: 0.0,
            downloaded_bytes: None,
            total_bytes: None,
        }));
    }

    if let Some(caps) = PROCESSING_RE.captures(line) {
        let stage = caps.get(1).map_or("", |m| m.as_str());
        return Some(ToolLine::Progress(ProgressUpdate::Processing {
            message: format!("Processing: {}", stage),
        }));
    }

    if ALREADY_RE.is_match(line) {
        return Some(ToolLine::Progress(ProgressUpdate::Downloading {
            percent: 100.0,
            downloaded_bytes: None,
            total_bytes: None,
        }));
    }

    None
}

/// Apply a progress update to a job record. Terminal jobs are left alone.
/// Postprocessing only starts once every stream is downloaded, so it counts as 100%.
pub fn apply_update(job: &mut Job, update: ProgressUpdate) {
    if job.status.is_terminal() {
        return;
    }

    match update {
        ProgressUpdate::Downloading {
            percent,
            downloaded_bytes,
            total_bytes,
        } => {
            job.status = JobStatus::Downloading;
            job.progress = percent;
            job.downloaded_bytes = downloaded_bytes.or(job.downloaded_bytes);
            job.total_bytes = total_bytes.or(job.total_bytes);
            job.message = format!(
                "Downloading: {:.1}% ({} of {})",
                percent,
                format_bytes(job.downloaded_bytes),
                format_bytes(job.total_bytes)
            );
        }
        ProgressUpdate::Processing { message } => {
            job.status = JobStatus::Processing;
            job.progress = 100.0;
            job.message = message;
        }
    }
}

/// Sink that writes straight into the registry entry of one job
pub struct JobProgress {
    registry: JobRegistry,
    job_id: String,
}

impl JobProgress {
    pub fn new(registry: JobRegistry, job_id: String) -> Self {
        Self { registry, job_id }
    }
}

impl ProgressSink for JobProgress {
    fn report(&self, update: ProgressUpdate) {
        self.registry.update(&self.job_id, |job| apply_update(job, update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::DownloadMode;

    #[test]
    fn test_parse_percent_tolerates_garbage() {
        assert_eq!(parse_percent(" 42.5%"), 42.5);
        assert_eq!(parse_percent("\x1b[0;94m 12.0%\x1b[0m"), 12.0);
        assert_eq!(parse_percent("Unknown %"), 0.0);
        assert_eq!(parse_percent("NA"), 0.0);
        assert_eq!(parse_percent(""), 0.0);
        assert_eq!(parse_percent("250%"), 100.0);
    }

    #[test]
    fn test_resolve_percent_falls_back_to_bytes() {
        assert_eq!(resolve_percent(Some("NA"), Some(50), Some(200), None), 25.0);
        assert_eq!(resolve_percent(Some("NA"), Some(50), None, Some(100)), 50.0);
        assert_eq!(resolve_percent(None, Some(50), None, None), 0.0);
        assert_eq!(resolve_percent(None, Some(50), Some(0), None), 0.0);
        assert_eq!(resolve_percent(Some("10.0%"), Some(50), Some(100), None), 10.0);
    }

    #[test]
    fn test_template_line() {
        let line = "[progress] downloading|1048576|4194304|NA| 25.0%";
        assert_eq!(
            parse_tool_line(line),
            Some(ToolLine::Progress(ProgressUpdate::Downloading {
                percent: 25.0,
                downloaded_bytes: Some(1_048_576),
                total_bytes: Some(4_194_304),
            }))
        );
    }

    #[test]
    fn test_template_line_with_only_estimate() {
        let line = "[progress] downloading|500|NA|1000.0|NA";
        assert_eq!(
            parse_tool_line(line),
            Some(ToolLine::Progress(ProgressUpdate::Downloading {
                percent: 50.0,
                downloaded_bytes: Some(500),
                total_bytes: Some(1000),
            }))
        );
    }

    #[test]
    fn test_template_finished_means_processing() {
        let line = "[progress] finished|4194304|4194304|NA|100.0%";
        assert!(matches!(
            parse_tool_line(line),
            Some(ToolLine::Progress(ProgressUpdate::Processing { .. }))
        ));
    }

    #[test]
    fn test_human_line() {
        let line = "[download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)";
        match parse_tool_line(line) {
            Some(ToolLine::Progress(ProgressUpdate::Downloading {
                percent,
                total_bytes,
                ..
            })) => {
                assert_eq!(percent, 12.5);
                assert_eq!(total_bytes, Some((310.04 * 1024.0 * 1024.0) as u64));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_output_file_and_processing_lines() {
        assert_eq!(
            parse_tool_line("[file] /tmp/downloads/abc_Song.mp3"),
            Some(ToolLine::OutputFile(PathBuf::from("/tmp/downloads/abc_Song.mp3")))
        );
        assert_eq!(parse_tool_line("[file] NA"), None);
        assert!(matches!(
            parse_tool_line("[Merger] Merging formats into \"x.mp4\""),
            Some(ToolLine::Progress(ProgressUpdate::Processing { .. }))
        ));
        assert!(matches!(
            parse_tool_line("[processing] FFmpegExtractAudio|started"),
            Some(ToolLine::Progress(ProgressUpdate::Processing { .. }))
        ));
        assert_eq!(parse_tool_line("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn test_apply_update_sets_status_and_message() {
        let mut job = Job::new("j".to_string(), "u".to_string(), DownloadMode::VideoAudio);
        apply_update(
            &mut job,
            ProgressUpdate::Downloading {
                percent: 42.0,
                downloaded_bytes: Some(1_048_576),
                total_bytes: None,
            },
        );
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 42.0);
        assert_eq!(job.message, "Downloading: 42.0% (1.00 MB of ? MB)");

        apply_update(
            &mut job,
            ProgressUpdate::Processing {
                message: "Processing: Merger".to_string(),
            },
        );
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_apply_update_ignores_terminal_jobs() {
        let mut job = Job::new("j".to_string(), "u".to_string(), DownloadMode::VideoAudio);
        job.status = JobStatus::Completed;
        job.progress = 100.0;
        apply_update(
            &mut job,
            ProgressUpdate::Downloading {
                percent: 3.0,
                downloaded_bytes: None,
                total_bytes: None,
            },
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn test_job_progress_sink_updates_registry() {
        let registry = JobRegistry::new();
        registry
            .create("j1".to_string(), "u".to_string(), DownloadMode::AudioOnly)
            .unwrap();
        let sink = JobProgress::new(registry.clone(), "j1".to_string());
        sink.report(ProgressUpdate::Downloading {
            percent: 7.5,
            downloaded_bytes: None,
            total_bytes: None,
        });
        let job = registry.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 7.5);
    }
}
