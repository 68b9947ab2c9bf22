// Command-line front end: one-shot fetch, formats, search and tool status

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use uuid::Uuid;

use crate::config::FetchArgs;
use crate::downloader::models::{
    DownloadOptions, DownloadRequest, FormatsListing, ProgressUpdate, SearchResult,
};
use crate::downloader::orchestrator;
use crate::downloader::tools::{ToolInfo, ToolLocator};
use crate::downloader::traits::{MediaBackend, ProgressSink};
use crate::downloader::utils::{format_bytes, format_duration};
use crate::ytdlp::MAX_SEARCH_RESULTS;

/// Progress bar fed by the backend
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Downloading {
                percent,
                downloaded_bytes,
                total_bytes,
            } => {
                self.bar.set_position(percent.clamp(0.0, 100.0) as u64);
                self.bar.set_message(format!(
                    "{} / {}",
                    format_bytes(downloaded_bytes),
                    format_bytes(total_bytes)
                ));
            }
            ProgressUpdate::Processing { message } => self.bar.set_message(message),
        }
    }
}

/// Download one URL into `--output-dir` (or the user's Downloads folder)
pub async fn fetch(backend: &dyn MediaBackend, args: FetchArgs) -> Result<PathBuf> {
    let output_dir = args
        .output_dir
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let job_id = short_id();

    let request = DownloadRequest {
        url: Some(args.url),
        mode: Some(args.mode.as_str().to_string()),
        quality: args.quality,
        kind: None,
        format_id: args.format_id,
    };
    let options = DownloadOptions::from_request(job_id, request, output_dir)?;

    let progress = BarProgress::new()?;
    let result = orchestrator::execute(backend, &options, &progress).await;
    match &result {
        Ok(_) => progress.bar.finish_with_message("done"),
        Err(_) => progress.bar.abandon(),
    }
    let path = result.with_context(|| format!("download of {} failed", options.url))?;

    let saved = strip_job_prefix(&path, &options.file_prefix()).await;
    println!("{} {}", "saved".green().bold(), saved.display());
    Ok(saved)
}

/// Print the formats listing for a URL
pub async fn formats(backend: &dyn MediaBackend, url: &str, json: bool) -> Result<()> {
    let listing = backend.get_formats(url).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for line in format_table(&listing) {
            println!("{}", line);
        }
    }
    Ok(())
}

pub async fn search(backend: &dyn MediaBackend, query: &str, limit: usize, json: bool) -> Result<()> {
    let results = backend
        .search(query, limit.clamp(1, MAX_SEARCH_RESULTS))
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("{}", "no results".yellow());
    }
    for (index, result) in results.iter().enumerate() {
        println!("{}", search_line(index + 1, result));
    }
    Ok(())
}

pub async fn tools(locator: &ToolLocator, json: bool) -> Result<()> {
    let tools = locator.tool_info().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }
    for tool in &tools {
        println!("{}", tool_line(tool));
    }
    Ok(())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Drop the `{job_id}_` prefix from a finished download unless that would
/// overwrite an existing file.
async fn strip_job_prefix(path: &Path, prefix: &str) -> PathBuf {
    let Some(name) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(prefix))
        .filter(|n| !n.is_empty())
    else {
        return path.to_path_buf();
    };

    let target = path.with_file_name(name);
    if tokio::fs::try_exists(&target).await.unwrap_or(true) {
        return path.to_path_buf();
    }
    match tokio::fs::rename(path, &target).await {
        Ok(()) => target,
        Err(e) => {
            warn!("[cli] Could not rename {}: {}", path.display(), e);
            path.to_path_buf()
        }
    }
}

fn format_table(listing: &FormatsListing) -> Vec<String> {
    let mut lines = vec![listing.title.bold().to_string()];
    if let Some(duration) = listing.duration {
        lines.push(format!("Duration: {}", format_duration(duration)));
    }
    lines.push(String::new());
    lines.push(format!(
        "{:<8} {:<8} {:<5} {:<6} {:>12}  {}",
        "ID", "QUALITY", "EXT", "FPS", "SIZE", "NOTE"
    ));
    for format in &listing.formats {
        let fps = format
            .fps
            .map(|f| format!("{:.0}", f))
            .unwrap_or_else(|| "-".to_string());
        let note = if format.has_audio {
            format.note.clone()
        } else {
            format!("{} (video only)", format.note)
        };
        lines.push(format!(
            "{:<8} {:<8} {:<5} {:<6} {:>12}  {}",
            format.id,
            format.quality,
            format.ext,
            fps,
            format_bytes(format.filesize),
            note
        ));
    }
    if !listing.audio_formats.is_empty() {
        lines.push(String::new());
        lines.push(format!("Audio: {}", listing.audio_formats.join(", ")));
    }
    lines
}

fn search_line(position: usize, result: &SearchResult) -> String {
    let mut line = format!("{:>2}. {}", position, result.title.bold());
    if let Some(channel) = &result.channel {
        line.push_str(&format!(" - {}", channel));
    }
    if let Some(duration) = &result.duration {
        line.push_str(&format!(" [{}]", duration));
    }
    line.push_str(&format!("\n    {}", result.url.dimmed()));
    line
}

fn tool_line(tool: &ToolInfo) -> String {
    if tool.is_available {
        format!(
            "{:<7} {} {} ({})",
            tool.name,
            "found".green().bold(),
            tool.version.as_deref().unwrap_or("unknown version"),
            tool.path.as_deref().unwrap_or("?")
        )
    } else {
        format!("{:<7} {}", tool.name, "missing".red().bold())
    }
}
