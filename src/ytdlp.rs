// yt-dlp backend - builds argument vectors, runs the tool and reads its output

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::downloader::format_selector::{FormatSelector, RawVideoInfo};
use crate::downloader::models::{DownloadOptions, FormatsListing, NetworkConfig, SearchResult};
use crate::downloader::progress::{
    parse_tool_line, ToolLine, DOWNLOAD_PROGRESS_TEMPLATE, OUTPUT_FILE_TEMPLATE,
    POSTPROCESS_PROGRESS_TEMPLATE,
};
use crate::downloader::tools::{ToolLocator, ToolType};
use crate::downloader::traits::{MediaBackend, ProgressSink};
use crate::downloader::utils::{format_duration, get_proxy_args, get_timeout_args, run_output_with_timeout};
use crate::downloader::DownloadError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_EXTRACTOR_ARGS: &str = "youtube:player_client=android_vr,ios";

/// Search results are capped at this many entries
pub const MAX_SEARCH_RESULTS: usize = 25;

/// Stderr lines kept for the failure message
const STDERR_TAIL: usize = 50;

/// Pass-through options for every yt-dlp invocation
#[derive(Debug, Clone)]
pub struct YtDlpSettings {
    pub user_agent: String,
    /// `--extractor-args` value, None to leave yt-dlp's defaults
    pub extractor_args: Option<String>,
    pub network: NetworkConfig,
    /// Limit for formats and search calls
    pub metadata_timeout_secs: u64,
}

impl Default for YtDlpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extractor_args: Some(DEFAULT_EXTRACTOR_ARGS.to_string()),
            network: NetworkConfig::default(),
            metadata_timeout_secs: 60,
        }
    }
}

pub struct YtDlpBackend {
    tools: Arc<ToolLocator>,
    settings: YtDlpSettings,
}

impl YtDlpBackend {
    pub fn new(tools: Arc<ToolLocator>, settings: YtDlpSettings) -> Self {
        Self { tools, settings }
    }

    /// Flags shared by metadata and download calls
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
            "--user-agent".to_string(),
            self.settings.user_agent.clone(),
        ];
        if let Some(extractor_args) = &self.settings.extractor_args {
            args.push("--extractor-args".to_string());
            args.push(extractor_args.clone());
        }
        args.extend(get_proxy_args(&self.settings.network));
        args.extend(get_timeout_args(&self.settings.network));
        args
    }

    pub fn formats_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.common_args());
        args.push(url.to_string());
        args
    }

    pub fn search_args(&self, query: &str, limit: usize) -> Vec<String> {
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);
        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
        ];
        args.extend(self.common_args());
        args.push(format!("ytsearch{}:{}", limit, query));
        args
    }

    /// Everything needed to download `options` into its output dir.
    /// `ffmpeg` is passed through as `--ffmpeg-location` when known.
    pub fn download_args(&self, options: &DownloadOptions, ffmpeg: Option<&Path>) -> Vec<String> {
        let template = options
            .output_dir
            .join(format!("{}%(title)s.%(ext)s", options.file_prefix()));

        let mut args = vec![
            "-f".to_string(),
            FormatSelector::format_spec(options.mode, options.quality, options.format_id.as_deref()),
            "-o".to_string(),
            template.display().to_string(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--windows-filenames".to_string(),
            // --print implies --quiet; keep the progress lines coming
            "--progress".to_string(),
            "--progress-template".to_string(),
            DOWNLOAD_PROGRESS_TEMPLATE.to_string(),
            "--progress-template".to_string(),
            POSTPROCESS_PROGRESS_TEMPLATE.to_string(),
            "--print".to_string(),
            OUTPUT_FILE_TEMPLATE.to_string(),
        ];
        args.extend(FormatSelector::postprocess_args(options.mode, options.quality));
        if let Some(ffmpeg) = ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.display().to_string());
        }
        args.extend(self.common_args());
        args.push(options.url.clone());
        args
    }

    /// Run a metadata call and hand back stdout, or the classified failure
    async fn run_metadata(&self, args: Vec<String>) -> Result<Vec<u8>, DownloadError> {
        let ytdlp = self.tools.locate_ytdlp().await?;
        let output = run_output_with_timeout(&ytdlp, args, self.settings.metadata_timeout_secs).await?;
        if !output.status.success() {
            return Err(DownloadError::from(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(output.stdout)
    }

    /// ffmpeg is mandatory for merging and audio extraction, optional otherwise
    async fn transcoder_for(&self, options: &DownloadOptions) -> Result<Option<PathBuf>, DownloadError> {
        if options.mode.needs_transcoder() {
            return self.tools.locate_ffmpeg().await.map(Some);
        }
        match self.tools.find_installed(ToolType::Ffmpeg).await {
            Ok(found) => Ok(found.map(|(path, _)| path)),
            Err(e) => {
                warn!("[yt-dlp] {}", e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, DownloadError> {
        info!("[yt-dlp] Searching: {}", query);
        let stdout = self.run_metadata(self.search_args(query, limit)).await?;
        parse_search(&stdout)
    }

    async fn get_formats(&self, url: &str) -> Result<FormatsListing, DownloadError> {
        info!("[yt-dlp] Fetching formats: {}", url);
        let stdout = self.run_metadata(self.formats_args(url)).await?;
        parse_formats(&stdout)
    }

    async fn download(
        &self,
        options: &DownloadOptions,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf, DownloadError> {
        let ytdlp = self.tools.locate_ytdlp().await?;
        let ffmpeg = self.transcoder_for(options).await?;
        let args = self.download_args(options, ffmpeg.as_deref());

        info!("[yt-dlp] Job {}: starting {}", options.job_id, options.url);
        debug!("[yt-dlp] args: {:?}", args);

        let mut child = Command::new(&ytdlp)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::ExecutionError(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        // yt-dlp goes quiet under --print, which moves progress to stderr.
        // Both streams are read together so neither pipe fills up.
        let mut state = OutputState::default();
        let mut out = BufReader::new(stdout);
        let mut err = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_open = true;
        let mut err_open = true;
        while out_open || err_open {
            tokio::select! {
                read = out.read_until(b'\n', &mut out_buf), if out_open => {
                    match read {
                        Ok(0) => {
                            // unterminated tail left by a read the other branch cancelled
                            if !out_buf.is_empty() {
                                state.handle(&out_buf, false, progress);
                            }
                            out_open = false;
                        }
                        Ok(_) => state.handle(&out_buf, false, progress),
                        Err(e) => {
                            warn!("[yt-dlp] stdout read failed: {}", e);
                            out_open = false;
                        }
                    }
                    out_buf.clear();
                }
                read = err.read_until(b'\n', &mut err_buf), if err_open => {
                    match read {
                        Ok(0) => {
                            if !err_buf.is_empty() {
                                state.handle(&err_buf, true, progress);
                            }
                            err_open = false;
                        }
                        Ok(_) => state.handle(&err_buf, true, progress),
                        Err(e) => {
                            warn!("[yt-dlp] stderr read failed: {}", e);
                            err_open = false;
                        }
                    }
                    err_buf.clear();
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!("[yt-dlp] Job {} exited with {}", options.job_id, status);
            return Err(DownloadError::from(state.stderr_tail()));
        }

        match state.output_file {
            Some(path) => Ok(path),
            None => find_output(&options.output_dir, &options.file_prefix())
                .await
                .ok_or(DownloadError::MissingOutput),
        }
    }
}

/// What the download loop has learned from the tool's output so far
#[derive(Default)]
struct OutputState {
    output_file: Option<PathBuf>,
    /// Last non-progress stderr lines, for the failure message
    tail: VecDeque<String>,
}

impl OutputState {
    fn handle(&mut self, raw: &[u8], from_stderr: bool, progress: &dyn ProgressSink) {
        let line = String::from_utf8_lossy(raw);
        match parse_tool_line(&line) {
            Some(ToolLine::Progress(update)) => progress.report(update),
            Some(ToolLine::OutputFile(path)) => {
                debug!("[yt-dlp] output: {}", path.display());
                self.output_file = Some(path);
            }
            None => {
                let line = line.trim_end();
                if line.is_empty() {
                    return;
                }
                if !from_stderr {
                    debug!("[yt-dlp] {}", line);
                    return;
                }
                debug!("[yt-dlp] stderr: {}", line);
                if self.tail.len() == STDERR_TAIL {
                    self.tail.pop_front();
                }
                self.tail.push_back(line.to_string());
            }
        }
    }

    fn stderr_tail(&self) -> String {
        self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// When the tool did not print the final path, take the newest finished
/// file carrying the job prefix.
pub async fn find_output(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        if best.as_ref().map_or(true, |(t, _)| modified >= *t) {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, path)| path)
}

/// `--dump-json` output -> listing
pub fn parse_formats(stdout: &[u8]) -> Result<FormatsListing, DownloadError> {
    // yt-dlp may pretty-print or emit several objects; the first one wins
    let info: RawVideoInfo = serde_json::Deserializer::from_slice(stdout)
        .into_iter::<RawVideoInfo>()
        .next()
        .ok_or_else(|| DownloadError::ParseError("yt-dlp returned no video info".to_string()))?
        .map_err(|e| DownloadError::ParseError(format!("Failed to parse video info: {}", e)))?;
    Ok(FormatSelector::build_listing(info))
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// `--flat-playlist --dump-single-json` output -> results
pub fn parse_search(stdout: &[u8]) -> Result<Vec<SearchResult>, DownloadError> {
    let page: SearchPage = serde_json::from_slice(stdout)
        .map_err(|e| DownloadError::ParseError(format!("Failed to parse search results: {}", e)))?;

    Ok(page
        .entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id?;
            let url = entry
                .url
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));
            let thumbnail = entry
                .thumbnail
                .or_else(|| entry.thumbnails.into_iter().last().map(|t| t.url));
            Some(SearchResult {
                title: entry.title.unwrap_or_else(|| "Untitled".to_string()),
                thumbnail,
                channel: entry.channel.or(entry.uploader),
                duration: entry.duration.map(format_duration),
                url,
                id,
            })
        })
        .collect())
}
