// Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::downloader::models::{DownloadMode, NetworkConfig};
use crate::downloader::tools::{default_data_dir, ToolSettings, DEFAULT_FFMPEG_URL};
use crate::ytdlp::{YtDlpSettings, DEFAULT_EXTRACTOR_ARGS, DEFAULT_USER_AGENT};

const CLI_AFTER_HELP: &str = "Examples:\n  yt-download-service serve --port 5000\n  yt-download-service fetch https://youtu.be/dQw4w9WgXcQ --quality 720p\n  yt-download-service fetch dQw4w9WgXcQ --mode audio_only --quality 192kbps\n  yt-download-service formats https://youtu.be/dQw4w9WgXcQ\n  yt-download-service search \"lofi hip hop\" --limit 10";

#[derive(Debug, Parser)]
#[command(
    name = "yt-download-service",
    version,
    about = "Job-based HTTP front-end for yt-dlp and ffmpeg",
    after_help = CLI_AFTER_HELP
)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    /// Defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service
    Serve,

    /// Download one URL into a local folder
    Fetch(FetchArgs),

    /// List the formats available for a URL
    Formats {
        /// Video URL or bare id
        url: String,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search for videos
    Search {
        query: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show where yt-dlp and ffmpeg were found
    Tools {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct FetchArgs {
    /// Video URL or bare id
    pub url: String,

    /// video_audio, video_only or audio_only
    #[arg(long, default_value = "video_audio")]
    pub mode: DownloadMode,

    /// Resolution ("720p") or audio bitrate ("192kbps")
    #[arg(long)]
    pub quality: Option<String>,

    /// Exact format id from `formats`
    #[arg(long)]
    pub format_id: Option<String>,

    /// Destination folder (default: the user's Downloads folder)
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,
}

/// Options shared by every command. Each one can also come from a
/// `YTDS_*` environment variable.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Address to bind the HTTP service to
    #[arg(long, env = "YTDS_HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    #[arg(long, env = "YTDS_PORT", default_value_t = 5000, global = true)]
    pub port: u16,

    /// Where service downloads are written
    #[arg(long, env = "YTDS_DOWNLOAD_DIR", default_value = "downloads", global = true)]
    pub download_dir: PathBuf,

    /// Seconds a finished job and its file are kept
    #[arg(long, env = "YTDS_JOB_TTL", default_value_t = 3600, global = true)]
    pub job_ttl: u64,

    /// Seconds between expiry sweeps
    #[arg(long, env = "YTDS_SWEEP_INTERVAL", default_value_t = 300, global = true)]
    pub sweep_interval: u64,

    /// Downloads allowed to run at once; later jobs wait
    #[arg(long, env = "YTDS_MAX_CONCURRENT", default_value_t = 4, global = true)]
    pub max_concurrent: usize,

    #[arg(long, env = "YTDS_YTDLP_PATH", global = true)]
    pub ytdlp_path: Option<PathBuf>,

    #[arg(long, env = "YTDS_FFMPEG_PATH", global = true)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Fetched when no ffmpeg is installed
    #[arg(long, env = "YTDS_FFMPEG_URL", default_value = DEFAULT_FFMPEG_URL, global = true)]
    pub ffmpeg_url: String,

    /// Never download ffmpeg
    #[arg(long, env = "YTDS_NO_FFMPEG_DOWNLOAD", global = true)]
    pub no_ffmpeg_download: bool,

    /// Holds the managed ffmpeg copy
    #[arg(long, env = "YTDS_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Proxy URL passed to yt-dlp (e.g. socks5://127.0.0.1:1080)
    #[arg(long, env = "YTDS_PROXY", global = true)]
    pub proxy: Option<String>,

    #[arg(long, env = "YTDS_SOCKET_TIMEOUT", default_value_t = 30, global = true)]
    pub socket_timeout: u32,

    #[arg(long, env = "YTDS_RETRIES", default_value_t = 5, global = true)]
    pub retries: u32,

    #[arg(long, env = "YTDS_FRAGMENT_RETRIES", default_value_t = 10, global = true)]
    pub fragment_retries: u32,

    #[arg(long, env = "YTDS_USER_AGENT", default_value = DEFAULT_USER_AGENT, global = true)]
    pub user_agent: String,

    /// Empty to use yt-dlp's own defaults
    #[arg(long, env = "YTDS_EXTRACTOR_ARGS", default_value = DEFAULT_EXTRACTOR_ARGS, global = true)]
    pub extractor_args: String,

    /// Seconds allowed for formats and search calls
    #[arg(long, env = "YTDS_METADATA_TIMEOUT", default_value_t = 60, global = true)]
    pub metadata_timeout: u64,

    /// Serve files from this directory for non-API paths
    #[arg(long, env = "YTDS_STATIC_DIR", global = true)]
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            proxy: self.proxy.clone().filter(|p| !p.trim().is_empty()),
            timeout: Some(self.socket_timeout).filter(|t| *t > 0),
            retries: self.retries,
            fragment_retries: self.fragment_retries,
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            ytdlp_path: self.ytdlp_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffmpeg_download_url: Some(self.ffmpeg_url.clone())
                .filter(|url| !self.no_ffmpeg_download && !url.trim().is_empty()),
            data_dir: self.data_dir.clone().unwrap_or_else(default_data_dir),
            ..ToolSettings::default()
        }
    }

    pub fn ytdlp_settings(&self) -> YtDlpSettings {
        YtDlpSettings {
            user_agent: self.user_agent.clone(),
            extractor_args: Some(self.extractor_args.clone()).filter(|a| !a.trim().is_empty()),
            network: self.network(),
            metadata_timeout_secs: self.metadata_timeout.max(1),
        }
    }
}
