// Tool locator - finds yt-dlp and ffmpeg, fetching ffmpeg on demand

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::errors::DownloadError;
use super::utils::{first_line, run_output_with_timeout};

/// Static ffmpeg build fetched when nothing is installed (linux x64)
pub const DEFAULT_FFMPEG_URL: &str =
    "https://github.com/eugeneware/ffmpeg-static/releases/download/b6.0/ffmpeg-linux-x64";

const VERSION_TIMEOUT_SECS: u64 = 10;
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

/// Where a binary was found
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Configured,
    Bundled,
    System,
    Path,
    Managed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub source: Option<ToolSource>,
    pub is_available: bool,
}

/// Lookup settings, usually built from the CLI config
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    /// None disables the just-in-time ffmpeg download
    pub ffmpeg_download_url: Option<String>,
    /// Holds the managed ffmpeg copy under `bin/`
    pub data_dir: PathBuf,
    /// Directories shipped next to the service (`./ffmpeg`, `./bin`)
    pub bundled_dirs: Vec<PathBuf>,
    /// Package-manager install locations
    pub system_dirs: Vec<PathBuf>,
    /// Also ask `which`
    pub search_path: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            ffmpeg_download_url: Some(DEFAULT_FFMPEG_URL.to_string()),
            data_dir: default_data_dir(),
            bundled_dirs: vec![PathBuf::from("ffmpeg"), PathBuf::from("bin")],
            system_dirs: vec![
                PathBuf::from("/opt/homebrew/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/usr/bin"),
            ],
            search_path: true,
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("yt-download-service")
}

/// Resolves tool binaries once and remembers the answer
pub struct ToolLocator {
    settings: ToolSettings,
    ytdlp: OnceCell<PathBuf>,
    ffmpeg: OnceCell<PathBuf>,
}

impl ToolLocator {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            settings,
            ytdlp: OnceCell::new(),
            ffmpeg: OnceCell::new(),
        }
    }

    pub async fn locate_ytdlp(&self) -> Result<PathBuf, DownloadError> {
        self.ytdlp
            .get_or_try_init(|| async {
                let (path, source) = self.find_installed(ToolType::YtDlp).await?.ok_or_else(|| {
                    DownloadError::ToolNotFound(
                        "yt-dlp is not installed. Install it with `pip install yt-dlp` or set --ytdlp-path"
                            .to_string(),
                    )
                })?;
                info!("[tools] yt-dlp: {} ({:?})", path.display(), source);
                Ok::<PathBuf, DownloadError>(path)
            })
            .await
            .cloned()
    }

    /// Installed copy first; otherwise download one into the data dir
    pub async fn locate_ffmpeg(&self) -> Result<PathBuf, DownloadError> {
        self.ffmpeg
            .get_or_try_init(|| async {
                if let Some((path, source)) = self.find_installed(ToolType::Ffmpeg).await? {
                    info!("[tools] ffmpeg: {} ({:?})", path.display(), source);
                    return Ok(path);
                }

                let url = self.settings.ffmpeg_download_url.as_deref().ok_or_else(|| {
                    DownloadError::ToolNotFound(
                        "ffmpeg is not installed and automatic download is disabled".to_string(),
                    )
                })?;
                let dest = self.managed_path(ToolType::Ffmpeg);
                download_binary(url, &dest).await.map_err(|e| {
                    warn!("[tools] ffmpeg download failed: {}", e);
                    DownloadError::ToolNotFound(format!("ffmpeg could not be downloaded: {}", e))
                })?;
                info!("[tools] ffmpeg downloaded to {}", dest.display());
                Ok::<PathBuf, DownloadError>(dest)
            })
            .await
            .cloned()
    }

    /// Search every location except the network. A configured path that does
    /// not exist is an error rather than a reason to look elsewhere.
    pub async fn find_installed(
        &self,
        tool: ToolType,
    ) -> Result<Option<(PathBuf, ToolSource)>, DownloadError> {
        let configured = match tool {
            ToolType::YtDlp => self.settings.ytdlp_path.as_ref(),
            ToolType::Ffmpeg => self.settings.ffmpeg_path.as_ref(),
        };
        if let Some(path) = configured {
            if path.is_file() {
                return Ok(Some((path.clone(), ToolSource::Configured)));
            }
            return Err(DownloadError::ToolNotFound(format!(
                "{} not found at configured path {}",
                tool.as_str(),
                path.display()
            )));
        }

        let binary = tool.binary_name();

        // 1. Shipped next to the service
        for dir in &self.settings.bundled_dirs {
            let candidate = dir.join(&binary);
            if candidate.is_file() {
                return Ok(Some((candidate, ToolSource::Bundled)));
            }
        }

        // 2. Common install paths
        for dir in &self.settings.system_dirs {
            let candidate = dir.join(&binary);
            if candidate.is_file() {
                return Ok(Some((candidate, ToolSource::System)));
            }
        }

        // 3. PATH
        if self.settings.search_path {
            if let Some(path) = which(&binary).await {
                return Ok(Some((path, ToolSource::Path)));
            }
        }

        // 4. Copy fetched by an earlier run
        let managed = self.managed_path(tool);
        if managed.is_file() {
            return Ok(Some((managed, ToolSource::Managed)));
        }

        Ok(None)
    }

    fn managed_path(&self, tool: ToolType) -> PathBuf {
        self.settings.data_dir.join("bin").join(tool.binary_name())
    }

    /// Status of both tools without downloading anything
    pub async fn tool_info(&self) -> Vec<ToolInfo> {
        let mut tools = Vec::new();
        for tool in [ToolType::YtDlp, ToolType::Ffmpeg] {
            let found = match self.find_installed(tool).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("[tools] {}", e);
                    None
                }
            };
            let version = match &found {
                Some((path, _)) => get_version(path, tool).await,
                None => None,
            };
            tools.push(ToolInfo {
                name: tool.as_str().to_string(),
                tool_type: tool,
                version,
                path: found.as_ref().map(|(p, _)| p.display().to_string()),
                source: found.as_ref().map(|(_, s)| *s),
                is_available: found.is_some(),
            });
        }
        tools
    }
}

async fn which(binary: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = run_output_with_timeout(Path::new(finder), vec![binary.to_string()], VERSION_TIMEOUT_SECS)
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    first_line(&output.stdout).map(PathBuf::from)
}

async fn get_version(path: &Path, tool: ToolType) -> Option<String> {
    let output = run_output_with_timeout(path, vec![tool.version_arg().to_string()], VERSION_TIMEOUT_SECS)
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = first_line(&output.stdout)?;
    // "ffmpeg version 6.0-static https://..." -> "6.0-static"
    match line.strip_prefix("ffmpeg version ") {
        Some(rest) => rest.split_whitespace().next().map(str::to_string),
        None => Some(line),
    }
}

/// Fetch a binary to `dest` and mark it executable
async fn download_binary(url: &str, dest: &Path) -> Result<(), DownloadError> {
    info!("[tools] Downloading {}", url);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()?;
    let bytes = client.get(url).send().await?.error_for_status()?.bytes().await?;
    if bytes.is_empty() {
        return Err(DownloadError::EmptyOutput(dest.to_path_buf()));
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Write beside the target so a half-written file is never picked up
    let partial = dest.with_extension("part");
    tokio::fs::write(&partial, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755)).await?;
    }

    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}
