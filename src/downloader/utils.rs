// Helper functions shared by the yt-dlp backend and the tool locator

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};

use super::errors::DownloadError;
use super::models::NetworkConfig;

/// Run a command to completion, killing it after `timeout_secs`.
///
/// Stdout and stderr are drained concurrently so a chatty tool cannot fill a
/// pipe and stall before it exits.
pub async fn run_output_with_timeout(
    program: &Path,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let name = program.display().to_string();
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DownloadError::ExecutionError(format!("Failed to start {}: {}", name, e)))?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", name))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", name))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });

    match timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout(timeout_secs))
        }
    }
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args
}

/// Build timeout and retry arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = config.timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args.push("--retries".to_string());
    args.push(config.retries.to_string());
    args.push("--fragment-retries".to_string());
    args.push(config.fragment_retries.to_string());

    args
}

/// Byte counts as "12.34 MB"; unknown sizes print as "? MB"
pub fn format_bytes(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format!("{:.2} MB", b as f64 / 1_048_576.0),
        None => "? MB".to_string(),
    }
}

/// Seconds as "m:ss" or "h:mm:ss"
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// First line of a tool's version output
pub fn first_line(output: &[u8]) -> Option<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
