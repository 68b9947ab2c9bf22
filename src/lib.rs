pub mod api;
pub mod cli;
pub mod config;
pub mod downloader;
pub mod ytdlp;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use api::AppState;
use config::{Cli, Command, Config};
use downloader::sweeper::spawn_sweeper;
use downloader::tools::ToolLocator;
use downloader::traits::MediaBackend;
use downloader::{Dispatcher, JobRegistry};
use ytdlp::YtDlpBackend;

/// Run the parsed command line. No subcommand means `serve`.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config;
    let tools = Arc::new(ToolLocator::new(config.tool_settings()));
    let backend = YtDlpBackend::new(tools.clone(), config.ytdlp_settings());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, tools, Arc::new(backend)).await,
        Command::Fetch(args) => cli::fetch(&backend, args).await.map(|_| ()),
        Command::Formats { url, json } => cli::formats(&backend, &url, json).await,
        Command::Search { query, limit, json } => cli::search(&backend, &query, limit, json).await,
        Command::Tools { json } => cli::tools(&tools, json).await,
    }
}

/// Bind the HTTP service and run until Ctrl+C
pub async fn serve(
    config: Config,
    tools: Arc<ToolLocator>,
    backend: Arc<dyn MediaBackend>,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| format!("cannot create {}", config.download_dir.display()))?;

    for tool in tools.tool_info().await {
        match (&tool.path, &tool.version) {
            (Some(path), version) => info!(
                "[tools] {} at {} ({})",
                tool.name,
                path,
                version.as_deref().unwrap_or("unknown version")
            ),
            (None, _) => warn!("[tools] {} not found; jobs that need it will fail", tool.name),
        }
    }

    let registry = JobRegistry::new();
    let dispatcher = Dispatcher::new(
        registry.clone(),
        backend,
        config.max_concurrent,
        config.download_dir.clone(),
    );
    let sweeper = spawn_sweeper(
        registry,
        config.download_dir.clone(),
        config.job_ttl(),
        config.sweep_interval(),
    );

    let app = api::router(AppState { dispatcher, tools }, config.static_dir.as_deref());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!(
        "[server] Listening on http://{} (downloads in {}, {} at a time)",
        listener.local_addr()?,
        config.download_dir.display(),
        config.max_concurrent
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("[server] Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[server] Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
