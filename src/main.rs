use clap::Parser;
use tracing_subscriber::EnvFilter;

use yt_download_service::config::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.command {
        None | Some(Command::Serve) => "info",
        Some(_) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = yt_download_service::run(cli).await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
