use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::debug;

use tlgrab::config::AppConfig;
use tlgrab::core::{Coordinator, Downloader, ExportRequest, listing, locator};
use tlgrab::logging::{self, LogConfig};
use tlgrab::sdcp::SdcpChannel;

#[derive(Parser, Serialize)]
#[command(name = "tlgrab")]
#[command(about = "Export and download timelapse videos from an SDCP printer", long_about = None)]
struct Cli {
    /// Printer IP or hostname
    #[serde(skip)]
    host: String,

    /// Video name as the printer UI shows it, e.g. NAME.mp4
    #[serde(skip)]
    file: Option<String>,

    /// Discover the newest entry from the listing instead of naming one
    #[serde(skip)]
    #[arg(long, conflicts_with = "file")]
    latest: bool,

    /// Print the download URL after readiness and skip the download
    #[serde(skip)]
    #[arg(long)]
    url_only: bool,

    /// HTTP-probe the video after the device says ready
    #[serde(skip)]
    #[arg(long)]
    check: bool,

    /// Listing path used to resolve videos
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    list_path: Option<String>,

    /// Directory to save the downloaded video
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Max seconds to wait for the export
    #[serde(rename = "timeout_secs", skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    timeout: Option<u64>,

    /// Log extra channel and download detail
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new(Some(&cli)).context("Failed to load configuration")?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });
    debug!(?config, "Effective configuration");

    run(&cli, &config).await
}

async fn run(cli: &Cli, config: &AppConfig) -> Result<()> {
    let http = reqwest::Client::new();

    let (target, from_listing) = if cli.latest {
        let entries = listing::fetch_listing(
            &http,
            &cli.host,
            &config.list_path,
            Duration::from_secs(config.fetch_timeout_secs),
        )
        .await?;
        let newest = locator::locate_latest(&entries, &config.list_path)?;
        println!(
            "Newest timelapse: {} (modified {})",
            newest.name.trim_end_matches('/'),
            newest.modified_utc()
        );
        let target = listing::resolve_video_path(&config.list_path, &newest.href);
        (target, true)
    } else if let Some(file) = &cli.file {
        let target = format!("{}{}", listing::normalized_list_path(&config.list_path), file);
        (target, false)
    } else {
        bail!("Provide a video name or use --latest");
    };

    let request = ExportRequest {
        host: cli.host.clone(),
        target,
        list_path: from_listing.then(|| config.list_path.clone()),
        check: cli.check,
    };

    let coordinator = Coordinator::new(
        SdcpChannel::new(config.control_port),
        Duration::from_secs(config.timeout_secs),
        Duration::from_secs(config.keepalive_secs),
    );
    let download_url = coordinator.export(&request).await?;
    println!("Timelapse ready at: {download_url}");

    if cli.url_only {
        return Ok(());
    }

    let file_name = match request.target.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => request.target.clone(),
    };

    let downloader = Downloader::new(config.transfer.clone());
    let outcome = downloader
        .download(&download_url, &config.out_dir, &file_name)
        .await?;

    if outcome.attempts_made > 1 {
        println!(
            "Saved: {} ({} bytes, {} attempts)",
            outcome.path.display(),
            outcome.bytes,
            outcome.attempts_made
        );
    } else {
        println!("Saved: {} ({} bytes)", outcome.path.display(), outcome.bytes);
    }
    Ok(())
}
