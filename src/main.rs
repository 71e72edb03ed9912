use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use youtube_resolver_lib::downloader::MediaKind;
use youtube_resolver_lib::{DownloadError, Downloader, ResolveRequest, ResolverConfig};

#[derive(Parser, Debug)]
#[command(
    name = "youtube-resolver",
    about = "Resolve YouTube links into direct download URLs",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Proxy URL (supports http, https, socks5h); overrides RESOLVER_PROXY
    #[arg(long, global = true)]
    proxy: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a download link
    Resolve {
        url: String,

        /// Quality label ("1080p", "720p", ...) or "auto"
        #[arg(long, default_value = "auto")]
        quality: String,

        /// Container (mp4, webm, mp3, ...)
        #[arg(long)]
        format: Option<String>,

        /// Resolve the audio track instead of video
        #[arg(long)]
        audio: bool,

        /// Copy the file into the configured channel and wait for it
        #[arg(long)]
        rehost: bool,
    },

    /// Print video metadata and available renditions
    Info { url: String },

    /// Drop cached entries of one video
    Invalidate { url: String },

    /// Empty the cache
    Clear,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("Application error: {:#}", e);
        match e.downcast_ref::<DownloadError>() {
            Some(failure) => match serde_json::to_string_pretty(&failure.report()) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("Error: {}", failure),
            },
            None => eprintln!("Error: {:#}", e),
        }
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = ResolverConfig::from_env().context("invalid configuration")?;
    if args.proxy.is_some() {
        config.upstream = config.upstream.with_proxy(args.proxy.clone());
    }
    let downloader = Downloader::from_config(&config)
        .await
        .context("failed to start resolver")?;

    match args.command {
        Commands::Resolve {
            url,
            quality,
            format,
            audio,
            rehost,
        } => {
            let request = if audio {
                ResolveRequest::audio(url)
            } else {
                ResolveRequest::video(url)
            };
            let request = request
                .with_quality(quality)
                .with_format(format)
                .with_rehost(rehost);

            let mut outcome = downloader.resolve(request.clone()).await?;
            if rehost && outcome.result.durable_url.is_none() {
                outcome = wait_for_rehost(&downloader, request, outcome).await?;
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Info { url } => {
            let metadata = downloader.video_info(&url).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "video_id": metadata.video_id,
                    "title": metadata.title,
                    "duration_secs": metadata.duration_secs,
                    "uploader": metadata.uploader,
                    "thumbnail": metadata.thumbnail,
                    "video": metadata.renditions_of(MediaKind::Video).collect::<Vec<_>>(),
                    "audio": metadata.renditions_of(MediaKind::Audio).collect::<Vec<_>>(),
                }))?
            );
        }
        Commands::Invalidate { url } => {
            let removed = downloader.invalidate(&url).await?;
            println!("Removed {} cached entries", removed);
        }
        Commands::Clear => {
            let removed = downloader.clear_cache().await;
            println!("Removed {} cached entries", removed);
        }
    }

    tracing::debug!(stats = ?downloader.stats(), "done");
    Ok(())
}

/// Poll the cached result until the background upload settles
async fn wait_for_rehost(
    downloader: &Downloader,
    request: ResolveRequest,
    mut outcome: youtube_resolver_lib::ResolveOutcome,
) -> anyhow::Result<youtube_resolver_lib::ResolveOutcome> {
    use youtube_resolver_lib::downloader::models::RehostStatus;

    tracing::info!("waiting for re-host to finish");
    for _ in 0..600 {
        if outcome.result.rehost != RehostStatus::Pending {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        outcome = downloader.resolve(request.clone()).await?;
    }
    Ok(outcome)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
