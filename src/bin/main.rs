//! Command-line front end for the download manager.
//!
//! This binary exercises [`deezer_enc::download::Manager`] directly: it
//! enqueues a single track download, prints progress/completion/error
//! events as they arrive, and exits once the task reaches a terminal
//! state.

use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, LevelFilter};

use deezer_enc::config::Config;
use deezer_enc::download::{Manager, Metadata, Provider};
use deezer_enc::events::DownloadEvent;
use deezer_enc::fetch::HttpFetcher;

/// Command line arguments as parsed by `clap`.
///
/// All options can be set via environment variables with the
/// `DEEZER_ENC_` prefix.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Encrypted origin URL to download.
    #[arg(long, env = "DEEZER_ENC_URL")]
    url: String,

    /// Track identifier used for key derivation and output naming.
    #[arg(long, env = "DEEZER_ENC_TRACK_ID")]
    track_id: String,

    /// Provider the URL was issued by.
    #[arg(long, default_value = "deezer", env = "DEEZER_ENC_PROVIDER")]
    provider: String,

    /// Requested output container extension (e.g. "flac", "mp3").
    #[arg(long, default_value = "mp3", env = "DEEZER_ENC_FORMAT")]
    format: String,

    /// Increase logging verbosity. Repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logger(args: &Args) {
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::max(),
    };
    logger.filter_module(module_path!(), level);
    logger.filter_module("deezer_enc", level);
    logger.init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);
    debug!("command line arguments: {args:?}");

    let provider = match args.provider.as_str() {
        "deezer" => Provider::Deezer,
        "youtube" => Provider::Youtube,
        other => {
            error!("unknown provider: {other}");
            process::exit(1);
        }
    };

    if let Err(err) = run(args, provider).await {
        error!("{err}");
        process::exit(1);
    }
}

async fn run(args: Args, provider: Provider) -> deezer_enc::error::Result<()> {
    let config = Config::new()?;
    let fetcher: Arc<dyn deezer_enc::fetch::RangeFetcher> = Arc::new(HttpFetcher::new(&config.user_agent)?);

    let (manager, mut events) = Manager::new(config, fetcher).await?;

    let task_id = format!("{:?}:{}", provider, args.track_id).to_lowercase();
    manager
        .enqueue(
            task_id.clone(),
            args.url,
            args.track_id,
            provider,
            args.format,
            None,
            Metadata::default(),
        )
        .await?;

    info!("enqueued {task_id}");

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Progress { task_id, progress } => {
                debug!("{task_id}: {:.0}%", progress * 100.0);
            }
            DownloadEvent::Complete {
                task_id,
                file_path,
                file_size,
                ..
            } => {
                info!("{task_id}: completed, {file_size} bytes at {}", file_path.display());
                break;
            }
            DownloadEvent::Error { task_id, error } => {
                error!("{task_id}: {error}");
                break;
            }
        }
    }

    Ok(())
}
