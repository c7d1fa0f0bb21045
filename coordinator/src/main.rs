use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobsdb_cloudnode::logging::init_logging;
use jobsdb_cloudnode::signal::shutdown_signal;
use jobsdb_scrape::args::{discover_max_pages, parse_region, resolve_num_pages, validate_save_dir, DEFAULT_SAVE_DIR};
use jobsdb_scrape::{ScrapeConfig, ScrapeCoordinator, ScrapeError, ScrapeRequest, WorkerCommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

/// Command line arguments
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Subcommand to run
    #[clap(subcommand)]
    command: Command,

    /// Write log files and keep temporary files (same as LOG_ENABLED=true)
    #[clap(long)]
    log_enabled: bool,

    /// Path to the jobsdb-cloudnode binary
    #[clap(long)]
    cloudnode_bin: Option<PathBuf>,
}

/// Subcommands
#[derive(Subcommand)]
enum Command {
    /// Find the max number of pages you can scrape for a region
    MaxPages {
        /// hk (Hong Kong) or th (Thailand)
        region: String,
    },

    /// Scrape job listings
    Scrape {
        /// hk (Hong Kong) or th (Thailand)
        #[clap(short, long)]
        region: String,

        /// Number of pages to scrape, or "all"
        #[clap(short, long, default_value = "all")]
        num_pages: String,

        /// Directory to store the results file
        #[clap(short, long, default_value = DEFAULT_SAVE_DIR)]
        save_dir: PathBuf,

        /// Comma-separated keywords to filter jobs
        #[clap(short, long)]
        keywords: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            match e.downcast_ref::<ScrapeError>() {
                Some(err) if err.is_permission_denied() => {
                    eprintln!("The specified result directory does not have write permissions.");
                    error!("The specified result directory does not have write permissions.");
                }
                _ => {
                    eprintln!("{:#}", e);
                    error!("{:#}", e);
                }
            }
            1
        }
    };

    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let mut config = ScrapeConfig::from_env().context("Invalid configuration")?;
    if args.log_enabled {
        config.logging_enabled = true;
    }
    if let Some(bin) = args.cloudnode_bin {
        config.worker_command = WorkerCommand::new(bin);
    }

    if let Some(path) = init_logging("client", config.logging_enabled, &config.log_dir)? {
        info!("Logging to {:?}", path);
    }

    match args.command {
        Command::MaxPages { region } => {
            let region = parse_region(&region)?;
            println!("Finding pages available to scrape on {}...", region.base_url());
            let max_pages = interruptible(discover_max_pages(region)).await?;
            println!("You can scrape up to {} pages of jobs", max_pages);
        }
        Command::Scrape {
            region,
            num_pages,
            save_dir,
            keywords,
        } => {
            let started = Instant::now();
            let region = parse_region(&region)?;
            let save_dir = validate_save_dir(&save_dir)?;

            println!("Finding pages available to scrape on {}...", region.base_url());
            let max_pages = interruptible(discover_max_pages(region)).await?;
            let (num_pages, max_pages) = resolve_num_pages(&num_pages, max_pages)?;

            let request = ScrapeRequest {
                region,
                num_pages,
                max_pages,
                save_dir,
                keywords: keywords.filter(|k| !k.trim().is_empty()),
            };

            println!(
                "Scraping {}/{} available pages of jobs on {}.",
                num_pages,
                max_pages,
                region.base_url()
            );

            let mut coordinator = ScrapeCoordinator::new(config);
            let cancel = coordinator.cancellation_token();
            let signals = tokio::spawn(async move {
                shutdown_signal().await;
                warn!("Interrupted, stopping CloudNodes");
                cancel.cancel();
            });

            let report = coordinator.run(&request).await;
            signals.abort();
            let report = report?;

            println!("Result file saved to {} in json format.", report.result_path.display());
            println!("Scrape finished in {} seconds", started.elapsed().as_secs());
            info!("Result file saved to {} in json format.", report.result_path.display());
            info!("Scrape finished in {} seconds", started.elapsed().as_secs());
        }
    }

    Ok(())
}

/// Run `task` unless SIGINT or SIGTERM arrives first
///
/// On a signal the task is dropped and the command fails as interrupted.
async fn interruptible<T, F>(task: F) -> Result<T>
where
    F: std::future::Future<Output = jobsdb_scrape::Result<T>>,
{
    tokio::select! {
        result = task => Ok(result?),
        _ = shutdown_signal() => Err(ScrapeError::Interrupted.into()),
    }
}
