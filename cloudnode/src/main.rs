use anyhow::{Context, Result};
use clap::Parser;
use jobsdb_cloudnode::api::{self, AppState};
use jobsdb_cloudnode::logging::{init_logging, DEFAULT_LOG_DIR};
use jobsdb_cloudnode::signal::shutdown_signal;
use jobsdb_cloudnode::headless::logged_close;
use jobsdb_cloudnode::HeadlessBrowser;
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Command line arguments, as passed by the scrape supervisor
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Index of this cloudnode within the run
    index: usize,

    /// Write a log file for this cloudnode
    #[clap(action = clap::ArgAction::Set, default_value = "false")]
    logging: bool,

    /// Directory for log files
    #[clap(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Host to bind to
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{:#}", e);
            1
        }
    };

    std::process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let index = args.index;
    init_logging(&format!("cloudnode-{}", index), args.logging, &args.log_dir)?;

    let mut browser = HeadlessBrowser::new();
    if let Err(e) = browser.start().await {
        error!("ERROR starting CloudNode {}: {}", index, e);
        return Err(e.context("ERROR starting CloudNode"));
    }

    let listener = match TcpListener::bind((args.host.as_str(), 0)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("ERROR starting CloudNode {}: {}", index, e);
            let start_err = anyhow::Error::new(e).context("ERROR starting CloudNode");
            return Err(match logged_close(browser.close()).await {
                Ok(()) => start_err,
                Err(close_err) => start_err.context(format!("closing the browser also failed: {}", close_err)),
            });
        }
    };

    let port = listener.local_addr()?.port();
    info!("CloudNode {} listening on port {}", index, port);

    // The supervisor reads exactly this line to learn where to connect
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", port)?;
        stdout.flush()?;
    }

    let state = Arc::new(AppState::new(index, browser));
    let served = api::serve(listener, state.clone(), shutdown_signal()).await;

    let closed = logged_close(state.browser.write().await.close()).await;

    served?;
    closed.context("Error during CloudNode shutdown")?;

    info!("CloudNode {} shut down gracefully.", index);
    println!("CloudNode shut down gracefully...");
    Ok(())
}
