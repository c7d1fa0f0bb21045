use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

// Test configuration
const REGION: &str = "hk";
const NUM_PAGES: u32 = 2;
const MAX_WAIT_TIME_SECS: u64 = 600; // 10 minutes max for discovery plus scrape

/// Main integration test function
async fn run_integration_test() -> Result<()> {
    println!("Starting integration test...");

    let save_dir = tempfile::Builder::new()
        .prefix("jobsdb-e2e-")
        .tempdir()
        .context("Failed to create results directory")?;

    let workspace_root = workspace_root()?;
    println!("Building workspace from: {}", workspace_root.display());
    build_binaries(&workspace_root).await?;

    println!("Scraping {} pages of {}...", NUM_PAGES, REGION);
    let scrape = start_scrape(&workspace_root, save_dir.path())?;
    let status = wait_with_timeout(scrape, Duration::from_secs(MAX_WAIT_TIME_SECS)).await?;
    if !status.success() {
        bail!("Scrape exited with {}", status);
    }

    let result_path = find_result_file(save_dir.path())?;
    println!("✅ Result file found: {}", result_path.display());

    validate_result(&result_path)?;
    println!("✅ Result file is a JSON array of {} pages", NUM_PAGES);

    Ok(())
}

/// Navigate up from tests/src or tests to the workspace root
fn workspace_root() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let root = if current_dir.ends_with("src") {
        current_dir
            .parent()
            .and_then(Path::parent)
            .context("Failed to get workspace root")?
            .to_path_buf()
    } else if current_dir.ends_with("tests") {
        current_dir.parent().context("Failed to get workspace root")?.to_path_buf()
    } else {
        current_dir
    };
    Ok(root)
}

/// Build both binaries so the scraper finds the cloudnode beside itself
async fn build_binaries(workspace_root: &Path) -> Result<()> {
    let status = Command::new("cargo")
        .current_dir(workspace_root)
        .args(["build", "--bin", "jobsdb-scrape", "--bin", "jobsdb-cloudnode"])
        .status()
        .await
        .context("Failed to run cargo build")?;

    if !status.success() {
        bail!("cargo build failed with {}", status);
    }
    Ok(())
}

/// Start the scraper process
fn start_scrape(workspace_root: &Path, save_dir: &Path) -> Result<Child> {
    let save_dir = save_dir.to_string_lossy().into_owned();
    let num_pages = NUM_PAGES.to_string();

    Command::new("cargo")
        .current_dir(workspace_root)
        .args([
            "run",
            "--bin",
            "jobsdb-scrape",
            "--",
            "scrape",
            "--region",
            REGION,
            "--num-pages",
            &num_pages,
            "--save-dir",
            &save_dir,
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to start scrape process")
}

/// Wait for the process, terminating it once the deadline passes
async fn wait_with_timeout(mut child: Child, limit: Duration) -> Result<ExitStatus> {
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status.context("Failed to wait for scrape process"),
        Err(_) => {
            println!("Scrape timed out, terminating it...");
            terminate_process(&mut child)?;
            child.wait().await.context("Failed to wait for scrape process")?;
            Err(anyhow!("Scrape did not finish within {} seconds", limit.as_secs()))
        }
    }
}

fn find_result_file(save_dir: &Path) -> Result<PathBuf> {
    let prefix = format!("jobsdb-{}-{}-", REGION, NUM_PAGES);

    for entry in std::fs::read_dir(save_dir).context("Failed to list results directory")? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with(&prefix) && name.ends_with(".json") {
            return Ok(path);
        }
    }

    Err(anyhow!("No result file named {}*.json in {}", prefix, save_dir.display()))
}

fn validate_result(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).context("Failed to read result file")?;
    let value: Value = serde_json::from_str(&content).context("Result file is not valid JSON")?;

    let pages = value.as_array().context("Result file is not a JSON array")?;
    if pages.len() != NUM_PAGES as usize {
        bail!("Expected {} pages, found {}", NUM_PAGES, pages.len());
    }

    for (i, page) in pages.iter().enumerate() {
        let number = page["page"]["number"].as_u64();
        if number != Some(i as u64 + 1) {
            bail!("Element {} holds page {:?}", i, number);
        }
        let jobs = page["page"]["jobs"]
            .as_array()
            .with_context(|| format!("Page {} has no jobs array", i + 1))?;
        println!("Page {}: {} jobs", i + 1, jobs.len());

        for job in jobs {
            if job["jobDetails"]["job"]["title"].as_str().is_none() {
                bail!("Job without title on page {}: {}", i + 1, job);
            }
        }
    }
    Ok(())
}

/// Terminate a process
fn terminate_process(process: &mut Child) -> Result<()> {
    #[cfg(target_family = "unix")]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(id) = process.id() {
            kill(Pid::from_raw(id as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;
        }
    }

    #[cfg(target_family = "windows")]
    {
        process.start_kill().context("Failed to kill process")?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging to help debug issues
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run_integration_test().await {
        Ok(_) => {
            println!("✅ Integration test passed successfully!");
            Ok(())
        }
        Err(e) => {
            println!("❌ Integration test failed: {}", e);
            Err(e)
        }
    }
}
