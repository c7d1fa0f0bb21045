use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Directory log files are written to unless overridden
pub const DEFAULT_LOG_DIR: &str = "./jobsdb_scrape_logs";

/// Path of the log file for `name` created now
pub fn log_file_path(log_dir: &Path, name: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    log_dir.join(format!("{}-{}.log", name, stamp))
}

/// Initialize the process logger
///
/// When `enabled` is false the filter comes from `RUST_LOG` and defaults to off.
/// When enabled, info-level records go to a timestamped file in `log_dir`,
/// whose path is returned.
pub fn init_logging(name: &str, enabled: bool, log_dir: &Path) -> Result<Option<PathBuf>> {
    if !enabled {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("off"))
            .try_init()
            .context("Failed to initialize logger")?;
        return Ok(None);
    }

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let path = log_file_path(log_dir, name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {:?}", path))?;

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("Failed to initialize logger")?;

    Ok(Some(path))
}
