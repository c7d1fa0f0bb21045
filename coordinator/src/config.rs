use crate::error::{Result, ScrapeError};
use jobsdb_cloudnode::logging::DEFAULT_LOG_DIR;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// File name of the worker binary looked up next to the current executable
pub const CLOUDNODE_BIN_NAME: &str = "jobsdb-cloudnode";

/// Command used to start one worker process
///
/// The worker index and the logging flag are appended to `args` on spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The cloudnode binary installed beside the running executable
    pub fn default_cloudnode() -> Result<Self> {
        let exe = env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            ScrapeError::InvalidArgument(format!("Executable {:?} has no parent directory", exe))
        })?;
        Ok(Self::new(dir.join(format!("{}{}", CLOUDNODE_BIN_NAME, env::consts::EXE_SUFFIX))))
    }
}

/// Tunables of a coordinated run
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Write log files and keep temporary files after the run
    pub logging_enabled: bool,

    /// Directory for log files
    pub log_dir: PathBuf,

    /// Upper bound on concurrent workers
    pub max_workers: usize,

    /// Runs of this many pages or fewer use a single worker
    pub split_threshold: u32,

    /// How long to wait for a worker to print its port
    pub port_timeout: Duration,

    /// Interval between progress refreshes
    pub poll_interval: Duration,

    /// How to start a worker
    pub worker_command: WorkerCommand,

    /// Parent of each run's working directory
    pub temp_root: PathBuf,
}

impl ScrapeConfig {
    pub fn new(worker_command: WorkerCommand) -> Self {
        Self {
            logging_enabled: false,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_workers: 2,
            split_threshold: 10,
            port_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            worker_command,
            temp_root: env::temp_dir(),
        }
    }

    /// Defaults overridden by `LOG_ENABLED`, `JOBSDB_LOG_DIR`, `JOBSDB_TEMP_DIR`,
    /// `JOBSDB_MAX_WORKERS`, `JOBSDB_PORT_TIMEOUT_SECS` and `JOBSDB_CLOUDNODE_BIN`
    pub fn from_env() -> Result<Self> {
        let worker_command = match env::var_os("JOBSDB_CLOUDNODE_BIN") {
            Some(bin) => WorkerCommand::new(bin),
            None => WorkerCommand::default_cloudnode()?,
        };
        let mut config = Self::new(worker_command);

        config.logging_enabled = env::var("LOG_ENABLED").map(|v| v == "true").unwrap_or(false);
        if let Some(dir) = env::var_os("JOBSDB_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env::var_os("JOBSDB_TEMP_DIR") {
            config.temp_root = PathBuf::from(dir);
        }
        if let Some(workers) = parse_env::<usize>("JOBSDB_MAX_WORKERS")? {
            config.max_workers = workers.max(1);
        }
        if let Some(secs) = parse_env::<u64>("JOBSDB_PORT_TIMEOUT_SECS")? {
            config.port_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ScrapeError::InvalidArgument(format!("{} must be a positive number", name))),
        Err(_) => Ok(None),
    }
}
