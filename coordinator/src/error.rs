use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while coordinating a scrape
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// A page existence check could not give a definitive answer
    #[error("Couldn't determine whether page {page} has results")]
    ProbeFailure { page: u32 },

    /// Binary search ended without finding the last results page
    #[error("Couldn't find the pages available to scrape on {base_url}")]
    LastPageNotFound { base_url: String },

    /// A cloudnode never announced a usable port
    #[error("CloudNode {index} did not announce a port: {reason}")]
    PortDiscoveryFailure { index: usize, reason: String },

    /// A single page fetch inside a scrape operation failed
    #[error("Scraping page {page} failed: {reason}")]
    ScrapeStepFailure { page: u32, reason: String },

    /// A temp file operation ran before its backing file existed
    #[error("Temporary file is not created: {0:?}")]
    TempFileNotCreated(PathBuf),

    /// The merged result could not be placed at its final path
    #[error("Failed to save result file to {path:?}: {source}")]
    MergeFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cloudnode did not terminate cleanly
    #[error("Error during CloudNode {index} shutdown: {reason}")]
    WorkerShutdownFailure { index: usize, reason: String },

    /// A scrape operation task panicked or was cancelled
    #[error("Scrape operation {index} did not complete: {reason}")]
    OperationAborted { index: usize, reason: String },

    /// The run was stopped by a termination signal
    #[error("Scrape interrupted")]
    Interrupted,

    /// User supplied input was rejected
    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Whether the failure came from missing write permission
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ScrapeError::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            ScrapeError::MergeFailure { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
