pub mod args;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod operation;
pub mod page_finder;
pub mod progress;
pub mod supervisor;
pub mod temp_file;

// Re-export important types
pub use config::{ScrapeConfig, WorkerCommand};
pub use coordinator::{run_scrape, ScrapeCoordinator};
pub use error::{Result, ScrapeError};
pub use models::{PageRange, RunState, ScrapeReport, ScrapeRequest};
pub use operation::{CloudNodeClient, PageScraper, ScrapeOperation, ScraperConnector};
pub use page_finder::{find_last_page, PageProber};
pub use supervisor::{WorkerHandle, WorkerSupervisor};
pub use temp_file::TempFile;
