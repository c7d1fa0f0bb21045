use chrono::{DateTime, TimeZone};
use jobsdb_cloudnode::Region;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Inclusive, 1-indexed range of listing pages assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Create a range, or `None` if it would be empty or start below 1
    pub fn new(start: u32, end: u32) -> Option<Self> {
        if start >= 1 && start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Number of pages in the range
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Always false, ranges hold at least one page
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Page numbers in increasing order
    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `[1, num_pages]` into contiguous ranges, one per worker
///
/// Runs of `split_threshold` pages or fewer get a single worker. Larger runs
/// are split across `max_workers` workers with floor division, the last range
/// taking the remainder.
pub fn partition_pages(num_pages: u32, max_workers: usize, split_threshold: u32) -> Vec<PageRange> {
    if num_pages == 0 {
        return Vec::new();
    }

    let workers = if num_pages <= split_threshold {
        1
    } else {
        (max_workers.max(1) as u32).min(num_pages)
    };

    let chunk = num_pages / workers;
    (0..workers)
        .map(|i| {
            let start = i * chunk + 1;
            let end = if i + 1 == workers { num_pages } else { (i + 1) * chunk };
            PageRange { start, end }
        })
        .collect()
}

/// Final name of a result file: `jobsdb-<region>-<numPages>-<timestamp>.json`
pub fn result_file_name<Tz: TimeZone>(region: Region, num_pages: u32, at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!(
        "jobsdb-{}-{}-{}.json",
        region,
        num_pages,
        at.format("%Y-%m-%d-%H_%M_%S%.3f")
    )
}

/// Stages of one coordinated run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Partitioning,
    SpawningWorkers,
    AwaitingPorts,
    Scraping,
    Merging,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Partitioning => "partitioning",
            RunState::SpawningWorkers => "spawning workers",
            RunState::AwaitingPorts => "awaiting ports",
            RunState::Scraping => "scraping",
            RunState::Merging => "merging",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to scrape and where to put it
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    /// Region to scrape
    pub region: Region,

    /// Number of pages to scrape, starting at page 1
    pub num_pages: u32,

    /// Pages available on the site when the run was requested, an upper
    /// bound on `num_pages`
    pub max_pages: u32,

    /// Directory the result file is saved to
    pub save_dir: PathBuf,

    /// Optional comma-separated keyword filter
    pub keywords: Option<String>,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    /// Absolute path of the result file
    pub result_path: PathBuf,

    /// Pages written across all workers
    pub pages_scraped: u32,

    /// Wall time of the run
    pub elapsed: Duration,
}
