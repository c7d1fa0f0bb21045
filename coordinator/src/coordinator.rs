//! Drives one scrape run from partitioning to the final result file.

use crate::config::ScrapeConfig;
use crate::error::{Result, ScrapeError};
use crate::models::{partition_pages, result_file_name, PageRange, RunState, ScrapeReport, ScrapeRequest};
use crate::operation::{HttpConnector, ScrapeOperation, ScraperConnector};
use crate::progress::ProgressPrinter;
use crate::supervisor::{WorkerHandle, WorkerSupervisor, SHUTDOWN_GRACE};
use crate::temp_file::TempFile;
use chrono::Local;
use jobsdb_cloudnode::Region;
use log::{error, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Prefix of the per-run working directory under the system temp dir
pub const WORK_DIR_PREFIX: &str = "jobsdb-scrape-";

/// Coordinates workers, scrape operations and the merge for one run at a time
pub struct ScrapeCoordinator {
    config: ScrapeConfig,
    connector: Arc<dyn ScraperConnector>,
    state: RunState,
    cancel: CancellationToken,
}

impl ScrapeCoordinator {
    /// Coordinator talking to its workers over HTTP
    pub fn new(config: ScrapeConfig) -> Self {
        Self::with_connector(config, Arc::new(HttpConnector))
    }

    pub fn with_connector(config: ScrapeConfig, connector: Arc<dyn ScraperConnector>) -> Self {
        Self {
            config,
            connector,
            state: RunState::Partitioning,
            cancel: CancellationToken::new(),
        }
    }

    /// Stage the current or last run reached
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Token that interrupts the current run when cancelled
    ///
    /// An interrupted run still merges what its workers wrote and shuts them
    /// down, then fails with `ScrapeError::Interrupted`. Later runs on this
    /// coordinator fail the same way.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, state: RunState) {
        info!("Scrape run {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run a scrape, drawing progress on stdout
    pub async fn run(&mut self, request: &ScrapeRequest) -> Result<ScrapeReport> {
        let mut printer = ProgressPrinter::stdout(request.num_pages);
        self.run_with_progress(request, &mut printer).await
    }

    /// Run a scrape, drawing progress on `printer`
    ///
    /// Worker output is always merged and every worker is shut down, whether
    /// or not the scrape succeeded. The result file is only placed in the
    /// save directory when every step succeeded.
    pub async fn run_with_progress<W: Write>(
        &mut self,
        request: &ScrapeRequest,
        printer: &mut ProgressPrinter<W>,
    ) -> Result<ScrapeReport> {
        let started = Instant::now();
        self.state = RunState::Partitioning;

        if request.num_pages == 0 {
            self.enter(RunState::Failed);
            return Err(ScrapeError::InvalidArgument("numPages>=1".to_string()));
        }
        if request.num_pages > request.max_pages {
            self.enter(RunState::Failed);
            return Err(ScrapeError::InvalidArgument(format!("numPages <= {}", request.max_pages)));
        }

        let ranges = partition_pages(request.num_pages, self.config.max_workers, self.config.split_threshold);
        info!(
            "Scraping {} pages of {} with {} worker(s): {}",
            request.num_pages,
            request.region,
            ranges.len(),
            ranges.iter().map(PageRange::to_string).collect::<Vec<_>>().join(", ")
        );

        let work_dir = match tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&self.config.temp_root)
        {
            Ok(dir) => dir,
            Err(e) => {
                self.enter(RunState::Failed);
                return Err(e.into());
            }
        };

        let result = self
            .run_in(work_dir.path(), request, &ranges, printer)
            .await
            .map(|(result_path, pages_scraped)| ScrapeReport {
                result_path,
                pages_scraped,
                elapsed: started.elapsed(),
            });

        self.release_work_dir(work_dir);

        match &result {
            Ok(report) => {
                self.enter(RunState::Done);
                info!(
                    "Scraped {} pages into {:?} in {:?}",
                    report.pages_scraped, report.result_path, report.elapsed
                );
            }
            Err(e) => {
                self.enter(RunState::Failed);
                error!("Scrape failed: {}", e);
            }
        }
        result
    }

    async fn run_in<W: Write>(
        &mut self,
        work_dir: &Path,
        request: &ScrapeRequest,
        ranges: &[PageRange],
        printer: &mut ProgressPrinter<W>,
    ) -> Result<(PathBuf, u32)> {
        let merged = TempFile::create_in(work_dir, "merged-")?;
        let outputs = ranges
            .iter()
            .enumerate()
            .map(|(index, _)| TempFile::create_in(work_dir, &format!("worker{}-", index)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let mut workers = Vec::with_capacity(ranges.len());
        let scraped = self
            .scrape(request, ranges, &outputs, &mut workers, printer)
            .await;

        self.enter(RunState::Merging);
        let merged_ok = merge_outputs(&merged, &outputs, &mut workers).await;

        let pages_scraped = scraped?;
        merged_ok?;

        let result_path = place_result(&merged, request.region, request.num_pages, &request.save_dir).await?;
        Ok((result_path, pages_scraped))
    }

    async fn scrape<W: Write>(
        &mut self,
        request: &ScrapeRequest,
        ranges: &[PageRange],
        outputs: &[Arc<TempFile>],
        workers: &mut Vec<WorkerHandle>,
        printer: &mut ProgressPrinter<W>,
    ) -> Result<u32> {
        self.enter(RunState::SpawningWorkers);
        let supervisor = WorkerSupervisor::new(self.config.worker_command.clone(), self.config.logging_enabled);
        for index in 0..ranges.len() {
            workers.push(supervisor.spawn(index)?);
        }

        self.enter(RunState::AwaitingPorts);
        let cancel = self.cancel.clone();
        let mut ports = Vec::with_capacity(workers.len());
        for worker in workers.iter_mut() {
            let port = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScrapeError::Interrupted),
                port = worker.wait_for_port(self.config.port_timeout) => port?,
            };
            ports.push(port);
        }

        let scrapers = ports
            .iter()
            .enumerate()
            .map(|(index, port)| self.connector.connect(index, *port))
            .collect::<Result<Vec<_>>>()?;

        self.enter(RunState::Scraping);
        let mut counters = Vec::with_capacity(ranges.len());
        let mut tasks = Vec::with_capacity(ranges.len());
        for (index, scraper) in scrapers.into_iter().enumerate() {
            let operation = ScrapeOperation::new(
                index,
                ranges[index],
                ports[index],
                request.region,
                request.keywords.clone(),
                Arc::clone(&outputs[index]),
                scraper,
            )
            .with_cancellation(cancel.clone());
            counters.push(operation.progress());
            tasks.push(tokio::spawn(operation.run()));
        }

        loop {
            let settled = tasks.iter().all(|task| task.is_finished());
            let completed: u32 = counters.iter().map(|c| c.load(Ordering::SeqCst)).sum();
            if let Err(e) = printer.update(completed) {
                warn!("Failed to draw progress: {}", e);
            }
            if settled {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        if let Err(e) = printer.finish() {
            warn!("Failed to draw progress: {}", e);
        }

        let mut pages_scraped = 0;
        let mut first_error = None;
        for (index, task) in tasks.into_iter().enumerate() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ScrapeError::OperationAborted {
                    index,
                    reason: e.to_string(),
                }),
            };
            match outcome {
                Ok(pages) => pages_scraped += pages,
                Err(e) => {
                    error!("Scrape operation {} failed: {}", index, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(pages_scraped),
        }
    }

    fn release_work_dir(&self, work_dir: TempDir) {
        if self.config.logging_enabled {
            let kept = work_dir.keep();
            info!("Temporary files kept in {:?}", kept);
        } else if let Err(e) = work_dir.close() {
            warn!("Failed to remove temporary directory: {}", e);
        }
    }
}

/// Concatenate worker outputs into `merged` as one JSON array
///
/// Each worker is shut down right after its output is appended. Shutdown
/// failures are logged and do not stop the merge.
async fn merge_outputs(
    merged: &TempFile,
    outputs: &[Arc<TempFile>],
    workers: &mut [WorkerHandle],
) -> Result<()> {
    merged.append("[\n").await?;

    for (index, output) in outputs.iter().enumerate() {
        let appended = merged.append_file(output).await;

        if let Some(worker) = workers.get_mut(index) {
            if let Err(e) = worker.shutdown(SHUTDOWN_GRACE).await {
                error!("{}", e);
            }
        }

        match appended {
            Ok(bytes) => info!("Merged {} bytes from worker {}", bytes, index),
            Err(ScrapeError::TempFileNotCreated(path)) => {
                shutdown_rest(workers, index + 1).await;
                return Err(ScrapeError::TempFileNotCreated(path));
            }
            Err(e) => error!("Failed to merge output of worker {}: {}", index, e),
        }
    }
    shutdown_rest(workers, outputs.len()).await;

    let closing = match merged.pop_last_line().await?.as_deref() {
        Some("},") => "}\n]",
        Some("[") => "[\n]",
        other => {
            let path = merged.path().await?;
            return Err(ScrapeError::MergeFailure {
                path,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected trailing line {:?}", other),
                ),
            });
        }
    };
    merged.append(closing).await
}

async fn shutdown_rest(workers: &mut [WorkerHandle], from: usize) {
    for worker in workers.iter_mut().skip(from) {
        if let Err(e) = worker.shutdown(SHUTDOWN_GRACE).await {
            error!("{}", e);
        }
    }
}

/// Move the merged file to its timestamped name in `save_dir`
async fn place_result(merged: &TempFile, region: Region, num_pages: u32, save_dir: &Path) -> Result<PathBuf> {
    let destination = save_dir.join(result_file_name(region, num_pages, &Local::now()));

    let placement = merged
        .rename_or_copy(&destination)
        .await
        .map_err(|e| match e {
            ScrapeError::Io(source) => ScrapeError::MergeFailure {
                path: destination.clone(),
                source,
            },
            other => other,
        })?;
    info!("Result placed at {:?} by {:?}", destination, placement);

    Ok(tokio::fs::canonicalize(&destination).await?)
}

/// Scrape `num_pages` of `region` into `save_dir` with configuration from
/// the environment, returning the absolute path of the result file
pub async fn run_scrape(
    region: Region,
    num_pages: u32,
    max_pages: u32,
    save_dir: impl Into<PathBuf>,
    keywords: Option<String>,
) -> Result<PathBuf> {
    let mut coordinator = ScrapeCoordinator::new(ScrapeConfig::from_env()?);
    let request = ScrapeRequest {
        region,
        num_pages,
        max_pages,
        save_dir: save_dir.into(),
        keywords,
    };
    let report = coordinator.run(&request).await?;
    Ok(report.result_path)
}
