#![cfg(unix)]

use async_trait::async_trait;
use jobsdb_cloudnode::{PageResult, Region};
use jobsdb_scrape::coordinator::WORK_DIR_PREFIX;
use jobsdb_scrape::progress::{parse_progress_line, ProgressEvent, ProgressPrinter};
use jobsdb_scrape::{
    PageScraper, RunState, ScrapeConfig, ScrapeCoordinator, ScrapeError, ScrapeReport, ScrapeRequest,
    ScraperConnector, WorkerCommand,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Worker that prints `5000 + index` as its port and idles until terminated
const IDLE_WORKER: &str = "echo starting cloudnode $1; echo $((5000 + $1)); exec sleep 30";

struct FakeScraper {
    fail_on: Option<u32>,
    delay: Duration,
}

#[async_trait]
impl PageScraper for FakeScraper {
    async fn scrape_page(
        &self,
        page: u32,
        _region: Region,
        _keywords: Option<&str>,
    ) -> anyhow::Result<PageResult> {
        tokio::time::sleep(self.delay).await;
        if self.fail_on == Some(page) {
            anyhow::bail!("browser crashed on page {}", page);
        }
        Ok(PageResult::new(page, Vec::new()))
    }
}

/// Hands out fake scrapers and records which ports were connected
#[derive(Default)]
struct FakeConnector {
    failing_worker: Option<(usize, u32)>,
    delay: Duration,
    connected: Mutex<Vec<(usize, u16)>>,
}

impl ScraperConnector for FakeConnector {
    fn connect(&self, index: usize, port: u16) -> jobsdb_scrape::Result<Arc<dyn PageScraper>> {
        self.connected.lock().unwrap().push((index, port));
        let fail_on = match self.failing_worker {
            Some((worker, page)) if worker == index => Some(page),
            _ => None,
        };
        Ok(Arc::new(FakeScraper {
            fail_on,
            delay: self.delay,
        }))
    }
}

fn config(script: &str) -> ScrapeConfig {
    let mut config = ScrapeConfig::new(WorkerCommand::new("sh").with_args(["-c", script, "sh"]));
    config.port_timeout = Duration::from_secs(5);
    config.poll_interval = Duration::from_millis(20);
    config
}

fn request(num_pages: u32, save_dir: &Path) -> ScrapeRequest {
    ScrapeRequest {
        region: Region::Hk,
        num_pages,
        max_pages: 100,
        save_dir: save_dir.to_path_buf(),
        keywords: None,
    }
}

async fn run(
    coordinator: &mut ScrapeCoordinator,
    request: &ScrapeRequest,
) -> (jobsdb_scrape::Result<ScrapeReport>, String) {
    let mut printer = ProgressPrinter::new(Vec::new(), request.num_pages, false);
    let result = coordinator.run_with_progress(request, &mut printer).await;
    let output = String::from_utf8(printer.into_inner()).unwrap();
    (result, output)
}

fn page_numbers(path: &Path) -> Vec<u64> {
    let content = std::fs::read_to_string(path).unwrap();
    let array: serde_json::Value = serde_json::from_str(&content).unwrap();
    array
        .as_array()
        .unwrap()
        .iter()
        .map(|page| page["page"]["number"].as_u64().unwrap())
        .collect()
}

fn saved_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Entries of `dir` whose file name starts with `prefix`
fn entries_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.file_name().unwrap().to_string_lossy().starts_with(prefix))
        .collect()
}

/// The merged file left in the single kept working directory under `temp_root`
fn kept_merge(temp_root: &Path) -> PathBuf {
    let work_dirs = entries_with_prefix(temp_root, WORK_DIR_PREFIX);
    assert_eq!(work_dirs.len(), 1, "{:?}", work_dirs);
    let merged = entries_with_prefix(&work_dirs[0], "merged-");
    assert_eq!(merged.len(), 1, "{:?}", merged);
    merged[0].clone()
}

#[tokio::test]
async fn single_worker_scrape_produces_named_array() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector::default());
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), connector.clone());

    let (result, _) = run(&mut coordinator, &request(5, save_dir.path())).await;
    let report = result.unwrap();

    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(report.pages_scraped, 5);
    assert!(report.result_path.is_absolute());
    let name = report.result_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("jobsdb-hk-5-"), "{}", name);
    assert!(name.ends_with(".json"), "{}", name);

    assert_eq!(page_numbers(&report.result_path), vec![1, 2, 3, 4, 5]);
    assert_eq!(saved_files(save_dir.path()), 1);
    assert_eq!(*connector.connected.lock().unwrap(), vec![(0, 5000)]);
}

#[tokio::test]
async fn two_workers_merge_in_page_order() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector::default());
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), connector.clone());

    let (result, _) = run(&mut coordinator, &request(20, save_dir.path())).await;
    let report = result.unwrap();

    assert_eq!(page_numbers(&report.result_path), (1..=20).collect::<Vec<_>>());
    assert_eq!(report.pages_scraped, 20);
    assert_eq!(*connector.connected.lock().unwrap(), vec![(0, 5000), (1, 5001)]);
}

#[tokio::test]
async fn failing_operation_fails_the_run_without_result_file() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector {
        failing_worker: Some((1, 15)),
        ..FakeConnector::default()
    });
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), connector);

    let (result, _) = run(&mut coordinator, &request(20, save_dir.path())).await;
    let err = result.unwrap_err();

    assert!(matches!(err, ScrapeError::ScrapeStepFailure { page: 15, .. }), "{:?}", err);
    assert_eq!(coordinator.state(), RunState::Failed);
    assert_eq!(saved_files(save_dir.path()), 0);
}

#[tokio::test]
async fn failed_run_with_logging_keeps_partial_merge() {
    let save_dir = TempDir::new().unwrap();
    let temp_root = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector {
        failing_worker: Some((1, 15)),
        ..FakeConnector::default()
    });
    let mut config = config(IDLE_WORKER);
    config.logging_enabled = true;
    config.temp_root = temp_root.path().to_path_buf();
    let mut coordinator = ScrapeCoordinator::with_connector(config, connector);

    let (result, _) = run(&mut coordinator, &request(20, save_dir.path())).await;

    assert!(matches!(result, Err(ScrapeError::ScrapeStepFailure { page: 15, .. })));
    assert_eq!(saved_files(save_dir.path()), 0);

    let merged = kept_merge(temp_root.path());
    let expected: Vec<u64> = (1..=10).chain(11..=14).collect();
    assert_eq!(page_numbers(&merged), expected);
}

#[tokio::test]
async fn failed_run_without_logging_removes_work_dir() {
    let save_dir = TempDir::new().unwrap();
    let temp_root = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector {
        failing_worker: Some((0, 2)),
        ..FakeConnector::default()
    });
    let mut config = config(IDLE_WORKER);
    config.temp_root = temp_root.path().to_path_buf();
    let mut coordinator = ScrapeCoordinator::with_connector(config, connector);

    let (result, _) = run(&mut coordinator, &request(5, save_dir.path())).await;

    assert!(result.is_err());
    assert!(entries_with_prefix(temp_root.path(), WORK_DIR_PREFIX).is_empty());
}

#[tokio::test]
async fn interrupted_run_terminates_workers_and_keeps_partial_merge() {
    let save_dir = TempDir::new().unwrap();
    let temp_root = TempDir::new().unwrap();
    let markers = TempDir::new().unwrap();
    // Exits cleanly on SIGTERM, leaving a marker behind
    let script = format!(
        "trap 'echo terminated > {}/worker$1.term; exit 0' TERM; echo $((5000 + $1)); while true; do sleep 1 & wait $!; done",
        markers.path().display()
    );
    let connector = Arc::new(FakeConnector {
        delay: Duration::from_millis(200),
        ..FakeConnector::default()
    });
    let mut config = config(&script);
    config.logging_enabled = true;
    config.temp_root = temp_root.path().to_path_buf();
    let mut coordinator = ScrapeCoordinator::with_connector(config, connector);

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let (result, _) = run(&mut coordinator, &request(20, save_dir.path())).await;

    assert!(matches!(result, Err(ScrapeError::Interrupted)), "{:?}", result);
    assert_eq!(coordinator.state(), RunState::Failed);
    assert!(started.elapsed() < Duration::from_secs(8), "{:?}", started.elapsed());
    assert_eq!(saved_files(save_dir.path()), 0);

    for index in 0..2 {
        let marker = markers.path().join(format!("worker{}.term", index));
        assert!(marker.exists(), "worker {} was not sent SIGTERM", index);
    }

    let pages = page_numbers(&kept_merge(temp_root.path()));
    assert!(pages.len() < 20, "{:?}", pages);
    let (first, second): (Vec<u64>, Vec<u64>) = pages.into_iter().partition(|&page| page <= 10);
    assert_eq!(first, (1..=first.len() as u64).collect::<Vec<_>>());
    assert_eq!(second, (11..11 + second.len() as u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn interrupt_while_awaiting_ports_does_not_wait_for_timeout() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector::default());
    let mut coordinator = ScrapeCoordinator::with_connector(config("exec sleep 30"), connector.clone());
    coordinator.cancellation_token().cancel();

    let started = Instant::now();
    let (result, _) = run(&mut coordinator, &request(5, save_dir.path())).await;

    assert!(matches!(result, Err(ScrapeError::Interrupted)), "{:?}", result);
    assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
    assert!(connector.connected.lock().unwrap().is_empty());
    assert_eq!(saved_files(save_dir.path()), 0);
}

#[tokio::test]
async fn worker_exiting_before_port_fails_the_run() {
    let script = r#"if [ "$1" = 1 ]; then exit 3; fi; echo $((5000 + $1)); exec sleep 30"#;
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector::default());
    let mut coordinator = ScrapeCoordinator::with_connector(config(script), connector.clone());

    let (result, _) = run(&mut coordinator, &request(30, save_dir.path())).await;
    let err = result.unwrap_err();

    assert!(matches!(err, ScrapeError::PortDiscoveryFailure { index: 1, .. }), "{:?}", err);
    assert!(connector.connected.lock().unwrap().is_empty());
    assert_eq!(saved_files(save_dir.path()), 0);
}

#[tokio::test]
async fn progress_only_moves_forward() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector {
        delay: Duration::from_millis(15),
        ..FakeConnector::default()
    });
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), connector);

    let (result, output) = run(&mut coordinator, &request(24, save_dir.path())).await;
    result.unwrap();

    let percents: Vec<f64> = output
        .lines()
        .map(|line| match parse_progress_line(line) {
            ProgressEvent::Percent(percent) => percent,
            other => panic!("unexpected progress line {:?}", other),
        })
        .collect();

    assert!(percents.len() > 1, "{:?}", percents);
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", percents);
    assert_eq!(percents.last(), Some(&100.0));
}

#[tokio::test]
async fn zero_pages_is_rejected() {
    let save_dir = TempDir::new().unwrap();
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), Arc::new(FakeConnector::default()));

    let (result, _) = run(&mut coordinator, &request(0, save_dir.path())).await;
    assert!(matches!(result, Err(ScrapeError::InvalidArgument(_))));
    assert_eq!(coordinator.state(), RunState::Failed);
}

#[tokio::test]
async fn more_pages_than_available_is_rejected() {
    let save_dir = TempDir::new().unwrap();
    let connector = Arc::new(FakeConnector::default());
    let mut coordinator = ScrapeCoordinator::with_connector(config(IDLE_WORKER), connector.clone());

    let (result, _) = run(&mut coordinator, &request(101, save_dir.path())).await;

    match result {
        Err(ScrapeError::InvalidArgument(message)) => assert_eq!(message, "numPages <= 100"),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(connector.connected.lock().unwrap().is_empty());
    assert_eq!(coordinator.state(), RunState::Failed);
}
