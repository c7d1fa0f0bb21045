//! Discovery of the last listing page that still has results.
//!
//! The search probes page `M` and `M + 1` concurrently on two browser
//! sessions and narrows `[1, 1000]` until page `M` has results and page
//! `M + 1` does not.

use crate::error::{Result, ScrapeError};
use async_trait::async_trait;
use jobsdb_cloudnode::{automation, BrowserSession, HeadlessBrowser, Region};
use log::{debug, info, warn};

/// First page the search considers
pub const SEARCH_START: u32 = 1;
/// Last page the search considers
pub const SEARCH_END: u32 = 1000;

/// Checks whether a listing page is empty
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageProber: Send + Sync {
    /// `Some(true)` if the page has zero result items, `None` if undecidable
    async fn is_zero_results(&self, page: u32, region: Region) -> anyhow::Result<Option<bool>>;
}

/// Where a probed page sits relative to the last results page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Page and the one after both have results
    Before,
    /// Page has results and the one after does not
    On,
    /// Page has no results
    After,
}

/// Probe `page` and `page + 1` concurrently and classify the pair
pub async fn position_from_last_page(
    probers: [&dyn PageProber; 2],
    page: u32,
    region: Region,
) -> Result<Position> {
    let (current, next) = futures::try_join!(
        probers[0].is_zero_results(page, region),
        probers[1].is_zero_results(page + 1, region),
    )?;

    let current_empty = current.ok_or(ScrapeError::ProbeFailure { page })?;
    let next_empty = next.ok_or(ScrapeError::ProbeFailure { page: page + 1 })?;

    let position = if !current_empty && next_empty {
        Position::On
    } else if current_empty {
        Position::After
    } else {
        Position::Before
    };

    debug!("Page {} of {} is {:?} the last page", page, region, position);
    Ok(position)
}

/// Binary search for the last page with results using the given probers
pub async fn search_last_page(probers: [&dyn PageProber; 2], region: Region) -> Result<Option<u32>> {
    let mut start = SEARCH_START;
    let mut end = SEARCH_END;

    while start <= end {
        let mid = start + (end - start) / 2;

        match position_from_last_page(probers, mid, region).await? {
            Position::Before => start = mid + 1,
            Position::On => return Ok(Some(mid)),
            Position::After => end = mid - 1,
        }
    }

    Ok(None)
}

/// Find the last page with results for `region`
///
/// Uses `probers` when given. Otherwise a headless browser with two sessions
/// is started for the search and closed again before returning.
pub async fn find_last_page(
    region: Region,
    probers: Option<[&dyn PageProber; 2]>,
) -> Result<Option<u32>> {
    let last = match probers {
        Some(probers) => search_last_page(probers, region).await?,
        None => search_with_own_browser(region).await?,
    };

    match last {
        Some(page) => info!("Last page with results on {} is {}", region.base_url(), page),
        None => warn!("No last page found on {}", region.base_url()),
    }
    Ok(last)
}

/// Probes through a browser tab owned by the finder
struct SessionProber(BrowserSession);

#[async_trait]
impl PageProber for SessionProber {
    async fn is_zero_results(&self, page: u32, region: Region) -> anyhow::Result<Option<bool>> {
        automation::is_zero_results(&self.0, page, region).await
    }
}

async fn open_probers(browser: &HeadlessBrowser) -> anyhow::Result<(SessionProber, SessionProber)> {
    let first = browser.new_session().await?;
    let second = match browser.new_session().await {
        Ok(session) => session,
        Err(e) => {
            if let Err(close_err) = first.close().await {
                warn!("{}", close_err);
            }
            return Err(e);
        }
    };
    Ok((SessionProber(first), SessionProber(second)))
}

async fn search_with_own_browser(region: Region) -> Result<Option<u32>> {
    let mut browser = HeadlessBrowser::new();
    browser.start().await?;

    let result = match open_probers(&browser).await {
        Ok((first, second)) => {
            let result = search_last_page([&first, &second], region).await;

            for prober in [first, second] {
                if let Err(e) = prober.0.close().await {
                    warn!("{}", e);
                }
            }
            result
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = browser.close().await {
        warn!("{}", e);
    }

    result
}
