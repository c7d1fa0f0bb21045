use crate::headless::BrowserSession;
use crate::models::{Advertiser, Job, JobDetails, JobEntry, Label, PageResult, Region};
use anyhow::{anyhow, Result};
use log::{debug, info};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

/// Marker present once per job card on a listing page
pub const JOB_CARD_SELECTOR: &str = r#"[data-testid="job-card"]"#;

const NAVIGATION_WAIT: Duration = Duration::from_secs(30);

/// Whether `page` of the region's listing has no job cards
///
/// `Ok(None)` means the marker check was indeterminate. Callers must not read
/// that as an empty page.
pub async fn is_zero_results(
    session: &BrowserSession,
    page: u32,
    region: Region,
) -> Result<Option<bool>> {
    session.navigate(&region.page_url(page), NAVIGATION_WAIT).await?;

    let has_results = session.element_exists(JOB_CARD_SELECTOR).await?;
    debug!("Page {} of {}: has results = {:?}", page, region, has_results);

    Ok(has_results.map(|found| !found))
}

/// Scrape the job cards of one listing page
pub async fn scrape_page(
    session: &BrowserSession,
    page: u32,
    region: Region,
    keywords: Option<&str>,
) -> Result<PageResult> {
    let url = region.page_url(page);
    session.navigate(&url, NAVIGATION_WAIT).await?;

    let html = session.content().await?;
    let base = Url::parse(&url).map_err(|e| anyhow!("Failed to parse page URL '{}': {}", url, e))?;

    let jobs = parse_job_cards(&html, &base)?;
    let total = jobs.len();
    let jobs = filter_by_keywords(jobs, keywords);

    info!(
        "Scraped page {} of {}: {} jobs ({} after keyword filter)",
        page,
        region,
        total,
        jobs.len()
    );

    Ok(PageResult::new(page, jobs))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Failed to parse selector {}: {:?}", css, e))
}

fn automation_text(card: &ElementRef, marker: &Selector) -> Option<String> {
    let element = card.select(marker).next()?;
    let text = element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract the job cards from a rendered listing page
pub fn parse_job_cards(html: &str, base_url: &Url) -> Result<Vec<JobEntry>> {
    let document = Html::parse_document(html);

    let card_selector = selector(JOB_CARD_SELECTOR)?;
    let title = selector(r#"[data-automation="jobTitle"]"#)?;
    let company = selector(r#"[data-automation="jobCompany"]"#)?;
    let location = selector(r#"[data-automation="jobLocation"]"#)?;
    let salary = selector(r#"[data-automation="jobSalary"]"#)?;
    let listing_date = selector(r#"[data-automation="jobListingDate"]"#)?;
    let summary = selector(r#"[data-automation="jobShortDescription"]"#)?;

    let mut entries = Vec::new();

    for card in document.select(&card_selector) {
        let Some(job_title) = automation_text(&card, &title) else {
            debug!("Skipping job card without a title");
            continue;
        };

        let url = card
            .select(&title)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| base_url.join(href).ok())
            .map(|mut u| {
                u.set_fragment(None);
                u.to_string()
            });

        let job = Job {
            id: card.value().attr("data-job-id").map(str::to_string),
            title: job_title,
            summary: automation_text(&card, &summary),
            location: automation_text(&card, &location).map(|label| Label { label }),
            salary: automation_text(&card, &salary).map(|label| Label { label }),
            listing_date: automation_text(&card, &listing_date),
            url,
        };

        entries.push(JobEntry {
            job_details: JobDetails {
                job,
                advertiser: automation_text(&card, &company).map(|name| Advertiser { name }),
            },
        });
    }

    Ok(entries)
}

/// Split a comma-separated keyword list, dropping blanks
pub fn parse_keywords(keywords: Option<&str>) -> Vec<String> {
    keywords
        .unwrap_or_default()
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Keep jobs whose title, company or abstract mentions any keyword
pub fn filter_by_keywords(jobs: Vec<JobEntry>, keywords: Option<&str>) -> Vec<JobEntry> {
    let keywords = parse_keywords(keywords);
    if keywords.is_empty() {
        return jobs;
    }

    jobs.into_iter()
        .filter(|entry| {
            let job = &entry.job_details.job;
            let haystack = [
                Some(job.title.as_str()),
                entry.company(),
                job.summary.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();

            keywords.iter().any(|k| haystack.contains(k.as_str()))
        })
        .collect()
}
