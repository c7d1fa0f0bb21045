use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Job board regions that can be scraped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Hong Kong
    Hk,

    /// Thailand
    Th,
}

/// Returned when a region code is not one of the supported ones
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Region must be hk (hong kong) or th (thailand)")]
pub struct InvalidRegion(pub String);

impl Region {
    /// Two-letter code used in URLs and result file names
    pub fn code(&self) -> &'static str {
        match self {
            Region::Hk => "hk",
            Region::Th => "th",
        }
    }

    /// Listing root for the region
    pub fn base_url(&self) -> String {
        format!("https://{}.jobsdb.com/jobs", self.code())
    }

    /// Paginated listing URL for the region
    pub fn page_url(&self, page: u32) -> String {
        format!("https://{}.jobsdb.com/jobs?page={}", self.code(), page)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = InvalidRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hk" => Ok(Region::Hk),
            "th" => Ok(Region::Th),
            _ => Err(InvalidRegion(s.to_string())),
        }
    }
}

/// A labelled value as rendered on the listing (location, salary)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub label: String,
}

/// Job summary taken from one job card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Listing id from the card, if the card carries one
    pub id: Option<String>,

    /// Job title
    pub title: String,

    /// Teaser text shown under the title
    #[serde(rename = "abstract")]
    pub summary: Option<String>,

    /// Location as displayed
    pub location: Option<Label>,

    /// Salary as displayed
    pub salary: Option<Label>,

    /// Relative listing date ("2d ago")
    pub listing_date: Option<String>,

    /// Absolute URL of the job ad
    pub url: Option<String>,
}

/// Company that posted the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertiser {
    pub name: String,
}

/// Details wrapper matching what downstream analysis reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    pub job: Job,
    pub advertiser: Option<Advertiser>,
}

/// One element of a page's `jobs` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    pub job_details: JobDetails,
}

impl JobEntry {
    /// Company name, if the card showed one
    pub fn company(&self) -> Option<&str> {
        self.job_details.advertiser.as_ref().map(|a| a.name.as_str())
    }
}

/// Jobs found on a single listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageJobs {
    /// Listing page number
    pub number: u32,

    /// Jobs on the page after keyword filtering
    pub jobs: Vec<JobEntry>,
}

/// Result object written once per scraped page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page: PageJobs,
}

impl PageResult {
    pub fn new(number: u32, jobs: Vec<JobEntry>) -> Self {
        Self {
            page: PageJobs { number, jobs },
        }
    }
}

/// Body of `POST /api/probe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub page: u32,
    pub region: Region,
}

/// Reply to `POST /api/probe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReply {
    pub page: u32,

    /// `None` when the result marker check was indeterminate
    pub zero_results: Option<bool>,
}

/// Body of `POST /api/scrape`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub region: Region,

    /// Comma-separated keyword filter
    #[serde(default)]
    pub keywords: Option<String>,
}
