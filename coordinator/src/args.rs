//! Validation of user supplied scrape arguments.

use crate::error::{Result, ScrapeError};
use crate::page_finder::find_last_page;
use jobsdb_cloudnode::Region;
use std::fs;
use std::path::{Path, PathBuf};

/// Save directory used when none is given
pub const DEFAULT_SAVE_DIR: &str = "./jobsdb_scrape_results";

/// Parse a region code such as `hk`
pub fn parse_region(raw: &str) -> Result<Region> {
    raw.parse::<Region>()
        .map_err(|e| ScrapeError::InvalidArgument(e.to_string()))
}

/// Resolve the requested page count against the pages available
///
/// Returns `(num_pages, max_pages)`. `all` takes every available page.
pub fn resolve_num_pages(raw: &str, max_pages: u32) -> Result<(u32, u32)> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("all") {
        return Ok((max_pages, max_pages));
    }

    let requested: i64 = raw
        .parse()
        .map_err(|_| ScrapeError::InvalidArgument("Not a number.".to_string()))?;

    if requested < 1 {
        return Err(ScrapeError::InvalidArgument("numPages>=1".to_string()));
    }
    if requested > i64::from(max_pages) {
        return Err(ScrapeError::InvalidArgument(format!("numPages <= {}", max_pages)));
    }

    Ok((requested as u32, max_pages))
}

/// Find how many pages `region` currently has, using a private browser
pub async fn discover_max_pages(region: Region) -> Result<u32> {
    find_last_page(region, None)
        .await?
        .ok_or_else(|| ScrapeError::LastPageNotFound {
            base_url: region.base_url(),
        })
}

/// Check that `dir` exists, is a directory and is writable
///
/// The default save directory is created when missing.
pub fn validate_save_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() && dir == Path::new(DEFAULT_SAVE_DIR) {
        fs::create_dir_all(dir)?;
    }

    if !dir.is_dir() {
        return Err(ScrapeError::InvalidArgument(
            "The directory specified to save results file to is invalid, try specifying the absolute path"
                .to_string(),
        ));
    }

    let writable = tempfile::Builder::new()
        .prefix(".jobsdb-write-check-")
        .tempfile_in(dir)
        .is_ok();
    if !writable {
        return Err(ScrapeError::InvalidArgument(
            "Directory path to results folder does not have write permissions".to_string(),
        ));
    }

    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(err: ScrapeError) -> String {
        match err {
            ScrapeError::InvalidArgument(msg) => msg,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn all_takes_every_page() {
        assert_eq!(resolve_num_pages("all", 37).unwrap(), (37, 37));
        assert_eq!(resolve_num_pages(" ALL ", 5).unwrap(), (5, 5));
    }

    #[test]
    fn numeric_page_counts() {
        assert_eq!(resolve_num_pages("12", 37).unwrap(), (12, 37));
        assert_eq!(resolve_num_pages("37", 37).unwrap(), (37, 37));
        assert_eq!(message(resolve_num_pages("abc", 37).unwrap_err()), "Not a number.");
        assert_eq!(message(resolve_num_pages("0", 37).unwrap_err()), "numPages>=1");
        assert_eq!(message(resolve_num_pages("-4", 37).unwrap_err()), "numPages>=1");
        assert_eq!(message(resolve_num_pages("38", 37).unwrap_err()), "numPages <= 37");
    }

    #[test]
    fn regions() {
        assert_eq!(parse_region("th").unwrap(), Region::Th);
        assert_eq!(
            message(parse_region("jp").unwrap_err()),
            "Region must be hk (hong kong) or th (thailand)"
        );
    }

    #[test]
    fn save_dir_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(validate_save_dir(dir.path()).unwrap(), dir.path());

        let file = dir.path().join("results.json");
        fs::write(&file, "[]").unwrap();
        assert!(message(validate_save_dir(&file).unwrap_err()).contains("invalid"));
        assert!(message(validate_save_dir(&dir.path().join("missing")).unwrap_err()).contains("invalid"));
    }

    #[test]
    fn write_check_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        validate_save_dir(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
