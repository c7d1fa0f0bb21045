use regex::Regex;
use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;

/// Width of the console progress bar in cells
pub const BAR_WIDTH: usize = 40;

/// Render `Progress: [███---] NN.NN%`
pub fn render_progress_bar(completed: u32, total: u32, width: usize) -> String {
    let ratio = if total == 0 {
        1.0
    } else {
        (completed as f64 / total as f64).min(1.0)
    };
    let filled = ((ratio * width as f64).round() as usize).min(width);

    format!(
        "Progress: [{}{}] {:.2}%",
        "█".repeat(filled),
        "-".repeat(width - filled),
        ratio * 100.0
    )
}

/// Writes progress bars to a console-like sink
///
/// On a terminal the bar is redrawn in place. Otherwise each update is its
/// own line so that line-oriented readers see every value.
pub struct ProgressPrinter<W: Write> {
    sink: W,
    total: u32,
    in_place: bool,
    shown: Option<u32>,
}

impl ProgressPrinter<io::Stdout> {
    pub fn stdout(total: u32) -> Self {
        let in_place = io::stdout().is_terminal();
        Self::new(io::stdout(), total, in_place)
    }
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(sink: W, total: u32, in_place: bool) -> Self {
        Self {
            sink,
            total,
            in_place,
            shown: None,
        }
    }

    /// Show `completed` pages, never moving backwards
    pub fn update(&mut self, completed: u32) -> io::Result<()> {
        let completed = self.shown.map_or(completed, |shown| shown.max(completed));
        self.shown = Some(completed);

        let bar = render_progress_bar(completed, self.total, BAR_WIDTH);
        if self.in_place {
            write!(self.sink, "\r{}", bar)?;
        } else {
            writeln!(self.sink, "{}", bar)?;
        }
        self.sink.flush()
    }

    /// End an in-place bar with a newline
    pub fn finish(&mut self) -> io::Result<()> {
        if self.in_place && self.shown.is_some() {
            writeln!(self.sink)?;
        }
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Structured reading of one line of scrape output
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Percent(f64),
    Pages { current: u32, total: u32 },
    Log(String),
}

static PERCENT: OnceLock<Option<Regex>> = OnceLock::new();
static PAGES: OnceLock<Option<Regex>> = OnceLock::new();

fn percent_regex() -> Option<&'static Regex> {
    PERCENT.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").ok()).as_ref()
}

fn pages_regex() -> Option<&'static Regex> {
    PAGES.get_or_init(|| Regex::new(r"(?i)page\s+(\d+)\s+of\s+(\d+)").ok()).as_ref()
}

/// Classify a line printed by the scraper
///
/// A percentage such as `42.50%` wins over `page X of Y`. Anything else is a
/// plain log line.
pub fn parse_progress_line(line: &str) -> ProgressEvent {
    let line = line.trim_start_matches('\r').trim_end();

    if let Some(percent) = percent_regex()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps[1].parse::<f64>().ok())
    {
        return ProgressEvent::Percent(percent);
    }

    if let Some((current, total)) = pages_regex()
        .and_then(|re| re.captures(line))
        .and_then(|caps| Some((caps[1].parse::<u32>().ok()?, caps[2].parse::<u32>().ok()?)))
    {
        return ProgressEvent::Pages { current, total };
    }

    ProgressEvent::Log(line.to_string())
}
