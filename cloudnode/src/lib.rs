pub mod api;
pub mod automation;
pub mod headless;
pub mod logging;
pub mod models;
pub mod signal;

// Re-export important types
pub use headless::{BrowserSession, HeadlessBrowser};
pub use models::{JobEntry, PageRequest, PageResult, ProbeReply, ProbeRequest, Region};
