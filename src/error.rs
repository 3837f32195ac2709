use thiserror::Error;

/// How the controller reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Aborts the run.
    Fatal,
    /// Retried with backoff, then the page is skipped.
    Transient,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser executable not found (set browser.chrome_path or SCRAPER_BROWSER__CHROME_PATH)")]
    BrowserNotFound,

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("browser session error: {0}")]
    Session(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("navigation to {url} timed out after {ms}ms")]
    NavigationTimeout { url: String, ms: u64 },

    #[error("page {url} not ready: `{selector}` missing after {ms}ms")]
    ReadinessTimeout {
        url: String,
        selector: String,
        ms: u64,
    },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("access denied by {url}")]
    Blocked { url: String },

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("progress store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl ScrapeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ScrapeError::NavigationTimeout { .. }
            | ScrapeError::ReadinessTimeout { .. }
            | ScrapeError::Navigation { .. }
            | ScrapeError::Blocked { .. } => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_failures_are_transient() {
        let timeout = ScrapeError::NavigationTimeout {
            url: "https://example.com".into(),
            ms: 100,
        };
        assert!(timeout.is_transient());
        assert!(ScrapeError::Blocked { url: "x".into() }.is_transient());
    }

    #[test]
    fn environment_failures_are_fatal() {
        assert_eq!(ScrapeError::BrowserNotFound.class(), ErrorClass::Fatal);
        assert_eq!(ScrapeError::Launch("boom".into()).class(), ErrorClass::Fatal);
        assert_eq!(ScrapeError::Config("bad".into()).class(), ErrorClass::Fatal);
        assert_eq!(ScrapeError::Cancelled("ctrl-c".into()).class(), ErrorClass::Fatal);
    }
}
