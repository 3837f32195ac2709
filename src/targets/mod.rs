//! Site definitions.
//!
//! A target knows how to address its listing pages, when a rendered page
//! is ready, and how to turn page HTML into records. Everything here is
//! pure so it can be tested against saved HTML.

pub mod github;
pub mod stepstone;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Result, ScrapeError};
use crate::record::{KeyRule, Record};

pub const KNOWN_TARGETS: &[&str] = &[github::NAME, stepstone::NAME];

/// One paginated listing, e.g. a single search or a single repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Stable id, used for progress tracking.
    pub id: String,
    /// Fixed fields copied onto every record of this listing.
    pub context: Vec<(&'static str, String)>,
}

/// A rendered page handed from the navigator to extraction.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub page_number: u32,
    pub html: String,
}

/// Outcome of reading a follow-up page for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enriched {
    Keep(Record),
    /// Record filtered out, with the reason.
    Drop(String),
    /// The page did not answer; try the fallback page if there is one.
    Unresolved(String),
}

pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    /// CSV header, in output order.
    fn columns(&self) -> &[&'static str];

    fn key_rule(&self) -> KeyRule;

    fn queries(&self) -> Vec<Query>;

    /// URL of the 1-based `page` of `query`.
    fn page_url(&self, query: &Query, page: u32) -> String;

    /// Selector whose presence means the listing has rendered.
    fn ready_selector(&self) -> &str;

    /// Cookie banner button clicked after navigation, if any.
    fn consent_selector(&self) -> Option<&str> {
        None
    }

    /// True for anti-bot interstitials; treated as a transient failure.
    fn is_blocked(&self, html: &str) -> bool {
        let lower = html.to_lowercase();
        lower.contains("access denied") || lower.contains("permission to access")
    }

    /// Records on one listing page. Malformed entries are logged and skipped.
    fn extract(&self, page: &RenderedPage, query: &Query) -> Vec<Record>;

    fn has_next_page(&self, html: &str) -> bool;

    /// Follow-up page to load for `record` before admitting it.
    fn enrichment_url(&self, _record: &Record) -> Option<String> {
        None
    }

    /// Second page to try when the first one leaves the record unresolved.
    fn fallback_enrichment_url(&self, _record: &Record) -> Option<String> {
        None
    }

    /// Element awaited on follow-up pages. Its absence is not an error.
    fn enrichment_ready_selector(&self) -> Option<&str> {
        None
    }

    fn enrich(&self, record: &Record, _html: &str) -> Enriched {
        Enriched::Keep(record.clone())
    }
}

/// Instantiate the selected targets, in the order given.
pub fn build(settings: &Settings) -> Result<Vec<Arc<dyn Target>>> {
    let names: Vec<&str> = if settings.targets.is_empty() {
        KNOWN_TARGETS.to_vec()
    } else {
        settings.targets.iter().map(|s| s.as_str()).collect()
    };

    let mut targets: Vec<Arc<dyn Target>> = Vec::new();
    for name in names {
        let target: Arc<dyn Target> = match name.trim().to_lowercase().as_str() {
            github::NAME => Arc::new(github::GithubIssues::new(&settings.github)),
            stepstone::NAME => Arc::new(stepstone::Stepstone::new(&settings.stepstone)),
            other => {
                return Err(ScrapeError::Config(format!(
                    "unknown target {:?} (known: {})",
                    other,
                    KNOWN_TARGETS.join(", ")
                )))
            }
        };
        if targets.iter().any(|t| t.name() == target.name()) {
            continue;
        }
        targets.push(target);
    }
    Ok(targets)
}

/// Resolve `href` against the page URL.
pub(crate) fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_all_targets_by_default() {
        let targets = build(&Settings::default()).unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["github", "stepstone"]);
    }

    #[test]
    fn selection_is_ordered_and_deduplicated() {
        let settings = Settings {
            targets: vec!["stepstone".into(), "GitHub".into(), "stepstone".into()],
            ..Settings::default()
        };
        let targets = build(&settings).unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["stepstone", "github"]);
    }

    #[test]
    fn unknown_target_is_config_error() {
        let settings = Settings {
            targets: vec!["monster".into()],
            ..Settings::default()
        };
        assert!(matches!(build(&settings), Err(ScrapeError::Config(_))));
    }

    #[test]
    fn absolutize_joins_relative_links() {
        assert_eq!(
            absolutize("https://www.stepstone.de/jobs/pflege", "/cmp/de/acme-123/jobs").as_deref(),
            Some("https://www.stepstone.de/cmp/de/acme-123/jobs")
        );
        assert_eq!(
            absolutize("https://a.example/x", "https://b.example/y").as_deref(),
            Some("https://b.example/y")
        );
        assert_eq!(absolutize("https://a.example/x", "  "), None);
    }
}
