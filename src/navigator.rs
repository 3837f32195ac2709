use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::PageContext;
use crate::config::NavigationSettings;
use crate::error::{Result, ScrapeError};
use crate::targets::{Query, RenderedPage, Target};

const READY_POLL_MS: u64 = 250;

/// What a missing readiness selector means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// The page failed to render; transient.
    Required,
    /// Read whatever rendered once the wait is over.
    BestEffort,
}

/// Drives one browsing context through listing and follow-up pages.
pub struct Navigator<'a> {
    settings: &'a NavigationSettings,
}

impl<'a> Navigator<'a> {
    pub fn new(settings: &'a NavigationSettings) -> Self {
        Navigator { settings }
    }

    /// Navigate, dismiss the consent banner, wait for `ready` and snapshot the DOM.
    pub async fn load(
        &self,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        url: &str,
        page_number: u32,
        ready: Option<&str>,
    ) -> Result<RenderedPage> {
        self.fetch(ctx, target, url, page_number, ready, Readiness::Required)
            .await
    }

    async fn fetch(
        &self,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        url: &str,
        page_number: u32,
        ready: Option<&str>,
        readiness: Readiness,
    ) -> Result<RenderedPage> {
        ctx.goto(url, Duration::from_millis(self.settings.nav_timeout_ms))
            .await?;

        let on_page = |e| page_error(url, e);
        if let Some(consent) = target.consent_selector() {
            if ctx.has_element(consent).await.map_err(on_page)? {
                if let Err(e) = ctx.click(consent).await {
                    debug!("consent banner click failed: {}", e);
                }
            }
        }

        // Interstitials never carry the readiness selector.
        if target.is_blocked(&ctx.content().await.map_err(on_page)?) {
            return Err(ScrapeError::Blocked {
                url: url.to_string(),
            });
        }

        if let Some(selector) = ready {
            match self.wait_ready(ctx, url, selector).await {
                Ok(()) => {}
                Err(ScrapeError::ReadinessTimeout { .. }) if readiness == Readiness::BestEffort => {
                    debug!(url, selector, "readiness wait expired, reading page as is");
                }
                Err(e) => return Err(e),
            }
        }

        let html = ctx.content().await.map_err(on_page)?;
        if target.is_blocked(&html) {
            return Err(ScrapeError::Blocked {
                url: url.to_string(),
            });
        }
        // Links are resolved against where redirects ended up.
        let url = match ctx.current_url().await {
            Ok(current) if !current.is_empty() => current,
            _ => url.to_string(),
        };
        Ok(RenderedPage {
            url,
            page_number,
            html,
        })
    }

    async fn wait_ready(&self, ctx: &mut dyn PageContext, url: &str, selector: &str) -> Result<()> {
        let timeout = Duration::from_millis(self.settings.ready_timeout_ms);
        let started = tokio::time::Instant::now();
        loop {
            if ctx.has_element(selector).await.map_err(|e| page_error(url, e))? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ScrapeError::ReadinessTimeout {
                    url: url.to_string(),
                    selector: selector.to_string(),
                    ms: self.settings.ready_timeout_ms,
                });
            }
            tokio::time::sleep(Duration::from_millis(READY_POLL_MS)).await;
        }
    }

    /// `load` with exponential backoff on transient failures. The last
    /// transient error is returned once `max_attempts` is used up; fatal
    /// errors return immediately.
    pub async fn load_with_retry(
        &self,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        url: &str,
        page_number: u32,
        ready: Option<&str>,
    ) -> Result<RenderedPage> {
        self.retrying(ctx, target, url, page_number, ready, Readiness::Required)
            .await
    }

    /// Follow-up page for one record. Same retry policy as listings, but
    /// a missing `ready` element only shortens the wait.
    pub async fn load_detail(
        &self,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        url: &str,
        ready: Option<&str>,
    ) -> Result<RenderedPage> {
        self.retrying(ctx, target, url, 0, ready, Readiness::BestEffort)
            .await
    }

    async fn retrying(
        &self,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        url: &str,
        page_number: u32,
        ready: Option<&str>,
        readiness: Readiness,
    ) -> Result<RenderedPage> {
        let max = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .fetch(ctx, target, url, page_number, ready, readiness)
                .await
            {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < max => {
                    let backoff =
                        Duration::from_millis(self.settings.base_backoff_ms * 2u64.pow(attempt - 1));
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt,
                        max,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Listing pages of `query`, starting at `start_page`.
    pub fn paginate<'t>(
        &self,
        target: &'t dyn Target,
        query: &'t Query,
        start_page: u32,
    ) -> Paginator<'t> {
        Paginator {
            target,
            query,
            next: start_page.max(1),
            max_pages: self.settings.max_pages,
            stopped: None,
        }
    }
}

/// Page reads that fail after navigation (crashed renderer, closed target)
/// count as a failed load of `url`.
fn page_error(url: &str, e: ScrapeError) -> ScrapeError {
    match e {
        ScrapeError::Session(reason) => ScrapeError::Navigation {
            url: url.to_string(),
            reason,
        },
        other => other,
    }
}

/// Why a listing stopped producing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxPages,
    NoNextPage,
    NoNewRecords,
    RecordLimit,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::MaxPages => "page limit",
            StopReason::NoNextPage => "no next page",
            StopReason::NoNewRecords => "no new records",
            StopReason::RecordLimit => "record limit",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum PageOutcome {
    Loaded(RenderedPage),
    /// Transient failures used up the retry budget.
    Skipped {
        url: String,
        page_number: u32,
        error: ScrapeError,
    },
}

/// Bounded, forward-only sequence of listing pages.
///
/// Page numbers never exceed `max_pages`. The sequence also ends after a
/// page without a next-page link, or when the caller reports a page that
/// produced no new records.
pub struct Paginator<'t> {
    target: &'t dyn Target,
    query: &'t Query,
    next: u32,
    max_pages: u32,
    stopped: Option<StopReason>,
}

impl<'t> Paginator<'t> {
    /// Next page, `Ok(None)` when finished, `Err` only for fatal failures.
    pub async fn next(
        &mut self,
        nav: &Navigator<'_>,
        ctx: &mut dyn PageContext,
    ) -> Result<Option<PageOutcome>> {
        if self.stopped.is_some() {
            return Ok(None);
        }
        if self.next > self.max_pages {
            self.stopped = Some(StopReason::MaxPages);
            return Ok(None);
        }

        let page_number = self.next;
        let url = self.target.page_url(self.query, page_number);
        self.next += 1;

        let ready = Some(self.target.ready_selector());
        match nav
            .load_with_retry(ctx, self.target, &url, page_number, ready)
            .await
        {
            Ok(page) => {
                if !self.target.has_next_page(&page.html) {
                    self.stop(StopReason::NoNextPage);
                }
                Ok(Some(PageOutcome::Loaded(page)))
            }
            Err(error) if error.is_transient() => Ok(Some(PageOutcome::Skipped {
                url,
                page_number,
                error,
            })),
            Err(error) => Err(error),
        }
    }

    /// Feed back how many previously unseen records the last page had.
    pub fn report_new_records(&mut self, count: usize) {
        if count == 0 {
            self.stop(StopReason::NoNewRecords);
        }
    }

    /// End the sequence; the first reason wins.
    pub fn stop(&mut self, reason: StopReason) {
        self.stopped.get_or_insert(reason);
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Page number the next call would load.
    pub fn next_page_number(&self) -> u32 {
        self.next
    }
}
