use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::browser::{Launcher, PageContext};
use crate::config::Settings;
use crate::db::ProgressStore;
use crate::error::{Result, ScrapeError};
use crate::navigator::{Navigator, PageOutcome, StopReason};
use crate::record::Record;
use crate::session::{Session, SessionManager};
use crate::sink::DedupSink;
use crate::targets::{Enriched, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub target: String,
    pub pages_visited: usize,
    pub pages_skipped: usize,
    pub records_admitted: usize,
    pub duplicates: usize,
    /// Leads rejected by the target's enrichment filter.
    pub filtered: usize,
    /// Leads dropped because their follow-up page never loaded.
    pub enrichment_failed: usize,
    pub rows_written: usize,
}

impl TargetStats {
    fn new(target: &str) -> Self {
        TargetStats {
            target: target.to_string(),
            ..TargetStats::default()
        }
    }

    fn add(&mut self, other: &TargetStats) {
        self.pages_visited += other.pages_visited;
        self.pages_skipped += other.pages_skipped;
        self.records_admitted += other.records_admitted;
        self.duplicates += other.duplicates;
        self.filtered += other.filtered;
        self.enrichment_failed += other.enrichment_failed;
        self.rows_written += other.rows_written;
    }
}

/// Drives every configured target through session, pagination,
/// extraction and the dedup sink.
pub struct Pipeline<'a> {
    settings: &'a Settings,
    targets: Vec<Arc<dyn Target>>,
    sessions: SessionManager<'a>,
    progress: Option<ProgressStore>,
    state: RunState,
    stats: Vec<TargetStats>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        launcher: &'a dyn Launcher,
        targets: Vec<Arc<dyn Target>>,
    ) -> Self {
        Pipeline {
            settings,
            targets,
            sessions: SessionManager::new(launcher),
            progress: None,
            state: RunState::Idle,
            stats: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Per-target counters of the targets that finished.
    pub fn stats(&self) -> &[TargetStats] {
        &self.stats
    }

    pub fn totals(&self) -> TargetStats {
        let mut total = TargetStats::new("total");
        for s in &self.stats {
            total.add(s);
        }
        total
    }

    /// Run all targets in order. Stops at the first fatal error.
    pub async fn run(&mut self) -> RunState {
        if self.state != RunState::Idle {
            return self.state;
        }
        self.state = RunState::Running;
        info!(targets = self.targets.len(), "Run started");

        if self.settings.resume {
            match ProgressStore::open(&self.settings.state_db) {
                Ok(store) => self.progress = Some(store),
                Err(e) => return self.fail(None, e.to_string()),
            }
        }

        let targets = self.targets.clone();
        for target in targets {
            match self.run_target(target.as_ref()).await {
                Ok(stats) => {
                    info!(
                        target_name = %stats.target,
                        pages = stats.pages_visited,
                        admitted = stats.records_admitted,
                        duplicates = stats.duplicates,
                        skipped = stats.pages_skipped,
                        "Target finished"
                    );
                    self.stats.push(stats);
                }
                Err(e) => return self.fail(Some(target.name()), e.to_string()),
            }
        }

        let total = self.totals();
        info!(
            pages = total.pages_visited,
            admitted = total.records_admitted,
            duplicates = total.duplicates,
            skipped = total.pages_skipped,
            "Run succeeded"
        );
        self.state = RunState::Succeeded;
        self.state
    }

    /// Mark an interrupted run as failed and stop the browser.
    pub async fn abort(&mut self, cause: ScrapeError) {
        self.fail(None, cause.to_string());
        if let Err(e) = self.sessions.shutdown().await {
            warn!("browser shutdown failed: {}", e);
        }
    }

    fn fail(&mut self, target: Option<&str>, cause: String) -> RunState {
        match target {
            Some(name) => error!(target_name = name, "Fatal: {}", cause),
            None => error!("Fatal: {}", cause),
        }
        self.state = RunState::Failed;
        self.state
    }

    async fn run_target(&mut self, target: &dyn Target) -> Result<TargetStats> {
        let settings = self.settings;
        let path = settings.output_path(target.name());
        let mut sink = DedupSink::open(
            &path,
            target.columns(),
            target.key_rule(),
            settings.output_mode,
        )?;

        let mut session = self.sessions.acquire(&settings.browser).await?;
        let crawled = self.crawl(target, &mut sink, &mut session).await;
        if let Err(e) = self.sessions.release(session).await {
            warn!(target_name = target.name(), "session release failed: {}", e);
        }

        let mut stats = crawled?;
        stats.records_admitted = sink.admitted();
        stats.duplicates += sink.duplicates();
        sink.flush()?;
        stats.rows_written = sink.admitted();
        Ok(stats)
    }

    async fn crawl(
        &self,
        target: &dyn Target,
        sink: &mut DedupSink,
        session: &mut Session,
    ) -> Result<TargetStats> {
        let nav = Navigator::new(&self.settings.navigation);
        let max_pages = self.settings.navigation.max_pages;
        let limit = self.settings.max_records;
        let mut stats = TargetStats::new(target.name());

        for query in target.queries() {
            let start = match &self.progress {
                Some(store) => store.next_page(&query.id)?,
                None => 1,
            };
            if start > 1 {
                info!(query = %query.id, page = start, "Resuming");
            }

            let pb = ProgressBar::new(u64::from(max_pages.saturating_sub(start - 1)));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            pb.set_message(query.id.clone());

            let mut pages = nav.paginate(target, &query, start);
            while let Some(outcome) = pages.next(&nav, session.context()).await? {
                pb.inc(1);
                match outcome {
                    PageOutcome::Skipped {
                        url,
                        page_number,
                        error,
                    } => {
                        stats.pages_skipped += 1;
                        warn!(
                            target_name = target.name(),
                            url = %url,
                            page = page_number,
                            "Page skipped: {}",
                            error
                        );
                    }
                    PageOutcome::Loaded(page) => {
                        stats.pages_visited += 1;
                        let records = target.extract(&page, &query);
                        let extracted = records.len();
                        let mut page_keys = HashSet::new();
                        let fresh: Vec<Record> = records
                            .into_iter()
                            .filter(|r| {
                                !sink.contains(r.key()) && page_keys.insert(r.key().to_string())
                            })
                            .collect();
                        stats.duplicates += extracted - fresh.len();
                        debug!(
                            url = %page.url,
                            extracted,
                            new = fresh.len(),
                            "Page extracted"
                        );
                        pages.report_new_records(fresh.len());

                        for record in fresh {
                            if limit.is_some_and(|l| sink.admitted() >= l) {
                                break;
                            }
                            let record = match target.enrichment_url(&record) {
                                Some(url) => {
                                    let ctx = session.context();
                                    let enriched = self
                                        .enrich(&nav, ctx, target, record, url, &mut stats)
                                        .await?;
                                    match enriched {
                                        Some(r) => r,
                                        None => continue,
                                    }
                                }
                                None => record,
                            };
                            sink.offer(record);
                        }
                        if limit.is_some_and(|l| sink.admitted() >= l) {
                            pages.stop(StopReason::RecordLimit);
                        }
                    }
                }

                if let Some(store) = &self.progress {
                    sink.flush()?;
                    store.save(&query.id, pages.next_page_number())?;
                }
            }
            pb.finish_and_clear();

            let reason = pages.stop_reason();
            info!(
                target_name = target.name(),
                query = %query.id,
                reason = %reason.map(|r| r.to_string()).unwrap_or_default(),
                "Listing finished"
            );
            if reason == Some(StopReason::RecordLimit) {
                break;
            }
            if let Some(store) = &self.progress {
                store.clear(&query.id)?;
            }
        }
        Ok(stats)
    }

    /// Resolve the record through its follow-up page, then through the
    /// fallback page if the first one leaves it unresolved. `None` drops it.
    async fn enrich(
        &self,
        nav: &Navigator<'_>,
        ctx: &mut dyn PageContext,
        target: &dyn Target,
        record: Record,
        url: String,
        stats: &mut TargetStats,
    ) -> Result<Option<Record>> {
        let ready = target.enrichment_ready_selector();
        let fallback = target.fallback_enrichment_url(&record);
        let mut load_failed = false;
        let mut unresolved = String::new();

        for url in std::iter::once(url).chain(fallback) {
            match nav.load_detail(ctx, target, &url, ready).await {
                Ok(page) => match target.enrich(&record, &page.html) {
                    Enriched::Keep(r) => return Ok(Some(r)),
                    Enriched::Drop(reason) => {
                        debug!(key = record.key(), "lead filtered: {}", reason);
                        stats.filtered += 1;
                        return Ok(None);
                    }
                    Enriched::Unresolved(reason) => {
                        debug!(key = record.key(), url = %url, "lead unresolved: {}", reason);
                        load_failed = false;
                        unresolved = reason;
                    }
                },
                Err(e) if e.is_transient() => {
                    warn!(
                        target_name = target.name(),
                        url = %url,
                        "Enrichment page failed: {}",
                        e
                    );
                    load_failed = true;
                }
                Err(e) => return Err(e),
            }
        }

        if load_failed {
            stats.enrichment_failed += 1;
        } else {
            debug!(key = record.key(), "lead filtered: {}", unresolved);
            stats.filtered += 1;
        }
        Ok(None)
    }
}
