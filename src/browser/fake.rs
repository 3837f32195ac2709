//! Scripted in-memory browser for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::{Browser, Launcher, PageContext};
use crate::config::BrowserSettings;
use crate::error::{Result, ScrapeError};

#[derive(Default)]
pub struct FakeBrowser {
    pages: Mutex<HashMap<String, String>>,
    /// Remaining transient failures per URL.
    failures: Mutex<HashMap<String, u32>>,
    /// Remaining `content` failures per URL, as after a renderer crash.
    read_failures: Mutex<HashMap<String, u32>>,
    visits: Mutex<Vec<String>>,
    active: AtomicUsize,
    opened: AtomicUsize,
    shut_down: AtomicBool,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBrowser::default())
    }

    pub fn page(&self, url: &str, html: impl Into<String>) {
        self.pages.lock().unwrap().insert(url.to_string(), html.into());
    }

    /// Fail the next `times` navigations to `url` with a timeout.
    pub fn fail(&self, url: &str, times: u32) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    /// Fail the next `times` DOM reads on `url` after it loaded.
    pub fn crash_reads(&self, url: &str, times: u32) {
        self.read_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn visit_count(&self, url: &str) -> usize {
        self.visits().iter().filter(|v| v.as_str() == url).count()
    }

    pub fn contexts_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for Arc<FakeBrowser> {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            browser: Arc::clone(self),
            current: None,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct FakeContext {
    browser: Arc<FakeBrowser>,
    current: Option<(String, String)>,
}

impl FakeContext {
    fn html(&self) -> &str {
        self.current.as_ref().map(|(_, h)| h.as_str()).unwrap_or("")
    }
}

#[async_trait]
impl PageContext for FakeContext {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.browser.visits.lock().unwrap().push(url.to_string());
        {
            let mut failures = self.browser.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScrapeError::NavigationTimeout {
                        url: url.to_string(),
                        ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
        let html = self.browser.pages.lock().unwrap().get(url).cloned();
        match html {
            Some(html) => {
                self.current = Some((url.to_string(), html));
                Ok(())
            }
            None => Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            }),
        }
    }

    async fn has_element(&self, selector: &str) -> Result<bool> {
        let Ok(sel) = Selector::parse(selector) else {
            return Ok(false);
        };
        Ok(Html::parse_document(self.html()).select(&sel).next().is_some())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        if self.has_element(selector).await? {
            Ok(())
        } else {
            Err(ScrapeError::Session(format!("no element {}", selector)))
        }
    }

    async fn content(&self) -> Result<String> {
        if let Some((url, _)) = &self.current {
            let mut failures = self.browser.read_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScrapeError::Session("read content: Target closed".into()));
                }
            }
        }
        Ok(self.html().to_string())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.current.as_ref().map(|(u, _)| u.clone()).unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.browser.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    pub browser: Arc<FakeBrowser>,
    pub fail_launch: bool,
    pub launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(browser: Arc<FakeBrowser>) -> Self {
        FakeLauncher {
            browser,
            fail_launch: false,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        FakeLauncher {
            fail_launch: true,
            ..FakeLauncher::new(FakeBrowser::new())
        }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _settings: &BrowserSettings) -> Result<Arc<dyn Browser>> {
        if self.fail_launch {
            return Err(ScrapeError::BrowserNotFound);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Arc::clone(&self.browser)))
    }
}
