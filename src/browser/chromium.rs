//! Chromium driven through chromiumoxide.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Browser, Launcher, PageContext};
use crate::config::BrowserSettings;
use crate::error::{Result, ScrapeError};

/// Find the Chromium binary: explicit setting, `CHROME_PATH`, then `PATH`.
pub fn find_chromium(settings: &BrowserSettings) -> Option<PathBuf> {
    if let Some(p) = &settings.chrome_path {
        return p.exists().then(|| p.clone());
    }
    if let Ok(p) = std::env::var("CHROME_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable", "chrome"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

pub struct ChromiumLauncher;

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Arc<dyn Browser>> {
        Ok(Arc::new(ChromiumBrowser::launch(settings).await?))
    }
}

pub struct ChromiumBrowser {
    browser: Arc<Mutex<CdpBrowser>>,
    handler: JoinHandle<()>,
    user_agent: String,
    active: Arc<AtomicUsize>,
}

impl ChromiumBrowser {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let chrome = find_chromium(settings).ok_or(ScrapeError::BrowserNotFound)?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome)
            .no_sandbox()
            .window_size(settings.viewport_width, settings.viewport_height)
            .viewport(Viewport {
                width: settings.viewport_width,
                height: settings.viewport_height,
                ..Viewport::default()
            })
            .request_timeout(Duration::from_millis(settings.launch_timeout_ms))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-http2")
            .arg("--disable-blink-features=AutomationControlled");
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        let config = builder.build().map_err(ScrapeError::Launch)?;

        let launched = tokio::time::timeout(
            Duration::from_millis(settings.launch_timeout_ms),
            CdpBrowser::launch(config),
        )
        .await
        .map_err(|_| {
            ScrapeError::Launch(format!("no response within {}ms", settings.launch_timeout_ms))
        })?;
        let (browser, mut handler) = launched.map_err(|e| ScrapeError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {}", e);
                }
            }
        });

        Ok(ChromiumBrowser {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            user_agent: settings.user_agent.clone(),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        let browser = self.browser.lock().await;
        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| ScrapeError::Session(format!("create context: {}", e)))?
            .result
            .browser_context_id
            .clone();

        let mut params = CreateTargetParams::new("about:blank");
        params.browser_context_id = Some(context_id.clone());
        let page = browser
            .new_page(params)
            .await
            .map_err(|e| ScrapeError::Session(format!("open page: {}", e)))?;
        page.set_user_agent(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(|e| ScrapeError::Session(format!("set user agent: {}", e)))?;

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChromiumContext {
            page,
            context_id,
            browser: Arc::clone(&self.browser),
            active: Arc::clone(&self.active),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("browser close failed, killing process: {}", e);
            let _ = browser.kill().await;
        }
        let _ = browser.wait().await;
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for ChromiumBrowser {
    // chromiumoxide kills the child process when `CdpBrowser` drops.
    fn drop(&mut self) {
        self.handler.abort();
    }
}

pub struct ChromiumContext {
    page: Page,
    context_id: BrowserContextId,
    browser: Arc<Mutex<CdpBrowser>>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl PageContext for ChromiumContext {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let nav = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, nav).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScrapeError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ScrapeError::NavigationTimeout {
                url: url.to_string(),
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn has_element(&self, selector: &str) -> Result<bool> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| ScrapeError::Session(format!("find {}: {}", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| ScrapeError::Session(format!("click {}: {}", selector, e)))?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| ScrapeError::Session(format!("read content: {}", e)))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| ScrapeError::Session(format!("read url: {}", e)))?;
        Ok(url.unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            page,
            context_id,
            browser,
            active,
        } = *self;
        active.fetch_sub(1, Ordering::SeqCst);
        let _ = page.close().await;
        browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
            .map_err(|e| ScrapeError::Session(format!("dispose context: {}", e)))?;
        Ok(())
    }
}
