use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::browser::{Browser, Launcher, PageContext};
use crate::config::BrowserSettings;
use crate::error::Result;

/// Owns at most one browser process and hands out browsing contexts.
///
/// The process is launched on the first `acquire` and terminated by the
/// `release` that closes the last context. Dropping the manager without
/// releasing (panic, cancelled future) drops the browser handle, which
/// kills the process.
pub struct SessionManager<'a> {
    launcher: &'a dyn Launcher,
    browser: Option<Arc<dyn Browser>>,
}

/// A browsing context checked out of a [`SessionManager`].
pub struct Session {
    context: Box<dyn PageContext>,
}

impl Session {
    pub fn context(&mut self) -> &mut dyn PageContext {
        self.context.as_mut()
    }
}

impl<'a> SessionManager<'a> {
    pub fn new(launcher: &'a dyn Launcher) -> Self {
        SessionManager {
            launcher,
            browser: None,
        }
    }

    /// Launch the browser if needed and open a fresh context.
    /// Launch failures are fatal and never retried.
    pub async fn acquire(&mut self, settings: &BrowserSettings) -> Result<Session> {
        let browser = match &self.browser {
            Some(b) => Arc::clone(b),
            None => {
                info!(
                    headless = settings.headless,
                    viewport = %format!("{}x{}", settings.viewport_width, settings.viewport_height),
                    "Launching browser"
                );
                let b = self.launcher.launch(settings).await?;
                self.browser = Some(Arc::clone(&b));
                b
            }
        };

        let context = browser.new_context().await?;
        debug!(active = browser.active_contexts(), "Context acquired");
        Ok(Session { context })
    }

    /// Close the context; shut the browser down if it was the last one.
    pub async fn release(&mut self, session: Session) -> Result<()> {
        let close_result = session.context.close().await;
        if let Err(e) = &close_result {
            warn!("closing context failed: {}", e);
        }

        let idle = self
            .browser
            .as_ref()
            .map(|b| b.active_contexts() == 0)
            .unwrap_or(false);
        if idle {
            if let Some(browser) = self.browser.take() {
                info!("Shutting down browser");
                browser.shutdown().await?;
            }
        }
        close_result
    }

    /// Terminate the browser regardless of open contexts.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.browser.take() {
            Some(browser) => {
                info!("Shutting down browser");
                browser.shutdown().await
            }
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.browser.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeBrowser, FakeLauncher};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn release_of_last_context_shuts_browser_down() {
        let browser = FakeBrowser::new();
        let launcher = FakeLauncher::new(Arc::clone(&browser));
        let mut sessions = SessionManager::new(&launcher);
        let settings = BrowserSettings::default();

        let a = sessions.acquire(&settings).await.unwrap();
        let b = sessions.acquire(&settings).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(browser.active_contexts(), 2);

        sessions.release(a).await.unwrap();
        assert!(sessions.is_running());
        assert!(!browser.is_shut_down());

        sessions.release(b).await.unwrap();
        assert!(!sessions.is_running());
        assert!(browser.is_shut_down());
        assert_eq!(browser.active_contexts(), 0);
    }

    #[tokio::test]
    async fn launch_failure_is_fatal() {
        let launcher = FakeLauncher::failing();
        let mut sessions = SessionManager::new(&launcher);
        let err = sessions
            .acquire(&BrowserSettings::default())
            .await
            .err()
            .unwrap();
        assert!(!err.is_transient());
        assert!(!sessions.is_running());
    }

    #[tokio::test]
    async fn shutdown_with_open_context() {
        let browser = FakeBrowser::new();
        let launcher = FakeLauncher::new(Arc::clone(&browser));
        let mut sessions = SessionManager::new(&launcher);

        let _abandoned = sessions.acquire(&BrowserSettings::default()).await.unwrap();
        sessions.shutdown().await.unwrap();
        assert!(browser.is_shut_down());
        assert!(!sessions.is_running());
    }

    #[tokio::test]
    async fn relaunches_after_full_release() {
        let browser = FakeBrowser::new();
        let launcher = FakeLauncher::new(Arc::clone(&browser));
        let mut sessions = SessionManager::new(&launcher);
        let settings = BrowserSettings::default();

        let s = sessions.acquire(&settings).await.unwrap();
        sessions.release(s).await.unwrap();
        let s = sessions.acquire(&settings).await.unwrap();
        sessions.release(s).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }
}
