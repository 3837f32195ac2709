//! Browser seam.
//!
//! The pipeline only talks to these traits. `chromium` drives a real
//! Chromium through the DevTools protocol; `fake` serves scripted pages
//! to tests.

pub mod chromium;
#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::BrowserSettings;
use crate::error::Result;

/// Starts a browser process.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Arc<dyn Browser>>;
}

/// A running browser process.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open an isolated browsing context with one page in it.
    async fn new_context(&self) -> Result<Box<dyn PageContext>>;
    /// Terminate the browser process.
    async fn shutdown(&self) -> Result<()>;
    fn active_contexts(&self) -> usize;
}

/// One page inside an isolated context.
#[async_trait]
pub trait PageContext: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;
    /// True once `selector` matches an element.
    async fn has_element(&self, selector: &str) -> Result<bool>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Serialized DOM of the current page.
    async fn content(&self) -> Result<String>;
    async fn current_url(&self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;
}
