//! Browser backends
//!
//! The lifecycle actor only talks to these traits. A launcher yields a
//! [`BrowserHandle`]; a handle opens [`PageHandle`]s, reports liveness and can
//! be closed. The CDP backend drives headless Chrome; the stub backend renders
//! synthetic JPEG bytes in-process and is used by tests.

use crate::{Result, Viewport};
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod stub;

/// Creates browser instances
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a fresh browser instance.
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>>;
}

/// A live connection to one browser instance
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new page context.
    async fn new_page(&self) -> Result<Box<dyn PageHandle>>;

    /// Whether the connection to the browser is still usable.
    async fn is_connected(&self) -> bool;

    /// Terminate the browser.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A page context within a browser
#[async_trait]
pub trait PageHandle: Send {
    /// Resize the page's viewport.
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Navigate and wait for the load to settle.
    async fn goto(&mut self, url: &Url) -> Result<()>;

    /// Capture the full page as JPEG.
    async fn screenshot_jpeg(&mut self, quality: u8) -> Result<Bytes>;

    /// Close the page context.
    async fn close(self: Box<Self>) -> Result<()>;
}
