//! In-process browser backend
//!
//! Renders a deterministic fake JPEG (SOI marker, the page URL, EOI marker)
//! instead of driving a real browser. All launched instances share one
//! [`StubState`] so tests can inspect launches, renders and open pages, and
//! inject failures or disconnects.

use super::{BrowserHandle, BrowserLauncher, PageHandle};
use crate::{Error, Result, Viewport};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// One completed render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRecord {
    /// Which launch (1-based) produced the render
    pub browser_id: u64,
    pub url: String,
    pub viewport: Viewport,
    pub quality: u8,
}

#[derive(Default)]
pub struct StubState {
    launches: AtomicU64,
    closes: AtomicU64,
    open_pages: AtomicUsize,
    fail_launch: AtomicBool,
    fail_render: AtomicBool,
    render_delay_ms: AtomicU64,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
    renders: Mutex<Vec<RenderRecord>>,
}

/// Launcher for stub browsers
#[derive(Clone, Default)]
pub struct StubLauncher {
    state: Arc<StubState>,
}

impl StubLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of browsers launched so far.
    pub fn launch_count(&self) -> u64 {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Number of browsers explicitly closed so far.
    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Pages opened and not yet closed.
    pub fn open_pages(&self) -> usize {
        self.state.open_pages.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> Vec<RenderRecord> {
        self.state.renders.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Make subsequent launches fail (or succeed again).
    pub fn set_fail_launch(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent navigations fail (or succeed again).
    pub fn set_fail_render(&self, fail: bool) {
        self.state.fail_render.store(fail, Ordering::SeqCst);
    }

    /// Delay every navigation by `delay`.
    pub fn set_render_delay(&self, delay: Duration) {
        self.state
            .render_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulate every launched browser losing its connection.
    pub fn disconnect_all(&self) {
        let Ok(connections) = self.state.connections.lock() else {
            return;
        };
        for c in connections.iter() {
            c.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrowserLauncher for StubLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::BrowserLaunch("stub launch disabled".into()));
        }
        let id = self.state.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let connected = Arc::new(AtomicBool::new(true));
        self.state
            .connections
            .lock()
            .map_err(|_| Error::BrowserLaunch("stub state poisoned".into()))?
            .push(connected.clone());
        Ok(Box::new(StubBrowser {
            id,
            connected,
            state: self.state.clone(),
        }))
    }
}

struct StubBrowser {
    id: u64,
    connected: Arc<AtomicBool>,
    state: Arc<StubState>,
}

#[async_trait]
impl BrowserHandle for StubBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::Render("browser disconnected".into()));
        }
        self.state.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubPage {
            browser_id: self.id,
            state: self.state.clone(),
            viewport: Viewport::default(),
            url: None,
        }))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubPage {
    browser_id: u64,
    state: Arc<StubState>,
    viewport: Viewport,
    url: Option<Url>,
}

#[async_trait]
impl PageHandle for StubPage {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.viewport = viewport;
        Ok(())
    }

    async fn goto(&mut self, url: &Url) -> Result<()> {
        let delay = self.state.render_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_render.load(Ordering::SeqCst) {
            return Err(Error::Render(format!("Navigation failed: {}", url)));
        }
        self.url = Some(url.clone());
        Ok(())
    }

    async fn screenshot_jpeg(&mut self, quality: u8) -> Result<Bytes> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| Error::Render("Screenshot before navigation".into()))?;

        self.state
            .renders
            .lock()
            .map_err(|_| Error::Render("stub state poisoned".into()))?
            .push(RenderRecord {
                browser_id: self.browser_id,
                url: url.to_string(),
                viewport: self.viewport,
                quality,
            });

        let mut out = BytesMut::with_capacity(url.as_str().len() + 4);
        out.put_slice(&[0xFF, 0xD8]);
        out.put_slice(url.as_str().as_bytes());
        out.put_slice(&[0xFF, 0xD9]);
        Ok(out.freeze())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
