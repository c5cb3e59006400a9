//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)
//!
//! `headless_chrome` exposes a blocking API, so every launched browser is
//! owned by a dedicated worker thread. Async callers send commands over a
//! channel and await the reply on a oneshot. Pages are tabs kept in a map on
//! the worker thread and addressed by id.

use super::{BrowserHandle, BrowserLauncher, PageHandle};
use crate::{Error, LaunchConfig, Result, Viewport};
use async_trait::async_trait;
use bytes::Bytes;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

// headless_chrome drops the connection after this long without events; the
// lifecycle actor decides when the browser is idle, so keep it well above
// any keep-alive ceiling.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// Measured once the page has loaded; used to size the full-page capture.
const PAGE_SIZE_SCRIPT: &str = r#"
    (function() {
        const el = document.documentElement;
        const body = document.body;
        const h = Math.max(el.scrollHeight, body ? body.scrollHeight : 0);
        const w = Math.max(el.scrollWidth, body ? body.scrollWidth : 0);
        return JSON.stringify([w, h]);
    })()
"#;

type PageId = u64;

enum Command {
    NewPage(oneshot::Sender<Result<PageId>>),
    SetViewport(PageId, Viewport, oneshot::Sender<Result<()>>),
    Goto(PageId, String, oneshot::Sender<Result<()>>),
    Screenshot(PageId, u8, oneshot::Sender<Result<Vec<u8>>>),
    ClosePage(PageId, oneshot::Sender<Result<()>>),
    Ping(oneshot::Sender<bool>),
    Close(oneshot::Sender<Result<()>>),
}

/// Launches headless Chrome instances
pub struct CdpLauncher {
    config: LaunchConfig,
    window: Viewport,
    navigation_timeout: Duration,
}

impl CdpLauncher {
    pub fn new(config: LaunchConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            window: Viewport::default(),
            navigation_timeout,
        }
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(!self.config.no_sandbox)
            .path(self.config.chrome_path.clone())
            .window_size(Some((self.window.width, self.window.height)))
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| Error::BrowserLaunch(format!("Failed to build launch options: {}", e)))?;
        let navigation_timeout = self.navigation_timeout;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            // Launch on the worker thread; the Browser never leaves it
            let browser = match Browser::new(launch_options) {
                Ok(b) => b,
                Err(err) => {
                    let _ = init_tx.send(Err(Error::BrowserLaunch(err.to_string())));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            let mut worker = Worker {
                browser,
                tabs: HashMap::new(),
                next_id: 0,
                navigation_timeout,
            };

            while let Ok(cmd) = cmd_rx.recv() {
                if !worker.handle(cmd) {
                    break;
                }
            }
            debug!("cdp worker thread exiting");
        });

        init_rx
            .await
            .map_err(|e| Error::BrowserLaunch(format!("Worker init canceled: {}", e)))??;

        info!("launched headless chrome");
        Ok(Box::new(CdpBrowser { cmd_tx }))
    }
}

struct Worker {
    browser: Browser,
    tabs: HashMap<PageId, Arc<Tab>>,
    next_id: PageId,
    navigation_timeout: Duration,
}

impl Worker {
    /// Execute one command. Returns false once the browser has been closed.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::NewPage(resp) => {
                let res = self
                    .browser
                    .new_tab()
                    .map(|tab| {
                        tab.set_default_timeout(self.navigation_timeout);
                        self.next_id += 1;
                        self.tabs.insert(self.next_id, tab);
                        self.next_id
                    })
                    .map_err(|e| Error::Render(format!("Failed to create tab: {}", e)));
                let _ = resp.send(res);
            }
            Command::SetViewport(id, viewport, resp) => {
                let res = self.tab(id).and_then(|tab| set_window(&tab, viewport.width, viewport.height));
                let _ = resp.send(res);
            }
            Command::Goto(id, url, resp) => {
                let res = self.tab(id).and_then(|tab| {
                    tab.navigate_to(&url)
                        .map_err(|e| Error::Render(format!("Navigation failed: {}", e)))?;
                    tab.wait_until_navigated()
                        .map_err(|e| Error::Render(format!("Wait for navigation failed: {}", e)))?;
                    Ok(())
                });
                let _ = resp.send(res);
            }
            Command::Screenshot(id, quality, resp) => {
                let res = self.tab(id).and_then(|tab| capture_full_page(&tab, quality));
                let _ = resp.send(res);
            }
            Command::ClosePage(id, resp) => {
                let res = match self.tabs.remove(&id) {
                    Some(tab) => tab
                        .close(true)
                        .map(|_| ())
                        .map_err(|e| Error::Render(format!("Failed to close tab: {}", e))),
                    None => Ok(()),
                };
                let _ = resp.send(res);
            }
            Command::Ping(resp) => {
                let _ = resp.send(self.browser.get_version().is_ok());
            }
            Command::Close(resp) => {
                for (_, tab) in self.tabs.drain() {
                    if let Err(e) = tab.close(false) {
                        warn!("Failed to close tab during shutdown: {}", e);
                    }
                }
                let _ = resp.send(Ok(()));
                return false;
            }
        }
        true
    }

    fn tab(&self, id: PageId) -> Result<Arc<Tab>> {
        self.tabs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Render(format!("Unknown page {}", id)))
    }
}

fn set_window(tab: &Tab, width: u32, height: u32) -> Result<()> {
    tab.set_bounds(Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(width as f64),
        height: Some(height as f64),
    })
    .map_err(|e| Error::Render(format!("Failed to set viewport: {}", e)))?;
    Ok(())
}

fn capture_full_page(tab: &Tab, quality: u8) -> Result<Vec<u8>> {
    let eval = tab
        .evaluate(PAGE_SIZE_SCRIPT, false)
        .map_err(|e| Error::Render(format!("Failed to measure page: {}", e)))?;
    let (width, height) = eval
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str::<(f64, f64)>(s).ok())
        .ok_or_else(|| Error::Render("Page size evaluation returned no value".into()))?;

    // Grow the window to the document height so content below the fold is
    // painted before the clip is captured.
    set_window(tab, width.ceil() as u32, height.ceil() as u32)?;

    let clip = Page::Viewport {
        x: 0.0,
        y: 0.0,
        width,
        height,
        scale: 1.0,
    };
    tab.capture_screenshot(
        Page::CaptureScreenshotFormatOption::Jpeg,
        Some(quality as u32),
        Some(clip),
        true,
    )
    .map_err(|e| Error::Render(format!("Screenshot failed: {}", e)))
}

/// Async handle to a browser owned by a worker thread
struct CdpBrowser {
    cmd_tx: Sender<Command>,
}

async fn call<T>(
    cmd_tx: &Sender<Command>,
    what: &str,
    make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(make(tx))
        .map_err(|_| Error::Render(format!("{}: browser worker is gone", what)))?;
    rx.await
        .map_err(|e| Error::Render(format!("{} canceled: {}", what, e)))?
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
        let id = call(&self.cmd_tx, "NewPage", Command::NewPage).await?;
        Ok(Box::new(CdpPage {
            id,
            cmd_tx: self.cmd_tx.clone(),
        }))
    }

    async fn is_connected(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Ping(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        call(&self.cmd_tx, "Close", Command::Close).await
    }
}

struct CdpPage {
    id: PageId,
    cmd_tx: Sender<Command>,
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        let id = self.id;
        call(&self.cmd_tx, "SetViewport", |tx| Command::SetViewport(id, viewport, tx)).await
    }

    async fn goto(&mut self, url: &Url) -> Result<()> {
        let id = self.id;
        let url = url.to_string();
        call(&self.cmd_tx, "Goto", |tx| Command::Goto(id, url, tx)).await
    }

    async fn screenshot_jpeg(&mut self, quality: u8) -> Result<Bytes> {
        let id = self.id;
        let data = call(&self.cmd_tx, "Screenshot", |tx| Command::Screenshot(id, quality, tx)).await?;
        Ok(Bytes::from(data))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let id = self.id;
        call(&self.cmd_tx, "ClosePage", |tx| Command::ClosePage(id, tx)).await
    }
}
