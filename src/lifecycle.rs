//! Browser lifecycle actor
//!
//! One [`BrowserActor`] owns at most one browser handle. It runs as a single
//! tokio task fed by an inbox, so requests are processed one at a time and
//! every step of a render (launch, navigation, screenshot, cache I/O) is
//! awaited before the next message is taken. The keep-alive alarm is polled
//! by the same task between messages.
//!
//! Keep-alive: every render resets the idle counter. After a request the
//! alarm is armed one interval ahead if it is not already armed. Each tick
//! adds one interval to the counter and re-arms, until the counter reaches
//! the ceiling; then the browser is closed and the actor goes back to
//! having no browser until the next request.
//!
//! Independently of the browser, the actor sweeps expired cache entries every
//! `cache_sweep_interval`.

use crate::browser::{BrowserHandle, BrowserLauncher};
use crate::cache::RenderCache;
use crate::fingerprint::cache_key;
use crate::options::{self, NormalizedRequest};
use crate::{CacheKey, Error, KeepAliveConfig, Result, ServiceConfig};
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

const INBOX_CAPACITY: usize = 256;

/// Coarse lifecycle state, as reported by [`ActorHandle::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No browser handle is held
    NoBrowser,
    /// A browser is held and will survive the next tick
    BrowserIdle,
    /// The next tick reaches the idle ceiling and closes the browser
    BrowserExpiring,
}

/// What a tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still under the ceiling; alarm re-armed
    Rescheduled,
    /// Ceiling reached while a render is marked in progress; alarm re-armed,
    /// teardown deferred. [`BrowserActor`] never ticks mid-render, so it only
    /// sees this outcome when `KeepAlive` is driven on its own.
    Deferred,
    /// Ceiling reached; the browser should be closed and the alarm stays disarmed
    Expire,
}

/// Keep-alive counter, alarm deadline and render guard
///
/// Inside [`BrowserActor`] ticks and renders run on the same task, so `busy`
/// is always false by the time a tick is handled. The guard matters for
/// callers that tick from a different task than the one rendering.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    ceiling: Duration,
    idle: Duration,
    alarm: Option<Instant>,
    busy: bool,
}

impl KeepAlive {
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            interval: config.interval,
            ceiling: config.ceiling,
            idle: Duration::ZERO,
            alarm: None,
            busy: false,
        }
    }

    /// Mark activity: the idle counter restarts from zero.
    pub fn touch(&mut self) {
        self.idle = Duration::ZERO;
    }

    pub fn begin_render(&mut self) {
        self.busy = true;
        self.touch();
    }

    pub fn end_render(&mut self) {
        self.busy = false;
        self.touch();
    }

    /// Arm the alarm one interval after `now` unless it is already armed.
    /// Returns whether a new alarm was armed.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.alarm.is_some() {
            return false;
        }
        self.alarm = Some(now + self.interval);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.alarm
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether the next tick will reach the ceiling.
    pub fn is_expiring(&self) -> bool {
        self.idle + self.interval >= self.ceiling
    }

    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        self.idle += self.interval;
        if self.idle < self.ceiling {
            self.alarm = Some(now + self.interval);
            TickOutcome::Rescheduled
        } else if self.busy {
            self.alarm = Some(now + self.interval);
            TickOutcome::Deferred
        } else {
            self.alarm = None;
            TickOutcome::Expire
        }
    }

    /// Back to the initial state: counter zero, alarm disarmed, not busy.
    pub fn reset(&mut self) {
        self.idle = Duration::ZERO;
        self.alarm = None;
        self.busy = false;
    }
}

/// A rendered (or cached) page image
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Bytes,
    pub cache_hit: bool,
    pub key: CacheKey,
}

/// Snapshot of an actor's internal state
#[derive(Debug, Clone, PartialEq)]
pub struct ActorStatus {
    pub state: LifecycleState,
    pub idle: Duration,
    pub alarm_armed: bool,
    pub busy: bool,
    /// Browsers launched over the actor's lifetime
    pub launches: u64,
}

enum Message {
    Fetch(Url, oneshot::Sender<Result<RenderOutput>>),
    Invalidate(Url, oneshot::Sender<Result<bool>>),
    Status(oneshot::Sender<ActorStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable address of a running [`BrowserActor`]
#[derive(Clone)]
pub struct ActorHandle {
    name: Arc<str>,
    tx: mpsc::Sender<Message>,
}

impl ActorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both handles address the same actor instance.
    pub fn same_actor(&self, other: &ActorHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Whether the actor task is still accepting messages.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Serve a render request for `target`, from cache or by rendering it.
    pub async fn fetch(&self, target: Url) -> Result<RenderOutput> {
        self.request(|tx| Message::Fetch(target, tx)).await?
    }

    /// Drop the cache entry `target` would be served from.
    pub async fn invalidate(&self, target: Url) -> Result<bool> {
        self.request(|tx| Message::Invalidate(target, tx)).await?
    }

    pub async fn status(&self) -> Result<ActorStatus> {
        self.request(Message::Status).await
    }

    /// Close the browser and stop the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Message::Shutdown).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| Error::ActorClosed)?;
        rx.await.map_err(|_| Error::ActorClosed)
    }
}

/// The single owner of a browser handle
pub struct BrowserActor {
    name: Arc<str>,
    config: ServiceConfig,
    launcher: Arc<dyn BrowserLauncher>,
    cache: Arc<dyn RenderCache>,
    browser: Option<Box<dyn BrowserHandle>>,
    keep_alive: KeepAlive,
    launches: u64,
}

impl BrowserActor {
    /// Spawn an actor task on the current tokio runtime.
    pub fn spawn(
        name: &str,
        config: ServiceConfig,
        launcher: Arc<dyn BrowserLauncher>,
        cache: Arc<dyn RenderCache>,
    ) -> ActorHandle {
        let name: Arc<str> = Arc::from(name);
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let actor = BrowserActor {
            name: name.clone(),
            keep_alive: KeepAlive::new(config.keep_alive),
            config,
            launcher,
            cache,
            browser: None,
            launches: 0,
        };
        tokio::spawn(actor.run(rx));
        ActorHandle { name, tx }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Message>) {
        debug!("[{}] actor started", self.name);
        let period = self.config.cache_sweep_interval.max(Duration::from_secs(1));
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let deadline = self.keep_alive.deadline();
            tokio::select! {
                biased;
                msg = inbox.recv() => match msg {
                    Some(Message::Shutdown(reply)) => {
                        self.teardown("shutdown requested").await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_alarm().await;
                }
                _ = sweep.tick() => self.sweep_cache().await,
            }
        }
        self.teardown("actor stopped").await;
        debug!("[{}] actor stopped", self.name);
    }

    async fn handle(&mut self, msg: Message) {
        match msg {
            Message::Fetch(target, reply) => {
                let res = self.fetch(target).await;
                let _ = reply.send(res);
            }
            Message::Invalidate(target, reply) => {
                let res = self.invalidate(target).await;
                let _ = reply.send(res);
            }
            Message::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Message::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn status(&self) -> ActorStatus {
        let state = match (&self.browser, self.keep_alive.is_expiring()) {
            (None, _) => LifecycleState::NoBrowser,
            (Some(_), true) => LifecycleState::BrowserExpiring,
            (Some(_), false) => LifecycleState::BrowserIdle,
        };
        ActorStatus {
            state,
            idle: self.keep_alive.idle(),
            alarm_armed: self.keep_alive.deadline().is_some(),
            busy: self.keep_alive.is_busy(),
            launches: self.launches,
        }
    }

    async fn fetch(&mut self, target: Url) -> Result<RenderOutput> {
        self.ensure_browser().await;
        let res = self.serve(target).await;
        if self.keep_alive.arm(Instant::now()) {
            debug!("[{}] keep-alive alarm armed", self.name);
        }
        res
    }

    async fn serve(&mut self, target: Url) -> Result<RenderOutput> {
        let request = options::normalize(target, self.config.default_quality)?;
        let key = cache_key(&request, self.config.key_scope);

        if let Some(bytes) = self.cache.get(&key).await? {
            debug!("[{}] cache hit {} for {}", self.name, key, request.target);
            return Ok(RenderOutput {
                bytes,
                cache_hit: true,
                key,
            });
        }

        let browser = match self.browser.as_deref() {
            Some(b) => b,
            None => {
                warn!("[{}] cache miss for {} and no browser to render it", self.name, request.target);
                return Err(Error::BrowserUnavailable);
            }
        };

        self.keep_alive.begin_render();
        let rendered = render_page(browser, &request, self.config.render_timeout_ms).await;
        let stored = match rendered {
            Ok(bytes) => self
                .cache
                .put(&key, bytes.clone(), self.config.cache_ttl)
                .await
                .map(|_| bytes),
            Err(e) => {
                error!("[{}] render of {} failed: {}", self.name, request.target, e);
                Err(e)
            }
        };
        self.keep_alive.end_render();

        let bytes = stored?;
        debug!("[{}] rendered {} ({} bytes) as {}", self.name, request.target, bytes.len(), key);
        Ok(RenderOutput {
            bytes,
            cache_hit: false,
            key,
        })
    }

    async fn invalidate(&mut self, target: Url) -> Result<bool> {
        let request = options::normalize(target, self.config.default_quality)?;
        let key = cache_key(&request, self.config.key_scope);
        let removed = self.cache.delete(&key).await?;
        info!("[{}] cache entry {} invalidated (present: {})", self.name, key, removed);
        Ok(removed)
    }

    /// Make sure a connected browser is held, launching one if needed.
    /// Launch failure is logged and leaves the actor without a browser.
    async fn ensure_browser(&mut self) {
        let connected = match &self.browser {
            Some(b) => b.is_connected().await,
            None => false,
        };
        if connected {
            return;
        }

        if let Some(stale) = self.browser.take() {
            warn!("[{}] browser disconnected; relaunching", self.name);
            if let Err(e) = stale.close().await {
                debug!("[{}] closing stale browser failed: {}", self.name, e);
            }
        }

        match self.launcher.launch().await {
            Ok(browser) => {
                self.launches += 1;
                info!("[{}] browser launched (#{})", self.name, self.launches);
                self.browser = Some(browser);
            }
            Err(e) => {
                warn!("[{}] browser launch failed, continuing without a browser: {}", self.name, e);
            }
        }
    }

    async fn on_alarm(&mut self) {
        match self.keep_alive.on_tick(Instant::now()) {
            TickOutcome::Rescheduled => {
                debug!("[{}] keep-alive tick, idle {:?}", self.name, self.keep_alive.idle());
            }
            TickOutcome::Deferred => {
                debug!("[{}] idle ceiling reached during a render; teardown deferred", self.name);
            }
            TickOutcome::Expire => self.teardown("keep-alive ceiling reached").await,
        }
    }

    async fn sweep_cache(&self) {
        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(n) => debug!("[{}] swept {} expired cache entries", self.name, n),
            Err(e) => warn!("[{}] cache sweep failed: {}", self.name, e),
        }
    }

    async fn teardown(&mut self, reason: &str) {
        if let Some(browser) = self.browser.take() {
            info!("[{}] closing browser: {}", self.name, reason);
            if let Err(e) = browser.close().await {
                warn!("[{}] failed to close browser: {}", self.name, e);
            }
        }
        self.keep_alive.reset();
    }
}

/// Open a page, load the target and capture it. The page is closed whether
/// or not the capture succeeded.
async fn render_page(
    browser: &dyn BrowserHandle,
    request: &NormalizedRequest,
    timeout_ms: u64,
) -> Result<Bytes> {
    let mut page = browser.new_page().await?;

    let work = async {
        page.set_viewport(request.viewport).await?;
        page.goto(&request.target).await?;
        page.screenshot_jpeg(request.quality).await
    };
    let res = match tokio::time::timeout(Duration::from_millis(timeout_ms), work).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout(timeout_ms)),
    };

    if let Err(e) = page.close().await {
        warn!("failed to close page: {}", e);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep_alive() -> KeepAlive {
        KeepAlive::new(KeepAliveConfig::default())
    }

    #[test]
    fn arm_only_once() {
        let mut ka = keep_alive();
        let now = Instant::now();
        assert!(ka.arm(now));
        assert!(!ka.arm(now + Duration::from_secs(3)));
        assert_eq!(ka.deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn ticks_until_ceiling_then_expire() {
        let mut ka = keep_alive();
        let now = Instant::now();
        ka.arm(now);
        for i in 1..6 {
            assert_eq!(ka.on_tick(now), TickOutcome::Rescheduled, "tick {}", i);
            assert!(ka.deadline().is_some());
        }
        assert!(ka.is_expiring());
        assert_eq!(ka.on_tick(now), TickOutcome::Expire);
        assert_eq!(ka.deadline(), None);
        assert_eq!(ka.idle(), Duration::from_secs(60));
    }

    #[test]
    fn activity_resets_counter() {
        let mut ka = keep_alive();
        let now = Instant::now();
        ka.arm(now);
        for _ in 0..5 {
            ka.on_tick(now);
        }
        ka.begin_render();
        ka.end_render();
        assert_eq!(ka.idle(), Duration::ZERO);
        assert_eq!(ka.on_tick(now), TickOutcome::Rescheduled);
    }

    #[test]
    fn busy_defers_teardown() {
        let mut ka = keep_alive();
        let now = Instant::now();
        ka.arm(now);
        for _ in 0..5 {
            ka.on_tick(now);
        }
        ka.begin_render();
        for _ in 0..5 {
            assert_eq!(ka.on_tick(now), TickOutcome::Rescheduled);
        }
        assert_eq!(ka.on_tick(now), TickOutcome::Deferred);
        assert!(ka.deadline().is_some());
        ka.end_render();
        assert_eq!(ka.idle(), Duration::ZERO);
        for _ in 0..5 {
            ka.on_tick(now);
        }
        assert_eq!(ka.on_tick(now), TickOutcome::Expire);
    }

    #[test]
    fn reset_disarms() {
        let mut ka = keep_alive();
        ka.arm(Instant::now());
        ka.on_tick(Instant::now());
        ka.reset();
        assert_eq!(ka.deadline(), None);
        assert_eq!(ka.idle(), Duration::ZERO);
        assert!(!ka.is_busy());
    }
}
