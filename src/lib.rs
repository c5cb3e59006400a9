//! Snapcache
//!
//! Renders web pages to JPEG through a single kept-warm headless browser and
//! caches the results under a fingerprint of the page's rendering options.
//!
//! # Features
//!
//! - **CDP Backend** (default): Uses Chrome DevTools Protocol via headless Chrome
//! - **Single owner**: one actor per well-known name owns the browser handle
//! - **Keep-alive**: the browser survives bursts of requests and is reaped once idle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snapcache::browser::stub::StubLauncher;
//! use snapcache::cache::MemoryCache;
//! use snapcache::router::ActorNamespace;
//! use snapcache::ServiceConfig;
//!
//! # async fn run() -> snapcache::Result<()> {
//! let config = ServiceConfig::default();
//! let namespace = ActorNamespace::new(
//!     config.clone(),
//!     Arc::new(StubLauncher::new()),
//!     Arc::new(MemoryCache::new()),
//! );
//! let actor = namespace.get(snapcache::router::BROWSER_ACTOR);
//! let target = url::Url::parse("https://example.com/?options={\"xMax\":480}").unwrap();
//! let render = actor.fetch(target).await?;
//! println!("{} bytes (cached: {})", render.bytes.len(), render.cache_hit);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod browser;
pub mod cache;
pub mod fingerprint;
pub mod http;
pub mod lifecycle;
pub mod options;
pub mod router;

pub use fingerprint::{fingerprint, CacheKey, KeyScope};
pub use lifecycle::{ActorHandle, LifecycleState, RenderOutput};
pub use options::{NormalizedRequest, RenderOptions};

/// Service configuration
///
/// Defaults mirror the production deployment: a 24 hour cache TTL, a
/// 10 second keep-alive tick and a 60 second idle ceiling.
///
/// # Examples
///
/// ```
/// let cfg = snapcache::ServiceConfig::default();
/// assert_eq!(cfg.keep_alive.ceiling.as_secs(), 60);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    pub bind: String,
    /// Number of actix worker threads
    pub workers: usize,
    /// Which cache backend the binary builds
    pub cache_backend: CacheBackend,
    /// Time-to-live applied to every cache write
    pub cache_ttl: Duration,
    /// How often expired cache entries are swept
    pub cache_sweep_interval: Duration,
    /// What the cache key is derived from
    pub key_scope: KeyScope,
    /// Keep-alive tick settings
    pub keep_alive: KeepAliveConfig,
    /// Upper bound on page work (navigate + screenshot) in milliseconds
    pub render_timeout_ms: u64,
    /// JPEG quality used when the request does not carry one
    pub default_quality: u8,
    /// Browser launch settings
    pub launch: LaunchConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            workers: num_cpus::get(),
            cache_backend: CacheBackend::Memory,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_sweep_interval: Duration::from_secs(10 * 60),
            key_scope: KeyScope::TargetUrl,
            keep_alive: KeepAliveConfig::default(),
            render_timeout_ms: 30000,
            default_quality: 80,
            launch: LaunchConfig::default(),
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Disk(PathBuf),
}

/// Keep-alive timer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval between ticks
    pub interval: Duration,
    /// Idle time after which the browser is closed
    pub ceiling: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ceiling: Duration::from_secs(60),
        }
    }
}

/// Options used when launching a browser instance
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    /// Explicit Chrome/Chromium executable; autodetected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Whether to pass `--no-sandbox` (needed in most containers)
    pub no_sandbox: bool,
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: options::DEFAULT_WIDTH,
            height: options::DEFAULT_HEIGHT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(86400));
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.keep_alive.interval, Duration::from_secs(10));
        assert_eq!(config.key_scope, KeyScope::TargetUrl);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
    }

    #[test]
    fn test_viewport() {
        let viewport = Viewport::default();
        assert_eq!(viewport.width, 360);
        assert_eq!(viewport.height, 1600);
    }
}
