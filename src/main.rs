use clap::Parser;
use log::{info, warn};
use snapcache::browser::BrowserLauncher;
use snapcache::cache::{DiskCache, MemoryCache, RenderCache};
use snapcache::router::{ActorNamespace, BROWSER_ACTOR};
use snapcache::{CacheBackend, KeepAliveConfig, KeyScope, LaunchConfig, ServiceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::web::Data;
use actix_web::{App, HttpServer};

/// Render web pages to JPEG and cache the results
#[derive(Parser, Debug)]
#[command(name = "snapcache", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "SNAPCACHE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// HTTP worker threads (defaults to the number of CPUs)
    #[arg(long, env = "SNAPCACHE_WORKERS")]
    workers: Option<usize>,

    /// Store renders on disk under this directory instead of in memory
    #[arg(long, env = "SNAPCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Cache time-to-live in seconds
    #[arg(long, env = "SNAPCACHE_CACHE_TTL", default_value_t = 86400)]
    cache_ttl: u64,

    /// Seconds between sweeps of expired cache entries
    #[arg(long, env = "SNAPCACHE_CACHE_SWEEP_INTERVAL", default_value_t = 600)]
    cache_sweep_interval: u64,

    /// Cache key derivation: "url" (full target url) or "options" (options text only)
    #[arg(long, env = "SNAPCACHE_KEY_SCOPE", default_value = "url")]
    key_scope: KeyScope,

    /// Seconds between keep-alive ticks
    #[arg(long, env = "SNAPCACHE_KEEPALIVE_INTERVAL", default_value_t = 10)]
    keepalive_interval: u64,

    /// Idle seconds after which the browser is closed
    #[arg(long, env = "SNAPCACHE_KEEPALIVE_CEILING", default_value_t = 60)]
    keepalive_ceiling: u64,

    /// Upper bound on navigation + screenshot, in milliseconds
    #[arg(long, env = "SNAPCACHE_RENDER_TIMEOUT_MS", default_value_t = 30000)]
    render_timeout_ms: u64,

    /// JPEG quality used when a request does not set one
    #[arg(long, env = "SNAPCACHE_QUALITY", default_value_t = 80)]
    quality: u8,

    /// Chrome/Chromium executable (autodetected when omitted)
    #[arg(long, env = "SNAPCACHE_CHROME")]
    chrome: Option<PathBuf>,

    /// Launch Chrome with --no-sandbox
    #[arg(long, env = "SNAPCACHE_NO_SANDBOX")]
    no_sandbox: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServiceConfig> {
        if self.keepalive_interval == 0 {
            anyhow::bail!("keep-alive interval must be at least one second");
        }
        if self.cache_sweep_interval == 0 {
            anyhow::bail!("cache sweep interval must be at least one second");
        }
        if !(1..=100).contains(&self.quality) {
            anyhow::bail!("quality must be between 1 and 100");
        }

        let defaults = ServiceConfig::default();
        Ok(ServiceConfig {
            bind: self.bind,
            workers: self.workers.unwrap_or(defaults.workers),
            cache_backend: match self.cache_dir {
                Some(dir) => CacheBackend::Disk(dir),
                None => CacheBackend::Memory,
            },
            cache_ttl: Duration::from_secs(self.cache_ttl),
            cache_sweep_interval: Duration::from_secs(self.cache_sweep_interval),
            key_scope: self.key_scope,
            keep_alive: KeepAliveConfig {
                interval: Duration::from_secs(self.keepalive_interval),
                ceiling: Duration::from_secs(self.keepalive_ceiling),
            },
            render_timeout_ms: self.render_timeout_ms,
            default_quality: self.quality,
            launch: LaunchConfig {
                chrome_path: self.chrome,
                no_sandbox: self.no_sandbox,
            },
        })
    }
}

#[cfg(feature = "cdp")]
fn launcher(config: &ServiceConfig) -> Arc<dyn BrowserLauncher> {
    Arc::new(snapcache::browser::cdp::CdpLauncher::new(
        config.launch.clone(),
        Duration::from_millis(config.render_timeout_ms),
    ))
}

#[cfg(not(feature = "cdp"))]
fn launcher(_config: &ServiceConfig) -> Arc<dyn BrowserLauncher> {
    warn!("built without the `cdp` feature; serving synthetic renders from the stub browser");
    Arc::new(snapcache::browser::stub::StubLauncher::new())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = Cli::parse().into_config()?;

    let cache: Arc<dyn RenderCache> = match &config.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Disk(dir) => {
            info!("using disk cache at {}", dir.display());
            Arc::new(DiskCache::open(dir.clone()).await?)
        }
    };

    let namespace = ActorNamespace::new(config.clone(), launcher(&config), cache);
    // Each actix worker runs its own runtime; the actor belongs on the main one.
    namespace.get(BROWSER_ACTOR);

    info!("Listening on http://{}", config.bind);
    let app_namespace = namespace.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(app_namespace.clone()))
            .configure(snapcache::http::configure)
    })
    .bind(config.bind.as_str())?
    .workers(config.workers)
    .run()
    .await?;

    warn!("server stopped; closing browsers");
    namespace.shutdown().await;
    Ok(())
}
