//! Actor namespace: maps a well-known name to exactly one running actor
//!
//! Every HTTP worker resolves the same name and therefore talks to the same
//! [`BrowserActor`], which gives that actor exclusive ownership of its
//! browser. Actors are spawned lazily on first lookup; a name whose actor has
//! stopped is respawned on the next lookup.

use crate::browser::BrowserLauncher;
use crate::cache::RenderCache;
use crate::lifecycle::{ActorHandle, BrowserActor};
use crate::ServiceConfig;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Name of the actor that serves every render request
pub const BROWSER_ACTOR: &str = "browser";

#[derive(Clone)]
pub struct ActorNamespace {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    launcher: Arc<dyn BrowserLauncher>,
    cache: Arc<dyn RenderCache>,
    actors: Mutex<HashMap<String, ActorHandle>>,
}

impl ActorNamespace {
    pub fn new(
        config: ServiceConfig,
        launcher: Arc<dyn BrowserLauncher>,
        cache: Arc<dyn RenderCache>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                cache,
                actors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve `name` to its actor, spawning it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get(&self, name: &str) -> ActorHandle {
        let mut actors = self
            .inner
            .actors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = actors.get(name) {
            if handle.is_running() {
                return handle.clone();
            }
        }

        info!("spawning actor '{}'", name);
        let handle = BrowserActor::spawn(
            name,
            self.inner.config.clone(),
            self.inner.launcher.clone(),
            self.inner.cache.clone(),
        );
        actors.insert(name.to_string(), handle.clone());
        handle
    }

    pub fn cache(&self) -> &Arc<dyn RenderCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Shut down every actor spawned so far.
    pub async fn shutdown(&self) {
        let handles: Vec<ActorHandle> = {
            let mut actors = self
                .inner
                .actors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            actors.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::stub::StubLauncher;
    use crate::cache::MemoryCache;

    fn namespace() -> ActorNamespace {
        ActorNamespace::new(
            ServiceConfig::default(),
            Arc::new(StubLauncher::new()),
            Arc::new(MemoryCache::new()),
        )
    }

    #[tokio::test]
    async fn same_name_same_actor() {
        let ns = namespace();
        let a = ns.get(BROWSER_ACTOR);
        let b = ns.clone().get(BROWSER_ACTOR);
        assert!(a.same_actor(&b));
        let other = ns.get("other");
        assert!(!a.same_actor(&other));
    }

    #[tokio::test]
    async fn stopped_actor_is_respawned() {
        let ns = namespace();
        let a = ns.get(BROWSER_ACTOR);
        a.shutdown().await.unwrap();
        // Wait for the actor task to drop its inbox
        while a.is_running() {
            tokio::task::yield_now().await;
        }
        let b = ns.get(BROWSER_ACTOR);
        assert!(b.is_running());
        assert!(!a.same_actor(&b));
    }
}
