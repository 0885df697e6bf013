//! TTL-expiring cache for Engine-B's loaded models.
//!
//! Rendered here as a value owned by the orchestrator rather than a
//! process-wide singleton: the pipeline only ever needs one cache per run,
//! and an owned value is trivially shareable across the worker pool behind
//! an `Arc` without reaching for global mutable state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{OcrError, Result};

/// Environment variable that overrides the default TTL, in seconds.
pub const MODEL_TTL_ENV_VAR: &str = "SCHOLARDOC_MODEL_TTL";

const DEFAULT_TTL_SECONDS: u64 = 1800;

/// GPU memory cleanup, delegated to whatever collaborator links the actual
/// GPU runtime bindings. A no-op implementation is fine on CPU-only builds.
pub trait GpuMemoryCleaner {
    fn cleanup(&self);
}

pub struct NoGpuCleaner;

impl GpuMemoryCleaner for NoGpuCleaner {
    fn cleanup(&self) {}
}

struct CacheEntry<M> {
    models: Arc<M>,
    device: String,
    loaded_at: Instant,
}

/// Thread-safe cache holding at most one loaded model set, expiring it after
/// `ttl`. Loading happens outside the lock so concurrent callers don't block
/// each other; a race on cache miss may load twice, but only the first
/// result to reacquire the lock wins and is kept.
pub struct ModelCache<M> {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<M>>>,
}

impl<M> ModelCache<M> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: Mutex::new(None) }
    }

    /// Build a cache with TTL from [`MODEL_TTL_ENV_VAR`] if set and parseable,
    /// otherwise the default of 30 minutes.
    pub fn from_env() -> Self {
        let ttl = std::env::var(MODEL_TTL_ENV_VAR)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_TTL_SECONDS));
        debug!(ttl_seconds = ttl.as_secs_f64(), "model cache initialized");
        Self::new(ttl)
    }

    fn fresh(&self, entry: &CacheEntry<M>) -> bool {
        entry.loaded_at.elapsed() < self.ttl
    }

    /// Return cached models if present and unexpired; otherwise call
    /// `loader` to produce a fresh set and cache it.
    pub fn get_models<E>(
        &self,
        device: Option<&str>,
        loader: impl FnOnce(Option<&str>) -> std::result::Result<(M, String), E>,
    ) -> Result<(Arc<M>, String)>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        {
            let guard = self.entry.lock();
            if let Some(entry) = guard.as_ref() {
                if self.fresh(entry) {
                    debug!(device = %entry.device, "model cache hit");
                    return Ok((entry.models.clone(), entry.device.clone()));
                }
            }
        }

        info!(?device, "model cache miss, loading models");
        let (models, device_used) =
            loader(device).map_err(|e| OcrError::EngineB { message: "failed to load models".into(), source: Some(Box::new(e)) })?;
        let models = Arc::new(models);

        let mut guard = self.entry.lock();
        if let Some(existing) = guard.as_ref() {
            if self.fresh(existing) {
                debug!("another caller cached models first, discarding this load");
                return Ok((existing.models.clone(), existing.device.clone()));
            }
        }
        *guard = Some(CacheEntry { models: models.clone(), device: device_used.clone(), loaded_at: Instant::now() });
        info!(device = %device_used, "models cached");
        Ok((models, device_used))
    }

    pub fn is_loaded(&self) -> bool {
        self.entry.lock().as_ref().is_some_and(|e| self.fresh(e))
    }

    /// Drop the cached models and run GPU memory cleanup.
    pub fn evict(&self, cleaner: &dyn GpuMemoryCleaner) {
        let mut guard = self.entry.lock();
        if guard.is_some() {
            *guard = None;
            info!("models evicted from cache");
        }
        drop(guard);
        cleaner.cleanup();
    }
}

/// Release intermediate GPU memory between documents without evicting the
/// model cache; models stay loaded for fast subsequent inference.
pub fn cleanup_between_documents(cleaner: &dyn GpuMemoryCleaner) {
    cleaner.cleanup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn cache_miss_then_hit() {
        let cache: ModelCache<String> = ModelCache::new(Duration::from_secs(60));
        let mut loads = 0;
        let (models, device) = cache
            .get_models(Some("cpu"), |d| {
                loads += 1;
                Ok::<_, Infallible>(("model-data".to_string(), d.unwrap_or("cpu").to_string()))
            })
            .unwrap();
        assert_eq!(*models, "model-data");
        assert_eq!(device, "cpu");
        assert!(cache.is_loaded());

        let (models2, _) = cache
            .get_models(Some("cpu"), |_| {
                loads += 1;
                Ok::<_, Infallible>(("should-not-load-again".to_string(), "cpu".to_string()))
            })
            .unwrap();
        assert_eq!(*models2, "model-data");
        assert_eq!(loads, 1);
    }

    #[test]
    fn expired_entry_is_reloaded() {
        // A zero-duration TTL means any entry is stale the instant it's read
        // back, so expiry is exercised deterministically without a real sleep.
        let cache: ModelCache<String> = ModelCache::new(Duration::ZERO);
        cache.get_models(None, |_| Ok::<_, Infallible>(("v1".to_string(), "cpu".to_string()))).unwrap();
        assert!(!cache.is_loaded());
        let (models, _) = cache.get_models(None, |_| Ok::<_, Infallible>(("v2".to_string(), "cpu".to_string()))).unwrap();
        assert_eq!(*models, "v2");
    }

    #[test]
    fn evict_clears_the_cache() {
        let cache: ModelCache<String> = ModelCache::new(Duration::from_secs(60));
        cache.get_models(None, |_| Ok::<_, Infallible>(("v1".to_string(), "cpu".to_string()))).unwrap();
        assert!(cache.is_loaded());
        cache.evict(&NoGpuCleaner);
        assert!(!cache.is_loaded());
    }
}
