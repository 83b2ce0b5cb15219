//! Cache-aside layer over a [`KvStore`].
//!
//! The application checks the cache, and on miss computes and stores the
//! value itself. Serialization happens exactly once, here: values cross the
//! [`KvStore`] boundary as raw JSON strings, so a cached read can never come
//! back double-encoded.
//!
//! Every failure path is open: a missing, unreachable, or corrupt cache
//! degrades to calling the fetcher directly, never to an error for the
//! caller.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::kv::KvStore;

/// Default TTL for cached chat context (30 minutes).
pub const DEFAULT_TTL_SECS: u64 = 1800;

/// Cache keys are derived from user queries; cap them at a sane length.
const MAX_KEY_QUERY_CHARS: usize = 100;

/// Cache key for a chat-context query: `rag:` + trimmed, lowercased query,
/// truncated to 100 characters.
pub fn rag_cache_key(query: &str) -> String {
    let normalized: String = query.trim().to_lowercase().chars().take(MAX_KEY_QUERY_CHARS).collect();
    format!("rag:{}", normalized)
}

/// Get-or-compute cache keyed by strings, storing JSON-serialized values.
#[derive(Clone)]
pub struct Cache {
    kv: Option<Arc<dyn KvStore>>,
}

impl Cache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv: Some(kv) }
    }

    /// A cache that never stores anything; every lookup runs the fetcher.
    pub fn disabled() -> Self {
        Self { kv: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.kv.is_some()
    }

    /// Return the cached value for `key`, or compute it with `fetcher` and
    /// store it for `ttl_secs`.
    ///
    /// The boolean in the return value is `true` on a cache hit. Fetcher
    /// errors are the only errors this method returns; cache failures are
    /// logged and absorbed.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        fetcher: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(kv) = &self.kv else {
            debug!(key, "cache not configured, fetching directly");
            return Ok((fetcher().await?, false));
        };

        match kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    return Ok((value, true));
                }
                Err(e) => {
                    // Stale or corrupt entry; recompute and overwrite below.
                    warn!(key, error = %e, "discarding undecodable cache entry");
                }
            },
            Ok(None) => debug!(key, "cache miss"),
            Err(e) => {
                warn!(key, error = %e, "cache read failed, fetching directly");
                return Ok((fetcher().await?, false));
            }
        }

        let value = fetcher().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = kv.set_ex(key, ttl_secs, &raw).await {
                    warn!(key, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(key, error = %e, "could not serialize value for cache"),
        }

        Ok((value, false))
    }

    /// Delete every key matching a glob pattern. Returns how many entries
    /// were removed.
    pub async fn invalidate(&self, pattern: &str) -> Result<u64> {
        let Some(kv) = &self.kv else {
            warn!(pattern, "cache not configured, nothing to invalidate");
            return Ok(0);
        };

        let keys = kv.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = kv.del(&keys).await?;
        debug!(pattern, removed, "invalidated cache entries");
        Ok(removed)
    }

    /// Connectivity check for health reporting.
    pub async fn ping(&self) -> Result<()> {
        match &self.kv {
            Some(kv) => kv.ping().await,
            None => anyhow::bail!("cache not configured"),
        }
    }
}
