//! Key-value store clients backing the cache layer.
//!
//! [`KvStore`] traffics in raw strings only — serialization is owned by one
//! layer, [`crate::cache`], so a value is encoded exactly once on write and
//! decoded exactly once on read.
//!
//! - **[`RestKv`]** — hosted Redis-compatible REST API (`GET /get/{key}`,
//!   `POST /setex/{key}/{ttl}`, `GET /keys/{pattern}`, `POST /del/…`,
//!   `GET /ping`), bearer-token auth.
//! - **[`MemoryKv`]** — in-process store with TTL expiry for tests and
//!   credential-less local runs.
//!
//! KV calls are single-attempt: the cache layer is fail-open, so a flaky
//! read falls through to the fetcher instead of stacking retries onto the
//! request path.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::CacheConfig;

/// Environment variable holding the KV store's bearer token.
pub const TOKEN_ENV: &str = "KV_REST_TOKEN";

/// String-valued key-value store with TTL writes and pattern deletion.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, expiring after `ttl_secs`.
    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()>;

    /// List keys matching a glob-style pattern (`*` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete the given keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

// ============ REST client ============

/// Client for a hosted Redis-compatible REST API.
pub struct RestKv {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl RestKv {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache URL is not configured, `KV_REST_TOKEN`
    /// is not in the environment, or the HTTP client cannot be constructed.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("cache.url is not configured"))?;
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", TOKEN_ENV))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn command(&self, method: reqwest::Method, path: &str, body: Option<String>) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.token));
        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("KV store error {}: {}", status, body_text);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl KvStore for RestKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let json = self
            .command(reqwest::Method::GET, &format!("get/{}", encode_segment(key)), None)
            .await?;
        match json.get("result") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Ok(Some(other.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        self.command(
            reqwest::Method::POST,
            &format!("setex/{}/{}", encode_segment(key), ttl_secs),
            Some(value.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let json = self
            .command(
                reqwest::Method::GET,
                &format!("keys/{}", encode_segment(pattern)),
                None,
            )
            .await?;
        let keys = json
            .get("result")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let path = keys
            .iter()
            .map(|k| encode_segment(k))
            .collect::<Vec<_>>()
            .join("/");
        let json = self
            .command(reqwest::Method::POST, &format!("del/{}", path), None)
            .await?;
        Ok(json.get("result").and_then(|r| r.as_u64()).unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        let json = self.command(reqwest::Method::GET, "ping", None).await?;
        match json.get("result").and_then(|r| r.as_str()) {
            Some("PONG") => Ok(()),
            other => bail!("Unexpected ping reply: {:?}", other),
        }
    }
}

/// Percent-encode a key for use as a URL path segment. Cache keys contain
/// spaces and punctuation from user queries.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'*' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ============ In-memory ============

/// In-process store with TTL expiry, for tests and local development.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("kv lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().expect("kv lock poisoned");
        Ok(entries.get(key).and_then(|(value, expires_at)| {
            if Instant::now() < *expires_at {
                Some(value.clone())
            } else {
                None
            }
        }))
    }

    async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .write()
            .expect("kv lock poisoned")
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().expect("kv lock poisoned");
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(_, (_, expires_at))| now < *expires_at)
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().expect("kv lock poisoned");
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Minimal glob matcher: `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((b'*', rest)) => (0..=text.len()).any(|skip| inner(rest, &text[skip..])),
            Some((ch, rest)) => match text.split_first() {
                Some((t, text_rest)) => t == ch && inner(rest, text_rest),
                None => false,
            },
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_path_segments() {
        assert_eq!(encode_segment("rag:what is rust"), "rag%3Awhat%20is%20rust");
        assert_eq!(encode_segment("rag:*"), "rag%3A*");
        assert_eq!(encode_segment("plain-key_1.x~y"), "plain-key_1.x~y");
    }

    #[test]
    fn glob_matches_wildcards() {
        assert!(glob_match("rag:*", "rag:java experience"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("rag:*boot*", "rag:spring boot tips"));
        assert!(!glob_match("rag:*", "experiences:all"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn memory_kv_stores_and_expires() {
        let kv = MemoryKv::new();
        kv.set_ex("k1", 60, "value").await.unwrap();
        assert_eq!(kv.get("k1").await.unwrap().as_deref(), Some("value"));

        // A zero TTL is already expired.
        kv.set_ex("k2", 0, "gone").await.unwrap();
        assert_eq!(kv.get("k2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_kv_lists_and_deletes_by_pattern() {
        let kv = MemoryKv::new();
        kv.set_ex("rag:one", 60, "1").await.unwrap();
        kv.set_ex("rag:two", 60, "2").await.unwrap();
        kv.set_ex("skills:all", 60, "3").await.unwrap();

        let mut keys = kv.keys("rag:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["rag:one".to_string(), "rag:two".to_string()]);

        let removed = kv.del(&keys).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.keys("rag:*").await.unwrap().len(), 0);
        assert_eq!(kv.len(), 1);
    }
}
