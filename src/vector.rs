//! Vector index client.
//!
//! Defines the [`VectorIndex`] trait and two implementations:
//! - **[`RestVectorIndex`]** — calls a hosted nearest-neighbor REST API with
//!   retry and backoff. The service embeds the query text server-side, so no
//!   local embedding model is needed.
//! - **[`StaticVectorIndex`]** — a canned fixture for tests and
//!   credential-less local runs.
//!
//! # Wire format
//!
//! `POST {base}/query` with a bearer token and body
//! `{ "data": "<query text>", "topK": n, "includeMetadata": true }`;
//! the response is `{ "result": [ { "id", "score", "metadata" } ] }`.
//!
//! # Retry Strategy
//!
//! Same policy as the rest of the crate's upstream clients:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::VectorConfig;
use crate::models::ChunkMetadata;

/// Environment variable holding the index's bearer token.
pub const TOKEN_ENV: &str = "VECTOR_REST_TOKEN";

/// The hard upper bound on neighbors requested per query.
pub const MAX_TOP_K: usize = 100;

/// A raw hit from the vector index, before hydration and filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
}

/// Nearest-neighbor search over embedded profile chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Query for up to `top_k` nearest neighbors of `text`.
    ///
    /// `top_k` is clamped to [`MAX_TOP_K`] by implementations. Hits are
    /// returned in the index's own ranking order; callers apply score
    /// thresholds and re-sorting.
    async fn query(&self, text: &str, top_k: usize, include_metadata: bool)
        -> Result<Vec<VectorHit>>;
}

// ============ REST client ============

/// Client for a hosted vector index speaking the REST wire format above.
pub struct RestVectorIndex {
    base_url: String,
    token: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl RestVectorIndex {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `VECTOR_REST_TOKEN` is not in the environment or
    /// the HTTP client cannot be constructed.
    pub fn from_config(config: &VectorConfig) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", TOKEN_ENV))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl VectorIndex for RestVectorIndex {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorHit>> {
        let mut body = serde_json::json!({
            "data": text,
            "topK": top_k.min(MAX_TOP_K),
        });
        if include_metadata {
            body["includeMetadata"] = serde_json::Value::Bool(true);
        }

        let url = format!("{}/query", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_query_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Vector index error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Vector index error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Vector query failed after retries")))
    }
}

/// Parse the index's query response JSON into typed hits.
fn parse_query_response(json: &serde_json::Value) -> Result<Vec<VectorHit>> {
    let result = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid vector index response: missing result array"))?;

    let mut hits = Vec::with_capacity(result.len());
    for item in result {
        let hit: VectorHit = serde_json::from_value(item.clone())
            .map_err(|e| anyhow::anyhow!("Invalid vector index hit: {}", e))?;
        hits.push(hit);
    }

    Ok(hits)
}

// ============ Static fixture ============

/// A fixed-response index for tests and local development without
/// credentials. Returns its canned hits for every query, truncated to
/// `top_k`.
#[derive(Default)]
pub struct StaticVectorIndex {
    hits: Vec<VectorHit>,
}

impl StaticVectorIndex {
    pub fn new(hits: Vec<VectorHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl VectorIndex for StaticVectorIndex {
    async fn query(
        &self,
        _text: &str,
        top_k: usize,
        _include_metadata: bool,
    ) -> Result<Vec<VectorHit>> {
        let mut hits = self.hits.clone();
        hits.truncate(top_k.min(MAX_TOP_K));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_response() {
        let json = serde_json::json!({
            "result": [
                {
                    "id": "chunk-1",
                    "score": 0.91,
                    "metadata": { "title": "ING", "chunk_type": "experience" }
                },
                { "id": "chunk-2", "score": 0.42 }
            ]
        });

        let hits = parse_query_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "chunk-1");
        assert!((hits[0].score - 0.91).abs() < 1e-9);
        assert_eq!(
            hits[0].metadata.as_ref().unwrap().chunk_type.as_deref(),
            Some("experience")
        );
        assert!(hits[1].metadata.is_none());
    }

    #[test]
    fn rejects_response_without_result() {
        let json = serde_json::json!({ "error": "unauthorized" });
        assert!(parse_query_response(&json).is_err());
    }

    #[test]
    fn ignores_unknown_metadata_keys() {
        let json = serde_json::json!({
            "result": [
                {
                    "id": "chunk-1",
                    "score": 0.8,
                    "metadata": { "chunk_type": "skills", "embedding_model": "e5" }
                }
            ]
        });
        let hits = parse_query_response(&json).unwrap();
        assert_eq!(
            hits[0].metadata.as_ref().unwrap().chunk_type.as_deref(),
            Some("skills")
        );
    }

    #[tokio::test]
    async fn static_index_truncates_to_top_k() {
        let index = StaticVectorIndex::new(vec![
            VectorHit {
                id: "a".into(),
                score: 0.9,
                metadata: None,
            },
            VectorHit {
                id: "b".into(),
                score: 0.8,
                metadata: None,
            },
            VectorHit {
                id: "c".into(),
                score: 0.7,
                metadata: None,
            },
        ]);
        let hits = index.query("anything", 2, true).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
