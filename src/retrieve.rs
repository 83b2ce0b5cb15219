//! Context retrieval: nearest-neighbor search, hydration, and chat-context
//! assembly.
//!
//! [`Retriever::search`] owns the result contract: every returned result
//! meets the score threshold, matches the caller's metadata filter, and the
//! list is sorted descending by score and truncated to `top_k`. Downstream
//! consumers rely on that contract instead of re-sorting.
//!
//! [`Retriever::chat_context`] wraps search for chat: it joins surviving
//! content into a tagged blob and reports the mean score, yielding an
//! explicit [`ContextOutcome`] so callers can tell "nothing relevant" from
//! "upstream outage".

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::chunk_store::ChunkStore;
use crate::config::RetrievalConfig;
use crate::models::{ChatContext, ChunkMetadata, ContextOutcome, SearchOptions, SearchResult};
use crate::vector::{VectorIndex, MAX_TOP_K};

/// Chunk type used in context tags when metadata carries none.
const DEFAULT_CHUNK_TYPE: &str = "general";

/// Mean score reported with the fallback context, mirroring a mid-range
/// confidence rather than claiming a perfect or zero match.
const FALLBACK_RELEVANCE: f64 = 0.5;

pub struct Retriever {
    index: Option<Arc<dyn VectorIndex>>,
    chunks: Option<Arc<dyn ChunkStore>>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        index: Option<Arc<dyn VectorIndex>>,
        chunks: Option<Arc<dyn ChunkStore>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            chunks,
            config,
        }
    }

    /// Search the vector index and hydrate results.
    ///
    /// Returned results satisfy `score >= opts.min_score`, match
    /// `opts.filter`, are sorted descending by score, and number at most
    /// `opts.top_k`.
    ///
    /// # Errors
    ///
    /// Propagates index errors and the unconfigured-index case; chunk-store
    /// failures degrade to metadata-derived placeholder content instead.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("vector index not configured"))?;

        // The metadata filter runs client-side, so over-fetch candidates to
        // keep top_k fillable after filtering.
        let fetch_k = match opts.filter {
            Some(_) => (opts.top_k * 4).min(MAX_TOP_K),
            None => opts.top_k.min(MAX_TOP_K),
        };

        let hits = index.query(query, fetch_k, opts.include_metadata).await?;
        debug!(query, hits = hits.len(), "vector query returned");

        let mut results = Vec::new();
        for hit in hits {
            if hit.score < opts.min_score {
                continue;
            }
            let metadata = hit.metadata.unwrap_or_default();
            if let Some(ref filter) = opts.filter {
                if !filter.matches(&metadata) {
                    continue;
                }
            }

            let content = self.hydrate(&hit.id, &metadata).await;
            results.push(SearchResult {
                id: hit.id,
                score: hit.score,
                metadata,
                content,
            });
        }

        // Single owner of the ordering contract.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(opts.top_k);

        Ok(results)
    }

    /// Fetch full chunk text, falling back to metadata-derived placeholder
    /// content when the store is unavailable or the row is missing.
    async fn hydrate(&self, chunk_id: &str, metadata: &ChunkMetadata) -> String {
        if let Some(store) = &self.chunks {
            match store.content_for_chunk(chunk_id).await {
                Ok(Some(content)) => return content,
                Ok(None) => debug!(chunk_id, "no stored content for chunk"),
                Err(e) => {
                    warn!(chunk_id, error = %e, "chunk lookup failed, using metadata fallback")
                }
            }
        }
        fallback_content(chunk_id, metadata)
    }

    /// Assemble chat context with the configured `top_k` / `min_score`.
    ///
    /// An empty result set is a success: empty context, no sources, mean
    /// score `0.0`.
    pub async fn try_chat_context(&self, query: &str) -> Result<ChatContext> {
        let opts = SearchOptions {
            top_k: self.config.top_k,
            min_score: self.config.min_score,
            include_metadata: true,
            filter: None,
        };

        // Results arrive sorted and truncated from search().
        let results = self.search(query, &opts).await?;

        let relevance_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
        };

        let context = results
            .iter()
            .map(|r| {
                let tag = r
                    .metadata
                    .chunk_type
                    .as_deref()
                    .unwrap_or(DEFAULT_CHUNK_TYPE)
                    .to_uppercase();
                format!("[{}] {}", tag, r.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ChatContext {
            context,
            sources: results,
            relevance_score,
        })
    }

    /// Like [`try_chat_context`](Self::try_chat_context), but failures
    /// become an explicit [`ContextOutcome::Degraded`] carrying the
    /// configured fallback context.
    pub async fn chat_context(&self, query: &str) -> ContextOutcome {
        match self.try_chat_context(query).await {
            Ok(context) => ContextOutcome::Retrieved(context),
            Err(e) => {
                warn!(query, error = %e, "context retrieval degraded to fallback");
                ContextOutcome::Degraded {
                    context: self.fallback_context(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The context served when retrieval is unavailable.
    pub fn fallback_context(&self) -> ChatContext {
        ChatContext {
            context: self.config.fallback_context.clone(),
            sources: Vec::new(),
            relevance_score: FALLBACK_RELEVANCE,
        }
    }
}

fn fallback_content(chunk_id: &str, metadata: &ChunkMetadata) -> String {
    metadata
        .title
        .clone()
        .or_else(|| metadata.chunk_type.clone())
        .unwrap_or_else(|| format!("Professional content (ID: {})", chunk_id))
}
