//! Application assembly: construct the service graph from configuration.
//!
//! Every upstream is optional and fail-open: a missing or unreachable
//! service downgrades its layer (no index → degraded retrieval, no database
//! → metadata-fallback content, no KV → uncached) instead of refusing to
//! start. The chat surface must stay up through backend hiccups.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::chunk_store::{ChunkStore, PgChunkStore, DATABASE_URL_ENV};
use crate::compose::Composer;
use crate::config::{Config, DatabaseConfig};
use crate::kv::RestKv;
use crate::retrieve::Retriever;
use crate::vector::{RestVectorIndex, VectorIndex};

/// The wired-up service graph shared by the HTTP server and the CLI.
pub struct Services {
    pub retriever: Arc<Retriever>,
    pub composer: Arc<Composer>,
    pub cache: Cache,
    /// Kept alongside the retriever for health reporting.
    pub chunks: Option<Arc<dyn ChunkStore>>,
    pub vector_configured: bool,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index: Option<Arc<dyn VectorIndex>> = match &config.vector {
            Some(vector_config) => match RestVectorIndex::from_config(vector_config) {
                Ok(index) => Some(Arc::new(index)),
                Err(e) => {
                    warn!(error = %e, "vector index unavailable, retrieval will degrade");
                    None
                }
            },
            None => {
                info!("no vector index configured, retrieval will degrade");
                None
            }
        };
        let vector_configured = index.is_some();

        let database_config = match &config.database {
            Some(db) => Some(db.clone()),
            // DATABASE_URL alone is enough to opt in.
            None => std::env::var(DATABASE_URL_ENV)
                .ok()
                .map(|url| DatabaseConfig { url }),
        };
        let chunks: Option<Arc<dyn ChunkStore>> = match database_config {
            Some(db) => match PgChunkStore::connect(&db).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "database unavailable, using metadata fallback content");
                    None
                }
            },
            None => None,
        };

        let cache = if config.cache.url.is_some() {
            match RestKv::from_config(&config.cache) {
                Ok(kv) => Cache::new(Arc::new(kv)),
                Err(e) => {
                    warn!(error = %e, "cache unavailable, requests will be uncached");
                    Cache::disabled()
                }
            }
        } else {
            Cache::disabled()
        };

        let retriever = Arc::new(Retriever::new(
            index,
            chunks.clone(),
            config.retrieval.clone(),
        ));
        let composer = Arc::new(Composer::new(
            config.llm.clone(),
            config.persona.clone(),
            retriever.clone(),
        )?);

        Ok(Self {
            retriever,
            composer,
            cache,
            chunks,
            vector_configured,
        })
    }
}
