//! Relational lookup of full chunk text.
//!
//! The vector index stores only ids, scores, and light metadata; the full
//! text of each chunk lives in a relational table. [`ChunkStore`] is the
//! seam, [`PgChunkStore`] the production implementation, and
//! [`MemoryChunkStore`] an in-memory stand-in for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;

/// Environment variable that overrides the configured database URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Lookup of full chunk content by chunk id.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetch the display content for a chunk, `None` if the row is missing.
    ///
    /// When the row carries a title, the content is returned as
    /// `"{title}: {content}"`.
    async fn content_for_chunk(&self, chunk_id: &str) -> Result<Option<String>>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<()>;
}

// ============ Postgres ============

/// Postgres-backed chunk store.
///
/// The pool is created once and lives for the process; each lookup acquires
/// and releases a pooled connection.
pub struct PgChunkStore {
    pool: PgPool,
}

impl PgChunkStore {
    /// Connect using the configured URL, with `DATABASE_URL` taking
    /// precedence when set.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = std::env::var(DATABASE_URL_ENV).unwrap_or_else(|_| config.url.clone());

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ChunkStore for PgChunkStore {
    async fn content_for_chunk(&self, chunk_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT content, title FROM content_chunks WHERE chunk_id = $1")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let content: String = row.get("content");
            let title: Option<String> = row.get("title");
            format_chunk(title.as_deref(), &content)
        }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Prefix the content with its title when one is present.
fn format_chunk(title: Option<&str>, content: &str) -> String {
    match title {
        Some(title) if !title.is_empty() => format!("{}: {}", title, content),
        _ => content.to_string(),
    }
}

// ============ In-memory ============

/// In-memory chunk store for tests and credential-less local runs.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<String, (Option<String>, String)>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk with optional title.
    pub fn insert(&self, chunk_id: impl Into<String>, title: Option<&str>, content: &str) {
        self.chunks.write().expect("chunk store lock poisoned").insert(
            chunk_id.into(),
            (title.map(str::to_string), content.to_string()),
        );
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn content_for_chunk(&self, chunk_id: &str) -> Result<Option<String>> {
        let chunks = self.chunks.read().expect("chunk store lock poisoned");
        Ok(chunks
            .get(chunk_id)
            .map(|(title, content)| format_chunk(title.as_deref(), content)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_prefixed_when_present() {
        assert_eq!(
            format_chunk(Some("ING Experience"), "Built microservices."),
            "ING Experience: Built microservices."
        );
        assert_eq!(format_chunk(None, "Built microservices."), "Built microservices.");
        assert_eq!(format_chunk(Some(""), "Built microservices."), "Built microservices.");
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryChunkStore::new();
        store.insert("c1", Some("Skills"), "Rust, Java, SQL.");
        store.insert("c2", None, "No title here.");

        assert_eq!(
            store.content_for_chunk("c1").await.unwrap().as_deref(),
            Some("Skills: Rust, Java, SQL.")
        );
        assert_eq!(
            store.content_for_chunk("c2").await.unwrap().as_deref(),
            Some("No title here.")
        );
        assert_eq!(store.content_for_chunk("missing").await.unwrap(), None);
    }
}
