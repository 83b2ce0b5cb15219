//! Core data models used throughout twin-context.
//!
//! These types represent the search results, assembled chat context, and
//! conversation messages that flow through the retrieval and composition
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside each indexed chunk.
///
/// All fields are optional; the vector index treats metadata as a free-form
/// JSON object and unknown keys are ignored on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// A single scored result from the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    /// Cosine-similarity-like score in `[0, 1]` from the vector index.
    pub score: f64,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    pub content: String,
}

/// Assembled context for a chat turn: the joined content blob, the surviving
/// sources, and their mean score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    pub context: String,
    pub sources: Vec<SearchResult>,
    /// Arithmetic mean of the surviving scores; `0.0` when nothing survived.
    pub relevance_score: f64,
}

impl ChatContext {
    /// Context representing "nothing relevant found" (distinct from an
    /// upstream outage, which is a [`ContextOutcome::Degraded`]).
    pub fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
            relevance_score: 0.0,
        }
    }
}

/// Outcome of context assembly.
///
/// Callers can tell "no relevant content found" (`Retrieved` with an empty
/// context) apart from "upstream outage" (`Degraded` carrying the configured
/// fallback context and the failure reason).
#[derive(Debug, Clone)]
pub enum ContextOutcome {
    /// Retrieval succeeded, possibly with zero surviving sources.
    Retrieved(ChatContext),
    /// Retrieval failed; `context` is the configured fallback.
    Degraded { context: ChatContext, reason: String },
}

impl ContextOutcome {
    /// The context to serve, regardless of how it was produced.
    pub fn context(&self) -> &ChatContext {
        match self {
            ContextOutcome::Retrieved(ctx) => ctx,
            ContextOutcome::Degraded { context, .. } => context,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ContextOutcome::Degraded { .. })
    }
}

/// Post-query metadata filter.
///
/// The vector backend's server-side filtering is not relied upon; filters
/// are applied in application code against returned metadata so a
/// caller-supplied constraint is never silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
}

impl MetadataFilter {
    /// True when every set constraint matches the chunk's metadata.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(ref want) = self.chunk_type {
            if metadata.chunk_type.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(ref want) = self.importance {
            if metadata.importance.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_type.is_none() && self.importance.is_none()
    }
}

/// Options for [`Retriever::search`](crate::retrieve::Retriever::search).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of results to return.
    pub top_k: usize,
    /// Results scoring below this are discarded.
    pub min_score: f64,
    /// Request metadata from the index alongside each hit.
    pub include_metadata: bool,
    /// Optional post-query metadata constraint.
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.6,
            include_metadata: true,
            filter: None,
        }
    }
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Compact source attribution attached to a generated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub relevance_score: f64,
}

impl SourceRef {
    /// Build an attribution from a search result, falling back through
    /// `title` → `chunk_type` → a generic label.
    pub fn from_result(result: &SearchResult) -> Self {
        let title = result
            .metadata
            .title
            .clone()
            .or_else(|| result.metadata.chunk_type.clone())
            .unwrap_or_else(|| "Professional Content".to_string());
        let kind = result
            .metadata
            .chunk_type
            .clone()
            .unwrap_or_else(|| "content".to_string());
        Self {
            id: result.id.clone(),
            title,
            kind,
            relevance_score: result.score,
        }
    }
}

/// A generated assistant reply with source attributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub id: String,
    pub response: String,
    pub sources: Vec<SourceRef>,
    /// True when the reply was produced without live retrieval or without a
    /// live model (canned path).
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(chunk_type: Option<&str>, importance: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            chunk_type: chunk_type.map(str::to_string),
            importance: importance.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = MetadataFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&meta(None, None)));
        assert!(filter.matches(&meta(Some("experience"), Some("critical"))));
    }

    #[test]
    fn chunk_type_filter_requires_exact_match() {
        let filter = MetadataFilter {
            chunk_type: Some("experience".to_string()),
            importance: None,
        };
        assert!(filter.matches(&meta(Some("experience"), None)));
        assert!(!filter.matches(&meta(Some("skills"), None)));
        assert!(!filter.matches(&meta(None, None)));
    }

    #[test]
    fn combined_filter_requires_both() {
        let filter = MetadataFilter {
            chunk_type: Some("experience".to_string()),
            importance: Some("critical".to_string()),
        };
        assert!(filter.matches(&meta(Some("experience"), Some("critical"))));
        assert!(!filter.matches(&meta(Some("experience"), Some("high"))));
    }

    #[test]
    fn source_ref_falls_back_through_metadata() {
        let result = SearchResult {
            id: "c1".to_string(),
            score: 0.9,
            metadata: meta(Some("skills"), None),
            content: "…".to_string(),
        };
        let src = SourceRef::from_result(&result);
        assert_eq!(src.title, "skills");
        assert_eq!(src.kind, "skills");

        let bare = SearchResult {
            id: "c2".to_string(),
            score: 0.8,
            metadata: ChunkMetadata::default(),
            content: "…".to_string(),
        };
        let src = SourceRef::from_result(&bare);
        assert_eq!(src.title, "Professional Content");
        assert_eq!(src.kind, "content");
    }

    #[test]
    fn chat_context_serializes_camel_case() {
        let ctx = ChatContext::empty();
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("relevanceScore").is_some());
        assert!(json.get("relevance_score").is_none());
    }
}
