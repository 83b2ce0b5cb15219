//! Tool registry for the HTTP API.
//!
//! The chat surface (including function-calling voice clients) discovers
//! capabilities via `GET /tools/list` and invokes them via
//! `POST /tools/{name}`. Each capability implements [`Tool`]: a name, a
//! one-line description, an OpenAI function-calling parameter schema, and an
//! async `execute`.
//!
//! Built-ins: `search`, `chat`, `suggest`, `validate`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::compose::Composer;
use crate::models::{ChatMessage, MetadataFilter, SearchOptions};
use crate::retrieve::Retriever;
use crate::validate::validate_input;

/// A capability exposed over the tools API.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name; used as the route path (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// OpenAI function-calling JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with JSON parameters. The result is wrapped in
    /// `{ "result": ... }` by the HTTP layer.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Tool metadata row for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Bridge handing tools the retrieval and composition services.
pub struct ToolContext {
    pub retriever: Arc<Retriever>,
    pub composer: Arc<Composer>,
}

impl ToolContext {
    pub fn new(retriever: Arc<Retriever>, composer: Arc<Composer>) -> Self {
        Self {
            retriever,
            composer,
        }
    }
}

// ============ search ============

/// Search indexed professional content.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search professional content including experience, skills, and projects"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "top_k": { "type": "integer", "description": "Max results", "default": 10 },
                "min_score": { "type": "number", "description": "Minimum similarity score", "default": 0.6 },
                "chunk_type": { "type": "string", "description": "Filter by content category (e.g. experience, skills, projects)" },
                "importance": { "type": "string", "description": "Filter by importance level (e.g. critical)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }

        let defaults = SearchOptions::default();
        let top_k = params["top_k"]
            .as_u64()
            .map(|k| k as usize)
            .unwrap_or(defaults.top_k);
        let min_score = params["min_score"].as_f64().unwrap_or(defaults.min_score);

        let filter = {
            let chunk_type = params["chunk_type"].as_str().map(str::to_string);
            let importance = params["importance"].as_str().map(str::to_string);
            if chunk_type.is_some() || importance.is_some() {
                Some(MetadataFilter {
                    chunk_type,
                    importance,
                })
            } else {
                None
            }
        };

        let opts = SearchOptions {
            top_k,
            min_score,
            include_metadata: true,
            filter,
        };
        let results = ctx.retriever.search(query, &opts).await?;
        let total = results.len();

        Ok(serde_json::json!({
            "results": results,
            "query": query,
            "totalResults": total,
        }))
    }
}

// ============ chat ============

/// Generate a retrieval-backed reply to a user message.
pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Generate a first-person reply about the profile, grounded in retrieved context"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "The user's message" },
                "history": {
                    "type": "array",
                    "description": "Prior conversation messages, oldest first",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": { "type": "string", "enum": ["user", "assistant"] },
                            "content": { "type": "string" }
                        },
                        "required": ["role", "content"]
                    }
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let message = params["message"].as_str().unwrap_or("");
        let validation = validate_input(message);
        if !validation.is_valid {
            anyhow::bail!("invalid message: {}", validation.suggestions.join("; "));
        }

        let history: Vec<ChatMessage> = match params.get("history") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| anyhow::anyhow!("invalid history: {}", e))?,
            None => Vec::new(),
        };

        let reply = ctx
            .composer
            .generate_reply(&validation.sanitized_input, &history)
            .await;
        Ok(serde_json::to_value(&reply)?)
    }
}

// ============ suggest ============

/// Suggested questions for the chat surface.
pub struct SuggestTool;

#[async_trait]
impl Tool for SuggestTool {
    fn name(&self) -> &str {
        "suggest"
    }

    fn description(&self) -> &str {
        "Get suggested questions users commonly ask about the profile"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let questions = ctx.composer.suggested_questions().await;
        Ok(serde_json::json!({ "questions": questions }))
    }
}

// ============ validate ============

/// Validate chat input before sending it anywhere.
pub struct ValidateTool;

#[async_trait]
impl Tool for ValidateTool {
    fn name(&self) -> &str {
        "validate"
    }

    fn description(&self) -> &str {
        "Validate a chat question before submission"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": "The input to validate" }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let input = params["input"].as_str().unwrap_or("");
        Ok(serde_json::to_value(validate_input(input))?)
    }
}

// ============ Registry ============

/// Registry of tools served over HTTP.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(ChatTool));
        registry.register(Box::new(SuggestTool));
        registry.register(Box::new(ValidateTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, PersonaConfig, RetrievalConfig};
    use crate::models::ChunkMetadata;
    use crate::vector::{StaticVectorIndex, VectorHit};

    fn context_with_hits(hits: Vec<VectorHit>) -> ToolContext {
        let retriever = Arc::new(Retriever::new(
            Some(Arc::new(StaticVectorIndex::new(hits))),
            None,
            RetrievalConfig::default(),
        ));
        let composer = Arc::new(
            Composer::new(LlmConfig::default(), PersonaConfig::default(), retriever.clone())
                .unwrap(),
        );
        ToolContext::new(retriever, composer)
    }

    fn skill_hit(id: &str, score: f64) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            metadata: Some(ChunkMetadata {
                chunk_type: Some("skills".to_string()),
                title: Some("Skills".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        for name in ["search", "chat", "suggest", "validate"] {
            assert!(registry.find(name).is_some(), "missing tool {}", name);
        }
        assert!(registry.find("nope").is_none());
    }

    #[tokio::test]
    async fn search_tool_returns_results_and_count() {
        let ctx = context_with_hits(vec![skill_hit("c1", 0.9), skill_hit("c2", 0.3)]);
        let result = SearchTool
            .execute(serde_json::json!({ "query": "rust" }), &ctx)
            .await
            .unwrap();

        assert_eq!(result["totalResults"], 1);
        assert_eq!(result["query"], "rust");
        assert_eq!(result["results"][0]["id"], "c1");
    }

    #[tokio::test]
    async fn search_tool_rejects_empty_query() {
        let ctx = context_with_hits(vec![]);
        let err = SearchTool
            .execute(serde_json::json!({ "query": "   " }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[tokio::test]
    async fn search_tool_builds_filter_from_params() {
        let mut experience = skill_hit("e1", 0.95);
        experience.metadata.as_mut().unwrap().chunk_type = Some("experience".to_string());
        let ctx = context_with_hits(vec![experience, skill_hit("s1", 0.9)]);

        let result = SearchTool
            .execute(
                serde_json::json!({ "query": "work", "chunk_type": "experience" }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["totalResults"], 1);
        assert_eq!(result["results"][0]["id"], "e1");
    }

    #[tokio::test]
    async fn chat_tool_validates_and_replies() {
        let ctx = context_with_hits(vec![skill_hit("c1", 0.9)]);

        let err = ChatTool
            .execute(serde_json::json!({ "message": "" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid message"));

        let result = ChatTool
            .execute(
                serde_json::json!({
                    "message": "What are your skills?",
                    "history": [{ "role": "user", "content": "hi" }]
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result["response"].as_str().unwrap().len() > 0);
        assert_eq!(result["sources"][0]["type"], "skills");
    }

    #[tokio::test]
    async fn suggest_tool_lists_questions() {
        let ctx = context_with_hits(vec![]);
        let result = SuggestTool
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["questions"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn validate_tool_reports_verdict() {
        let ctx = context_with_hits(vec![]);
        let result = ValidateTool
            .execute(serde_json::json!({ "input": "Is this fine?" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["isValid"], true);

        let result = ValidateTool
            .execute(serde_json::json!({ "input": "" }), &ctx)
            .await
            .unwrap();
        assert_eq!(result["isValid"], false);
    }
}
