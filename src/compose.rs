//! Response composition: retrieved context → system prompt → model reply.
//!
//! The composer splices the assembled chat context into a persona system
//! prompt, forwards the conversation to an OpenAI-compatible
//! chat-completions API, and attaches source attributions to the reply.
//!
//! The chat surface never sees an error: with the provider disabled, or on
//! any provider failure, the composer produces a deterministic canned reply
//! keyed off the question's topic, flagged `degraded`.
//!
//! # Providers
//!
//! | Config value | Endpoint | API key env |
//! |--------------|----------|-------------|
//! | `disabled` | — (canned replies only) | — |
//! | `openai` | `https://api.openai.com/v1/chat/completions` | `OPENAI_API_KEY` |
//! | `groq` | `https://api.groq.com/openai/v1/chat/completions` | `GROQ_API_KEY` |
//!
//! # Retry Strategy
//!
//! Same policy as the other upstream clients: 429/5xx/network errors retry
//! with exponential backoff (1s, 2s, 4s, … capped at 2^5), other 4xx fail
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::config::{LlmConfig, PersonaConfig};
use crate::models::{ChatMessage, ChatReply, SourceRef};
use crate::retrieve::Retriever;

/// How many trailing history messages accompany each completion request.
const HISTORY_WINDOW: usize = 6;

/// How much retrieved context the question-generation prompt may carry.
const QUESTION_CONTEXT_CHARS: usize = 2000;

pub struct Composer {
    llm: LlmConfig,
    persona: PersonaConfig,
    retriever: Arc<Retriever>,
    client: reqwest::Client,
}

impl Composer {
    pub fn new(llm: LlmConfig, persona: PersonaConfig, retriever: Arc<Retriever>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()?;
        Ok(Self {
            llm,
            persona,
            retriever,
            client,
        })
    }

    /// Generate a reply to `user_message`, with retrieval-backed context and
    /// source attributions. Infallible by design: failures downgrade to the
    /// canned path.
    pub async fn generate_reply(
        &self,
        user_message: &str,
        history: &[ChatMessage],
    ) -> ChatReply {
        let outcome = self.retriever.chat_context(user_message).await;
        let retrieval_degraded = outcome.is_degraded();
        let context = outcome.context();
        let sources: Vec<SourceRef> = context.sources.iter().map(SourceRef::from_result).collect();

        if self.llm.is_enabled() {
            let messages = self.build_messages(user_message, history, &context.context);
            match self.chat_completion(&messages).await {
                Ok(response) => {
                    return ChatReply {
                        id: Uuid::new_v4().to_string(),
                        response,
                        sources,
                        degraded: retrieval_degraded,
                        created_at: Utc::now(),
                    };
                }
                Err(e) => warn!(error = %e, "completion failed, using canned reply"),
            }
        }

        ChatReply {
            id: Uuid::new_v4().to_string(),
            response: self.canned_reply(user_message),
            sources,
            degraded: true,
            created_at: Utc::now(),
        }
    }

    /// Suggested questions for the chat surface.
    ///
    /// With a live model, asks it to derive six questions from retrieved
    /// context; otherwise (or on any failure) serves the static list.
    pub async fn suggested_questions(&self) -> Vec<String> {
        if !self.llm.is_enabled() {
            return default_questions();
        }

        let outcome = self
            .retriever
            .chat_context("professional experience skills achievements")
            .await;
        let context: String = outcome
            .context()
            .context
            .chars()
            .take(QUESTION_CONTEXT_CHARS)
            .collect();

        let prompt = format!(
            "Based on this professional background context, generate 6 engaging questions \
             that would showcase the person's expertise and experience. Make them specific \
             and likely to yield interesting answers.\n\n\
             Context: {}\n\n\
             Generate questions that cover technical expertise, notable achievements, \
             project experiences, leadership, industry knowledge, and career growth. \
             Respond with only a JSON array of 6 question strings.",
            context
        );

        match self.chat_completion(&[ChatMessage::user(prompt)]).await {
            Ok(text) => parse_questions(&text).unwrap_or_else(|| {
                warn!("model returned unparseable question list, using static list");
                default_questions()
            }),
            Err(e) => {
                warn!(error = %e, "question generation failed, using static list");
                default_questions()
            }
        }
    }

    /// Assemble the completion request: persona system prompt with spliced
    /// context, the last [`HISTORY_WINDOW`] history messages, then the user
    /// message.
    pub fn build_messages(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len().min(HISTORY_WINDOW) + 2);
        messages.push(ChatMessage::system(self.system_prompt(context)));

        let tail_start = history.len().saturating_sub(HISTORY_WINDOW);
        messages.extend_from_slice(&history[tail_start..]);

        messages.push(ChatMessage::user(user_message));
        messages
    }

    fn system_prompt(&self, context: &str) -> String {
        format!(
            "You are {name}, a {title}. You are responding to questions about your \
             professional background, skills, and experience.\n\n\
             IMPORTANT GUIDELINES:\n\
             - Always respond in first person as {name}\n\
             - Use the provided context to give accurate, specific answers\n\
             - Include specific examples, metrics, and achievements when relevant\n\
             - Maintain a professional yet personable tone\n\
             - If asked about something not in your background, politely clarify your actual experience\n\
             - Reference specific companies, technologies, and projects mentioned in the context\n\
             - Keep responses focused and relevant to the question asked\n\n\
             CONTEXT FROM YOUR PROFESSIONAL BACKGROUND:\n\
             {context}\n\n\
             If the context doesn't contain relevant information for the question, politely \
             explain what you can help with as {summary}.",
            name = self.persona.name,
            title = self.persona.title,
            context = context,
            summary = self.persona.summary,
        )
    }

    /// Deterministic reply keyed off the question's topic, for the disabled
    /// provider and every provider-failure path.
    pub fn canned_reply(&self, user_message: &str) -> String {
        let lower = user_message.to_lowercase();
        let name = &self.persona.name;
        let summary = &self.persona.summary;

        if lower.contains("experience") || lower.contains("background") {
            format!(
                "Thanks for asking about my experience! I'm {}, {}. I'd be glad to walk \
                 through the roles and achievements that shaped my career.",
                name, summary
            )
        } else if lower.contains("skill") || lower.contains("technology") || lower.contains("tech")
        {
            format!(
                "My core technical expertise reflects my work as {}. I'm always learning \
                 new technologies and applying them to real projects.",
                summary
            )
        } else if lower.contains("project") || lower.contains("work") {
            format!(
                "I've worked on several impactful projects throughout my career as {}. \
                 Each one taught me valuable lessons about scalability, performance, and \
                 collaboration.",
                summary
            )
        } else {
            format!(
                "Thank you for your question: \"{}\". I'm {}, {}. Feel free to ask about \
                 my background, technical expertise, or any specific aspects of my \
                 experience.",
                user_message, name, summary
            )
        }
    }

    /// Call the configured chat-completions endpoint with retry/backoff and
    /// return the assistant message content.
    async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String> {
        let (endpoint, key_env) = match self.llm.provider.as_str() {
            "openai" => ("https://api.openai.com/v1/chat/completions", "OPENAI_API_KEY"),
            "groq" => (
                "https://api.groq.com/openai/v1/chat/completions",
                "GROQ_API_KEY",
            ),
            "disabled" => bail!("LLM provider is disabled"),
            other => bail!("Unknown llm provider: {}", other),
        };

        let api_key =
            std::env::var(key_env).map_err(|_| anyhow::anyhow!("{} not set", key_env))?;
        let model = self
            .llm
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": self.llm.temperature,
        });

        let mut last_err = None;

        for attempt in 0..=self.llm.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Completion error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Completion error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
}

/// The static question list served without a live model.
pub fn default_questions() -> Vec<String> {
    [
        "What's your experience with backend development?",
        "Can you tell me about your most significant technical achievements?",
        "What was the most challenging project you've worked on?",
        "How do you approach system performance improvements?",
        "What's your experience with cloud technologies?",
        "Can you describe your leadership and mentoring experience?",
    ]
    .iter()
    .map(|q| q.to_string())
    .collect()
}

/// Parse a model-produced question list.
///
/// Accepts a bare JSON array of strings or `{ "questions": [...] }`, with or
/// without Markdown code fences. Returns `None` when nothing usable is
/// found.
fn parse_questions(text: &str) -> Option<Vec<String>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: serde_json::Value = serde_json::from_str(inner).ok()?;
    let array = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map.get("questions")?.as_array()?.clone(),
        _ => return None,
    };

    let questions: Vec<String> = array
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .take(6)
        .collect();

    if questions.is_empty() {
        None
    } else {
        Some(questions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::models::Role;

    fn composer() -> Composer {
        let retriever = Arc::new(Retriever::new(None, None, RetrievalConfig::default()));
        Composer::new(LlmConfig::default(), PersonaConfig::default(), retriever).unwrap()
    }

    #[test]
    fn messages_carry_system_history_window_and_user() {
        let composer = composer();
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();

        let messages = composer.build_messages("final question", &history, "[SKILLS] Rust");

        // system + 6 history + user
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("[SKILLS] Rust"));
        assert_eq!(messages[1].content, "q4");
        assert_eq!(messages[7].content, "final question");
        assert_eq!(messages[7].role, Role::User);
    }

    #[test]
    fn short_history_is_kept_whole() {
        let composer = composer();
        let history = vec![ChatMessage::user("only one")];
        let messages = composer.build_messages("next", &history, "");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "only one");
    }

    #[test]
    fn system_prompt_splices_persona_and_context() {
        let composer = composer();
        let prompt = composer.system_prompt("[EXPERIENCE] Bank work");
        assert!(prompt.contains("the profile owner"));
        assert!(prompt.contains("[EXPERIENCE] Bank work"));
    }

    #[test]
    fn canned_replies_match_topics() {
        let composer = composer();
        assert!(composer
            .canned_reply("Tell me about your experience")
            .contains("experience"));
        assert!(composer
            .canned_reply("What tech skills do you have?")
            .contains("technical expertise"));
        assert!(composer
            .canned_reply("What projects have you done?")
            .contains("projects"));
        assert!(composer
            .canned_reply("Hello there")
            .contains("Thank you for your question"));
    }

    #[tokio::test]
    async fn disabled_provider_replies_canned_and_degraded() {
        let composer = composer();
        let reply = composer.generate_reply("What are your skills?", &[]).await;
        assert!(reply.degraded);
        assert!(!reply.response.is_empty());
        assert!(reply.sources.is_empty());
    }

    #[tokio::test]
    async fn disabled_provider_serves_static_questions() {
        let composer = composer();
        let questions = composer.suggested_questions().await;
        assert_eq!(questions.len(), 6);
    }

    #[test]
    fn parses_bare_array() {
        let parsed = parse_questions(r#"["q1", "q2"]"#).unwrap();
        assert_eq!(parsed, vec!["q1".to_string(), "q2".to_string()]);
    }

    #[test]
    fn parses_fenced_object() {
        let text = "```json\n{\"questions\": [\"q1\", \"q2\", \"q3\"]}\n```";
        let parsed = parse_questions(text).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn rejects_non_question_payloads() {
        assert!(parse_questions("not json").is_none());
        assert!(parse_questions("[]").is_none());
        assert!(parse_questions("{\"answers\": []}").is_none());
        assert!(parse_questions("42").is_none());
    }

    #[test]
    fn caps_questions_at_six() {
        let text = r#"["1","2","3","4","5","6","7","8"]"#;
        assert_eq!(parse_questions(text).unwrap().len(), 6);
    }
}
