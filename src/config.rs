use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vector: Option<VectorConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Hosted vector index. The bearer token comes from `VECTOR_REST_TOKEN`.
#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Relational store holding the full chunk text. `DATABASE_URL` overrides.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Hosted key-value cache. The bearer token comes from `KV_REST_TOKEN`.
/// With no `url` configured, caching is bypassed entirely.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl_secs: default_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Served when retrieval is unavailable, instead of an error.
    #[serde(default = "default_fallback_context")]
    pub fallback_context: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            fallback_context: default_fallback_context(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f64 {
    0.6
}
fn default_fallback_context() -> String {
    "Experienced software engineer with a strong professional background. \
     Detailed profile content is temporarily unavailable."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `openai`, or `groq`. API keys come from
    /// `OPENAI_API_KEY` / `GROQ_API_KEY`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Whose profile the assistant speaks for. Spliced into the system prompt
/// and the canned reply paths.
#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_persona_title")]
    pub title: String,
    #[serde(default = "default_persona_summary")]
    pub summary: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            title: default_persona_title(),
            summary: default_persona_summary(),
        }
    }
}

fn default_persona_name() -> String {
    "the profile owner".to_string()
}
fn default_persona_title() -> String {
    "Software Engineer".to_string()
}
fn default_persona_summary() -> String {
    "an experienced software engineer".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
    }
    if config.cache.ttl_secs < 1 {
        anyhow::bail!("cache.ttl_secs must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" | "groq" => {
            if config.llm.model.is_none() {
                anyhow::bail!(
                    "llm.model must be specified when provider is '{}'",
                    config.llm.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or groq.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_config_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.retrieval.min_score - 0.6).abs() < 1e-9);
        assert_eq!(config.cache.ttl_secs, 1800);
        assert_eq!(config.llm.provider, "disabled");
        assert!(!config.llm.is_enabled());
        assert!(config.vector.is_none());
    }

    #[test]
    fn full_config_parses() {
        let file = write_config(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [vector]
            url = "https://index.example.com"

            [database]
            url = "postgres://localhost/profile"

            [cache]
            url = "https://kv.example.com"
            ttl_secs = 600

            [retrieval]
            top_k = 3
            min_score = 0.7

            [llm]
            provider = "groq"
            model = "llama-3.1-70b-versatile"

            [persona]
            name = "Alex Doe"
            title = "Staff Engineer"
            summary = "a staff engineer with a platform background"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.vector.unwrap().url, "https://index.example.com");
        assert_eq!(config.cache.ttl_secs, 600);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.llm.is_enabled());
        assert_eq!(config.persona.name, "Alex Doe");
    }

    #[test]
    fn rejects_enabled_provider_without_model() {
        let file = write_config("[llm]\nprovider = \"openai\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let file = write_config("[llm]\nprovider = \"mystery\"\nmodel = \"m\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_out_of_range_min_score() {
        let file = write_config("[retrieval]\nmin_score = 1.5\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_zero_top_k() {
        let file = write_config("[retrieval]\ntop_k = 0\n");
        assert!(load_config(file.path()).is_err());
    }
}
