pub mod models;
pub mod prompt;
pub mod providers;
pub mod response;

use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::llm::models::{GeneratedQuery, Provenance};
use crate::llm::prompt::PromptBuilder;
use crate::llm::response::{ParsedResponse, parse_response};
use crate::schema::SchemaDescription;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("LLM request timed out after {0} seconds")]
    Timeout(u64),
    #[error("no SQL statement found in the LLM response")]
    Unparseable(String),
    #[error("AI generation is disabled")]
    Disabled,
}

/// A text-generation backend: prompt in, raw completion out.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, prompt: &str, model: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    generator: Option<Box<dyn SqlGenerator>>,
    model: String,
    timeout: Duration,
    prompt_builder: PromptBuilder,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.is_disabled() {
            info!("AI generation disabled by configuration");
            return Ok(Self::disabled(config));
        }

        let generator: Box<dyn SqlGenerator> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            "gemini" => Box::new(providers::gemini::GeminiProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )));
            }
        };

        Ok(Self::from_parts(Some(generator), config))
    }

    /// A manager that never calls out; every request takes the fallback path.
    pub fn disabled(config: &LlmConfig) -> Self {
        Self::from_parts(None, config)
    }

    /// A manager backed by a caller-supplied generator.
    pub fn with_generator(generator: Box<dyn SqlGenerator>, config: &LlmConfig) -> Self {
        Self::from_parts(Some(generator), config)
    }

    fn from_parts(generator: Option<Box<dyn SqlGenerator>>, config: &LlmConfig) -> Self {
        Self {
            generator,
            model: config.model.clone(),
            timeout: config.timeout(),
            prompt_builder: PromptBuilder::new(config.max_prompt_chars),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub fn backend(&self) -> &'static str {
        self.generator.as_ref().map_or("none", |g| g.name())
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    /// Asks the model for SQL. A schema without tables yields an empty query and no call.
    pub async fn generate_query(
        &self,
        schema: &SchemaDescription,
        request: &str,
        model: Option<&str>,
    ) -> Result<GeneratedQuery, LlmError> {
        if schema.is_empty() {
            return Ok(GeneratedQuery::empty(
                Provenance::Ai,
                "The database has no tables to report on",
            ));
        }

        let generator = self.generator.as_ref().ok_or(LlmError::Disabled)?;
        let model = model.unwrap_or(self.model.as_str());
        let prompt = self.prompt_builder.build(schema, request);

        info!(
            "Requesting SQL from {} model {} ({} prompt chars)",
            generator.name(),
            model,
            prompt.len()
        );
        let start_time = Instant::now();

        let raw = tokio::time::timeout(self.timeout, generator.complete(&prompt, model))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        debug!(
            "Model answered in {}ms: {}",
            start_time.elapsed().as_millis(),
            raw
        );

        match parse_response(&raw) {
            ParsedResponse::Parsed {
                sql,
                hints,
                explanation,
            } => Ok(GeneratedQuery::new(sql, Provenance::Ai)
                .with_explanation(explanation)
                .with_hints(hints)),
            ParsedResponse::Unparseable(raw) => Err(LlmError::Unparseable(raw)),
        }
    }
}
