//! Extraction collaborator — LLM-backed entity/relation extraction
//!
//! Two implementations:
//! - `OpenRouterExtractor`: calls the OpenRouter chat-completions API (production)
//! - `MockExtractor`: preconfigured results and scripted failures (testing)
//!
//! The call is made at temperature zero so a retried extraction of the same
//! content yields the same result. The model must answer with strict JSON; a
//! response that fails to parse is treated exactly like a failed call — the
//! item is requeued, never half-applied.

use crate::graph::{Entity, Relation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_TOKENS: u32 = 10_000;

const SYSTEM_PROMPT: &str = "\
You are an expert information-extraction system building a knowledge graph.

INPUT: a raw text snippet from a web page.

INSTRUCTIONS:
1. Extract clearly identifiable entities.
2. Extract meaningful relations between them.
3. Normalize entity names (e.g. \"J. Musk\" and \"Elon Musk\" become \"Elon Musk\").
4. Ignore generic entities (\"the company\", \"users\", \"he\", \"it\").
5. Output strict JSON, nothing else.

SCHEMA:
{\"entities\": [{\"name\": \"Exact Name\", \"label\": \"Type (Person, Organization, Location, Product, Concept, Event, ...)\"}], \
\"relations\": [{\"source\": \"Entity Name\", \"target\": \"Entity Name\", \"relation\": \"ALL_CAPS_VERB_PHRASE\"}]}

CONSTRAINTS:
- Entity names must be unique within the list.
- \"relation\" is a short verb phrase (e.g. \"FOUNDED\", \"ACQUIRED\", \"LOCATED_IN\").
- Do not wrap the output in markdown code fences.";

/// Errors from extraction operations. All recoverable via requeue.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("extraction API error: {0}")]
    Api(String),

    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    #[error("extraction output is not valid JSON: {0}")]
    Parse(String),
}

/// Structured output of one extraction call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Trait for the extraction collaborator.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract entities and relations from raw page text.
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractError>;
}

// ---------------------------------------------------------------------------
// OpenRouter wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// LLM extractor backed by the OpenRouter chat-completions API.
pub struct OpenRouterExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Extractor for OpenRouterExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractError> {
        let user_prompt = format!("Extract entities from the following document:\n{text}");
        let request = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            // Deterministic across retries.
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ExtractError::MalformedResponse("no completion content".into()))?;

        parse_extraction(content)
    }
}

/// Parse the model's answer as an [`Extraction`].
///
/// Models occasionally wrap JSON in code fences despite instructions, so a
/// fence is stripped before parsing. Anything else that is not the expected
/// JSON shape is a parse error.
pub fn parse_extraction(content: &str) -> Result<Extraction, ExtractError> {
    let trimmed = strip_code_fence(content.trim());
    serde_json::from_str(trimmed).map_err(|e| ExtractError::Parse(e.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") up to the first newline.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.strip_suffix("```").map(str::trim_end).unwrap_or(body)
}

/// Mock extractor for testing — preconfigured result, scripted failures, and
/// a call count.
#[derive(Default)]
pub struct MockExtractor {
    result: Option<Extraction>,
    failures: Mutex<u32>,
    calls: Mutex<usize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this extraction once any scripted failures are spent.
    pub fn returning(mut self, extraction: Extraction) -> Self {
        self.result = Some(extraction);
        self
    }

    /// Fail the first `count` calls before succeeding.
    pub fn with_failures(self, count: u32) -> Self {
        *self.failures.lock().unwrap() = count;
        self
    }

    /// How many times `extract` has been called.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction, ExtractError> {
        *self.calls.lock().unwrap() += 1;

        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(ExtractError::Api("scripted extraction failure".into()));
        }

        self.result
            .clone()
            .ok_or_else(|| ExtractError::Api("no mock extraction configured".into()))
    }
}
