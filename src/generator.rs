//! Generation-service clients that turn grounded prompts into raw text.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

/// Errors surfaced by a generation service call. One call per request;
/// nothing here retries.
#[derive(Debug)]
pub enum GenerationError {
    /// The request never produced an HTTP response.
    Transport(String),
    /// The service answered with a non-success status.
    Service {
        /// HTTP status code returned by the service.
        status: u16,
        /// Response body, for operator inspection.
        body: String,
    },
    /// The response decoded but carried no usable completion.
    MalformedResponse(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(detail) => write!(f, "generation request failed: {detail}"),
            Self::Service { status, body } => {
                write!(f, "generation service returned {status}: {body}")
            }
            Self::MalformedResponse(detail) => {
                write!(f, "generation response malformed: {detail}")
            }
        }
    }
}

impl std::error::Error for GenerationError {}

/// Request envelope shared by generation backends.
pub struct GenerationRequest<'a> {
    /// Fully rendered prompt, context included.
    pub prompt: &'a str,
    /// Sampling temperature; the pipeline keeps this low for
    /// deterministic-leaning output.
    pub temperature: f32,
    /// Maximum tokens to request from the completion model.
    pub max_tokens: usize,
}

/// Contract every generation backend must satisfy.
pub trait GenerationClient {
    /// Identifier of the generation model behind this client.
    fn model_id(&self) -> &str;

    /// Produces raw completion text for one prompt. Single-shot.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Blocking chat-completions client for OpenAI-compatible endpoints
/// (covers Groq and other compatible gateways via `base_url`).
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    /// Builds a new chat-completions client.
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing generation API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing generation model name");
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build generation HTTP client")?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
        })
    }
}

impl GenerationClient for OpenAiGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|err| GenerationError::Transport(err.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Service {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| GenerationError::MalformedResponse(err.to_string()))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                GenerationError::MalformedResponse("response carried no choices".to_string())
            })?;
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}
