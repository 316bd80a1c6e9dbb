//! Embedding-service clients used to vectorize chunks and questions.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

/// Errors surfaced by an embedding service call.
///
/// Service unavailability is always reported as one of these kinds, never
/// as an empty embedding list.
#[derive(Debug)]
pub enum EmbeddingError {
    /// The request never produced an HTTP response (connect, timeout,
    /// body transfer).
    Transport(String),
    /// The service answered with a non-success status.
    Service {
        /// HTTP status code returned by the service.
        status: u16,
        /// Response body, for operator inspection.
        body: String,
    },
    /// The response decoded but did not match the expected shape.
    MalformedResponse(String),
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(detail) => write!(f, "embedding request failed: {detail}"),
            Self::Service { status, body } => {
                write!(f, "embedding service returned {status}: {body}")
            }
            Self::MalformedResponse(detail) => {
                write!(f, "embedding response malformed: {detail}")
            }
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Contract every embedding backend must satisfy.
///
/// The same `model_id` must be used when building an index and when
/// querying it; `VectorIndex` persists the identifier and enforces the
/// match at query time.
pub trait EmbeddingClient {
    /// Identifier of the embedding model behind this client.
    fn model_id(&self) -> &str;

    /// Largest input slice `embed_batch` accepts in one call.
    fn batch_size(&self) -> usize {
        64
    }

    /// Embeds a batch of texts, one fixed-length vector per input, in
    /// input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Blocking embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI-compatible embeddings client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            batch_size: batch_size.max(1),
        })
    }
}

impl EmbeddingClient for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(EmbeddingError::MalformedResponse(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| EmbeddingError::Transport(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::Service {
                status: status.as_u16(),
                body,
            });
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "service returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        Ok(parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
