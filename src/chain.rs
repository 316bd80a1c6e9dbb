//! Retrieval-augmented generation: query an index namespace, ground a
//! prompt in the retrieved chunks, and make a single generation call.

use std::fmt;

use crate::embedder::EmbeddingClient;
use crate::generator::{GenerationClient, GenerationError, GenerationRequest};
use crate::index::{IndexError, RetrievedDocument, VectorIndex, DEFAULT_TOP_K};

/// Sentinel phrase the prompt contract obliges the model to emit when the
/// retrieved context does not support an answer. A valid output, not an
/// error.
pub const NO_ANSWER_SENTINEL: &str = "answer is not available in the context";

/// True when `text` is the grounding sentinel rather than an answer.
pub fn is_unanswerable(text: &str) -> bool {
    text.to_lowercase().contains(NO_ANSWER_SENTINEL)
}

/// Errors surfaced while answering a question against a namespace.
#[derive(Debug)]
pub enum ChainError {
    /// Retrieval failed; carries the originating index error kind.
    Index(IndexError),
    /// The generation service call failed.
    Generation(GenerationError),
    /// The generation service succeeded but returned no usable text.
    /// Reported instead of retrying.
    EmptyGeneration,
    /// The prompt template is missing a required placeholder.
    InvalidTemplate {
        /// Name of the missing placeholder.
        placeholder: &'static str,
    },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(err) => write!(f, "{err}"),
            Self::Generation(err) => write!(f, "{err}"),
            Self::EmptyGeneration => write!(f, "generation service returned empty text"),
            Self::InvalidTemplate { placeholder } => {
                write!(f, "prompt template is missing the {{{placeholder}}} placeholder")
            }
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(err) => Some(err),
            Self::Generation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IndexError> for ChainError {
    fn from(err: IndexError) -> Self {
        Self::Index(err)
    }
}

impl From<GenerationError> for ChainError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err)
    }
}

/// Prompt template with `{context}` and `{question}` placeholders,
/// validated at construction.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Validates that both placeholders are present and builds the
    /// template.
    pub fn new(template: impl Into<String>) -> Result<Self, ChainError> {
        let template = template.into();
        for placeholder in ["context", "question"] {
            if !template.contains(&format!("{{{placeholder}}}")) {
                return Err(ChainError::InvalidTemplate { placeholder });
            }
        }
        Ok(Self { template })
    }

    /// Fills the placeholders with the rendered context and the question.
    pub fn render(&self, context: &str, question: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{question}", question)
    }
}

/// One retrieval-plus-generation flow over a shared index.
pub struct RetrievalChain<'a, E, G> {
    index: &'a VectorIndex<E>,
    generator: &'a G,
    top_k: usize,
    temperature: f32,
    max_tokens: usize,
}

impl<'a, E: EmbeddingClient, G: GenerationClient> RetrievalChain<'a, E, G> {
    /// Builds a chain with the default retrieval depth and a low
    /// temperature.
    pub fn new(index: &'a VectorIndex<E>, generator: &'a G) -> Self {
        Self {
            index,
            generator,
            top_k: DEFAULT_TOP_K,
            temperature: 0.35,
            max_tokens: 4096,
        }
    }

    /// Overrides the number of chunks retrieved per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Overrides the completion token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Retrieves context for `question` from `namespace`, renders the
    /// prompt, and makes exactly one generation call.
    pub fn answer(
        &self,
        namespace: &str,
        question: &str,
        template: &PromptTemplate,
    ) -> Result<String, ChainError> {
        let documents = self.index.query(namespace, question, self.top_k)?;
        let context = render_context(&documents);
        crate::debug_log!(
            "chain: {} documents retrieved from {namespace} for prompt",
            documents.len()
        );
        let prompt = template.render(&context, question);
        let raw = self.generator.generate(&GenerationRequest {
            prompt: &prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })?;
        if raw.trim().is_empty() {
            return Err(ChainError::EmptyGeneration);
        }
        Ok(raw)
    }
}

/// Concatenates retrieved chunks with per-document headers so chunk
/// boundaries stay inspectable in the prompt.
fn render_context(documents: &[RetrievedDocument]) -> String {
    let mut out = String::new();
    for document in documents {
        out.push_str(&format!(
            "[{}#{} score {:.4}]\n{}\n---\n",
            document.source_id,
            document.sequence_index,
            document.score,
            document.text.trim()
        ));
    }
    out
}
