//! End-to-end pipelines: quiz generation, mind-map generation, and
//! grounded question answering over an ingested document.
//!
//! Each pipeline is the same composition — chunk, build an index
//! namespace, retrieve, generate, repair — differing only in prompt,
//! namespace, and output schema. All configuration travels in an explicit
//! [`PipelineConfig`]; there is no module-level credential or model state.

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;

use crate::chain::{is_unanswerable, ChainError, PromptTemplate, RetrievalChain};
use crate::chunker::{Chunker, ChunkerConfig, ChunkerError};
use crate::embedder::EmbeddingClient;
use crate::generator::GenerationClient;
use crate::index::{IndexError, VectorIndex, DEFAULT_TOP_K};
use crate::repair::{repair, RepairError, Repaired};
use crate::schema::{MindMap, QuizDocument, RecoveredQuestion};

/// Default namespace for quiz source material.
pub const QUIZ_NAMESPACE: &str = "quiz_summary";
/// Default namespace for mind-map and QA source material.
pub const DOCUMENT_NAMESPACE: &str = "document";

/// Grounded QA prompt. The sentinel phrase is part of the contract: the
/// model states unavailability instead of fabricating.
const GROUNDED_ANSWER_TEMPLATE: &str = "Answer the question as detailed as possible from the provided context. If the answer is not available in the context, say, 'answer is not available in the context'. Don't provide wrong answers.\n\nContext:\n{context}\n\nQuestion:\n{question}\n\nAnswer:\n";

/// Quiz-generation variant of the grounded prompt.
const QUIZ_ANSWER_TEMPLATE: &str = "You are a quiz generator working from the provided context. Answer the question as detailed as possible from the provided context, make sure to provide all the details. If the answer is not available in the context just say, 'answer is not available in the context', don't provide a wrong answer.\n\nContext:\n{context}\n\nQuestion:\n{question}\n\nAnswer:\n";

/// Instruction asking for the quiz JSON document.
const QUIZ_REQUEST: &str = r#"Please generate 15 multiple-choice questions in JSON format. Each question should include the question text, four options (labeled A, B, C, and D), and the correct option. Additionally, include five True or False questions where each question has options (True/False) and the correct answer. The JSON structure should look like this:
{
    "multiple_choice_questions": [
        {
            "question": "Question text here?",
            "options": {
                "A": "Option A text",
                "B": "Option B text",
                "C": "Option C text",
                "D": "Option D text"
            },
            "correct_option": "Correct option label (A/B/C/D)"
        }
    ],
    "true_or_false_questions": [
        {
            "statement": "True or False statement here?",
            "options": {
                "True": "True option text",
                "False": "False option text"
            },
            "correct_option": "True or False"
        }
    ]
}"#;

/// Instruction asking for the mind-map JSON tree.
const MIND_MAP_REQUEST: &str = r#"Generate a mind map of the document in JSON format. Here's an example of the expected output:
{
    "title": "Document Title",
    "nodes": [
        {
            "id": "1",
            "text": "Main Topic",
            "nodes": [
                {
                    "id": "1.1",
                    "text": "Subtopic 1"
                },
                {
                    "id": "1.2",
                    "text": "Subtopic 2"
                }
            ]
        }
    ]
}"#;

/// Errors surfaced by a pipeline run, carrying the originating component
/// kind unmodified.
#[derive(Debug)]
pub enum PipelineError {
    /// Chunking configuration was rejected.
    Chunking(ChunkerError),
    /// Index build or query failed.
    Index(IndexError),
    /// Retrieval or generation failed.
    Chain(ChainError),
    /// Repair hit a terminal failure.
    Repair(RepairError),
    /// The output parsed as JSON but does not fit the requested schema.
    UnexpectedShape {
        /// Decoder detail.
        detail: String,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunking(err) => write!(f, "{err}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::Chain(err) => write!(f, "{err}"),
            Self::Repair(err) => write!(f, "{err}"),
            Self::UnexpectedShape { detail } => {
                write!(f, "model output does not fit the requested schema: {detail}")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chunking(err) => Some(err),
            Self::Index(err) => Some(err),
            Self::Chain(err) => Some(err),
            Self::Repair(err) => Some(err),
            Self::UnexpectedShape { .. } => None,
        }
    }
}

impl From<ChunkerError> for PipelineError {
    fn from(err: ChunkerError) -> Self {
        Self::Chunking(err)
    }
}

impl From<IndexError> for PipelineError {
    fn from(err: IndexError) -> Self {
        Self::Index(err)
    }
}

impl From<ChainError> for PipelineError {
    fn from(err: ChainError) -> Self {
        Self::Chain(err)
    }
}

impl From<RepairError> for PipelineError {
    fn from(err: RepairError) -> Self {
        Self::Repair(err)
    }
}

/// Explicit pipeline configuration; built once, passed in, test-double
/// friendly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared across adjacent chunk boundaries.
    pub overlap: usize,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Generation sampling temperature.
    pub temperature: f32,
    /// Completion token budget per generation call.
    pub max_tokens: usize,
    /// Directory holding the persisted index namespaces.
    pub index_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            overlap: 1_000,
            top_k: DEFAULT_TOP_K,
            temperature: 0.35,
            max_tokens: 4096,
            index_root: PathBuf::from("indexes"),
        }
    }
}

/// A generated quiz, flagged by how it was recovered.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizArtifact {
    /// The model output parsed strictly into the quiz schema.
    Complete(QuizDocument),
    /// Strict parsing failed; these questions were salvaged. Lower
    /// confidence — surface a warning to the end user.
    Salvaged(Vec<RecoveredQuestion>),
}

impl QuizArtifact {
    /// True when the quiz came from salvage rather than a strict parse.
    pub fn is_salvaged(&self) -> bool {
        matches!(self, Self::Salvaged(_))
    }
}

/// A free-text answer to a grounded question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Raw answer text.
    pub text: String,
    /// False when the model emitted the unavailability sentinel instead
    /// of an answer.
    pub grounded: bool,
}

/// One document-to-artifact pipeline instance.
#[derive(Debug)]
pub struct Pipeline<E, G> {
    chunker: Chunker,
    index: VectorIndex<E>,
    generator: G,
    config: PipelineConfig,
}

impl<E: EmbeddingClient, G: GenerationClient> Pipeline<E, G> {
    /// Validates the config and assembles a pipeline around the supplied
    /// service clients.
    pub fn new(config: PipelineConfig, embedder: E, generator: G) -> Result<Self, PipelineError> {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
        })?;
        let index = VectorIndex::new(config.index_root.clone(), embedder);
        Ok(Self {
            chunker,
            index,
            generator,
            config,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The vector index backing this pipeline.
    pub fn index(&self) -> &VectorIndex<E> {
        &self.index
    }

    /// Splits `text` into chunks and publishes them under `namespace`,
    /// replacing prior content. Returns the chunk count.
    pub fn ingest(&self, namespace: &str, source_id: &str, text: &str) -> Result<usize, PipelineError> {
        let chunks = self.chunker.split(source_id, text);
        self.index.build(namespace, &chunks)?;
        Ok(chunks.len())
    }

    /// Generates a quiz grounded in `namespace`.
    pub fn generate_quiz(&self, namespace: &str) -> Result<QuizArtifact, PipelineError> {
        let template = PromptTemplate::new(QUIZ_ANSWER_TEMPLATE)?;
        let raw = self.chain().answer(namespace, QUIZ_REQUEST, &template)?;
        match repair(&raw)? {
            Repaired::Parsed(value) => {
                let quiz = decode::<QuizDocument>(value)?;
                Ok(QuizArtifact::Complete(quiz))
            }
            Repaired::Salvaged(questions) => Ok(QuizArtifact::Salvaged(questions)),
        }
    }

    /// Generates a mind-map tree grounded in `namespace`.
    ///
    /// Salvage only knows question shapes, so a mind-map generation that
    /// fails strict parsing surfaces a terminal repair error.
    pub fn generate_mind_map(&self, namespace: &str) -> Result<MindMap, PipelineError> {
        let template = PromptTemplate::new(GROUNDED_ANSWER_TEMPLATE)?;
        let raw = self.chain().answer(namespace, MIND_MAP_REQUEST, &template)?;
        match repair(&raw)? {
            Repaired::Parsed(value) => decode::<MindMap>(value),
            Repaired::Salvaged(_) => Err(PipelineError::Repair(RepairError::SalvageExhausted)),
        }
    }

    /// Answers a free-text question grounded in `namespace`. The raw text
    /// is the artifact; no repair is performed.
    pub fn ask(&self, namespace: &str, question: &str) -> Result<Answer, PipelineError> {
        let template = PromptTemplate::new(GROUNDED_ANSWER_TEMPLATE)?;
        let raw = self.chain().answer(namespace, question, &template)?;
        Ok(Answer {
            grounded: !is_unanswerable(&raw),
            text: raw,
        })
    }

    fn chain(&self) -> RetrievalChain<'_, E, G> {
        RetrievalChain::new(&self.index, &self.generator)
            .with_top_k(self.config.top_k)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, PipelineError> {
    serde_json::from_value(value).map_err(|err| PipelineError::UnexpectedShape {
        detail: err.to_string(),
    })
}
