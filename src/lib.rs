#![warn(missing_docs)]
//! Core library entry points for the studykit pipeline.
//!
//! The flow is: raw document text is split into overlapping chunks, the
//! chunks are embedded and published under a named index, a question pulls
//! the top-matching chunks back out, a generation model answers against
//! that context, and the raw model text is repaired into a schema-valid
//! artifact (quiz, mind map, or free-text answer).

pub mod chain;
pub mod chunker;
pub mod embedder;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod repair;
pub mod schema;

pub use chain::{is_unanswerable, ChainError, PromptTemplate, RetrievalChain, NO_ANSWER_SENTINEL};
pub use chunker::{Chunk, Chunker, ChunkerConfig, ChunkerError};
pub use embedder::{EmbeddingClient, EmbeddingError, OpenAiEmbedder};
pub use generator::{GenerationClient, GenerationError, GenerationRequest, OpenAiGenerator};
pub use index::{IndexError, RetrievedDocument, VectorIndex, DEFAULT_TOP_K};
pub use pipeline::{Answer, Pipeline, PipelineConfig, PipelineError, QuizArtifact};
pub use repair::{repair, RepairError, Repaired};
pub use schema::{
    MindMap, MindMapNode, MultipleChoiceQuestion, QuizDocument, RecoveredQuestion,
    TrueFalseOptions, TrueFalseQuestion,
};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
