//! End-to-end pipeline tests running against in-process service doubles.

use std::cell::RefCell;
use std::collections::VecDeque;

use pretty_assertions::assert_eq;

use studykit::pipeline::{DOCUMENT_NAMESPACE, QUIZ_NAMESPACE};
use studykit::{
    Chunk, EmbeddingClient, EmbeddingError, GenerationClient, GenerationError, GenerationRequest,
    Pipeline, PipelineConfig, QuizArtifact, VectorIndex, DEFAULT_TOP_K,
};

/// Deterministic embedding double: lowercased words are hashed into a
/// fixed-length bag-of-words vector, so shared vocabulary raises cosine
/// similarity and identical texts embed identically.
struct HashEmbedder;

impl EmbeddingClient for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-v1"
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(inputs
            .iter()
            .map(|input| {
                let mut vector = vec![0.0f32; 32];
                for word in input.split_whitespace() {
                    let cleaned: String = word
                        .chars()
                        .filter(|ch| ch.is_alphanumeric())
                        .flat_map(|ch| ch.to_lowercase())
                        .collect();
                    if cleaned.is_empty() {
                        continue;
                    }
                    let mut hash = 5381u64;
                    for byte in cleaned.bytes() {
                        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
                    }
                    vector[(hash % 32) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Generation double that replays scripted responses in order.
struct ScriptedGenerator {
    responses: RefCell<VecDeque<String>>,
}

impl ScriptedGenerator {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: RefCell::new(responses.iter().map(|s| s.to_string()).collect()),
        }
    }
}

impl GenerationClient for ScriptedGenerator {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| GenerationError::MalformedResponse("script exhausted".to_string()))
    }
}

fn chunk(idx: usize, text: &str) -> Chunk {
    Chunk {
        sequence_index: idx,
        text: text.to_string(),
        source_id: "facts.txt".to_string(),
    }
}

fn pipeline(
    dir: &std::path::Path,
    responses: &[&str],
) -> Pipeline<HashEmbedder, ScriptedGenerator> {
    let config = PipelineConfig {
        chunk_size: 500,
        overlap: 50,
        index_root: dir.to_path_buf(),
        ..PipelineConfig::default()
    };
    Pipeline::new(config, HashEmbedder, ScriptedGenerator::new(responses)).expect("pipeline")
}

const DOCUMENT: &str = "Paris is the capital of France. Berlin is the capital of Germany. The Seine flows through Paris and the Spree flows through Berlin.";

#[test]
fn capital_query_ranks_the_matching_chunk_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = VectorIndex::new(dir.path(), HashEmbedder);
    index
        .build(
            "capitals",
            &[
                chunk(0, "Paris is the capital of France."),
                chunk(1, "Berlin is the capital of Germany."),
            ],
        )
        .expect("build");

    let documents = index
        .query("capitals", "capital of France", DEFAULT_TOP_K)
        .expect("query");
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].sequence_index, 0);
    assert!(documents[0].text.contains("France"));
    assert!(documents[0].score >= documents[1].score);
}

#[test]
fn quiz_pipeline_repairs_loosely_quoted_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Commentary wrapper, single quotes, bare keys, trailing commas: all
    // normalized before the strict parse.
    let messy = "Here is your quiz!\n{'multiple_choice_questions': [{question: 'What is the capital of France?', options: {'A': 'Paris', 'B': 'Berlin', 'C': 'Rome', 'D': 'Madrid'}, correct_option: 'A'},], 'true_or_false_questions': [{statement: 'The Seine flows through Paris.', options: {'True': 'True', 'False': 'False'}, correct_option: 'True'},],}\nHope that helps!";
    let pipeline = pipeline(dir.path(), &[messy]);
    pipeline
        .ingest(QUIZ_NAMESPACE, "facts.txt", DOCUMENT)
        .expect("ingest");

    let artifact = pipeline.generate_quiz(QUIZ_NAMESPACE).expect("quiz");
    let QuizArtifact::Complete(quiz) = artifact else {
        panic!("expected strict parse to succeed after normalization");
    };
    assert_eq!(quiz.multiple_choice_questions.len(), 1);
    assert_eq!(
        quiz.multiple_choice_questions[0].question,
        "What is the capital of France?"
    );
    assert_eq!(quiz.multiple_choice_questions[0].options["A"], "Paris");
    assert_eq!(quiz.multiple_choice_questions[0].correct_option, "A");
    assert_eq!(quiz.true_or_false_questions[0].correct_option, "True");
}

#[test]
fn quiz_pipeline_falls_back_to_salvage_on_truncation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let truncated = r#"{"multiple_choice_questions": [
        {"question": "What is the capital of France?", "options": {"A": "Paris", "B": "Berlin", "C": "Rome", "D": "Madrid"}, "correct_option": "A"},
        {"question": "What flows through Berlin?", "options": {"A": "The Seine", "B": "The Spree"}, "correct_option": "B"},
        {"question": "Cut off mid-"#;
    let pipeline = pipeline(dir.path(), &[truncated]);
    pipeline
        .ingest(QUIZ_NAMESPACE, "facts.txt", DOCUMENT)
        .expect("ingest");

    let artifact = pipeline.generate_quiz(QUIZ_NAMESPACE).expect("quiz");
    let QuizArtifact::Salvaged(questions) = artifact else {
        panic!("expected salvage");
    };
    assert_eq!(questions.len(), 2);
}

#[test]
fn ask_round_trip_stays_grounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = pipeline(
        dir.path(),
        &[
            "Paris is the capital of France.",
            "Answer is not available in the context.",
        ],
    );
    pipeline
        .ingest(DOCUMENT_NAMESPACE, "facts.txt", DOCUMENT)
        .expect("ingest");

    let answer = pipeline
        .ask(DOCUMENT_NAMESPACE, "What is the capital of France?")
        .expect("ask");
    assert!(answer.grounded);
    assert_eq!(answer.text, "Paris is the capital of France.");

    let sentinel = pipeline
        .ask(DOCUMENT_NAMESPACE, "Who wrote Hamlet?")
        .expect("ask");
    assert!(!sentinel.grounded);
}

#[test]
fn reingesting_replaces_the_namespace_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = pipeline(dir.path(), &[]);
    pipeline
        .ingest(DOCUMENT_NAMESPACE, "facts.txt", "All about rivers.")
        .expect("first ingest");
    pipeline
        .ingest(DOCUMENT_NAMESPACE, "facts.txt", "All about mountains.")
        .expect("second ingest");

    let documents = pipeline
        .index()
        .query(DOCUMENT_NAMESPACE, "mountains", 10)
        .expect("query");
    assert_eq!(documents.len(), 1);
    assert!(documents[0].text.contains("mountains"));
}

#[test]
fn mind_map_pipeline_decodes_nested_trees() {
    let dir = tempfile::tempdir().expect("tempdir");
    let response = r#"{
        "title": "European Geography",
        "nodes": [
            {
                "id": "1",
                "text": "Capitals",
                "nodes": [
                    {"id": "1.1", "text": "Paris"},
                    {"id": "1.2", "text": "Berlin"}
                ]
            },
            {"id": "2", "text": "Rivers"}
        ]
    }"#;
    let pipeline = pipeline(dir.path(), &[response]);
    pipeline
        .ingest(DOCUMENT_NAMESPACE, "facts.txt", DOCUMENT)
        .expect("ingest");

    let map = pipeline
        .generate_mind_map(DOCUMENT_NAMESPACE)
        .expect("mind map");
    assert_eq!(map.title, "European Geography");
    let capitals = &map.nodes[0];
    assert_eq!(capitals.nodes.as_ref().unwrap().len(), 2);
    assert!(map.nodes[1].nodes.is_none());
}
