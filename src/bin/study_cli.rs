use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use studykit::pipeline::{DOCUMENT_NAMESPACE, QUIZ_NAMESPACE};
use studykit::{OpenAiEmbedder, OpenAiGenerator, Pipeline, PipelineConfig, QuizArtifact};

#[derive(Parser, Debug)]
#[command(
    name = "study_cli",
    about = "Ingest a text document and derive a quiz, mind map, or grounded answer from it"
)]
struct Cli {
    /// UTF-8 text file to ingest
    #[arg(long)]
    input: PathBuf,

    /// API key for the embedding service
    #[arg(long, env = "STUDYKIT_EMBED_API_KEY")]
    embed_api_key: String,

    /// Base URL of the embedding service
    #[arg(
        long,
        env = "STUDYKIT_EMBED_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Embedding model identifier (must match across ingest and query)
    #[arg(long, env = "STUDYKIT_EMBED_MODEL", default_value = "text-embedding-3-small")]
    embed_model: String,

    /// API key for the generation service
    #[arg(long, env = "STUDYKIT_GEN_API_KEY")]
    gen_api_key: String,

    /// Base URL of the generation service (any OpenAI-compatible gateway)
    #[arg(
        long,
        env = "STUDYKIT_GEN_BASE_URL",
        default_value = "https://api.groq.com/openai/v1"
    )]
    gen_base_url: String,

    /// Generation model identifier
    #[arg(long, env = "STUDYKIT_GEN_MODEL", default_value = "llama-3.1-70b-versatile")]
    gen_model: String,

    /// Directory holding the persisted index namespaces
    #[arg(long, default_value = "indexes")]
    index_root: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = 10_000)]
    chunk_size: usize,

    /// Characters of overlap between adjacent chunks
    #[arg(long, default_value_t = 1_000)]
    overlap: usize,

    /// Chunks retrieved per question
    #[arg(long, default_value_t = 4)]
    top_k: usize,

    /// Sampling temperature for the generation model
    #[arg(long, default_value_t = 0.35)]
    temperature: f32,

    /// Maximum tokens to request from the generation model
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Only ingest and print chunk statistics (skip the generation call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a multiple-choice and true/false quiz from the document
    Quiz,
    /// Generate a mind-map tree of the document
    Mindmap,
    /// Answer a question grounded in the document
    Ask {
        /// Question to answer from the document
        question: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {:?}", cli.input))?;

    let embedder = OpenAiEmbedder::new(
        cli.embed_api_key.clone(),
        cli.embed_base_url.clone(),
        cli.embed_model.clone(),
        None,
        Duration::from_secs(30),
        64,
    )?;
    let generator = OpenAiGenerator::new(
        cli.gen_api_key.clone(),
        cli.gen_base_url.clone(),
        cli.gen_model.clone(),
    )?;
    let config = PipelineConfig {
        chunk_size: cli.chunk_size,
        overlap: cli.overlap,
        top_k: cli.top_k,
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        index_root: cli.index_root.clone(),
    };
    let pipeline = Pipeline::new(config, embedder, generator)?;

    let source_id = cli
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let namespace = match cli.command {
        Command::Quiz => QUIZ_NAMESPACE,
        Command::Mindmap | Command::Ask { .. } => DOCUMENT_NAMESPACE,
    };
    let chunk_count = pipeline.ingest(namespace, &source_id, &text)?;
    eprintln!("ingested {chunk_count} chunks from {source_id} into '{namespace}'");
    if cli.dry_run {
        eprintln!("dry-run enabled; skipping the generation call.");
        return Ok(());
    }

    match cli.command {
        Command::Quiz => match pipeline.generate_quiz(namespace)? {
            QuizArtifact::Complete(quiz) => {
                println!("{}", serde_json::to_string_pretty(&quiz)?);
            }
            QuizArtifact::Salvaged(questions) => {
                eprintln!(
                    "warning: quiz output needed salvage; {} question(s) recovered at lower confidence",
                    questions.len()
                );
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "questions": questions }))?
                );
            }
        },
        Command::Mindmap => {
            let map = pipeline.generate_mind_map(namespace)?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        Command::Ask { question } => {
            let answer = pipeline.ask(namespace, &question)?;
            if !answer.grounded {
                eprintln!("note: the document does not contain this answer");
            }
            println!("{}", answer.text.trim());
        }
    }
    Ok(())
}
