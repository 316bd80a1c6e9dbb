//! Persisted per-namespace vector store with similarity queries.
//!
//! A namespace is published as a generation-numbered JSON record plus a
//! pointer file naming the current generation. Both are written to a temp
//! path and renamed, so a build fully replaces prior content and a reader
//! never observes a half-written record. Concurrent builders still race on
//! the pointer; the last completed publish wins.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::embedder::{EmbeddingClient, EmbeddingError};

/// Default number of documents returned by a similarity query.
pub const DEFAULT_TOP_K: usize = 4;

/// Errors surfaced while building or querying an index namespace.
#[derive(Debug)]
pub enum IndexError {
    /// The namespace was never built under this root.
    NotFound {
        /// Requested namespace name.
        namespace: String,
    },
    /// The namespace name cannot be used as a file-name stem.
    InvalidNamespace {
        /// Rejected namespace name.
        namespace: String,
    },
    /// The caller's embedding model disagrees with the one recorded at
    /// build time; querying would silently return low-quality results.
    ModelMismatch {
        /// Namespace being queried.
        namespace: String,
        /// Model identifier persisted when the namespace was built.
        stored: String,
        /// Model identifier of the querying client.
        requested: String,
    },
    /// The embedding service failed; never reported as zero results.
    Embedding(EmbeddingError),
    /// Filesystem failure while reading or publishing a record.
    Storage(std::io::Error),
    /// A persisted record or pointer exists but cannot be decoded.
    Corrupt {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Decoder detail.
        detail: String,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { namespace } => write!(f, "index namespace '{namespace}' not found"),
            Self::InvalidNamespace { namespace } => {
                write!(f, "invalid index namespace '{namespace}'")
            }
            Self::ModelMismatch {
                namespace,
                stored,
                requested,
            } => write!(
                f,
                "namespace '{namespace}' was built with embedding model '{stored}' but the query uses '{requested}'"
            ),
            Self::Embedding(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "index storage failure: {err}"),
            Self::Corrupt { path, detail } => {
                write!(f, "index file {} is corrupt: {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Embedding(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EmbeddingError> for IndexError {
    fn from(err: EmbeddingError) -> Self {
        Self::Embedding(err)
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err)
    }
}

/// One chunk returned by a similarity query. Rank 0 is most similar.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    /// Chunk body text.
    pub text: String,
    /// Identifier of the document the chunk came from.
    pub source_id: String,
    /// Position of the chunk in its original split sequence.
    pub sequence_index: usize,
    /// Cosine similarity against the query embedding.
    pub score: f32,
}

/// Persisted (chunk, embedding) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    sequence_index: usize,
    source_id: String,
    text: String,
    /// CRC32 of the chunk text, for offline integrity checks.
    checksum: u32,
    embedding: Vec<f32>,
}

/// On-disk record published for one namespace generation.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    namespace: String,
    model_id: String,
    generation: u64,
    built_at_epoch_ms: u64,
    entries: Vec<IndexEntry>,
}

/// Disk-backed vector index tied to one embedding client.
#[derive(Debug)]
pub struct VectorIndex<E> {
    root: PathBuf,
    embedder: E,
}

impl<E: EmbeddingClient> VectorIndex<E> {
    /// Creates an index rooted at `root`. The directory is created on
    /// first build.
    pub fn new(root: impl Into<PathBuf>, embedder: E) -> Self {
        Self {
            root: root.into(),
            embedder,
        }
    }

    /// The embedding client backing this index.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Embeds every chunk and publishes them under `namespace`, fully
    /// replacing any prior content for that name.
    pub fn build(&self, namespace: &str, chunks: &[Chunk]) -> Result<(), IndexError> {
        validate_namespace(namespace)?;
        fs::create_dir_all(&self.root)?;

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embedder.batch_size().max(1)) {
            let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let vectors = self.embedder.embed_batch(&inputs)?;
            for (chunk, embedding) in batch.iter().zip(vectors) {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(chunk.text.as_bytes());
                entries.push(IndexEntry {
                    sequence_index: chunk.sequence_index,
                    source_id: chunk.source_id.clone(),
                    text: chunk.text.clone(),
                    checksum: hasher.finalize(),
                    embedding,
                });
            }
        }

        let generation = self.current_generation(namespace)?.unwrap_or(0) + 1;
        let record = IndexRecord {
            namespace: namespace.to_string(),
            model_id: self.embedder.model_id().to_string(),
            generation,
            built_at_epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|dur| dur.as_millis() as u64)
                .unwrap_or(0),
            entries,
        };

        let data_path = self.data_path(namespace, generation);
        let payload = serde_json::to_vec(&record).map_err(|err| IndexError::Corrupt {
            path: data_path.clone(),
            detail: err.to_string(),
        })?;
        write_atomic(&data_path, &payload)?;
        write_atomic(
            &self.pointer_path(namespace),
            generation.to_string().as_bytes(),
        )?;

        crate::debug_log!(
            "index: published {} entries as {namespace} gen {generation}",
            record.entries.len()
        );

        // Previous generation is unreachable once the pointer swaps;
        // removal is best-effort housekeeping.
        if generation > 1 {
            let _ = fs::remove_file(self.data_path(namespace, generation - 1));
        }
        Ok(())
    }

    /// Embeds `question` and returns the `top_k` most similar chunks,
    /// ranked by descending cosine similarity.
    pub fn query(
        &self,
        namespace: &str,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, IndexError> {
        validate_namespace(namespace)?;
        let record = self.load_current(namespace)?;
        if record.model_id != self.embedder.model_id() {
            return Err(IndexError::ModelMismatch {
                namespace: namespace.to_string(),
                stored: record.model_id,
                requested: self.embedder.model_id().to_string(),
            });
        }

        let mut vectors = self.embedder.embed_batch(&[question])?;
        let query_vector = vectors.pop().ok_or_else(|| {
            IndexError::Embedding(EmbeddingError::MalformedResponse(
                "no embedding returned for query".to_string(),
            ))
        })?;

        let mut scored: Vec<RetrievedDocument> = record
            .entries
            .into_iter()
            .map(|entry| RetrievedDocument {
                score: cosine_similarity(&query_vector, &entry.embedding),
                text: entry.text,
                source_id: entry.source_id,
                sequence_index: entry.sequence_index,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn load_current(&self, namespace: &str) -> Result<IndexRecord, IndexError> {
        let pointer_path = self.pointer_path(namespace);
        let pointer = match fs::read_to_string(&pointer_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::NotFound {
                    namespace: namespace.to_string(),
                })
            }
            Err(err) => return Err(IndexError::Storage(err)),
        };
        let generation: u64 = pointer
            .trim()
            .parse()
            .map_err(|_| IndexError::Corrupt {
                path: pointer_path,
                detail: format!("pointer content {:?} is not a generation number", pointer.trim()),
            })?;
        let data_path = self.data_path(namespace, generation);
        let payload = fs::read(&data_path)?;
        serde_json::from_slice(&payload).map_err(|err| IndexError::Corrupt {
            path: data_path,
            detail: err.to_string(),
        })
    }

    fn pointer_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.current"))
    }

    fn data_path(&self, namespace: &str, generation: u64) -> PathBuf {
        self.root.join(format!("{namespace}.gen{generation}.json"))
    }

    fn current_generation(&self, namespace: &str) -> Result<Option<u64>, IndexError> {
        match fs::read_to_string(self.pointer_path(namespace)) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(IndexError::Storage(err)),
        }
    }
}

/// Namespace names double as file-name stems, so only a conservative
/// character set is accepted.
fn validate_namespace(namespace: &str) -> Result<(), IndexError> {
    let acceptable = !namespace.is_empty()
        && namespace
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if acceptable {
        Ok(())
    } else {
        Err(IndexError::InvalidNamespace {
            namespace: namespace.to_string(),
        })
    }
}

/// Publish-by-rename: the destination either holds the old content or the
/// complete new content, never a partial write.
fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), IndexError> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(payload)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    /// Deterministic embedding double: a bag-of-words hash over 32 dims,
    /// so identical texts embed identically and shared vocabulary raises
    /// cosine similarity.
    struct HashEmbedder {
        model: String,
    }

    impl HashEmbedder {
        fn new(model: &str) -> Self {
            Self {
                model: model.to_string(),
            }
        }

        fn vectorize(text: &str) -> Vec<f32> {
            let mut vector = vec![0.0f32; 32];
            for word in text.split_whitespace() {
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
        }
    }

    impl EmbeddingClient for HashEmbedder {
        fn model_id(&self) -> &str {
            &self.model
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(inputs.iter().map(|input| Self::vectorize(input)).collect())
        }
    }

    struct FailingEmbedder;

    impl EmbeddingClient for FailingEmbedder {
        fn model_id(&self) -> &str {
            "down"
        }

        fn embed_batch(&self, _inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Service {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    fn chunk(idx: usize, text: &str) -> Chunk {
        Chunk {
            sequence_index: idx,
            text: text.to_string(),
            source_id: "doc".to_string(),
        }
    }

    #[test]
    fn exact_text_query_ranks_its_chunk_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        let chunks = vec![
            chunk(0, "Paris is the capital of France."),
            chunk(1, "Berlin is the capital of Germany."),
        ];
        index.build("geo", &chunks).expect("build");

        let docs = index
            .query("geo", "Paris is the capital of France.", DEFAULT_TOP_K)
            .expect("query");
        assert_eq!(docs[0].sequence_index, 0);
        assert!(docs[0].score > docs[1].score);
    }

    #[test]
    fn query_before_build_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        let err = index.query("missing", "anything", 4).unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
    }

    #[test]
    fn rebuild_fully_replaces_prior_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        index
            .build("docs", &[chunk(0, "old content about rivers")])
            .expect("first build");
        index
            .build("docs", &[chunk(0, "new content about mountains")])
            .expect("second build");

        let docs = index.query("docs", "mountains", 10).expect("query");
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("mountains"));
    }

    #[test]
    fn mismatched_embedding_model_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        builder
            .build("docs", &[chunk(0, "some text")])
            .expect("build");

        let querier = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v2"));
        let err = querier.query("docs", "some text", 4).unwrap_err();
        match err {
            IndexError::ModelMismatch { stored, requested, .. } => {
                assert_eq!(stored, "hash-v1");
                assert_eq!(requested, "hash-v2");
            }
            other => panic!("expected model mismatch, got {other:?}"),
        }
    }

    #[test]
    fn embedding_failure_is_distinguishable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), FailingEmbedder);
        let err = index.build("docs", &[chunk(0, "text")]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Embedding(EmbeddingError::Service { status: 503, .. })
        ));
    }

    #[test]
    fn namespace_names_are_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        for bad in ["", "up/../escape", "a b", "semi;colon"] {
            let err = index.build(bad, &[]).unwrap_err();
            assert!(matches!(err, IndexError::InvalidNamespace { .. }), "{bad}");
        }
    }

    #[test]
    fn top_k_bounds_the_result_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new(dir.path(), HashEmbedder::new("hash-v1"));
        let chunks: Vec<Chunk> = (0..8)
            .map(|idx| chunk(idx, &format!("chunk number {idx} text")))
            .collect();
        index.build("many", &chunks).expect("build");
        let docs = index.query("many", "chunk number text", 3).expect("query");
        assert_eq!(docs.len(), 3);
    }
}
