//! Separator-driven document chunking for downstream embedding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator ladder tried in priority order before falling back to raw
/// character boundaries: paragraph break, line break, sentence end.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", "! ", "? "];

/// A bounded span of document text prepared for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the split sequence.
    pub sequence_index: usize,
    /// Chunk body, including any leading overlap carried from the
    /// previous chunk.
    pub text: String,
    /// Identifier of the document the chunk came from.
    pub source_id: String,
}

/// Chunking tuning knobs, measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per emitted chunk, overlap included.
    pub chunk_size: usize,
    /// Characters of trailing context repeated at the head of the next
    /// chunk.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            overlap: 1_000,
        }
    }
}

/// Errors surfaced while configuring the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    /// The requested chunk geometry cannot produce forward progress.
    InvalidConfig {
        /// Human-readable description of the rejected parameters.
        reason: String,
    },
}

impl fmt::Display for ChunkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid chunker config: {reason}"),
        }
    }
}

impl std::error::Error for ChunkerError {}

/// Deterministic text splitter.
///
/// Oversized segments are recursively subdivided with the next separator
/// in the ladder until every piece fits, then adjacent chunks share
/// `overlap` characters across the boundary.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Validates the config and builds a chunker.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        if config.chunk_size == 0 {
            return Err(ChunkerError::InvalidConfig {
                reason: "chunk_size must be greater than zero".to_string(),
            });
        }
        if config.overlap >= config.chunk_size {
            return Err(ChunkerError::InvalidConfig {
                reason: format!(
                    "overlap {} must be smaller than chunk_size {}",
                    config.overlap, config.chunk_size
                ),
            });
        }
        Ok(Self { config })
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into overlapping chunks tagged with `source_id`.
    ///
    /// Empty input yields an empty sequence. The same input and config
    /// always produce the same chunks.
    pub fn split(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Pieces are sized against the body budget so that prepending the
        // previous piece's tail never pushes a chunk past chunk_size.
        let budget = self.config.chunk_size - self.config.overlap;
        let mut pieces = Vec::new();
        collect_pieces(text, budget, 0, &mut pieces);

        crate::debug_log!(
            "chunker: {} chars from {} split into {} pieces",
            text.len(),
            source_id,
            pieces.len()
        );

        let mut chunks = Vec::with_capacity(pieces.len());
        for (idx, piece) in pieces.iter().enumerate() {
            let text = if idx == 0 {
                piece.to_string()
            } else {
                let mut joined = tail_chars(pieces[idx - 1], self.config.overlap).to_string();
                joined.push_str(piece);
                joined
            };
            chunks.push(Chunk {
                sequence_index: idx,
                text,
                source_id: source_id.to_string(),
            });
        }
        chunks
    }
}

/// Recursively splits `text` into pieces of at most `budget` characters,
/// trying separators in ladder order and concatenation-preserving at every
/// step (separators stay attached to the segment they terminate).
fn collect_pieces<'a>(text: &'a str, budget: usize, sep_idx: usize, out: &mut Vec<&'a str>) {
    if char_len(text) <= budget {
        if !text.is_empty() {
            out.push(text);
        }
        return;
    }
    if sep_idx >= SEPARATORS.len() {
        hard_split(text, budget, out);
        return;
    }

    let separator = SEPARATORS[sep_idx];
    let mut run_start = 0usize;
    let mut run_chars = 0usize;
    for segment in split_inclusive_str(text, separator) {
        let segment_chars = char_len(segment);
        if segment_chars > budget {
            // Flush whatever has been merged so far, then subdivide the
            // oversized segment with the next separator.
            if run_chars > 0 {
                out.push(&text[run_start..offset_of(text, segment)]);
            }
            collect_pieces(segment, budget, sep_idx + 1, out);
            run_start = offset_of(text, segment) + segment.len();
            run_chars = 0;
            continue;
        }
        if run_chars + segment_chars > budget {
            out.push(&text[run_start..offset_of(text, segment)]);
            run_start = offset_of(text, segment);
            run_chars = segment_chars;
        } else {
            run_chars += segment_chars;
        }
    }
    if run_start < text.len() {
        out.push(&text[run_start..]);
    }
}

/// Splits on `separator`, keeping each separator attached to the segment
/// it closes so segments re-concatenate to the input.
fn split_inclusive_str<'a>(text: &'a str, separator: &'a str) -> Vec<&'a str> {
    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut search = 0usize;
    while let Some(found) = text[search..].find(separator) {
        let end = search + found + separator.len();
        segments.push(&text[start..end]);
        start = end;
        search = end;
    }
    if start < text.len() {
        segments.push(&text[start..]);
    }
    segments
}

/// Last-resort split at raw character boundaries.
fn hard_split<'a>(text: &'a str, budget: usize, out: &mut Vec<&'a str>) {
    let mut start = 0usize;
    let mut count = 0usize;
    for (offset, _) in text.char_indices() {
        if count == budget {
            out.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the subslice `segment` within `text`.
fn offset_of(text: &str, segment: &str) -> usize {
    segment.as_ptr() as usize - text.as_ptr() as usize
}

/// Returns the trailing `n` characters of `text` (the whole string when
/// shorter).
fn tail_chars(text: &str, n: usize) -> &str {
    let total = char_len(text);
    if total <= n {
        return text;
    }
    let skip = total - n;
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            overlap,
        })
        .expect("valid config")
    }

    fn reassemble(chunks: &[Chunk], overlap: usize, pieces_before: &[String]) -> String {
        let mut text = String::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            if idx == 0 {
                text.push_str(&chunk.text);
            } else {
                let carried = char_len(&pieces_before[idx - 1]).min(overlap);
                let skip: usize = chunk.text.char_indices().nth(carried).map(|(o, _)| o).unwrap();
                text.push_str(&chunk.text[skip..]);
            }
        }
        text
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunker(100, 10).split("doc", "");
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        let chunks = chunker(100, 10).split("doc", "hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].source_id, "doc");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            overlap: 10,
        })
        .unwrap_err();
        assert!(matches!(err, ChunkerError::InvalidConfig { .. }));

        let err = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            overlap: 25,
        })
        .unwrap_err();
        assert!(matches!(err, ChunkerError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 0,
            overlap: 0,
        })
        .unwrap_err();
        assert!(matches!(err, ChunkerError::InvalidConfig { .. }));
    }

    #[test]
    fn no_chunk_exceeds_chunk_size() {
        let text = "One sentence here. Another follows!\n\nA new paragraph starts.\nA line break. And more text to push past the limit? Yes indeed.";
        for (size, overlap) in [(20, 5), (30, 10), (12, 3)] {
            for chunk in chunker(size, overlap).split("doc", text) {
                assert!(
                    char_len(&chunk.text) <= size,
                    "chunk of {} chars exceeds {}",
                    char_len(&chunk.text),
                    size
                );
            }
        }
    }

    #[test]
    fn stripping_overlaps_reconstructs_input() {
        let text = "Alpha paragraph with several words.\n\nBeta paragraph, also with words.\nGamma line. Delta sentence! Epsilon question? Trailing tail";
        let overlap = 8;
        let splitter = chunker(40, overlap);
        let chunks = splitter.split("doc", text);
        assert!(chunks.len() > 1);

        // Recover the underlying pieces by removing each chunk's carried
        // prefix, then check the concatenation.
        let mut pieces: Vec<String> = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            if idx == 0 {
                pieces.push(chunk.text.clone());
            } else {
                let carried = char_len(&pieces[idx - 1]).min(overlap);
                let skip = chunk.text.char_indices().nth(carried).map(|(o, _)| o).unwrap();
                pieces.push(chunk.text[skip..].to_string());
            }
        }
        assert_eq!(reassemble(&chunks, overlap, &pieces), text);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn adjacent_chunks_share_overlap_text() {
        let text = "aaaa bbbb cccc dddd. eeee ffff gggg hhhh. iiii jjjj kkkk llll.";
        let chunks = chunker(30, 6).split("doc", text);
        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            let prev = &window[0].text;
            let next = &window[1].text;
            let shared = tail_chars(prev, 6);
            assert!(
                next.starts_with(shared),
                "chunk {:?} does not start with {:?}",
                next,
                shared
            );
        }
    }

    #[test]
    fn paragraph_breaks_are_preferred_over_hard_splits() {
        let text = "first paragraph body\n\nsecond paragraph body";
        let chunks = chunker(24, 0).split("doc", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "first paragraph body\n\n");
        assert_eq!(chunks[1].text, "second paragraph body");
    }

    #[test]
    fn unbroken_text_falls_back_to_character_split() {
        let text = "x".repeat(25);
        let chunks = chunker(10, 0).split("doc", &text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 10);
        assert_eq!(chunks[2].text.len(), 5);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Repeatable input. With sentences! And lines.\nPlus a paragraph.\n\nDone?";
        let splitter = chunker(30, 7);
        assert_eq!(splitter.split("doc", text), splitter.split("doc", text));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllo wörld ünïcode tèxt çontent mörê".repeat(3);
        let chunks = chunker(15, 4).split("doc", &text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 15);
        }
    }
}
