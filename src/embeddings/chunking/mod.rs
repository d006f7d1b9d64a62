#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::{RagError, Result};

/// The `cl100k_base` byte-pair encoding used by the OpenAI embedding models
static ENCODING: LazyLock<CoreBPE> =
    LazyLock::new(|| tiktoken_rs::cl100k_base().expect("bundled cl100k_base vocabulary is valid"));

/// A window of tokens cut from a larger text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Source text covered by the window
    pub text: String,
    /// Position of this chunk within its source
    pub index: usize,
    /// Index of the first token of the window
    pub token_start: usize,
    /// Number of tokens in the window
    pub token_count: usize,
}

/// Configuration for token-window chunking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum number of tokens per chunk
    pub max_tokens: usize,
    /// Tokens shared between a chunk and its predecessor
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_tokens: 300,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Reject window parameters that would never advance
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.overlap >= self.max_tokens {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than max tokens ({})",
                self.overlap, self.max_tokens
            )));
        }
        Ok(())
    }

    /// Distance between the starts of two consecutive windows
    #[inline]
    pub fn stride(&self) -> usize {
        self.max_tokens - self.overlap
    }
}

/// Encode text into `cl100k_base` token ids
#[inline]
pub fn tokenize(text: &str) -> Vec<u32> {
    ENCODING.encode_ordinary(text)
}

/// Count tokens the same way chunking does
#[inline]
pub fn count_tokens(text: &str) -> usize {
    tokenize(text).len()
}

/// Byte offset of every token boundary; the last entry is `text.len()`
fn token_offsets(tokens: &[u32]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(tokens.len() + 1);
    let mut position = 0;
    offsets.push(position);
    for bytes in ENCODING._decode_native_and_split(tokens.to_vec()) {
        position += bytes.len();
        offsets.push(position);
    }
    offsets
}

/// Chunk a document into overlapping token windows.
///
/// A window is decoded by slicing the source bytes, so it is exact unless
/// its edge falls inside a multi-byte character; that character is replaced
/// with U+FFFD.
#[inline]
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    config.validate()?;

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let offsets = token_offsets(&tokens);

    let stride = config.stride();
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + config.max_tokens).min(tokens.len());
        let window = text
            .as_bytes()
            .get(offsets[start]..offsets[end])
            .unwrap_or_default();
        chunks.push(TextChunk {
            text: String::from_utf8_lossy(window).into_owned(),
            index: chunks.len(),
            token_start: start,
            token_count: end - start,
        });

        if end == tokens.len() {
            break;
        }
        start += stride;
    }

    debug!(
        "Chunked {} tokens into {} chunks (max {}, overlap {})",
        tokens.len(),
        chunks.len(),
        config.max_tokens,
        config.overlap
    );

    Ok(chunks)
}

/// Chunk text into overlapping windows of at most `max_tokens` tokens
#[inline]
pub fn chunk_text(text: &str, max_tokens: usize, overlap: usize) -> Result<Vec<String>> {
    let config = ChunkingConfig {
        max_tokens,
        overlap,
    };
    Ok(chunk_document(text, &config)?
        .into_iter()
        .map(|chunk| chunk.text)
        .collect())
}
