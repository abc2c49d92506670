use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions, Page};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Break points in priority order: paragraphs, lines, sentence terminators (full-width
/// forms first), then plain whitespace. A hard cut is used when none fits.
const SEPARATORS: [&str; 10] = ["\n\n", "\n", "。", "！", "？", "；", ". ", "! ", "? ", " "];

const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.overlap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    start: usize,
    text: String,
}

/// Splits page texts into overlapping chunks of at most `chunk_size` characters.
///
/// Every chunk inherits its page's metadata plus `start_offset`, the character offset of the
/// chunk inside the page. The trailing `overlap` characters of a chunk are repeated at the
/// head of the next chunk from the same page.
pub fn split(pages: &[Page], chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, IngestError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(split_with(pages, config))
}

pub fn split_with(pages: &[Page], config: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (source_index, page) in pages.iter().enumerate() {
        for span in split_spans(&page.text, config) {
            let mut metadata = page.metadata.clone();
            metadata
                .entry("source")
                .or_insert_with(|| Value::String(UNKNOWN_SOURCE.to_string()));
            metadata.insert("start_offset".to_string(), Value::from(span.start as u64));

            chunks.push(Chunk {
                id: None,
                text: span.text,
                metadata,
                source_index,
            });
        }
    }

    chunks
}

fn split_spans(text: &str, config: ChunkingConfig) -> Vec<Span> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.chunk_size {
        return vec![Span {
            start: 0,
            text: text.to_string(),
        }];
    }

    let mut spans = Vec::new();
    let mut start = 0;
    loop {
        let window_end = start + config.chunk_size;
        if window_end >= chars.len() {
            spans.push(Span {
                start,
                text: chars[start..].iter().collect(),
            });
            break;
        }

        // The cut must land past the overlap so the next window moves forward.
        let end = find_cut(&chars, start, window_end, start + config.overlap);
        spans.push(Span {
            start,
            text: chars[start..end].iter().collect(),
        });
        start = end - config.overlap;
    }

    spans
}

fn find_cut(chars: &[char], start: usize, window_end: usize, min_end: usize) -> usize {
    let window = &chars[start..window_end];

    for separator in SEPARATORS {
        let needle: Vec<char> = separator.chars().collect();
        if let Some(position) = rfind(window, &needle) {
            let end = start + position + needle.len();
            if end > min_end {
                return end;
            }
        }
    }

    window_end
}

fn rfind(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

/// Stable identifier for a chunk so re-ingesting the same document overwrites its records.
pub fn chunk_fingerprint(chunk: &Chunk) -> String {
    let source = chunk.source().unwrap_or(UNKNOWN_SOURCE);
    let page = chunk
        .metadata
        .get("page")
        .map(Value::to_string)
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    // Length-prefixed so adjacent fields cannot run into each other.
    for field in [source.as_bytes(), page.as_bytes()] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hasher.update(chunk.start_offset().unwrap_or_default().to_le_bytes());
    hasher.update(chunk.text.as_bytes());
    format!("{:x}", hasher.finalize())
}
