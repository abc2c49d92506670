use crate::error::{IngestError, SearchError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Metadata = Map<String, Value>;

/// Conjunctive key/value equality constraints over chunk metadata.
pub type MetadataFilter = BTreeMap<String, Value>;

pub const MAX_QUERY_CHARS: usize = 500;
pub const MAX_TOP_K: usize = 20;
pub const DEFAULT_TOP_K: usize = 5;

const USER_INPUT_SOURCE: &str = "user_input";

/// Text of one extracted page plus the metadata every chunk cut from it inherits.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub text: String,
    pub metadata: Metadata,
}

impl Page {
    pub fn new(source: impl Into<String>, number: u32, text: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(source.into()));
        metadata.insert("page".to_string(), Value::from(number));
        Self {
            text: text.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: Option<String>,
    pub text: String,
    pub metadata: Metadata,
    pub source_index: usize,
}

impl Chunk {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub fn start_offset(&self) -> Option<u64> {
        self.metadata.get("start_offset").and_then(Value::as_u64)
    }

    fn with_required_metadata(mut self) -> Self {
        self.metadata
            .entry("source")
            .or_insert_with(|| Value::String(USER_INPUT_SOURCE.to_string()));
        self.metadata
            .entry("start_offset")
            .or_insert_with(|| Value::from(0u64));
        self
    }
}

/// Anything the gateway accepts for insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkInput {
    Text(String),
    Raw(Chunk),
    Fields(Map<String, Value>),
}

impl ChunkInput {
    /// Normalizes the input into a [`Chunk`] carrying at least `source` and `start_offset`.
    ///
    /// `Fields` reads `page_content` (or `text`), an optional `metadata` object, an optional
    /// `id` and an optional `source_index`.
    pub fn into_chunk(self) -> Result<Chunk, StoreError> {
        let chunk = match self {
            Self::Text(text) => Chunk {
                id: None,
                text,
                metadata: Metadata::new(),
                source_index: 0,
            },
            Self::Raw(chunk) => chunk,
            Self::Fields(mut fields) => {
                let text = match fields.remove("page_content").or_else(|| fields.remove("text")) {
                    Some(Value::String(text)) => text,
                    Some(other) => {
                        return Err(StoreError::InvalidChunk(format!(
                            "text field must be a string, got {other}"
                        )))
                    }
                    None => {
                        return Err(StoreError::InvalidChunk(
                            "missing `page_content` or `text` field".to_string(),
                        ))
                    }
                };

                let metadata = match fields.remove("metadata") {
                    Some(Value::Object(map)) => map,
                    Some(Value::Null) | None => Metadata::new(),
                    Some(other) => {
                        return Err(StoreError::InvalidChunk(format!(
                            "metadata must be an object, got {other}"
                        )))
                    }
                };

                let id = match fields.remove("id") {
                    Some(Value::String(id)) if !id.trim().is_empty() => Some(id),
                    Some(Value::String(_)) | Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(StoreError::InvalidChunk(format!(
                            "id must be a string, got {other}"
                        )))
                    }
                };

                let source_index = fields
                    .remove("source_index")
                    .and_then(|value| value.as_u64())
                    .unwrap_or_default() as usize;

                Chunk {
                    id,
                    text,
                    metadata,
                    source_index,
                }
            }
        };

        Ok(chunk.with_required_metadata())
    }
}

impl From<String> for ChunkInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ChunkInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Chunk> for ChunkInput {
    fn from(value: Chunk) -> Self {
        Self::Raw(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStats {
    pub count: usize,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub file_group_size: usize,
    pub batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
            file_group_size: 80,
            batch_size: 6,
        }
    }
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        if self.file_group_size == 0 {
            return Err(IngestError::InvalidArgument(
                "file_group_size must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub keyword_filter: Option<String>,
    #[serde(default)]
    pub metadata_filter: Option<MetadataFilter>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            keyword_filter: None,
            metadata_filter: None,
        }
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        let length = self.query.chars().count();
        if length == 0 {
            return Err(SearchError::InvalidRequest("query is empty".to_string()));
        }
        if length > MAX_QUERY_CHARS {
            return Err(SearchError::InvalidRequest(format!(
                "query has {length} characters, limit is {MAX_QUERY_CHARS}"
            )));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(SearchError::InvalidRequest(format!(
                "top_k must be within 1..={MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        Ok(())
    }

    pub fn is_hybrid(&self) -> bool {
        self.keyword_filter.is_some() || self.metadata_filter.is_some()
    }
}
