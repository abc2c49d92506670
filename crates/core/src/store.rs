use crate::models::{Chunk, Metadata, MetadataFilter};
use serde::{Deserialize, Serialize};

/// A chunk with its assigned id and embedding, as written to a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub source_index: usize,
    pub vector: Vec<f32>,
}

impl VectorRecord {
    pub fn into_chunk(self) -> Chunk {
        Chunk {
            id: Some(self.id),
            text: self.text,
            metadata: self.metadata,
            source_index: self.source_index,
        }
    }

    pub fn matches(&self, filter: Option<&MetadataFilter>) -> bool {
        matches_filter(&self.metadata, filter)
    }
}

pub fn matches_filter(metadata: &Metadata, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |constraints| {
        constraints
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    })
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Maps a cosine similarity in `[-1, 1]` onto a relevance score in `[0, 1]`.
pub fn similarity_to_score(similarity: f64) -> f64 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}
