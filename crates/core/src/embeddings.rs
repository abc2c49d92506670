pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Maps text to fixed-length vectors. Implementations must be deterministic for a given
/// model so stored and query vectors stay comparable.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Offline embedder hashing character unigrams and bigrams into buckets.
///
/// Chinese standards text has no word delimiters, so single characters and adjacent pairs
/// carry most of the lexical signal.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, gram: &[char], buckets: usize) -> usize {
        let mut hash = 1469598103934665603u64;
        for ch in gram {
            let mut buffer = [0u8; 4];
            for byte in ch.encode_utf8(&mut buffer).bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
        }
        (hash % buckets as u64) as usize
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let buckets = vector.len();
        let chars: Vec<char> = text
            .to_lowercase()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect();

        if chars.is_empty() {
            return vector;
        }

        for ch in &chars {
            vector[self.bucket(std::slice::from_ref(ch), buckets)] += 0.5;
        }
        for window in chars.windows(2) {
            vector[self.bucket(window, buckets)] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}
