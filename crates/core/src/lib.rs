pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_fingerprint, split, split_with, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, SearchError, StoreError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use gateway::{
    initialize, CollectionHandle, StoreConfig, StoreMode, DEFAULT_COLLECTION, DEFAULT_LOCAL_PATH,
};
pub use ingest::{
    chunks_per_minute, scan, GroupFailure, GroupOutcome, GroupSuccess, IngestionController,
    IngestionReport, IngestionState, ThroughputMeter,
};
pub use models::{
    Chunk, ChunkInput, CollectionStats, IngestionOptions, Metadata, MetadataFilter, Page,
    QueryResult, SearchRequest, DEFAULT_TOP_K, MAX_QUERY_CHARS, MAX_TOP_K,
};
pub use retrieval::Retriever;
pub use store::VectorRecord;
pub use stores::{LocalStore, QdrantStore};
pub use traits::VectorStore;
