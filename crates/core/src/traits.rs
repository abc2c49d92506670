use crate::models::{Chunk, CollectionStats, MetadataFilter, QueryResult};
use crate::store::VectorRecord;
use crate::StoreError;
use async_trait::async_trait;

/// Backend side of the gateway: one collection inside a local or remote vector index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError>;

    /// Nearest neighbours in descending score order; under-fills without error.
    async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Chunk>, StoreError>;

    async fn stats(&self) -> Result<CollectionStats, StoreError>;
}
