use crate::embeddings::Embedder;
use crate::models::{Chunk, ChunkInput, CollectionStats, MetadataFilter, QueryResult};
use crate::store::VectorRecord;
use crate::stores::{LocalStore, QdrantStore};
use crate::traits::VectorStore;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_COLLECTION: &str = "construction_docs";
pub const DEFAULT_LOCAL_PATH: &str = "data/vector_db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    Local,
    Remote,
}

impl FromStr for StoreMode {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "http" => Ok(Self::Remote),
            other => Err(StoreError::Configuration(format!(
                "unknown store mode `{other}`, expected `local` or `remote`"
            ))),
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub mode: StoreMode,
    pub path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub collection_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::local(DEFAULT_LOCAL_PATH, DEFAULT_COLLECTION)
    }
}

impl StoreConfig {
    pub fn local(path: impl Into<PathBuf>, collection_name: impl Into<String>) -> Self {
        Self {
            mode: StoreMode::Local,
            path: Some(path.into()),
            host: None,
            port: None,
            collection_name: collection_name.into(),
        }
    }

    pub fn remote(host: impl Into<String>, port: u16, collection_name: impl Into<String>) -> Self {
        Self {
            mode: StoreMode::Remote,
            path: None,
            host: Some(host.into()),
            port: Some(port),
            collection_name: collection_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.collection_name.trim().is_empty() {
            return Err(StoreError::Configuration(
                "collection name must not be empty".to_string(),
            ));
        }

        match self.mode {
            StoreMode::Local => {
                let has_path = self
                    .path
                    .as_ref()
                    .is_some_and(|path| !path.as_os_str().is_empty());
                if !has_path {
                    return Err(StoreError::Configuration(
                        "local mode requires a persist path".to_string(),
                    ));
                }
            }
            StoreMode::Remote => {
                let has_host = self.host.as_ref().is_some_and(|host| !host.trim().is_empty());
                let has_port = self.port.is_some_and(|port| port > 0);
                if !has_host || !has_port {
                    return Err(StoreError::Configuration(
                        "remote mode requires both host and port".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Explicit reference to one collection: the backend connection, the embedder that feeds it
/// and the lock that serializes writers. Clones share all three.
#[derive(Clone)]
pub struct CollectionHandle {
    name: String,
    dimensions: usize,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    write_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions)
            .field("backend", &self.store.backend())
            .finish()
    }
}

/// Validates `config`, opens the backend and returns the handle every other call goes through.
pub async fn initialize(
    config: &StoreConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<CollectionHandle, StoreError> {
    config.validate()?;

    let dimensions = embedder.dimensions();
    if dimensions == 0 {
        return Err(StoreError::Configuration(
            "embedder reports zero dimensions".to_string(),
        ));
    }

    let store: Arc<dyn VectorStore> = match config.mode {
        StoreMode::Local => {
            let path = config.path.as_deref().ok_or_else(|| {
                StoreError::Configuration("local mode requires a persist path".to_string())
            })?;
            Arc::new(LocalStore::open(path, &config.collection_name, dimensions)?)
        }
        StoreMode::Remote => {
            let (host, port) = config.host.as_deref().zip(config.port).ok_or_else(|| {
                StoreError::Configuration("remote mode requires both host and port".to_string())
            })?;
            let store =
                QdrantStore::connect(host, port, config.collection_name.clone(), dimensions)
                    .await?;
            Arc::new(store)
        }
    };

    info!(
        mode = %config.mode,
        collection = %config.collection_name,
        dimensions,
        "vector store initialized"
    );

    Ok(CollectionHandle::new(
        config.collection_name.clone(),
        store,
        embedder,
    ))
}

impl CollectionHandle {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            name: name.into(),
            dimensions: embedder.dimensions(),
            store,
            embedder,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Embeds and writes `inputs`, returning their ids in input order.
    ///
    /// Inputs without an id get a fresh UUID. An error means none of the batch is guaranteed
    /// to be persisted.
    pub async fn upsert(&self, inputs: Vec<ChunkInput>) -> Result<Vec<String>, StoreError> {
        if inputs.is_empty() {
            warn!(collection = %self.name, "upsert called with no chunks");
            return Ok(Vec::new());
        }

        let chunks = inputs
            .into_iter()
            .map(ChunkInput::into_chunk)
            .collect::<Result<Vec<_>, _>>()?;

        let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        let vectors = self.embedder.embed_batch(&texts);
        if vectors.len() != chunks.len() {
            return Err(StoreError::write(
                self.backend(),
                format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }

        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                text: chunk.text,
                metadata: chunk.metadata,
                source_index: chunk.source_index,
                vector,
            })
            .collect::<Vec<_>>();
        let ids = records.iter().map(|record| record.id.clone()).collect::<Vec<_>>();

        let _writer = self.write_lock.lock().await;
        self.store.upsert(&records).await?;

        debug!(collection = %self.name, count = ids.len(), "chunks upserted");
        Ok(ids)
    }

    pub async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, StoreError> {
        if k == 0 {
            return Err(StoreError::read(self.backend(), "k must be positive"));
        }
        if query_vector.len() != self.dimensions {
            return Err(StoreError::read(
                self.backend(),
                format!(
                    "query vector has dimension {}, collection expects {}",
                    query_vector.len(),
                    self.dimensions
                ),
            ));
        }

        self.store.query(query_vector, k, filter).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        self.store.get(id).await
    }

    pub async fn stats(&self) -> Result<CollectionStats, StoreError> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use serde_json::json;
    use tempfile::tempdir;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder::new(64))
    }

    #[test]
    fn local_mode_requires_path() {
        let config = StoreConfig {
            path: None,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn remote_mode_requires_host_and_port() {
        let mut config = StoreConfig::remote("localhost", 6333, DEFAULT_COLLECTION);
        assert!(config.validate().is_ok());

        config.port = None;
        assert!(matches!(config.validate(), Err(StoreError::Configuration(_))));

        config.port = Some(6333);
        config.host = Some(" ".to_string());
        assert!(matches!(config.validate(), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn store_mode_parses_aliases() {
        assert_eq!("local".parse::<StoreMode>().unwrap(), StoreMode::Local);
        assert_eq!("HTTP".parse::<StoreMode>().unwrap(), StoreMode::Remote);
        assert!("cloud".parse::<StoreMode>().is_err());
    }

    #[tokio::test]
    async fn initialize_rejects_missing_path_before_touching_disk() {
        let config = StoreConfig {
            path: None,
            ..StoreConfig::default()
        };
        let result = initialize(&config, embedder()).await;
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_connection_error() {
        let config = StoreConfig::remote("127.0.0.1", 1, "docs");
        let result = initialize(&config, embedder()).await;
        assert!(matches!(result, Err(StoreError::Connection { .. })));
    }

    #[tokio::test]
    async fn unreadable_local_collection_is_a_connection_error(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("docs.sqlite3"), b"{not a database}".repeat(256))?;
        let result = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await;
        assert!(matches!(result, Err(StoreError::Connection { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn empty_upsert_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;

        let ids = handle.upsert(Vec::new()).await?;
        assert!(ids.is_empty());
        assert_eq!(handle.stats().await?.count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_assigns_ids_and_respects_supplied_ones(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;

        let supplied = Chunk {
            id: Some("gb50204-p1-0".to_string()),
            text: "混凝土强度检验评定".to_string(),
            metadata: Default::default(),
            source_index: 0,
        };
        let ids = handle
            .upsert(vec![
                ChunkInput::from("钢筋隐蔽工程验收"),
                ChunkInput::from(supplied.clone()),
            ])
            .await?;

        assert_eq!(ids.len(), 2);
        assert!(Uuid::parse_str(&ids[0]).is_ok());
        assert_eq!(ids[1], "gb50204-p1-0");

        handle.upsert(vec![ChunkInput::from(supplied)]).await?;
        assert_eq!(handle.stats().await?.count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_id_is_absent_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;
        handle.upsert(vec![ChunkInput::from("施工安全要求")]).await?;

        assert!(handle.get_by_id("never-inserted").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn query_under_fills_without_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;
        handle
            .upsert(vec![
                ChunkInput::from("混凝土强度标准"),
                ChunkInput::from("钢筋检测规范"),
            ])
            .await?;

        let vector = handle.embedder().embed("混凝土");
        let hits = handle.query(&vector, 3, None).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "混凝土强度标准");
        Ok(())
    }

    #[tokio::test]
    async fn query_applies_metadata_filter() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;

        let Some(fields) = json!({
            "page_content": "钢筋检测规范",
            "metadata": {"source": "GB50204.pdf"},
        })
        .as_object()
        .cloned() else {
            unreachable!()
        };
        handle
            .upsert(vec![
                ChunkInput::Fields(fields),
                ChunkInput::from("混凝土强度标准"),
            ])
            .await?;

        let mut filter = MetadataFilter::new();
        filter.insert("source".to_string(), json!("GB50204.pdf"));

        let vector = handle.embedder().embed("混凝土");
        let hits = handle.query(&vector, 5, Some(&filter)).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "钢筋检测规范");
        Ok(())
    }

    #[tokio::test]
    async fn zero_k_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let handle = initialize(&StoreConfig::local(dir.path(), "docs"), embedder()).await?;
        let vector = handle.embedder().embed("混凝土");
        assert!(matches!(
            handle.query(&vector, 0, None).await,
            Err(StoreError::Read { .. })
        ));
        Ok(())
    }
}
