use crate::models::{Chunk, CollectionStats, Metadata, MetadataFilter, QueryResult};
use crate::store::{similarity_to_score, VectorRecord};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Collection in a remote Qdrant instance, reached over its REST API.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    /// Connects to `host:port` and creates the collection (cosine distance) if it is missing.
    pub async fn connect(
        host: &str,
        port: u16,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let store = Self {
            endpoint: endpoint_url(host, port)?,
            collection: collection.into(),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|error| StoreError::connection(BACKEND, error))?,
            vector_size,
        };

        store.ensure_collection().await?;
        Ok(store)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| StoreError::connection(BACKEND, error))?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|error| StoreError::connection(BACKEND, error))?;
                let existing = body
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64);

                match existing {
                    Some(size) if size as usize != self.vector_size => {
                        Err(StoreError::Configuration(format!(
                            "collection `{}` holds {size}-dimensional vectors, embedder produces {}",
                            self.collection, self.vector_size
                        )))
                    }
                    _ => Ok(()),
                }
            }
            StatusCode::NOT_FOUND => {
                let response = self
                    .client
                    .put(self.collection_url())
                    .json(&json!({
                        "vectors": {
                            "size": self.vector_size,
                            "distance": "Cosine",
                        }
                    }))
                    .send()
                    .await
                    .map_err(|error| StoreError::connection(BACKEND, error))?;

                if !response.status().is_success() {
                    return Err(StoreError::connection(
                        BACKEND,
                        format!("collection creation returned {}", response.status()),
                    ));
                }
                Ok(())
            }
            status => Err(StoreError::connection(
                BACKEND,
                format!("collection lookup returned {status}"),
            )),
        }
    }
}

fn endpoint_url(host: &str, port: u16) -> Result<String, StoreError> {
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let mut url = Url::parse(&raw)
        .map_err(|error| StoreError::Configuration(format!("invalid host `{host}`: {error}")))?;
    url.set_port(Some(port))
        .map_err(|_| StoreError::Configuration(format!("host `{host}` cannot carry a port")))?;

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Qdrant only accepts unsigned integers or UUIDs as point ids, so chunk ids are mapped
/// onto name-based UUIDs and the original id travels in the payload.
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn build_filter(filter: Option<&MetadataFilter>) -> Option<Value> {
    let constraints = filter.filter(|constraints| !constraints.is_empty())?;
    let must = constraints
        .iter()
        .map(|(key, value)| {
            json!({
                "key": format!("metadata.{key}"),
                "match": { "value": value },
            })
        })
        .collect::<Vec<_>>();
    Some(json!({ "must": must }))
}

fn payload_to_chunk(payload: &Value) -> Option<Chunk> {
    let id = payload.pointer("/chunk_id").and_then(Value::as_str)?;
    let text = payload
        .pointer("/text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let metadata = payload
        .pointer("/metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let source_index = payload
        .pointer("/source_index")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;

    Some(Chunk {
        id: Some(id.to_string()),
        text: text.to_string(),
        metadata,
        source_index,
    })
}

fn parse_hits(body: &Value) -> Vec<QueryResult> {
    let hits = body
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .filter_map(|hit| {
            let chunk = payload_to_chunk(hit.pointer("/payload")?)?;
            let similarity = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            Some(QueryResult {
                id: chunk.id.unwrap_or_default(),
                text: chunk.text,
                metadata: chunk.metadata,
                score: similarity_to_score(similarity),
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(StoreError::write(
                        BACKEND,
                        format!(
                            "embedding dimension {} != {}",
                            record.vector.len(),
                            self.vector_size
                        ),
                    ));
                }

                Ok(json!({
                    "id": point_id(&record.id),
                    "vector": record.vector,
                    "payload": {
                        "chunk_id": record.id,
                        "text": record.text,
                        "metadata": record.metadata,
                        "source_index": record.source_index,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| StoreError::write(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(StoreError::write(BACKEND, response.status()));
        }

        Ok(())
    }

    async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, StoreError> {
        let mut body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = build_filter(filter) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(StoreError::read(BACKEND, response.status()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;
        Ok(parse_hits(&parsed))
    }

    async fn get(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let response = self
            .client
            .get(format!("{}/points/{}", self.collection_url(), point_id(id)))
            .send()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::read(BACKEND, response.status()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;
        Ok(parsed.pointer("/result/payload").and_then(payload_to_chunk))
    }

    async fn stats(&self) -> Result<CollectionStats, StoreError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(StoreError::read(BACKEND, response.status()));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| StoreError::read(BACKEND, error))?;

        let count = parsed
            .pointer("/result/points_count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        let mut metadata = Metadata::new();
        metadata.insert("backend".to_string(), json!(BACKEND));
        metadata.insert("name".to_string(), json!(self.collection));
        metadata.insert("dimensions".to_string(), json!(self.vector_size));
        metadata.insert("distance".to_string(), json!("cosine"));
        if let Some(status) = parsed.pointer("/result/status") {
            metadata.insert("status".to_string(), status.clone());
        }

        Ok(CollectionStats { count, metadata })
    }
}
