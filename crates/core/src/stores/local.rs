use crate::models::{Chunk, CollectionStats, Metadata, MetadataFilter, QueryResult};
use crate::store::{cosine_similarity, similarity_to_score, VectorRecord};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

const BACKEND: &str = "local";

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS collection_info (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    source_index INTEGER NOT NULL,
    vector BLOB NOT NULL
);
"#;

/// SQLite-backed collection. Rows are written per batch; an in-memory mirror serves the
/// exhaustive cosine scan so readers never wait on disk.
pub struct LocalStore {
    path: PathBuf,
    name: String,
    dimensions: usize,
    created_at: String,
    writer: Arc<Mutex<Connection>>,
    records: RwLock<BTreeMap<String, VectorRecord>>,
}

impl LocalStore {
    pub fn open(
        directory: &Path,
        collection: &str,
        dimensions: usize,
    ) -> Result<Self, StoreError> {
        fs::create_dir_all(directory).map_err(|error| {
            StoreError::connection(BACKEND, format!("{}: {error}", directory.display()))
        })?;

        let path = directory.join(format!("{collection}.sqlite3"));
        let unreadable = |error: rusqlite::Error| {
            StoreError::connection(
                BACKEND,
                format!("cannot open collection file {}: {error}", path.display()),
            )
        };

        let conn = Connection::open(&path).map_err(unreadable)?;
        conn.execute_batch(SCHEMA_SQL).map_err(unreadable)?;
        conn.execute(
            "INSERT OR IGNORE INTO collection_info (name, dimensions, created_at)
             VALUES (?1, ?2, ?3)",
            params![collection, dimensions as i64, Utc::now().to_rfc3339()],
        )
        .map_err(unreadable)?;

        let (stored_dimensions, created_at) = conn
            .query_row(
                "SELECT dimensions, created_at FROM collection_info WHERE name = ?1",
                params![collection],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(unreadable)?;

        if stored_dimensions != dimensions as i64 {
            return Err(StoreError::Configuration(format!(
                "collection `{collection}` holds {stored_dimensions}-dimensional vectors, embedder produces {dimensions}"
            )));
        }

        let records = load_records(&conn, dimensions)?;
        debug!(
            collection,
            records = records.len(),
            path = %path.display(),
            "local collection opened"
        );

        Ok(Self {
            path,
            name: collection.to_string(),
            dimensions,
            created_at,
            writer: Arc::new(Mutex::new(conn)),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_records(
    conn: &Connection,
    dimensions: usize,
) -> Result<BTreeMap<String, VectorRecord>, StoreError> {
    let corrupt = |details: String| StoreError::connection(BACKEND, details);

    let mut stmt = conn
        .prepare("SELECT id, text, metadata, source_index, vector FROM records")
        .map_err(|error| corrupt(error.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })
        .map_err(|error| corrupt(error.to_string()))?;

    let mut records = BTreeMap::new();
    for row in rows {
        let (id, text, metadata, source_index, blob) =
            row.map_err(|error| corrupt(error.to_string()))?;
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|error| corrupt(format!("record {id}: {error}")))?;
        let vector = decode_vector(&blob, dimensions)
            .ok_or_else(|| corrupt(format!("record {id}: vector blob has the wrong length")))?;

        records.insert(
            id.clone(),
            VectorRecord {
                id,
                text,
                metadata,
                source_index: usize::try_from(source_index).unwrap_or_default(),
                vector,
            },
        );
    }
    Ok(records)
}

fn write_batch(writer: &Mutex<Connection>, records: &[VectorRecord]) -> Result<(), StoreError> {
    let failed = |error: rusqlite::Error| StoreError::write(BACKEND, error);

    let mut conn = writer
        .lock()
        .map_err(|_| StoreError::write(BACKEND, "writer lock poisoned"))?;
    let tx = conn.transaction().map_err(failed)?;
    {
        let mut stmt = tx
            .prepare_cached(
                "INSERT OR REPLACE INTO records (id, text, metadata, source_index, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(failed)?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata)?;
            stmt.execute(params![
                record.id,
                record.text,
                metadata,
                record.source_index as i64,
                encode_vector(&record.vector),
            ])
            .map_err(failed)?;
        }
    }
    tx.commit().map_err(failed)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if blob.len() != dimensions * std::mem::size_of::<f32>() {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect(),
    )
}

#[async_trait]
impl VectorStore for LocalStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != self.dimensions)
        {
            return Err(StoreError::write(
                BACKEND,
                format!(
                    "record {} has dimension {}, collection expects {}",
                    record.id,
                    record.vector.len(),
                    self.dimensions
                ),
            ));
        }

        let batch = records.to_vec();
        let writer = Arc::clone(&self.writer);
        let committed = tokio::task::spawn_blocking(move || {
            write_batch(&writer, &batch)?;
            Ok::<_, StoreError>(batch)
        })
        .await
        .map_err(|error| StoreError::write(BACKEND, error))??;

        // Mirror only committed rows.
        let mut mirror = self
            .records
            .write()
            .map_err(|_| StoreError::write(BACKEND, "collection lock poisoned"))?;
        for record in committed {
            mirror.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::read(BACKEND, "collection lock poisoned"))?;

        let mut scored = guard
            .values()
            .filter(|record| record.matches(filter))
            .map(|record| {
                let score = similarity_to_score(cosine_similarity(query_vector, &record.vector));
                (score, record)
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.id.cmp(&right.1.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, record)| QueryResult {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score,
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::read(BACKEND, "collection lock poisoned"))?;
        Ok(guard.get(id).cloned().map(VectorRecord::into_chunk))
    }

    async fn stats(&self) -> Result<CollectionStats, StoreError> {
        let count = self
            .records
            .read()
            .map_err(|_| StoreError::read(BACKEND, "collection lock poisoned"))?
            .len();

        let mut metadata = Metadata::new();
        metadata.insert("backend".to_string(), json!(BACKEND));
        metadata.insert("name".to_string(), json!(self.name));
        metadata.insert("dimensions".to_string(), json!(self.dimensions));
        metadata.insert("distance".to_string(), json!("cosine"));
        metadata.insert("created_at".to_string(), json!(self.created_at));
        metadata.insert(
            "path".to_string(),
            json!(self.path.to_string_lossy().to_string()),
        );

        Ok(CollectionStats { count, metadata })
    }
}
