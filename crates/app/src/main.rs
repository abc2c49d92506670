mod server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use stdkb_core::{
    initialize, CharacterNgramEmbedder, Embedder, IngestionController, IngestionOptions,
    MetadataFilter, QueryResult, Retriever, SearchRequest, StoreConfig, StoreMode,
    DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_LOCAL_PATH,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stdkb", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store mode: `local` (file-backed) or `remote` (Qdrant)
    #[arg(long, env = "STDKB_MODE", default_value = "local")]
    mode: StoreMode,

    /// Directory holding local collections
    #[arg(long, env = "STDKB_PATH", default_value = DEFAULT_LOCAL_PATH)]
    path: PathBuf,

    /// Remote vector store host
    #[arg(long, env = "STDKB_HOST")]
    host: Option<String>,

    /// Remote vector store port
    #[arg(long, env = "STDKB_PORT")]
    port: Option<u16>,

    /// Collection name
    #[arg(long, env = "STDKB_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Embedding dimensionality of the offline embedder
    #[arg(long, env = "STDKB_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk every PDF in a directory and write it to the collection.
    Ingest {
        /// Directory that contains the PDFs (not searched recursively).
        #[arg(long)]
        dir: PathBuf,
        /// Maximum characters per chunk.
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,
        /// Characters repeated between consecutive chunks.
        #[arg(long, default_value_t = 100)]
        overlap: usize,
        /// Files processed per group.
        #[arg(long, default_value_t = 80)]
        file_group_num: usize,
        /// Chunks per store write.
        #[arg(long, default_value_t = 6)]
        batch_num: usize,
    },
    /// Search the collection.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Keep only results containing this keyword.
        #[arg(long)]
        keyword: Option<String>,
        /// Metadata equality constraint as key=value; repeatable.
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Fetch one chunk by id.
    Get {
        #[arg(long)]
        id: String,
    },
    /// Print collection statistics.
    Stats,
    /// Serve the search API over HTTP.
    Serve {
        #[arg(long, env = "STDKB_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
        /// Candidate pool each search narrows and truncates.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            mode: self.mode,
            path: Some(self.path.clone()),
            host: self.host.clone(),
            port: self.port,
            collection_name: self.collection.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "stdkb boot"
    );

    let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new(cli.dimensions));
    let handle = initialize(&cli.store_config(), embedder).await?;

    match cli.command {
        Command::Ingest {
            dir,
            chunk_size,
            overlap,
            file_group_num,
            batch_num,
        } => {
            let options = IngestionOptions {
                chunk_size,
                overlap,
                file_group_size: file_group_num,
                batch_size: batch_num,
            };
            let mut controller = IngestionController::new(handle.clone(), options)?;
            let report = controller.process_pdfs(&dir).await?;

            for failure in report.failed() {
                warn!(
                    group = failure.index + 1,
                    files = failure.files.len(),
                    error = %failure.error,
                    "group not ingested"
                );
            }

            let stats = handle.stats().await?;
            println!(
                "{} chunks ingested from {} files ({} failed groups); collection holds {} chunks",
                report.chunks_written(),
                report.files_discovered,
                report.failed().count(),
                stats.count
            );
        }
        Command::Search {
            query,
            top_k,
            keyword,
            filters,
        } => {
            let request = SearchRequest {
                query,
                top_k,
                keyword_filter: keyword,
                metadata_filter: parse_filters(&filters)?,
            };
            let results = Retriever::new(handle, top_k).search(&request).await?;

            println!("query: {}", request.query);
            for result in &results {
                print_result(result);
            }
        }
        Command::Get { id } => match Retriever::from(handle).get_by_id(&id).await? {
            Some(result) => print_result(&result),
            None => println!("no chunk with id {id}"),
        },
        Command::Stats => {
            let stats = handle.stats().await?;
            println!("count: {}", stats.count);
            println!("{}", serde_json::to_string_pretty(&stats.metadata)?);
        }
        Command::Serve { bind, top_k } => {
            server::serve(Retriever::new(handle, top_k), bind).await?;
        }
    }

    Ok(())
}

fn print_result(result: &QueryResult) {
    let source = result
        .metadata
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    println!("[{:.4}] id={} source={}", result.score, result.id, source);
    println!("{}", result.text);
}

/// Parses `key=value` pairs; values that read as JSON (numbers, booleans) keep their type.
fn parse_filters(raw: &[String]) -> anyhow::Result<Option<MetadataFilter>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let mut filter = MetadataFilter::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("filter `{pair}` is not key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("filter `{pair}` has an empty key");
        }

        let value = serde_json::from_str::<Value>(value)
            .ok()
            .filter(|parsed| !parsed.is_object() && !parsed.is_array())
            .unwrap_or_else(|| Value::String(value.to_string()));
        filter.insert(key.to_string(), value);
    }

    Ok(Some(filter))
}
