use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use stdkb_core::{QueryResult, Retriever, SearchError, SearchRequest};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub fn router(retriever: Retriever) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/document/{id}", get(document))
        .layer(CorsLayer::permissive())
        .with_state(retriever)
}

pub async fn serve(retriever: Retriever, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, collection = retriever.handle().name(), "search api listening");

    axum::serve(listener, router(retriever))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn search(
    State(retriever): State<Retriever>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<QueryResult>>, ApiError> {
    info!(query = %request.query, top_k = request.top_k, "search request");
    let results = retriever.search(&request).await?;
    info!(hits = results.len(), "search served");
    Ok(Json(results))
}

async fn document(
    State(retriever): State<Retriever>,
    Path(id): Path<String>,
) -> Result<Json<QueryResult>, ApiError> {
    retriever
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("document {id} not found")))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::InvalidRequest(detail) => Self::new(StatusCode::BAD_REQUEST, detail),
            SearchError::Store(store_error) => {
                error!(error = %store_error, "retrieval failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "retrieval service unavailable",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
