use crate::gateway::CollectionHandle;
use crate::models::{MetadataFilter, QueryResult, SearchRequest, DEFAULT_TOP_K};
use crate::SearchError;
use tracing::debug;

/// Query side of the knowledge base. Holds no state beyond the handle it searches.
#[derive(Debug, Clone)]
pub struct Retriever {
    handle: CollectionHandle,
    top_k: usize,
}

impl Retriever {
    pub fn new(handle: CollectionHandle, top_k: usize) -> Self {
        Self {
            handle,
            top_k: top_k.max(1),
        }
    }

    pub fn handle(&self) -> &CollectionHandle {
        &self.handle
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embeds `query` and returns up to `k` results in the store's rank order.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidRequest("query is empty".to_string()));
        }

        let query_vector = self.handle.embedder().embed(query);
        let results = self.handle.query(&query_vector, k, filter).await?;
        debug!(k, hits = results.len(), "similarity search");
        Ok(results)
    }

    /// Vector search over the retriever's `top_k`, narrowed to results containing `keyword`.
    ///
    /// The keyword is applied after the fixed-size vector fetch, so a keyword match ranked
    /// below `top_k` by the vector search is never returned.
    pub async fn hybrid_search(
        &self,
        query: &str,
        keyword: Option<&str>,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, SearchError> {
        let results = self.similarity_search(query, self.top_k, filter).await?;
        Ok(narrow_by_keyword(results, keyword, self.top_k))
    }

    /// Exact lookup; the score is fixed at 1.0.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<QueryResult>, SearchError> {
        let chunk = self.handle.get_by_id(id).await?;
        Ok(chunk.map(|chunk| QueryResult {
            id: chunk.id.unwrap_or_else(|| id.to_string()),
            text: chunk.text,
            metadata: chunk.metadata,
            score: 1.0,
        }))
    }

    /// Validated entry point for front ends: hybrid search when any filter is given,
    /// plain similarity search otherwise. Candidates come from the retriever's own `top_k`
    /// pool and are then truncated to the request's `top_k`.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<QueryResult>, SearchError> {
        request.validate()?;

        let filter = request.metadata_filter.as_ref();
        let mut results = if request.is_hybrid() {
            let keyword = request.keyword_filter.as_deref();
            self.hybrid_search(&request.query, keyword, filter).await?
        } else {
            self.similarity_search(&request.query, self.top_k, filter)
                .await?
        };

        results.truncate(request.top_k);
        Ok(results)
    }
}

impl From<CollectionHandle> for Retriever {
    fn from(handle: CollectionHandle) -> Self {
        Self::new(handle, DEFAULT_TOP_K)
    }
}

fn narrow_by_keyword(
    results: Vec<QueryResult>,
    keyword: Option<&str>,
    k: usize,
) -> Vec<QueryResult> {
    let Some(keyword) = keyword.filter(|keyword| !keyword.is_empty()) else {
        return results;
    };

    let needle = keyword.to_lowercase();
    results
        .into_iter()
        .filter(|result| result.text.to_lowercase().contains(&needle))
        .take(k)
        .collect()
}
