use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::models::RetrievedChunk;
use crate::traits::VectorStore;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub top_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

pub struct VectorRetriever<'a, E: ?Sized, S: ?Sized> {
    embedder: &'a E,
    store: &'a S,
}

impl<'a, E, S> VectorRetriever<'a, E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore + ?Sized,
{
    pub fn new(embedder: &'a E, store: &'a S) -> Self {
        Self { embedder, store }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        company: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        let exists = self
            .store
            .partition_exists(company)
            .await
            .map_err(QueryError::VectorStore)?;
        if !exists {
            return Err(QueryError::PartitionNotFound(company.to_string()));
        }

        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(QueryError::EmbeddingService)?;
        let matches = self
            .store
            .query(company, &embedding, top_k)
            .await
            .map_err(QueryError::VectorStore)?;

        let mut retrieved: Vec<RetrievedChunk> =
            matches.into_iter().map(|hit| hit.into_retrieved()).collect();
        retrieved.sort_by(|left, right| right.similarity_score.total_cmp(&left.similarity_score));
        retrieved.truncate(top_k);

        debug!(
            company,
            requested = top_k,
            returned = retrieved.len(),
            best = retrieved.first().map(|chunk| chunk.similarity_score),
            "vector retrieval"
        );
        Ok(retrieved)
    }
}
