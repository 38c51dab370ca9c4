use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::Chunk;
use crate::store::VectorRecord;
use crate::traits::VectorStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub partition: String,
    pub embeddings_written: usize,
    pub indexed_at: DateTime<Utc>,
}

pub struct IndexBuilder<'a, E: ?Sized, S: ?Sized> {
    embedder: &'a E,
    store: &'a S,
}

impl<'a, E, S> IndexBuilder<'a, E, S>
where
    E: Embedder + ?Sized,
    S: VectorStore + ?Sized,
{
    pub fn new(embedder: &'a E, store: &'a S) -> Self {
        Self { embedder, store }
    }

    pub async fn build(&self, company: &str, chunks: &[Chunk]) -> Result<IndexReport, IngestError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(IngestError::EmbeddingService)?;

        if embeddings.len() != chunks.len() {
            return Err(IngestError::EmbeddingService(crate::BackendError::response(
                self.embedder.model_name(),
                format!("{} embeddings for {} chunks", embeddings.len(), chunks.len()),
            )));
        }

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord::from_chunk(chunk, embedding))
            .collect();

        let index_write = |source| IngestError::IndexWrite {
            partition: company.to_string(),
            source,
        };
        let existed = self
            .store
            .partition_exists(company)
            .await
            .map_err(index_write)?;
        self.store
            .ensure_partition(company, self.embedder.dimensions())
            .await
            .map_err(index_write)?;
        let written = match self.store.upsert(company, &records).await {
            Ok(written) => written,
            Err(source) => {
                // A partition created by this build must not outlive a failed write.
                if !existed {
                    if let Err(error) = self.store.drop_partition(company).await {
                        warn!(partition = company, error = %error, "could not remove partial partition");
                    }
                }
                return Err(index_write(source));
            }
        };

        info!(
            partition = company,
            model = self.embedder.model_name(),
            embeddings_written = written,
            "partition built"
        );

        Ok(IndexReport {
            partition: company.to_string(),
            embeddings_written: written,
            indexed_at: Utc::now(),
        })
    }
}
