use crate::store::{StoredMatch, VectorRecord};
use crate::BackendError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn partition_exists(&self, partition: &str) -> Result<bool, BackendError>;

    /// Creates the partition if it is absent. Fails if it exists with a
    /// different dimensionality.
    async fn ensure_partition(&self, partition: &str, dimensions: usize) -> Result<(), BackendError>;

    /// Removes the partition and its records. Absent partitions are not an error.
    async fn drop_partition(&self, partition: &str) -> Result<(), BackendError>;

    /// Inserts or overwrites records by id, all or nothing. Returns the
    /// number of records written.
    async fn upsert(&self, partition: &str, records: &[VectorRecord]) -> Result<usize, BackendError>;

    /// Up to `top_k` matches ordered by ascending distance.
    async fn query(
        &self,
        partition: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<StoredMatch>, BackendError>;
}
