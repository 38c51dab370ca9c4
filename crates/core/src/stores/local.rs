use crate::store::{StoredMatch, VectorRecord};
use crate::traits::VectorStore;
use crate::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

const BACKEND: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Partition {
    name: String,
    dimensions: usize,
    records: BTreeMap<String, VectorRecord>,
}

/// Brute-force cosine store. Optionally backed by a directory holding one
/// JSON file per partition; every write replaces the file atomically.
#[derive(Debug, Default)]
pub struct LocalVectorStore {
    directory: Option<PathBuf>,
    partitions: RwLock<HashMap<String, Partition>>,
}

impl LocalVectorStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory: Some(directory),
            partitions: RwLock::new(HashMap::new()),
        })
    }

    async fn cached(&self, name: &str) -> Result<bool, BackendError> {
        if self.partitions.read().await.contains_key(name) {
            return Ok(true);
        }
        let Some(directory) = &self.directory else {
            return Ok(false);
        };

        let path = partition_file(directory, name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(error.into()),
        };
        let partition: Partition = serde_json::from_slice(&bytes)?;
        if partition.name != name {
            return Err(BackendError::response(
                BACKEND,
                format!("{} holds partition `{}`", path.display(), partition.name),
            ));
        }

        debug!(partition = name, records = partition.records.len(), "loaded partition");
        self.partitions
            .write()
            .await
            .entry(name.to_string())
            .or_insert(partition);
        Ok(true)
    }

    async fn persist(&self, partition: &Partition) -> Result<(), BackendError> {
        let Some(directory) = self.directory.clone() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(partition)?;
        let path = partition_file(&directory, &partition.name);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&directory)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|error| error.error)?;
            Ok(())
        })
        .await
        .map_err(|error| BackendError::Request(format!("partition write task failed: {error}")))??;
        Ok(())
    }
}

fn partition_file(directory: &Path, name: &str) -> PathBuf {
    let digest = Sha256::digest(name.as_bytes());
    let hex: String = digest.iter().take(16).map(|byte| format!("{byte:02x}")).collect();
    directory.join(format!("{hex}.json"))
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn partition_exists(&self, partition: &str) -> Result<bool, BackendError> {
        self.cached(partition).await
    }

    async fn ensure_partition(&self, partition: &str, dimensions: usize) -> Result<(), BackendError> {
        self.cached(partition).await?;
        let mut partitions = self.partitions.write().await;
        if let Some(existing) = partitions.get(partition) {
            if existing.dimensions != dimensions {
                return Err(BackendError::response(
                    BACKEND,
                    format!(
                        "partition `{partition}` has {} dimensions, requested {dimensions}",
                        existing.dimensions
                    ),
                ));
            }
            return Ok(());
        }

        let created = Partition {
            name: partition.to_string(),
            dimensions,
            records: BTreeMap::new(),
        };
        self.persist(&created).await?;
        partitions.insert(partition.to_string(), created);
        Ok(())
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), BackendError> {
        let mut partitions = self.partitions.write().await;
        partitions.remove(partition);
        if let Some(directory) = &self.directory {
            match tokio::fs::remove_file(partition_file(directory, partition)).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        debug!(partition, "dropped partition");
        Ok(())
    }

    async fn upsert(&self, partition: &str, records: &[VectorRecord]) -> Result<usize, BackendError> {
        self.cached(partition).await?;
        let mut partitions = self.partitions.write().await;
        let existing = partitions.get(partition).ok_or_else(|| {
            BackendError::response(BACKEND, format!("partition `{partition}` does not exist"))
        })?;

        if let Some(record) = records
            .iter()
            .find(|record| record.embedding.len() != existing.dimensions)
        {
            return Err(BackendError::response(
                BACKEND,
                format!(
                    "record {} has {} dimensions, partition expects {}",
                    record.id,
                    record.embedding.len(),
                    existing.dimensions
                ),
            ));
        }

        let mut updated = existing.clone();
        for record in records {
            updated.records.insert(record.id.clone(), record.clone());
        }
        self.persist(&updated).await?;
        partitions.insert(partition.to_string(), updated);
        Ok(records.len())
    }

    async fn query(
        &self,
        partition: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<StoredMatch>, BackendError> {
        self.cached(partition).await?;
        let partitions = self.partitions.read().await;
        let stored = partitions.get(partition).ok_or_else(|| {
            BackendError::response(BACKEND, format!("partition `{partition}` does not exist"))
        })?;
        if embedding.len() != stored.dimensions {
            return Err(BackendError::response(
                BACKEND,
                format!(
                    "query has {} dimensions, partition expects {}",
                    embedding.len(),
                    stored.dimensions
                ),
            ));
        }

        let mut matches: Vec<StoredMatch> = stored
            .records
            .values()
            .map(|record| StoredMatch {
                id: record.id.clone(),
                document: record.document.clone(),
                metadata: record.metadata,
                distance: cosine_distance(&record.embedding, embedding),
            })
            .collect();
        matches.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        matches.truncate(top_k);
        Ok(matches)
    }
}
