use crate::store::{ChunkMetadata, StoredMatch, VectorRecord};
use crate::traits::VectorStore;
use crate::BackendError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API. Each partition is a collection named
/// `{collection_prefix}{partition}` using cosine distance.
pub struct QdrantStore {
    endpoint: Url,
    collection_prefix: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, collection_prefix: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection_prefix: collection_prefix.into(),
            client: Client::new(),
        })
    }

    fn collection_url(&self, partition: &str, tail: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                BackendError::Request(format!("qdrant endpoint {} cannot be a base", self.endpoint))
            })?;
            segments
                .pop_if_empty()
                .push("collections")
                .push(&format!("{}{}", self.collection_prefix, partition));
            segments.extend(tail);
        }
        Ok(url)
    }

    async fn collection_info(&self, partition: &str) -> Result<Option<Value>, BackendError> {
        let response = self
            .client
            .get(self.collection_url(partition, &[])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BackendError::response(BACKEND, response.status().to_string()));
        }
        Ok(Some(response.json().await?))
    }
}

/// Qdrant only accepts integer or UUID point ids, so the chunk id is hashed
/// into a stable UUID and carried in the payload.
pub fn point_id(chunk_id: &str) -> Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn parse_hit(hit: &Value) -> Result<StoredMatch, BackendError> {
    let field = |pointer: &str| {
        hit.pointer(pointer)
            .ok_or_else(|| BackendError::response(BACKEND, format!("search hit lacks {pointer}")))
    };

    let text_field = |pointer: &str| {
        field(pointer)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::response(BACKEND, format!("{pointer} is not a string")))
    };

    let id = text_field("/payload/chunk_id")?;
    let document = text_field("/payload/text")?;
    let parent_page = field("/payload/parent_page")?
        .as_u64()
        .and_then(|page| u32::try_from(page).ok())
        .ok_or_else(|| BackendError::response(BACKEND, "parent_page is not a page number"))?;
    let token_count = field("/payload/token_count")?.as_u64().unwrap_or_default() as usize;
    let score = field("/score")?.as_f64().unwrap_or_default();

    Ok(StoredMatch {
        id,
        document,
        metadata: ChunkMetadata {
            parent_page,
            token_count,
        },
        distance: (1.0 - score) as f32,
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn partition_exists(&self, partition: &str) -> Result<bool, BackendError> {
        Ok(self.collection_info(partition).await?.is_some())
    }

    async fn ensure_partition(&self, partition: &str, dimensions: usize) -> Result<(), BackendError> {
        if let Some(info) = self.collection_info(partition).await? {
            let existing = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize;
            if existing != dimensions {
                return Err(BackendError::Request(format!(
                    "collection for `{partition}` has vector size {existing}, requested {dimensions}"
                )));
            }
            return Ok(());
        }

        debug!(partition, dimensions, "creating qdrant collection");
        let response = self
            .client
            .put(self.collection_url(partition, &[])?)
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::response(BACKEND, response.status().to_string()));
        }
        Ok(())
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.collection_url(partition, &[])?)
            .send()
            .await?;

        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::response(BACKEND, response.status().to_string()));
        }
        Ok(())
    }

    async fn upsert(&self, partition: &str, records: &[VectorRecord]) -> Result<usize, BackendError> {
        if records.is_empty() {
            return Ok(0);
        }

        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id(&record.id).to_string(),
                    "vector": record.embedding,
                    "payload": {
                        "chunk_id": record.id,
                        "text": record.document,
                        "parent_page": record.metadata.parent_page,
                        "token_count": record.metadata.token_count,
                    },
                })
            })
            .collect();

        let mut url = self.collection_url(partition, &["points"])?;
        url.query_pairs_mut().append_pair("wait", "true");
        let response = self
            .client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::response(BACKEND, format!("{status}: {body}")));
        }

        Ok(records.len())
    }

    async fn query(
        &self,
        partition: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<StoredMatch>, BackendError> {
        let response = self
            .client
            .post(self.collection_url(partition, &["points", "search"])?)
            .json(&json!({
                "vector": embedding,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::response(BACKEND, response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::response(BACKEND, "search response has no result array"))?;

        let mut matches = hits.iter().map(parse_hit).collect::<Result<Vec<_>, _>>()?;
        matches.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        Ok(matches)
    }
}
