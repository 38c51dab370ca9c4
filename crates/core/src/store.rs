use crate::models::{Chunk, RetrievedChunk};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub parent_page: u32,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: ChunkMetadata,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            embedding,
            document: chunk.text.clone(),
            metadata: ChunkMetadata {
                parent_page: chunk.parent_page,
                token_count: chunk.token_count,
            },
        }
    }
}

/// A nearest-neighbor hit. `distance` is in the store's native metric,
/// smaller is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

impl StoredMatch {
    pub fn into_retrieved(self) -> RetrievedChunk {
        let similarity = (1.0 - f64::from(self.distance)).clamp(0.0, 1.0);
        RetrievedChunk {
            chunk: Chunk {
                chunk_id: self.id,
                parent_page: self.metadata.parent_page,
                text: self.document,
                token_count: self.metadata.token_count,
            },
            similarity_score: similarity,
        }
    }
}
