use crate::error::IngestError;
use crate::models::{Chunk, PageText};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_CHUNK_SIZE: usize = 300;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::Configuration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Turns text into token ids and back. Must match the tokenizer of the
/// embedding model so `chunk_size` means the same thing to both.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError>;
}

pub struct HfTokenCodec {
    tokenizer: tokenizers::Tokenizer,
}

impl HfTokenCodec {
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|error| {
            IngestError::Tokenizer(format!("cannot load {}: {error}", path.display()))
        })?;
        Ok(Self { tokenizer })
    }
}

impl TokenCodec for HfTokenCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))
    }
}

pub struct Chunker<'a, T: TokenCodec + ?Sized> {
    codec: &'a T,
    config: ChunkingConfig,
}

impl<'a, T: TokenCodec + ?Sized> Chunker<'a, T> {
    pub fn new(codec: &'a T, config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { codec, config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Tokenizes the page up front; windows are decoded lazily as the
    /// returned iterator advances. Clone the iterator to restart it.
    pub fn chunk_page(&self, document_id: &str, page: &PageText) -> Result<PageChunks<'a, T>, IngestError> {
        let tokens: Arc<[u32]> = self.codec.encode(&page.text)?.into();
        Ok(PageChunks {
            codec: self.codec,
            document_id: Arc::from(document_id),
            page: page.number,
            done: tokens.is_empty(),
            tokens,
            config: self.config,
            next_start: 0,
            index: 0,
        })
    }

    pub fn chunk_document(&self, document_id: &str, pages: &[PageText]) -> Result<Vec<Chunk>, IngestError> {
        let mut seen_pages = HashSet::new();
        let mut chunks = Vec::new();

        for page in pages {
            if !seen_pages.insert(page.number) {
                return Err(IngestError::InvalidArgument(format!(
                    "document {document_id} repeats page {}",
                    page.number
                )));
            }
            for chunk in self.chunk_page(document_id, page)? {
                chunks.push(chunk?);
            }
        }

        Ok(chunks)
    }
}

pub struct PageChunks<'a, T: TokenCodec + ?Sized> {
    codec: &'a T,
    document_id: Arc<str>,
    page: u32,
    tokens: Arc<[u32]>,
    config: ChunkingConfig,
    next_start: usize,
    index: usize,
    done: bool,
}

impl<T: TokenCodec + ?Sized> Clone for PageChunks<'_, T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec,
            document_id: Arc::clone(&self.document_id),
            page: self.page,
            tokens: Arc::clone(&self.tokens),
            config: self.config,
            next_start: self.next_start,
            index: self.index,
            done: self.done,
        }
    }
}

impl<T: TokenCodec + ?Sized> Iterator for PageChunks<'_, T> {
    type Item = Result<Chunk, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let start = self.next_start;
        let end = (start + self.config.chunk_size).min(self.tokens.len());
        let window = &self.tokens[start..end];
        let index = self.index;

        if end == self.tokens.len() {
            self.done = true;
        } else {
            self.next_start = start + self.config.stride();
            self.index += 1;
        }

        let chunk = self.codec.decode(window).map(|text| Chunk {
            chunk_id: make_chunk_id(&self.document_id, self.page, index),
            parent_page: self.page,
            text,
            token_count: window.len(),
        });
        Some(chunk)
    }
}

pub fn make_chunk_id(document_id: &str, page: u32, index: usize) -> String {
    format!("{document_id}_page{page}_chunk{index}")
}

pub fn parse_chunk_id(chunk_id: &str) -> Option<(&str, u32, usize)> {
    let (head, index) = chunk_id.rsplit_once("_chunk")?;
    let (document_id, page) = head.rsplit_once("_page")?;
    if document_id.is_empty() {
        return None;
    }
    Some((document_id, page.parse().ok()?, index.parse().ok()?))
}
