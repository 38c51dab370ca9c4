pub mod answer;
pub mod chunking;
pub mod company;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod pages;
pub mod prompts;
pub mod rerank;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod fakes;

pub use answer::{build_context, parse_answer, AnswerSynthesizer, SynthesisOptions};
pub use chunking::{
    make_chunk_id, parse_chunk_id, Chunker, ChunkingConfig, HfTokenCodec, TokenCodec,
};
pub use company::{CompanyExtractor, KnownCompanies};
pub use config::{DataLayout, PipelineOptions};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingEndpointConfig, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{BackendError, IngestError, QueryError};
pub use extractor::{DocumentExtractor, LopdfExtractor, ParsingEndpointConfig, RemoteExtractor};
pub use index::{IndexBuilder, IndexReport};
pub use ingest::{
    company_from_path, discover_pdf_files, ChunkedReport, CompanyReport, IngestionReport,
    Preprocessor, SkippedDocument,
};
pub use llm::{extract_json_object, ChatCompletionsModel, ChatEndpointConfig, LanguageModel};
pub use models::{
    Answer, Chunk, DocumentPage, FinalAnswer, PageTable, PageText, ParentPage, QuestionKind,
    RankedPage, RetrievedChunk,
};
pub use orchestrator::{QaOutcome, QaPipeline};
pub use pages::{aggregate_parent_pages, split_page_sections, FsPageSource, PageSource};
pub use rerank::{PageReranker, RerankOptions};
pub use retrieval::{RetrievalOptions, VectorRetriever};
pub use store::{ChunkMetadata, StoredMatch, VectorRecord};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorStore;
