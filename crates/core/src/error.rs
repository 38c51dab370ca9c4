use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn response(backend: &str, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunking config: {0}")]
    Configuration(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("document extraction failed: {0}")]
    Extraction(String),

    #[error("embedding service failed: {0}")]
    EmbeddingService(#[source] BackendError),

    #[error("index write into partition `{partition}` failed: {source}")]
    IndexWrite {
        partition: String,
        #[source]
        source: BackendError,
    },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no known company is named in the query: {0}")]
    UnrecognizedCompany(String),

    #[error("query names more than one company: {}", .0.join(", "))]
    AmbiguousCompany(Vec<String>),

    #[error("no vector partition exists for `{0}`; run preprocessing first")]
    PartitionNotFound(String),

    #[error("embedding service failed: {0}")]
    EmbeddingService(#[source] BackendError),

    #[error("vector store failed: {0}")]
    VectorStore(#[source] BackendError),

    #[error("page source not found for `{0}`")]
    SourceNotFound(String),

    #[error("page source is malformed: {0}")]
    MalformedSource(String),

    #[error("chunk provenance error: {0}")]
    ChunkProvenance(String),

    #[error("re-ranking page {page} failed: {details}")]
    RerankService { page: u32, details: String },

    #[error("unsupported question kind `{0}` (expected boolean, number or string)")]
    UnsupportedKind(String),

    #[error("language model call failed: {0}")]
    LanguageModel(#[source] BackendError),

    #[error("answer does not satisfy the {schema} schema: {details}")]
    AnswerParse { schema: String, details: String },

    #[error("no supporting pages were found for the query")]
    NoEvidence,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
