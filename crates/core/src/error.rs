use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable ({model}): {details}")]
    ModelUnavailable { model: String, details: String },

    #[error("cannot encode input {index}: {reason}")]
    Encoding { index: usize, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from embedding backend: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension {actual} != {expected} for document {document_id}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        document_id: String,
    },

    #[error("document {0} has no embedding")]
    MissingEmbedding(String),

    #[error("document {0} already exists")]
    DuplicateDocument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{stage} failed for {source_name}: {reason}")]
    ItemFailed {
        stage: String,
        source_name: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("reader model unavailable at {endpoint}: {details}")]
    ModelUnavailable { endpoint: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from reader backend: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("document store is empty")]
    EmptyIndex,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
