pub mod chunking;
pub mod cleaning;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod reader;
pub mod store;
pub mod traits;

pub use chunking::{split_document, unit_ranges, ChunkingConfig};
pub use cleaning::{clean_document, clean_text, normalize_whitespace, CleaningConfig};
pub use config::{
    DevicePreference, EmbeddingConfig, ReaderConfig, DEFAULT_REMOTE_MODEL, HASHED_TRIGRAM_MODEL,
};
pub use dataset::{load_records_file, DatasetRecord, HubDataset, DEFAULT_DATASET};
pub use embeddings::{
    connect, CharacterNgramEmbedder, EmbeddingClient, HttpEmbeddingClient,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, ExtractionError, IngestError, RetrievalError, StoreError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{
    discover_pdf_files, IngestStage, IngestionPipeline, IngestionReport, RawSource, SkippedItem,
    DEFAULT_PDF_PATTERN,
};
pub use models::{
    AnsweredSpan, Document, DuplicatePolicy, IngestionOptions, Meta, MetaValue, Query,
    QueryFilters, RetrievalOutcome, RetrievedDocument, SimilarityMetric, SourceSpan, SpanOffset,
    SplitUnit,
};
pub use orchestrator::RetrievalPipeline;
pub use reader::{connect_reader, HttpReader, LexicalOverlapReader, SharedReader};
pub use store::{InMemoryDocumentStore, StoreSnapshot};
pub use traits::{AnswerExtractor, DocumentStore};
