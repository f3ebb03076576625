use crate::chunking::{split_document, ChunkingConfig};
use crate::cleaning::{clean_document, CleaningConfig};
use crate::dataset::DatasetRecord;
use crate::embeddings::{validate_text, EmbeddingClient};
use crate::extractor::{convert_pdf, LopdfExtractor, PdfExtractor};
use crate::traits::DocumentStore;
use crate::{Document, EmbeddingError, IngestError, IngestionOptions, Meta};
use futures::stream::{self, StreamExt};
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const DEFAULT_PDF_PATTERN: &str = "**/*.pdf";

/// Files under `root` whose path relative to `root` matches `pattern`, case-insensitively.
pub fn discover_pdf_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, IngestError> {
    let pattern = Pattern::new(pattern)?;
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if pattern.matches_path_with(relative, options) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

/// Raw input to the ingestion pipeline.
#[derive(Debug, Clone)]
pub enum RawSource {
    Record { content: String, meta: Meta },
    PdfFile(PathBuf),
}

impl RawSource {
    pub fn name(&self) -> String {
        match self {
            Self::Record { content, meta } => meta
                .get("url")
                .map(ToString::to_string)
                .unwrap_or_else(|| content.chars().take(40).collect()),
            Self::PdfFile(path) => path.display().to_string(),
        }
    }
}

impl From<DatasetRecord> for RawSource {
    fn from(record: DatasetRecord) -> Self {
        Self::Record {
            meta: record.meta_scalars(),
            content: record.content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Convert,
    Clean,
    Split,
    Embed,
    Store,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Convert => "convert",
            Self::Clean => "clean",
            Self::Split => "split",
            Self::Embed => "embed",
            Self::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub source: String,
    pub stage: IngestStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub converted: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub stored: usize,
    pub skipped: Vec<SkippedItem>,
}

/// convert → clean → split → embed → store, skipping failed items unless `fail_fast` is set.
pub struct IngestionPipeline<S> {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<S>,
    options: IngestionOptions,
    cleaning: CleaningConfig,
    chunking: ChunkingConfig,
    extractor: Box<dyn PdfExtractor + Send + Sync>,
}

impl<S> IngestionPipeline<S>
where
    S: DocumentStore + Send + Sync,
{
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<S>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        let cleaning = CleaningConfig::try_from(&options)?;
        let chunking = ChunkingConfig::from(&options);
        chunking.validate()?;

        Ok(Self {
            embedder,
            store,
            options,
            cleaning,
            chunking,
            extractor: Box::new(LopdfExtractor),
        })
    }

    pub fn with_extractor(mut self, extractor: Box<dyn PdfExtractor + Send + Sync>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn run(&self, sources: Vec<RawSource>) -> Result<IngestionReport, IngestError> {
        if sources.is_empty() {
            return Err(IngestError::InvalidArgument(
                "nothing to ingest".to_string(),
            ));
        }

        let mut report = IngestionReport::default();

        let documents = self.convert(sources, &mut report)?;
        let documents = self.clean(documents, &mut report)?;
        let chunks = self.split(documents, &mut report)?;
        let embedded = self.embed(chunks, &mut report).await?;
        report.stored = self.write(embedded).await?;

        info!(
            converted = report.converted,
            chunks = report.chunks,
            embedded = report.embedded,
            stored = report.stored,
            skipped = report.skipped.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    pub fn convert(
        &self,
        sources: Vec<RawSource>,
        report: &mut IngestionReport,
    ) -> Result<Vec<Document>, IngestError> {
        let mut documents = Vec::with_capacity(sources.len());

        for source in sources {
            let name = source.name();
            let converted = match source {
                RawSource::Record { content, meta } => Ok(Document::new(content, meta)),
                RawSource::PdfFile(path) => convert_pdf(&path, self.extractor.as_ref()),
            };

            match converted {
                Ok(document) => documents.push(document),
                Err(error) => self.skip(report, name, IngestStage::Convert, error)?,
            }
        }

        report.converted = documents.len();
        info!(documents = documents.len(), "converted sources");
        Ok(documents)
    }

    pub fn clean(
        &self,
        documents: Vec<Document>,
        report: &mut IngestionReport,
    ) -> Result<Vec<Document>, IngestError> {
        let mut cleaned = Vec::with_capacity(documents.len());

        for document in documents {
            let name = document.origin();
            match clean_document(document, &self.cleaning) {
                Ok(document) => cleaned.push(document),
                Err(error) => self.skip(report, name, IngestStage::Clean, error)?,
            }
        }

        Ok(cleaned)
    }

    pub fn split(
        &self,
        documents: Vec<Document>,
        report: &mut IngestionReport,
    ) -> Result<Vec<Document>, IngestError> {
        let mut chunks = Vec::new();

        for document in &documents {
            match split_document(document, self.chunking) {
                Ok(pieces) if pieces.is_empty() => self.skip(
                    report,
                    document.origin(),
                    IngestStage::Split,
                    IngestError::InvalidArgument("document produced no chunks".to_string()),
                )?,
                Ok(pieces) => chunks.extend(pieces),
                Err(error) => self.skip(report, document.origin(), IngestStage::Split, error)?,
            }
        }

        report.chunks = chunks.len();
        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            split_by = ?self.chunking.split_by,
            "split documents"
        );
        Ok(chunks)
    }

    fn text_to_embed(&self, chunk: &Document) -> String {
        let mut parts = self
            .options
            .meta_fields_to_embed
            .iter()
            .filter_map(|field| chunk.meta.get(field).map(ToString::to_string))
            .collect::<Vec<_>>();
        parts.push(chunk.content.clone());
        parts.join("\n")
    }

    /// Embeds in shards of the client's batch size; shards may be in flight together, results keep input order.
    pub async fn embed(
        &self,
        chunks: Vec<Document>,
        report: &mut IngestionReport,
    ) -> Result<Vec<Document>, IngestError> {
        let mut valid = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let text = self.text_to_embed(&chunk);
            match validate_text(index, &text) {
                Ok(()) => valid.push((chunk, text)),
                Err(error) => self.skip(report, chunk.origin(), IngestStage::Embed, error.into())?,
            }
        }

        let batch_size = self.embedder.batch_size().max(1);
        let mut shards = Vec::new();
        let mut remaining = valid.into_iter().peekable();
        while remaining.peek().is_some() {
            shards.push(remaining.by_ref().take(batch_size).collect::<Vec<_>>());
        }

        let embedder = &self.embedder;
        let results = stream::iter(shards.into_iter().map(|shard| async move {
            let texts = shard.iter().map(|(_, text)| text.clone()).collect::<Vec<_>>();
            let vectors = embedder.embed_documents(&texts).await;
            (shard, vectors)
        }))
        .buffered(self.options.embed_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut embedded = Vec::new();
        for (shard, vectors) in results {
            match vectors {
                Ok(vectors) => {
                    for ((mut chunk, _), vector) in shard.into_iter().zip(vectors) {
                        chunk.embedding = Some(vector);
                        embedded.push(chunk);
                    }
                }
                Err(error @ EmbeddingError::Encoding { .. }) => {
                    let reason = error.to_string();
                    for (chunk, _) in shard {
                        self.skip(
                            report,
                            chunk.origin(),
                            IngestStage::Embed,
                            IngestError::InvalidArgument(reason.clone()),
                        )?;
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }

        report.embedded = embedded.len();
        info!(
            embedded = embedded.len(),
            model = self.embedder.model_id(),
            "embedded chunks"
        );
        Ok(embedded)
    }

    async fn write(&self, chunks: Vec<Document>) -> Result<usize, IngestError> {
        let written = self
            .store
            .add(chunks, self.options.duplicate_policy)
            .await?;
        let total = self.store.count().await;
        info!(
            written,
            total,
            stage = %IngestStage::Store,
            "stored chunks"
        );
        Ok(written)
    }

    fn skip(
        &self,
        report: &mut IngestionReport,
        source: String,
        stage: IngestStage,
        error: IngestError,
    ) -> Result<(), IngestError> {
        if self.options.fail_fast {
            return Err(IngestError::ItemFailed {
                stage: stage.to_string(),
                source_name: source,
                reason: error.to_string(),
            });
        }

        warn!(source = %source, stage = %stage, reason = %error, "skipped item");
        report.skipped.push(SkippedItem {
            source,
            stage,
            reason: error.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::PageText;
    use crate::store::InMemoryDocumentStore;
    use crate::MetaValue;
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn record(content: &str, url: &str) -> RawSource {
        let mut meta = Meta::new();
        meta.insert("url".to_string(), MetaValue::from(url));
        RawSource::Record {
            content: content.to_string(),
            meta,
        }
    }

    fn pipeline(options: IngestionOptions) -> IngestionPipeline<InMemoryDocumentStore> {
        IngestionPipeline::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryDocumentStore::default()),
            options,
        )
        .expect("valid options")
    }

    struct SinglePage;

    impl PdfExtractor for SinglePage {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            if path.ends_with("broken.pdf") {
                return Err(IngestError::PdfParse("broken".to_string()));
            }
            Ok(vec![PageText {
                number: 1,
                text: "The Great Pyramid of Giza is the oldest wonder.".to_string(),
            }])
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base, DEFAULT_PDF_PATTERN)?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn discovery_honours_narrow_patterns() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("manual-1.pdf"), b"x")?;
        fs::write(dir.path().join("brochure.pdf"), b"x")?;

        let files = discover_pdf_files(dir.path(), "manual-*.pdf")?;
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("manual-1.pdf"));
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let result = discover_pdf_files(Path::new("."), "[");
        assert!(matches!(result, Err(IngestError::Pattern(_))));
    }

    #[tokio::test]
    async fn store_count_matches_embedded_chunks_despite_failures() -> Result<(), IngestError> {
        let pipeline = pipeline(IngestionOptions::default());
        let sources = vec![
            record("The Colossus of Rhodes stood by the harbour.", "u1"),
            record("   \n  ", "u2"),
            record("The Lighthouse of Alexandria guided sailors.", "u3"),
        ];

        let report = pipeline.run(sources).await?;

        assert_eq!(report.converted, 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, IngestStage::Clean);
        assert_eq!(report.embedded, 2);
        assert_eq!(pipeline.store().count().await, report.embedded);
        Ok(())
    }

    struct OfflineModel;

    #[async_trait]
    impl EmbeddingClient for OfflineModel {
        fn model_id(&self) -> &str {
            "offline-model"
        }

        fn dimensions(&self) -> Option<usize> {
            None
        }

        fn batch_size(&self) -> usize {
            8
        }

        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::ModelUnavailable {
                model: "offline-model".to_string(),
                details: "weights not found".to_string(),
            })
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::ModelUnavailable {
                model: "offline-model".to_string(),
                details: "weights not found".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn unencodable_text_is_skipped_at_embed_stage() -> Result<(), IngestError> {
        let pipeline = pipeline(IngestionOptions::default());
        let sources = vec![
            record("The Temple of Artemis stood at Ephesus.", "u1"),
            record("bad\0text", "u2"),
        ];

        let report = pipeline.run(sources).await?;

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, IngestStage::Embed);
        assert_eq!(report.embedded, 1);
        assert_eq!(pipeline.store().count().await, report.embedded);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_model_aborts_without_writing() {
        let pipeline = IngestionPipeline::new(
            Arc::new(OfflineModel),
            Arc::new(InMemoryDocumentStore::default()),
            IngestionOptions::default(),
        )
        .expect("valid options");

        let result = pipeline
            .run(vec![record("The Hanging Gardens of Babylon.", "u1")])
            .await;

        assert!(matches!(
            result,
            Err(IngestError::Embedding(EmbeddingError::ModelUnavailable { .. }))
        ));
        assert_eq!(pipeline.store().count().await, 0);
    }

    #[tokio::test]
    async fn fail_fast_aborts_on_first_bad_item() {
        let pipeline = pipeline(IngestionOptions {
            fail_fast: true,
            ..IngestionOptions::default()
        });
        let sources = vec![record("fine text", "u1"), record("", "u2")];

        let result = pipeline.run(sources).await;
        assert!(matches!(result, Err(IngestError::ItemFailed { .. })));
        assert_eq!(pipeline.store().count().await, 0);
    }

    #[tokio::test]
    async fn unreadable_pdfs_are_skipped() -> Result<(), IngestError> {
        let pipeline = pipeline(IngestionOptions::default()).with_extractor(Box::new(SinglePage));
        let sources = vec![
            RawSource::PdfFile(PathBuf::from("/corpus/giza.pdf")),
            RawSource::PdfFile(PathBuf::from("/corpus/broken.pdf")),
        ];

        let report = pipeline.run(sources).await?;

        assert_eq!(report.stored, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].stage, IngestStage::Convert);
        assert_eq!(report.skipped[0].source, "/corpus/broken.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn sharded_embedding_keeps_chunk_order() -> Result<(), IngestError> {
        let embedder = CharacterNgramEmbedder {
            batch_size: 2,
            ..CharacterNgramEmbedder::default()
        };
        let pipeline = IngestionPipeline::new(
            Arc::new(embedder.clone()),
            Arc::new(InMemoryDocumentStore::default()),
            IngestionOptions {
                embed_concurrency: 3,
                ..IngestionOptions::default()
            },
        )?;

        let chunks = (0..7)
            .map(|index| Document::new(format!("chunk number {index}"), Meta::new()))
            .collect::<Vec<_>>();
        let mut report = IngestionReport::default();
        let embedded = pipeline.embed(chunks, &mut report).await?;

        assert_eq!(embedded.len(), 7);
        for (index, chunk) in embedded.iter().enumerate() {
            assert_eq!(chunk.content, format!("chunk number {index}"));
            assert_eq!(
                chunk.embedding.as_deref(),
                Some(embedder.embed(&chunk.content).as_slice())
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn meta_fields_are_prepended_before_embedding() -> Result<(), IngestError> {
        let embedder = CharacterNgramEmbedder::default();
        let pipeline = IngestionPipeline::new(
            Arc::new(embedder.clone()),
            Arc::new(InMemoryDocumentStore::default()),
            IngestionOptions {
                meta_fields_to_embed: vec!["title".to_string()],
                ..IngestionOptions::default()
            },
        )?;

        let mut meta = Meta::new();
        meta.insert("title".to_string(), MetaValue::from("Statue of Zeus"));
        let chunk = Document::new("at Olympia", meta);

        let mut report = IngestionReport::default();
        let embedded = pipeline.embed(vec![chunk], &mut report).await?;
        assert_eq!(
            embedded[0].embedding.as_deref(),
            Some(embedder.embed("Statue of Zeus\nat Olympia").as_slice())
        );
        Ok(())
    }

    #[test]
    fn invalid_split_config_is_rejected_up_front() {
        let result = IngestionPipeline::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryDocumentStore::default()),
            IngestionOptions {
                split_length: 2,
                split_overlap: 5,
                ..IngestionOptions::default()
            },
        );
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }
}
