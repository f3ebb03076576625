use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use retrieval_qa_core::{
    connect, connect_reader, discover_pdf_files, load_records_file, DevicePreference,
    DocumentStore, DuplicatePolicy, EmbeddingClient, EmbeddingConfig, HubDataset,
    InMemoryDocumentStore, IngestionOptions, IngestionPipeline, Query, RawSource, ReaderConfig,
    RetrievalPipeline, SimilarityMetric, SplitUnit, DEFAULT_DATASET, DEFAULT_PDF_PATTERN,
    HASHED_TRIGRAM_MODEL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "retrieval-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Embedding model id; `hashed-trigram` runs offline.
    #[arg(long, env = "EMBEDDING_MODEL", default_value = HASHED_TRIGRAM_MODEL)]
    embedding_model: String,

    /// OpenAI-compatible embeddings endpoint for remote models.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Bearer token for the embeddings endpoint.
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Texts per embedding request.
    #[arg(long, default_value = "32")]
    batch_size: usize,

    /// Accelerator preference passed to the embedding backend.
    #[arg(long, default_value = "auto")]
    device: DevicePreference,

    /// Similarity used by the document store (dot_product or cosine).
    #[arg(long, default_value = "dot_product")]
    similarity: SimilarityMetric,

    /// Question-answering endpoint; the lexical reader is used when unset.
    #[arg(long, env = "READER_ENDPOINT")]
    reader_endpoint: Option<String>,

    /// Bearer token for the reader endpoint.
    #[arg(long, env = "READER_API_KEY", hide_env_values = true)]
    reader_api_key: Option<String>,

    /// Minimum answer confidence.
    #[arg(long, default_value = "0.2")]
    score_threshold: f64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Corpus {
    /// Structured `{content, meta}` records.
    Dataset,
    /// PDF files under a folder.
    Pdf,
}

#[derive(Args)]
struct CorpusArgs {
    /// Which corpus to ingest.
    #[arg(long, value_enum, default_value = "dataset")]
    corpus: Corpus,

    /// Local JSON or JSONL file of dataset records.
    #[arg(long)]
    dataset_file: Option<PathBuf>,

    /// Hugging Face dataset fetched when no local file is given.
    #[arg(long, default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Dataset split.
    #[arg(long, default_value = "train")]
    split: String,

    /// Folder searched for PDFs.
    #[arg(long)]
    pdf_dir: Option<PathBuf>,

    /// Glob matched against paths relative to the PDF folder.
    #[arg(long, default_value = DEFAULT_PDF_PATTERN)]
    pattern: String,

    /// Unit used to split documents (sentence, word, passage).
    #[arg(long, default_value = "sentence")]
    split_by: SplitUnit,

    /// Units per chunk.
    #[arg(long, default_value = "10")]
    split_length: usize,

    /// Units shared by consecutive chunks.
    #[arg(long, default_value = "0")]
    split_overlap: usize,

    /// What to do with documents whose id is already stored (overwrite, skip, fail).
    #[arg(long, default_value = "overwrite")]
    duplicate_policy: DuplicatePolicy,

    /// Abort on the first document that fails instead of skipping it.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a corpus and write the store snapshot.
    Ingest {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Snapshot file to write.
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Ingest a corpus (or load a snapshot) and answer a question.
    Ask {
        #[command(flatten)]
        corpus: CorpusArgs,
        /// Question to answer.
        #[arg(long)]
        query: String,
        /// Documents handed to the reader.
        #[arg(long, default_value = "3")]
        retriever_top_k: usize,
        /// Answers to print.
        #[arg(long, default_value = "2")]
        reader_top_k: usize,
        /// Reuse this snapshot when it exists, otherwise write it after ingesting.
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Print every stored document as JSON after indexing.
        #[arg(long, default_value_t = false)]
        print_store: bool,
    },
}

impl Cli {
    fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            model: self.embedding_model.clone(),
            batch_size: self.batch_size,
            device: self.device,
            endpoint: self.embedding_endpoint.clone(),
            api_key: self.embedding_api_key.clone(),
            ..EmbeddingConfig::default()
        }
    }

    fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            endpoint: self.reader_endpoint.clone(),
            api_key: self.reader_api_key.clone(),
            score_threshold: self.score_threshold,
            ..ReaderConfig::default()
        }
    }
}

impl CorpusArgs {
    fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            split_by: self.split_by,
            split_length: self.split_length,
            split_overlap: self.split_overlap,
            duplicate_policy: self.duplicate_policy,
            fail_fast: self.fail_fast,
            ..IngestionOptions::default()
        }
    }

    async fn sources(&self) -> anyhow::Result<Vec<RawSource>> {
        match self.corpus {
            Corpus::Dataset => {
                let records = match &self.dataset_file {
                    Some(path) => load_records_file(path)?,
                    None => {
                        HubDataset::new(&self.dataset)
                            .with_split(&self.split)
                            .fetch_records()
                            .await?
                    }
                };
                Ok(records.into_iter().map(RawSource::from).collect())
            }
            Corpus::Pdf => {
                let Some(folder) = &self.pdf_dir else {
                    bail!("--pdf-dir is required for the pdf corpus");
                };
                let files = discover_pdf_files(folder, &self.pattern)?;
                if files.is_empty() {
                    bail!(
                        "no pdf files matching {} found in {}",
                        self.pattern,
                        folder.display()
                    );
                }
                Ok(files.into_iter().map(RawSource::PdfFile).collect())
            }
        }
    }
}

async fn ingest(
    corpus: &CorpusArgs,
    embedder: Arc<dyn EmbeddingClient>,
    similarity: SimilarityMetric,
) -> anyhow::Result<Arc<InMemoryDocumentStore>> {
    let store = Arc::new(InMemoryDocumentStore::new(similarity));
    let pipeline = IngestionPipeline::new(embedder, store.clone(), corpus.ingestion_options())?;

    println!("Indexing documents...");
    let report = pipeline.run(corpus.sources().await?).await?;

    if !report.skipped.is_empty() {
        warn!(skipped = report.skipped.len(), "some inputs were skipped");
        for skipped in &report.skipped {
            warn!(source = %skipped.source, stage = %skipped.stage, reason = %skipped.reason, "skipped input");
        }
    }
    if report.stored == 0 {
        bail!("no documents were indexed ({} inputs skipped)", report.skipped.len());
    }

    Ok(store)
}

async fn load_or_ingest(
    corpus: &CorpusArgs,
    snapshot: Option<&Path>,
    embedder: Arc<dyn EmbeddingClient>,
    similarity: SimilarityMetric,
) -> anyhow::Result<Arc<InMemoryDocumentStore>> {
    if let Some(path) = snapshot.filter(|path| path.exists()) {
        let store = InMemoryDocumentStore::load(path)
            .await
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        return Ok(Arc::new(store));
    }

    let store = ingest(corpus, embedder, similarity).await?;
    if let Some(path) = snapshot {
        store.save(path).await?;
    }
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "retrieval-qa boot"
    );

    let embedder = connect(&cli.embedding_config())?;
    embedder
        .warm_up()
        .await
        .context("embedding model failed to load")?;

    match &cli.command {
        Command::Ingest { corpus, snapshot } => {
            let store = ingest(corpus, embedder, cli.similarity).await?;
            store.save(snapshot).await?;
            println!(
                "{} documents indexed into {} at {}",
                store.count().await,
                snapshot.display(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            corpus,
            query,
            retriever_top_k,
            reader_top_k,
            snapshot,
            print_store,
        } => {
            let store =
                load_or_ingest(corpus, snapshot.as_deref(), embedder.clone(), cli.similarity)
                    .await?;
            println!("documents in store: {}", store.count().await);
            if *print_store {
                println!("{}", serde_json::to_string_pretty(&store.snapshot().await)?);
            }

            let reader = connect_reader(&cli.reader_config())?;
            let pipeline = RetrievalPipeline::new(embedder, store, reader);
            let outcome = pipeline
                .run(&Query::new(query.as_str(), *retriever_top_k).with_answer_top_k(*reader_top_k))
                .await?;

            println!("query: {}", outcome.query);
            println!("retrieved documents: {}", outcome.documents.len());
            for hit in &outcome.documents {
                println!(
                    "  score={:.4} id={} source={}",
                    hit.score,
                    hit.document.id,
                    hit.document.origin()
                );
            }

            if outcome.answers.is_empty() {
                println!("no answer found");
            }
            for (rank, answer) in outcome.answers.iter().enumerate() {
                println!(
                    "[{}] score={:.4} document_id={}",
                    rank + 1,
                    answer.score,
                    answer.document_id
                );
                println!("  answer: {}", answer.text);
                if answer.context != answer.text {
                    println!("  context: {}", answer.context);
                }
            }
        }
    }

    Ok(())
}
