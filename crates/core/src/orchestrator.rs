use crate::embeddings::EmbeddingClient;
use crate::traits::{AnswerExtractor, DocumentStore};
use crate::{Query, RetrievalError, RetrievalOutcome};
use std::sync::Arc;
use tracing::info;

/// embed query → search store → extract answers.
pub struct RetrievalPipeline<S, R>
where
    S: DocumentStore,
    R: AnswerExtractor + ?Sized,
{
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<S>,
    reader: Arc<R>,
}

impl<S, R> RetrievalPipeline<S, R>
where
    S: DocumentStore + Send + Sync,
    R: AnswerExtractor + Send + Sync + ?Sized,
{
    pub fn new(embedder: Arc<dyn EmbeddingClient>, store: Arc<S>, reader: Arc<R>) -> Self {
        Self {
            embedder,
            store,
            reader,
        }
    }

    pub async fn run(&self, query: &Query) -> Result<RetrievalOutcome, RetrievalError> {
        if query.text.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(RetrievalError::InvalidQuery(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if query.answers_wanted() == 0 {
            return Err(RetrievalError::InvalidQuery(
                "answer_top_k must be greater than zero".to_string(),
            ));
        }
        if self.store.count().await == 0 {
            return Err(RetrievalError::EmptyIndex);
        }

        let query_vector = self.embedder.embed_query(&query.text).await?;
        let documents = self
            .store
            .search(&query_vector, query.top_k, &query.filters)
            .await?;

        let candidates = documents
            .iter()
            .map(|hit| hit.document.clone())
            .collect::<Vec<_>>();
        let answers = self
            .reader
            .extract(&query.text, &candidates, query.answers_wanted())
            .await?;

        info!(
            retrieved = documents.len(),
            answers = answers.len(),
            "query answered"
        );

        Ok(RetrievalOutcome {
            query: query.text.clone(),
            documents,
            answers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::reader::LexicalOverlapReader;
    use crate::store::InMemoryDocumentStore;
    use crate::{AnsweredSpan, Document, DuplicatePolicy, ExtractionError, Meta};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReader {
        seen: Mutex<Vec<(String, usize, usize)>>,
    }

    #[async_trait]
    impl AnswerExtractor for RecordingReader {
        async fn extract(
            &self,
            query: &str,
            documents: &[Document],
            top_k: usize,
        ) -> Result<Vec<AnsweredSpan>, ExtractionError> {
            self.seen
                .lock()
                .expect("lock")
                .push((query.to_string(), documents.len(), top_k));
            Ok(Vec::new())
        }
    }

    async fn seeded_store(embedder: &CharacterNgramEmbedder, texts: &[&str]) -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::default());
        let documents = texts
            .iter()
            .map(|text| Document::new(*text, Meta::new()).with_embedding(embedder.embed(text)))
            .collect::<Vec<_>>();
        store
            .add(documents, DuplicatePolicy::Fail)
            .await
            .expect("seed store");
        store
    }

    #[tokio::test]
    async fn empty_store_is_reported() {
        let pipeline = RetrievalPipeline::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryDocumentStore::default()),
            Arc::new(LexicalOverlapReader::default()),
        );

        let result = pipeline.run(&Query::new("anything", 3)).await;
        assert!(matches!(result, Err(RetrievalError::EmptyIndex)));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let store = seeded_store(&embedder, &["text"]).await;
        let pipeline = RetrievalPipeline::new(
            Arc::new(embedder),
            store,
            Arc::new(LexicalOverlapReader::default()),
        );

        let result = pipeline.run(&Query::new("  ", 3)).await;
        assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn zero_answer_budget_is_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let store = seeded_store(&embedder, &["Pliny the Elder was a Roman author."]).await;
        let reader = Arc::new(RecordingReader::default());
        let pipeline = RetrievalPipeline::new(Arc::new(embedder), store, reader.clone());

        let result = pipeline
            .run(&Query::new("Who was Pliny the Elder?", 2).with_answer_top_k(0))
            .await;

        assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
        assert!(reader.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn reader_gets_retrieved_documents_and_answer_budget() {
        let embedder = CharacterNgramEmbedder::default();
        let store = seeded_store(&embedder, &["one", "two", "three", "four"]).await;
        let reader = Arc::new(RecordingReader::default());
        let pipeline = RetrievalPipeline::new(Arc::new(embedder), store, reader.clone());

        let outcome = pipeline
            .run(&Query::new("two", 3).with_answer_top_k(2))
            .await
            .expect("query should succeed");

        assert_eq!(outcome.documents.len(), 3);
        assert_eq!(outcome.documents[0].document.content, "two");
        assert!(outcome.answers.is_empty());
        assert_eq!(
            reader.seen.lock().expect("lock").as_slice(),
            &[("two".to_string(), 3, 2)]
        );
    }

    #[tokio::test]
    async fn answers_come_from_retrieved_documents() {
        let embedder = CharacterNgramEmbedder::default();
        let store = seeded_store(
            &embedder,
            &[
                "Pliny the Elder was a Roman author and naval commander.",
                "The Hanging Gardens were in Babylon.",
            ],
        )
        .await;
        let pipeline = RetrievalPipeline::new(
            Arc::new(embedder),
            store,
            Arc::new(LexicalOverlapReader::default()),
        );

        let outcome = pipeline
            .run(&Query::new("Who was Pliny the Elder?", 2))
            .await
            .expect("query should succeed");

        assert_eq!(outcome.answers.len(), 1);
        assert!(outcome.answers[0].text.starts_with("Pliny the Elder"));
    }
}
