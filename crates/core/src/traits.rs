use crate::{
    AnsweredSpan, Document, DuplicatePolicy, ExtractionError, QueryFilters, RetrievedDocument,
    StoreError,
};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore {
    /// Writes embedded documents and returns how many were added or overwritten.
    async fn add(&self, documents: Vec<Document>, policy: DuplicatePolicy)
        -> Result<usize, StoreError>;

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<RetrievedDocument>, StoreError>;

    async fn count(&self) -> usize;
}

#[async_trait]
pub trait AnswerExtractor {
    async fn extract(
        &self,
        query: &str,
        documents: &[Document],
        top_k: usize,
    ) -> Result<Vec<AnsweredSpan>, ExtractionError>;
}
