//! In-memory document store with exact similarity search.
//!
//! Documents are kept in insertion order behind a `tokio::sync::RwLock`, so
//! searches run concurrently while writes are exclusive. The first embedded
//! document fixes the store's dimensionality; every later write and every
//! query vector must match it.

use crate::models::{Document, DuplicatePolicy, QueryFilters, RetrievedDocument, SimilarityMetric};
use crate::traits::DocumentStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct StoreState {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    dimensions: Option<usize>,
}

impl StoreState {
    fn reindex(&mut self) {
        self.positions = self
            .documents
            .iter()
            .enumerate()
            .map(|(position, document)| (document.id.clone(), position))
            .collect();
    }
}

/// On-disk form of a store: the documents with their embeddings plus how to compare them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub similarity: SimilarityMetric,
    #[serde(default)]
    pub scale_score: bool,
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    pub documents: Vec<Document>,
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
    similarity: SimilarityMetric,
    scale_score: bool,
}

impl InMemoryDocumentStore {
    pub fn new(similarity: SimilarityMetric) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            similarity,
            scale_score: false,
        }
    }

    /// Fixes the dimensionality up front instead of on the first write.
    pub fn with_dimensions(similarity: SimilarityMetric, dimensions: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                dimensions: Some(dimensions),
                ..StoreState::default()
            }),
            similarity,
            scale_score: false,
        }
    }

    /// Maps raw scores into (0, 1): a sigmoid over `score / 100` for dot product, `(score + 1) / 2` for cosine.
    pub fn with_scaled_scores(mut self, scale_score: bool) -> Self {
        self.scale_score = scale_score;
        self
    }

    pub fn similarity(&self) -> SimilarityMetric {
        self.similarity
    }

    pub async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimensions
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        let state = self.state.read().await;
        state
            .positions
            .get(id)
            .map(|position| state.documents[*position].clone())
    }

    /// All documents in insertion order.
    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.documents.clone()
    }

    pub async fn delete(&self, ids: &[String]) -> usize {
        let wanted = ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let mut state = self.state.write().await;
        let before = state.documents.len();
        state
            .documents
            .retain(|document| !wanted.contains(document.id.as_str()));
        state.reindex();
        before - state.documents.len()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            similarity: self.similarity,
            scale_score: self.scale_score,
            dimensions: state.dimensions,
            saved_at: None,
            documents: state.documents.clone(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot().await;
        snapshot.saved_at = Some(Utc::now());
        let bytes = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, bytes).await?;
        info!(
            path = %path.display(),
            documents = snapshot.documents.len(),
            "saved store snapshot"
        );
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        let saved_at = snapshot.saved_at;
        let store = Self::from_snapshot(snapshot)?;
        info!(
            path = %path.display(),
            saved_at = ?saved_at,
            documents = store.state.read().await.documents.len(),
            "loaded store snapshot"
        );
        Ok(store)
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut state = StoreState {
            dimensions: snapshot.dimensions,
            ..StoreState::default()
        };
        let dimensions = check_embeddings(state.dimensions, &snapshot.documents)?;
        state.dimensions = dimensions;

        for document in snapshot.documents {
            if state.positions.contains_key(&document.id) {
                return Err(StoreError::DuplicateDocument(document.id));
            }
            state
                .positions
                .insert(document.id.clone(), state.documents.len());
            state.documents.push(document);
        }

        Ok(Self {
            state: RwLock::new(state),
            similarity: snapshot.similarity,
            scale_score: snapshot.scale_score,
        })
    }

    fn score(&self, left: &[f32], right: &[f32]) -> f64 {
        let raw = match self.similarity {
            SimilarityMetric::DotProduct => dot(left, right),
            SimilarityMetric::Cosine => cosine(left, right),
        };

        if !self.scale_score {
            return raw;
        }

        match self.similarity {
            SimilarityMetric::DotProduct => 1.0 / (1.0 + (-raw / 100.0).exp()),
            SimilarityMetric::Cosine => (raw + 1.0) / 2.0,
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum()
}

fn cosine(left: &[f32], right: &[f32]) -> f64 {
    let norm_left = dot(left, left).sqrt();
    let norm_right = dot(right, right).sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }
    dot(left, right) / (norm_left * norm_right)
}

/// Validates that every document carries an embedding of one shared length.
fn check_embeddings(
    established: Option<usize>,
    documents: &[Document],
) -> Result<Option<usize>, StoreError> {
    let mut expected = established;
    for document in documents {
        let embedding = document
            .embedding
            .as_ref()
            .ok_or_else(|| StoreError::MissingEmbedding(document.id.clone()))?;

        match expected {
            Some(dimensions) if dimensions != embedding.len() => {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    actual: embedding.len(),
                    document_id: document.id.clone(),
                });
            }
            Some(_) => {}
            None => expected = Some(embedding.len()),
        }
    }
    Ok(expected)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn add(
        &self,
        documents: Vec<Document>,
        policy: DuplicatePolicy,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let dimensions = check_embeddings(state.dimensions, &documents)?;

        if policy == DuplicatePolicy::Fail {
            let mut seen = HashSet::new();
            for document in &documents {
                if state.positions.contains_key(&document.id) || !seen.insert(document.id.as_str())
                {
                    return Err(StoreError::DuplicateDocument(document.id.clone()));
                }
            }
        }

        state.dimensions = dimensions;
        let mut written = HashSet::new();
        let mut skipped = 0usize;

        for document in documents {
            match state.positions.get(&document.id).copied() {
                Some(position) if policy == DuplicatePolicy::Overwrite => {
                    written.insert(document.id.clone());
                    state.documents[position] = document;
                }
                Some(_) => skipped += 1,
                None => {
                    written.insert(document.id.clone());
                    let position = state.documents.len();
                    state.positions.insert(document.id.clone(), position);
                    state.documents.push(document);
                }
            }
        }

        debug!(
            written = written.len(),
            skipped,
            total = state.documents.len(),
            "documents written"
        );
        Ok(written.len())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<RetrievedDocument>, StoreError> {
        let state = self.state.read().await;

        if let Some(dimensions) = state.dimensions {
            if dimensions != query_embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    actual: query_embedding.len(),
                    document_id: "<query>".to_string(),
                });
            }
        }

        let mut scored = state
            .documents
            .iter()
            .filter(|document| filters.matches(document))
            .filter_map(|document| {
                document.embedding.as_ref().map(|embedding| RetrievedDocument {
                    score: self.score(embedding, query_embedding),
                    document: document.clone(),
                })
            })
            .collect::<Vec<_>>();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self) -> usize {
        self.state.read().await.documents.len()
    }
}
