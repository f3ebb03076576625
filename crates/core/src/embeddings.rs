use crate::config::{EmbeddingConfig, HASHED_TRIGRAM_MODEL};
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Turns text into fixed-length vectors. Documents and queries must go through the same client.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_id(&self) -> &str;

    /// Vector length, once known. Remote backends learn it from their first response.
    fn dimensions(&self) -> Option<usize>;

    fn batch_size(&self) -> usize;

    /// Checks that the backing model can serve requests.
    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Rejects text that no model can encode meaningfully.
pub fn validate_text(index: usize, text: &str) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::Encoding {
            index,
            reason: "text is empty".to_string(),
        });
    }
    if text.contains('\0') {
        return Err(EmbeddingError::Encoding {
            index,
            reason: "text contains a NUL character".to_string(),
        });
    }
    Ok(())
}

fn prefixed(prefix: &str, text: &str) -> String {
    if prefix.is_empty() {
        text.to_string()
    } else {
        format!("{prefix}{text}")
    }
}

/// Builds the client named by `config.model`.
pub fn connect(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    config
        .validate()
        .map_err(|details| EmbeddingError::ModelUnavailable {
            model: config.model.clone(),
            details,
        })?;

    if config.is_offline() {
        let embedder = CharacterNgramEmbedder {
            dimensions: config.dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            batch_size: config.batch_size,
            query_prefix: config.query_prefix.clone(),
            document_prefix: config.document_prefix.clone(),
        };
        info!(
            model = HASHED_TRIGRAM_MODEL,
            dimensions = embedder.dimensions,
            "using offline embedder"
        );
        return Ok(Arc::new(embedder));
    }

    let client = HttpEmbeddingClient::new(config)?;
    info!(
        model = %config.model,
        endpoint = %client.endpoint,
        device = %config.device,
        batch_size = config.batch_size,
        "using remote embedder"
    );
    Ok(Arc::new(client))
}

/// Offline embedder hashing lowercase character trigrams into buckets, L2-normalised.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    pub batch_size: usize,
    pub query_prefix: String,
    pub document_prefix: String,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: 32,
            query_prefix: String::new(),
            document_prefix: String::new(),
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let bucket = (fnv1a(window) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        if chars.len() < 3 {
            let bucket = (fnv1a(&chars) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut hash = 1469598103934665603u64;
    let mut buffer = [0u8; 4];
    for ch in chars {
        for byte in ch.encode_utf8(&mut buffer).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    }
    hash
}

#[async_trait]
impl EmbeddingClient for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        HASHED_TRIGRAM_MODEL
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions.max(1))
    }

    fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size()).enumerate() {
            for (offset, text) in batch.iter().enumerate() {
                validate_text(batch_index * self.batch_size() + offset, text)?;
                vectors.push(self.embed(&prefixed(&self.document_prefix, text)));
            }
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        validate_text(0, text)?;
        Ok(self.embed(&prefixed(&self.query_prefix, text)))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    dimensions: OnceLock<usize>,
    query_prefix: String,
    document_prefix: String,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or_else(|| EmbeddingError::ModelUnavailable {
                model: config.model.clone(),
                details: "no embedding endpoint configured".to_string(),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let dimensions = OnceLock::new();
        if let Some(expected) = config.dimensions {
            let _ = dimensions.set(expected);
        }

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            dimensions,
            query_prefix: config.query_prefix.clone(),
            document_prefix: config.document_prefix.clone(),
        })
    }

    fn unavailable(&self, details: impl Into<String>) -> EmbeddingError {
        EmbeddingError::ModelUnavailable {
            model: self.model.clone(),
            details: details.into(),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                self.unavailable(error.to_string())
            } else {
                EmbeddingError::Http(error)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            return Err(self.unavailable(format!("{} returned {status}", self.endpoint)));
        }
        if !status.is_success() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        if payload.data.len() != inputs.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                payload.data.len()
            )));
        }
        payload
            .data
            .sort_by_key(|item| item.index.unwrap_or(usize::MAX));

        let vectors = payload
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect::<Vec<_>>();
        self.check_dimensions(&vectors)?;
        Ok(vectors)
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let expected = *self.dimensions.get_or_init(|| first.len());
        match vectors.iter().find(|vector| vector.len() != expected) {
            Some(vector) => Err(EmbeddingError::InvalidResponse(format!(
                "embedding length {} != {expected}",
                vector.len()
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        self.request(&["warm up".to_string()]).await.map(|_| ())
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        for (index, text) in texts.iter().enumerate() {
            validate_text(index, text)?;
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let inputs = batch
                .iter()
                .map(|text| prefixed(&self.document_prefix, text))
                .collect::<Vec<_>>();
            debug!(batch = inputs.len(), model = %self.model, "embedding batch");
            vectors.extend(self.request(&inputs).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        validate_text(0, text)?;
        let input = [prefixed(&self.query_prefix, text)];
        self.request(&input)
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Who was Pliny the Elder?");
        let second = embedder.embed("Who was Pliny the Elder?");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::with_dimensions(32);
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn short_text_still_gets_a_signal() {
        let embedder = CharacterNgramEmbedder::default();
        let vector = embedder.embed("ab");
        assert!(vector.iter().any(|value| *value > 0.0));
    }

    #[tokio::test]
    async fn empty_document_text_is_an_encoding_error() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["fine".to_string(), "   ".to_string()];
        let result = embedder.embed_documents(&texts).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::Encoding { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn query_and_document_embeddings_agree_without_prefixes() {
        let embedder = CharacterNgramEmbedder::default();
        let query = embedder.embed_query("Lighthouse of Alexandria").await.unwrap();
        let documents = embedder
            .embed_documents(&["Lighthouse of Alexandria".to_string()])
            .await
            .unwrap();
        assert_eq!(query, documents[0]);
    }

    #[test]
    fn remote_client_without_endpoint_is_unavailable() {
        let config = EmbeddingConfig {
            model: "sentence-transformers/multi-qa-mpnet-base-dot-v1".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            connect(&config),
            Err(EmbeddingError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn offline_config_connects_with_requested_dimensions() {
        let config = EmbeddingConfig {
            dimensions: Some(64),
            ..EmbeddingConfig::default()
        };
        let client = connect(&config).unwrap();
        assert_eq!(client.dimensions(), Some(64));
        assert_eq!(client.model_id(), HASHED_TRIGRAM_MODEL);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_model_unavailable() {
        let config = EmbeddingConfig {
            timeout_secs: 2,
            ..EmbeddingConfig::remote("http://127.0.0.1:9/v1/embeddings")
        };
        let client = HttpEmbeddingClient::new(&config).unwrap();
        let result = client.warm_up().await;
        assert!(matches!(
            result,
            Err(EmbeddingError::ModelUnavailable { .. })
        ));
    }
}
