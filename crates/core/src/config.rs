use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model id of the built-in offline embedder.
pub const HASHED_TRIGRAM_MODEL: &str = "hashed-trigram";

/// Dot-product sentence model used for both documents and queries.
pub const DEFAULT_REMOTE_MODEL: &str = "sentence-transformers/multi-qa-mpnet-base-dot-v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda => f.write_str("cuda"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown device: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    pub device: DevicePreference,
    /// OpenAI-compatible embeddings endpoint. Required for any model but the offline one.
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Expected vector length; checked against the first response of a remote backend.
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
    pub query_prefix: String,
    pub document_prefix: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: HASHED_TRIGRAM_MODEL.to_string(),
            batch_size: 32,
            device: DevicePreference::Auto,
            endpoint: None,
            api_key: None,
            dimensions: None,
            timeout_secs: 30,
            query_prefix: String::new(),
            document_prefix: String::new(),
        }
    }
}

impl EmbeddingConfig {
    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_REMOTE_MODEL.to_string(),
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn is_offline(&self) -> bool {
        self.model == HASHED_TRIGRAM_MODEL
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("embedding model must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return Err("embedding batch_size must be greater than zero".to_string());
        }
        if self.dimensions == Some(0) {
            return Err("embedding dimensions must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderConfig {
    /// Question-answering endpoint; the lexical reader is used when unset.
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub score_threshold: f64,
    pub max_answer_chars: usize,
    /// Fraction of the shorter span two answers from one document may share.
    pub overlap_threshold: f64,
    pub timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            score_threshold: 0.2,
            max_answer_chars: 300,
            overlap_threshold: 0.01,
            timeout_secs: 30,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(format!(
                "score_threshold {} must lie in [0, 1]",
                self.score_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return Err(format!(
                "overlap_threshold {} must lie in [0, 1]",
                self.overlap_threshold
            ));
        }
        if self.max_answer_chars == 0 {
            return Err("max_answer_chars must be greater than zero".to_string());
        }
        Ok(())
    }
}
