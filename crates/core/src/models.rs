use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Scalar metadata value attached to a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// Converts a JSON value into a scalar. Nested values keep their JSON text, `null` is dropped.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().map(Self::Float)),
            Value::String(text) => Some(Self::Text(text.clone())),
            nested => Some(Self::Text(nested.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Integer(number) => write!(f, "{number}"),
            Self::Float(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub type Meta = BTreeMap<String, MetaValue>;

/// Position of a chunk inside the document it was split from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSpan {
    pub source_id: String,
    pub split_id: usize,
    pub char_start: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
}

impl Document {
    /// Builds a document whose id is derived from its content and metadata.
    pub fn new(content: impl Into<String>, meta: Meta) -> Self {
        let content = content.into();
        Self {
            id: content_id(&content, &meta),
            content,
            meta,
            embedding: None,
            span: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Recomputes the content-derived id after content or metadata changed.
    pub fn refresh_id(&mut self) {
        self.id = content_id(&self.content, &self.meta);
    }

    /// Creates a chunk of `self` that inherits its metadata.
    pub fn split_child(&self, content: String, split_id: usize, char_start: usize) -> Self {
        let mut meta = self.meta.clone();
        meta.insert("source_id".to_string(), MetaValue::Text(self.id.clone()));
        meta.insert("split_id".to_string(), MetaValue::Integer(split_id as i64));

        let mut chunk = Self::new(content, meta);
        chunk.span = Some(SourceSpan {
            source_id: self.id.clone(),
            split_id,
            char_start,
        });
        chunk
    }

    /// Short human-readable origin, used in reports and CLI output.
    pub fn origin(&self) -> String {
        ["file_name", "url", "file_path"]
            .iter()
            .find_map(|key| self.meta.get(*key).map(ToString::to_string))
            .unwrap_or_else(|| self.id.chars().take(12).collect())
    }
}

fn content_id(content: &str, meta: &Meta) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    for (key, value) in meta {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryFilters {
    pub meta_equals: Meta,
    pub path_prefix: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.meta_equals.is_empty() && self.path_prefix.is_none()
    }

    pub fn matches(&self, document: &Document) -> bool {
        let meta_ok = self
            .meta_equals
            .iter()
            .all(|(key, expected)| document.meta.get(key) == Some(expected));

        let path_ok = match &self.path_prefix {
            Some(prefix) => document
                .meta
                .get("file_path")
                .and_then(MetaValue::as_str)
                .is_some_and(|path| path.starts_with(prefix.as_str())),
            None => true,
        };

        meta_ok && path_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    /// Number of answers to extract; falls back to `top_k`.
    pub answer_top_k: Option<usize>,
    pub filters: QueryFilters,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            answer_top_k: None,
            filters: QueryFilters::default(),
        }
    }

    pub fn with_answer_top_k(mut self, answer_top_k: usize) -> Self {
        self.answer_top_k = Some(answer_top_k);
        self
    }

    pub fn answers_wanted(&self) -> usize {
        self.answer_top_k.unwrap_or(self.top_k)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub document: Document,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanOffset {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnsweredSpan {
    pub text: String,
    pub score: f64,
    pub document_id: String,
    /// Byte offsets of `text` inside the source document's content.
    pub document_offset: SpanOffset,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub query: String,
    pub documents: Vec<RetrievedDocument>,
    pub answers: Vec<AnsweredSpan>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    DotProduct,
    Cosine,
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "dot" | "dot_product" | "dot-product" => Ok(Self::DotProduct),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    Overwrite,
    Skip,
    #[default]
    Fail,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "fail" | "error" => Ok(Self::Fail),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitUnit {
    #[default]
    Sentence,
    Word,
    Passage,
}

impl FromStr for SplitUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sentence" => Ok(Self::Sentence),
            "word" => Ok(Self::Word),
            "passage" => Ok(Self::Passage),
            other => Err(format!("unknown split unit: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOptions {
    pub split_by: SplitUnit,
    pub split_length: usize,
    pub split_overlap: usize,
    pub remove_empty_lines: bool,
    pub remove_extra_whitespace: bool,
    pub remove_regex: Option<String>,
    pub duplicate_policy: DuplicatePolicy,
    pub fail_fast: bool,
    pub meta_fields_to_embed: Vec<String>,
    /// Number of embedding shards in flight at once.
    pub embed_concurrency: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            split_by: SplitUnit::Sentence,
            split_length: 10,
            split_overlap: 0,
            remove_empty_lines: true,
            remove_extra_whitespace: true,
            remove_regex: None,
            duplicate_policy: DuplicatePolicy::Fail,
            fail_fast: false,
            meta_fields_to_embed: Vec::new(),
            embed_concurrency: 4,
        }
    }
}
