//! Extractive answer readers.
//!
//! A reader receives the query and the retrieved documents and returns
//! verbatim spans of those documents ranked by confidence. Both readers
//! share [`rank_spans`], which applies the score threshold, drops spans that
//! overlap a better span from the same document, and orders the survivors
//! by score, then document order, then offset.

use crate::config::ReaderConfig;
use crate::error::ExtractionError;
use crate::models::{AnsweredSpan, Document, SpanOffset};
use crate::traits::AnswerExtractor;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: [&str; 24] = [
    "the", "and", "was", "were", "who", "whom", "what", "when", "where", "which", "why", "how",
    "for", "are", "did", "does", "with", "from", "that", "this", "has", "have", "had", "into",
];

/// A scored span before global ranking.
#[derive(Debug, Clone)]
pub struct CandidateSpan {
    pub document_index: usize,
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub score: f64,
    pub context: String,
}

/// Threshold, per-document overlap dedup, then global ordering and truncation.
pub fn rank_spans(
    mut candidates: Vec<CandidateSpan>,
    top_k: usize,
    score_threshold: f64,
    overlap_threshold: f64,
) -> Vec<AnsweredSpan> {
    if top_k == 0 {
        return Vec::new();
    }
    candidates.retain(|candidate| candidate.score >= score_threshold && candidate.score > 0.0);
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.document_index.cmp(&right.document_index))
            .then(left.start.cmp(&right.start))
    });

    let mut accepted: Vec<CandidateSpan> = Vec::new();
    for candidate in candidates {
        if accepted.len() >= top_k {
            break;
        }
        let overlaps = accepted.iter().any(|kept| {
            kept.document_index == candidate.document_index
                && overlap_ratio(kept, &candidate) > overlap_threshold
        });
        if !overlaps {
            accepted.push(candidate);
        }
    }

    accepted
        .into_iter()
        .map(|candidate| AnsweredSpan {
            text: candidate.text,
            score: candidate.score,
            document_id: candidate.document_id,
            document_offset: SpanOffset {
                start: candidate.start,
                end: candidate.end,
            },
            context: candidate.context,
        })
        .collect()
}

fn overlap_ratio(left: &CandidateSpan, right: &CandidateSpan) -> f64 {
    let start = left.start.max(right.start);
    let end = left.end.min(right.end);
    if end <= start {
        return 0.0;
    }
    let shorter = (left.end - left.start).min(right.end - right.start).max(1);
    (end - start) as f64 / shorter as f64
}

/// Lowercase content words of the query, in order, without repeats.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .unicode_words()
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 2)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Scores each sentence by the share of query-term weight it contains.
#[derive(Debug, Clone)]
pub struct LexicalOverlapReader {
    pub score_threshold: f64,
    pub max_answer_chars: usize,
    pub overlap_threshold: f64,
}

impl Default for LexicalOverlapReader {
    fn default() -> Self {
        Self::from(&ReaderConfig::default())
    }
}

impl From<&ReaderConfig> for LexicalOverlapReader {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            score_threshold: config.score_threshold,
            max_answer_chars: config.max_answer_chars.max(1),
            overlap_threshold: config.overlap_threshold,
        }
    }
}

impl LexicalOverlapReader {
    fn candidates(&self, terms: &[String], document_index: usize, document: &Document) -> Vec<CandidateSpan> {
        let total_weight = terms.iter().map(|term| term.chars().count() as f64).sum::<f64>();
        if total_weight == 0.0 {
            return Vec::new();
        }

        let mut spans = Vec::new();
        for (sentence_start, sentence) in document.content.split_sentence_bound_indices() {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                continue;
            }
            let leading = sentence.len() - sentence.trim_start().len();
            let start = sentence_start + leading;

            let mut first_match = None;
            let mut matched = HashSet::new();
            for (offset, word) in trimmed.split_word_bound_indices() {
                let lowered = word.to_lowercase();
                if terms.contains(&lowered) {
                    first_match.get_or_insert(offset);
                    matched.insert(lowered);
                }
            }

            let Some(first_match) = first_match else {
                continue;
            };

            let matched_weight = matched
                .iter()
                .map(|term| term.chars().count() as f64)
                .sum::<f64>();
            let mut score = matched_weight / total_weight;

            let (span_start, span_text) = if trimmed.chars().count() > self.max_answer_chars {
                score *= 0.9;
                let window = window_from(trimmed, first_match, self.max_answer_chars);
                (start + first_match, window.trim_end())
            } else {
                (start, trimmed)
            };

            spans.push(CandidateSpan {
                document_index,
                document_id: document.id.clone(),
                start: span_start,
                end: span_start + span_text.len(),
                text: span_text.to_string(),
                score,
                context: trimmed.to_string(),
            });
        }

        spans
    }
}

/// At most `max_chars` characters of `text` starting at byte `from`.
fn window_from(text: &str, from: usize, max_chars: usize) -> &str {
    let tail = &text[from..];
    match tail.char_indices().nth(max_chars) {
        Some((end, _)) => &tail[..end],
        None => tail,
    }
}

#[async_trait]
impl AnswerExtractor for LexicalOverlapReader {
    async fn extract(
        &self,
        query: &str,
        documents: &[Document],
        top_k: usize,
    ) -> Result<Vec<AnsweredSpan>, ExtractionError> {
        let terms = query_terms(query);
        debug!(terms = ?terms, documents = documents.len(), "lexical extraction");

        let candidates = documents
            .iter()
            .enumerate()
            .flat_map(|(index, document)| self.candidates(&terms, index, document))
            .collect::<Vec<_>>();

        Ok(rank_spans(
            candidates,
            top_k,
            self.score_threshold,
            self.overlap_threshold,
        ))
    }
}

#[derive(Serialize)]
struct QaRequest<'a> {
    inputs: QaInputs<'a>,
}

#[derive(Serialize)]
struct QaInputs<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct QaAnswer {
    answer: String,
    score: f64,
    start: usize,
    end: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QaResponse {
    One(QaAnswer),
    Many(Vec<QaAnswer>),
}

/// Reader backed by a question-answering inference endpoint (`{answer, score, start, end}` responses).
pub struct HttpReader {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    score_threshold: f64,
    overlap_threshold: f64,
}

impl HttpReader {
    pub fn new(config: &ReaderConfig) -> Result<Self, ExtractionError> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or_else(|| ExtractionError::ModelUnavailable {
                endpoint: String::new(),
                details: "no reader endpoint configured".to_string(),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            score_threshold: config.score_threshold,
            overlap_threshold: config.overlap_threshold,
        })
    }

    fn unavailable(&self, details: impl Into<String>) -> ExtractionError {
        ExtractionError::ModelUnavailable {
            endpoint: self.endpoint.clone(),
            details: details.into(),
        }
    }

    async fn answer(&self, query: &str, context: &str) -> Result<Vec<QaAnswer>, ExtractionError> {
        let mut request = self.client.post(&self.endpoint).json(&QaRequest {
            inputs: QaInputs {
                question: query,
                context,
            },
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                self.unavailable(error.to_string())
            } else {
                ExtractionError::Http(error)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_server_error() {
            return Err(self.unavailable(format!("{} returned {status}", self.endpoint)));
        }
        if !status.is_success() {
            return Err(ExtractionError::InvalidResponse(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }

        Ok(match response.json::<QaResponse>().await? {
            QaResponse::One(answer) => vec![answer],
            QaResponse::Many(answers) => answers,
        })
    }
}

/// Maps a span given in character offsets onto byte offsets of `content`.
fn char_span_to_bytes(content: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    if end < start {
        return None;
    }
    let mut boundaries = content
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(content.len()));
    let byte_start = boundaries.nth(start)?;
    let byte_end = if end == start {
        byte_start
    } else {
        boundaries.nth(end - start - 1)?
    };
    Some((byte_start, byte_end))
}

fn containing_sentence(content: &str, start: usize, end: usize) -> String {
    let mut from = 0;
    let mut to = content.len();
    for (offset, sentence) in content.split_sentence_bound_indices() {
        if offset <= start {
            from = offset;
        }
        if offset + sentence.len() >= end {
            to = offset + sentence.len();
            break;
        }
    }
    content[from..to].trim().to_string()
}

#[async_trait]
impl AnswerExtractor for HttpReader {
    async fn extract(
        &self,
        query: &str,
        documents: &[Document],
        top_k: usize,
    ) -> Result<Vec<AnsweredSpan>, ExtractionError> {
        let mut candidates = Vec::new();

        for (document_index, document) in documents.iter().enumerate() {
            for answer in self.answer(query, &document.content).await? {
                let Some((start, end)) =
                    char_span_to_bytes(&document.content, answer.start, answer.end)
                else {
                    return Err(ExtractionError::InvalidResponse(format!(
                        "span {}..{} is outside document {}",
                        answer.start, answer.end, document.id
                    )));
                };

                let text = document.content[start..end].to_string();
                if text.trim() != answer.answer.trim() {
                    debug!(expected = %answer.answer, found = %text, "reader answer differs from span");
                }

                candidates.push(CandidateSpan {
                    document_index,
                    document_id: document.id.clone(),
                    start,
                    end,
                    text,
                    score: answer.score,
                    context: containing_sentence(&document.content, start, end),
                });
            }
        }

        Ok(rank_spans(
            candidates,
            top_k,
            self.score_threshold,
            self.overlap_threshold,
        ))
    }
}

pub type SharedReader = Arc<dyn AnswerExtractor + Send + Sync>;

/// Remote reader when an endpoint is configured, otherwise the lexical one.
pub fn connect_reader(config: &ReaderConfig) -> Result<SharedReader, ExtractionError> {
    config
        .validate()
        .map_err(|details| ExtractionError::ModelUnavailable {
            endpoint: config.endpoint.clone().unwrap_or_default(),
            details,
        })?;

    match &config.endpoint {
        Some(endpoint) if !endpoint.trim().is_empty() => {
            info!(endpoint = %endpoint, "using remote reader");
            Ok(Arc::new(HttpReader::new(config)?))
        }
        _ => {
            info!(threshold = config.score_threshold, "using lexical reader");
            Ok(Arc::new(LexicalOverlapReader::from(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Meta;

    fn document(content: &str) -> Document {
        Document::new(content, Meta::new())
    }

    fn candidate(document_index: usize, start: usize, end: usize, score: f64) -> CandidateSpan {
        CandidateSpan {
            document_index,
            document_id: format!("doc-{document_index}"),
            start,
            end,
            text: String::new(),
            score,
            context: String::new(),
        }
    }

    #[test]
    fn query_terms_drop_short_words_and_stopwords() {
        assert_eq!(
            query_terms("Who was Pliny the Elder? Pliny!"),
            vec!["pliny".to_string(), "elder".to_string()]
        );
    }

    #[test]
    fn ranking_breaks_ties_by_document_then_offset() {
        let ranked = rank_spans(
            vec![
                candidate(1, 0, 5, 0.5),
                candidate(0, 20, 25, 0.5),
                candidate(0, 10, 15, 0.5),
                candidate(2, 0, 5, 0.9),
            ],
            4,
            0.0,
            0.5,
        );
        let order = ranked
            .iter()
            .map(|span| (span.document_id.as_str(), span.document_offset.start))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![("doc-2", 0), ("doc-0", 10), ("doc-0", 20), ("doc-1", 0)]
        );
    }

    #[test]
    fn zero_top_k_yields_no_spans() {
        let ranked = rank_spans(
            vec![candidate(0, 0, 5, 0.9), candidate(1, 0, 5, 0.8)],
            0,
            0.0,
            0.5,
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn overlapping_spans_from_one_document_are_deduplicated() {
        let ranked = rank_spans(
            vec![
                candidate(0, 0, 10, 0.9),
                candidate(0, 2, 8, 0.8),
                candidate(1, 2, 8, 0.7),
            ],
            5,
            0.0,
            0.1,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[1].document_id, "doc-1");
    }

    #[tokio::test]
    async fn lexical_reader_picks_the_matching_sentence() -> Result<(), ExtractionError> {
        let reader = LexicalOverlapReader::default();
        let documents = vec![
            document("The Colossus was a statue. It stood in Rhodes."),
            document("Pliny the Elder was a Roman author. He described the Colossus."),
        ];

        let answers = reader.extract("Who was Pliny the Elder?", &documents, 2).await?;

        assert!(!answers.is_empty());
        assert_eq!(answers[0].text, "Pliny the Elder was a Roman author.");
        assert_eq!(answers[0].document_id, documents[1].id);
        let offset = answers[0].document_offset;
        assert_eq!(&documents[1].content[offset.start..offset.end], answers[0].text);
        assert!((answers[0].score - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn irrelevant_candidates_yield_no_answers() -> Result<(), ExtractionError> {
        let reader = LexicalOverlapReader::default();
        let documents = vec![document("Bananas are yellow."), document("Rivers flow downhill.")];

        let answers = reader
            .extract("Who built the Hanging Gardens?", &documents, 3)
            .await?;
        assert!(answers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lexical_reader_honours_zero_answer_budget() -> Result<(), ExtractionError> {
        let reader = LexicalOverlapReader::default();
        let documents = vec![
            document("Pliny the Elder was a Roman author."),
            document("Pliny the Elder died near Pompeii."),
            document("The Elder Pliny wrote Naturalis Historia."),
        ];

        let answers = reader.extract("Who was Pliny the Elder?", &documents, 0).await?;
        assert!(answers.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn long_sentences_are_windowed_around_the_match() -> Result<(), ExtractionError> {
        let reader = LexicalOverlapReader {
            max_answer_chars: 20,
            ..LexicalOverlapReader::default()
        };
        let content = "In a very long preamble that goes on and on the Mausoleum at Halicarnassus was built as a tomb.";
        let documents = vec![document(content)];

        let answers = reader.extract("Mausoleum Halicarnassus", &documents, 1).await?;

        assert_eq!(answers.len(), 1);
        assert!(answers[0].text.starts_with("Mausoleum"));
        assert!(answers[0].text.chars().count() <= 20);
        let offset = answers[0].document_offset;
        assert_eq!(&content[offset.start..offset.end], answers[0].text);
        Ok(())
    }

    #[test]
    fn char_offsets_map_to_byte_offsets() {
        let content = "Ägypten: Pyramide";
        assert_eq!(char_span_to_bytes(content, 9, 17), Some((10, 18)));
        assert_eq!(char_span_to_bytes(content, 0, 0), Some((0, 0)));
        assert_eq!(char_span_to_bytes(content, 5, 40), None);
    }

    #[test]
    fn qa_response_accepts_single_and_list_payloads() -> Result<(), serde_json::Error> {
        let single: QaResponse = serde_json::from_str(
            r#"{"answer": "a Roman author", "score": 0.8, "start": 20, "end": 34}"#,
        )?;
        assert!(matches!(single, QaResponse::One(_)));

        let many: QaResponse = serde_json::from_str(
            r#"[{"answer": "a", "score": 0.8, "start": 0, "end": 1}]"#,
        )?;
        assert!(matches!(many, QaResponse::Many(ref answers) if answers.len() == 1));
        Ok(())
    }

    #[test]
    fn lexical_reader_is_chosen_without_endpoint() {
        assert!(connect_reader(&ReaderConfig::default()).is_ok());
    }
}
