use crate::error::IngestError;
use crate::models::{Document, IngestionOptions, MetaValue, SplitUnit};
use regex::Regex;
use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub split_by: SplitUnit,
    pub split_length: usize,
    pub split_overlap: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            split_by: value.split_by,
            split_length: value.split_length,
            split_overlap: value.split_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.split_length == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "split_length must be greater than zero".to_string(),
            ));
        }
        if self.split_overlap >= self.split_length {
            return Err(IngestError::InvalidChunkConfig(format!(
                "split_overlap ({}) must be less than split_length ({})",
                self.split_overlap, self.split_length
            )));
        }
        Ok(())
    }
}

/// Byte ranges of the split units; together they cover the text from the first unit on.
pub fn unit_ranges(text: &str, unit: SplitUnit) -> Result<Vec<Range<usize>>, IngestError> {
    let ranges = match unit {
        SplitUnit::Sentence => text
            .split_sentence_bound_indices()
            .map(|(start, sentence)| start..start + sentence.len())
            .collect(),
        SplitUnit::Word => Regex::new(r"\S+\s*")?
            .find_iter(text)
            .map(|found| found.range())
            .collect(),
        SplitUnit::Passage => {
            let separator = Regex::new(r"\n[ \t]*\n\s*")?;
            let mut ranges = Vec::new();
            let mut start = 0;
            for found in separator.find_iter(text) {
                ranges.push(start..found.end());
                start = found.end();
            }
            if start < text.len() {
                ranges.push(start..text.len());
            }
            ranges
        }
    };

    Ok(ranges)
}

/// Splits a document into chunks of `split_length` units, consecutive chunks sharing `split_overlap` units.
pub fn split_document(document: &Document, config: ChunkingConfig) -> Result<Vec<Document>, IngestError> {
    config.validate()?;

    let text = document.content.as_str();
    let units = unit_ranges(text, config.split_by)?;
    let step = config.split_length - config.split_overlap;

    let mut chunks = Vec::new();
    let mut first = 0;

    while first < units.len() {
        let last = (first + config.split_length).min(units.len());
        let start = units[first].start;
        let piece = &text[start..units[last - 1].end];

        if !piece.trim().is_empty() {
            let char_start = text[..start].chars().count();
            let page_number = 1 + text[..start].matches('\u{000c}').count();

            let mut chunk = document.split_child(piece.to_string(), chunks.len(), char_start);
            chunk
                .meta
                .insert("page_number".to_string(), MetaValue::Integer(page_number as i64));
            chunk.refresh_id();
            chunks.push(chunk);
        }

        if last == units.len() {
            break;
        }
        first += step;
    }

    Ok(chunks)
}
