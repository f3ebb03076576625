use crate::error::IngestError;
use crate::models::{Document, IngestionOptions};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct CleaningConfig {
    pub remove_empty_lines: bool,
    pub remove_extra_whitespace: bool,
    pub remove_regex: Option<Regex>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_empty_lines: true,
            remove_extra_whitespace: true,
            remove_regex: None,
        }
    }
}

impl TryFrom<&IngestionOptions> for CleaningConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        let remove_regex = value
            .remove_regex
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()?;

        Ok(Self {
            remove_empty_lines: value.remove_empty_lines,
            remove_extra_whitespace: value.remove_extra_whitespace,
            remove_regex,
        })
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Cleans each form-feed separated page on its own so page boundaries survive.
pub fn clean_text(text: &str, config: &CleaningConfig) -> String {
    text.split('\u{000c}')
        .map(|page| clean_page(page, config))
        .collect::<Vec<_>>()
        .join("\u{000c}")
        .trim_end()
        .to_string()
}

fn clean_page(page: &str, config: &CleaningConfig) -> String {
    let stripped = match &config.remove_regex {
        Some(pattern) => pattern.replace_all(page, "").into_owned(),
        None => page.to_string(),
    };

    stripped
        .lines()
        .map(|line| {
            if config.remove_extra_whitespace {
                normalize_whitespace(line)
            } else {
                line.to_string()
            }
        })
        .filter(|line| !config.remove_empty_lines || !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cleans a document's content in place. The id is kept so chunks can point back at it.
pub fn clean_document(mut document: Document, config: &CleaningConfig) -> Result<Document, IngestError> {
    let cleaned = clean_text(&document.content, config);

    if cleaned.replace('\u{000c}', "").trim().is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "document {} is empty after cleaning",
            document.origin()
        )));
    }

    document.content = cleaned;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Meta;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn empty_lines_and_runs_of_spaces_are_removed() {
        let cleaned = clean_text("The  Great\n\n\n   Pyramid   of Giza  \n", &CleaningConfig::default());
        assert_eq!(cleaned, "The Great\nPyramid of Giza");
    }

    #[test]
    fn page_breaks_are_preserved() {
        let cleaned = clean_text("page one\n\n\u{000c}page   two", &CleaningConfig::default());
        assert_eq!(cleaned, "page one\u{000c}page two");
    }

    #[test]
    fn boilerplate_regex_is_stripped() -> Result<(), IngestError> {
        let options = IngestionOptions {
            remove_regex: Some(r"(?m)^Page \d+ of \d+$".to_string()),
            ..IngestionOptions::default()
        };
        let config = CleaningConfig::try_from(&options)?;
        let cleaned = clean_text("Hanging Gardens\nPage 1 of 9\nof Babylon", &config);
        assert_eq!(cleaned, "Hanging Gardens\nof Babylon");
        Ok(())
    }

    #[test]
    fn blank_document_fails_cleaning() {
        let document = Document::new(" \n\t\u{000c} ", Meta::new());
        let result = clean_document(document, &CleaningConfig::default());
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }
}
