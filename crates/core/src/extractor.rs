use crate::error::IngestError;
use crate::models::{Document, Meta, MetaValue};
use lopdf::Document as PdfDocument;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

/// Joins the pages of one PDF into a single document, pages separated by form feeds.
pub fn pages_to_document(path: &Path, pages: &[PageText]) -> Result<Document, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    let content = pages
        .iter()
        .map(|page| page.text.trim_end())
        .collect::<Vec<_>>()
        .join("\u{000c}");

    let mut meta = Meta::new();
    meta.insert(
        "file_path".to_string(),
        MetaValue::Text(path.to_string_lossy().to_string()),
    );
    meta.insert("file_name".to_string(), MetaValue::from(name));
    meta.insert(
        "page_count".to_string(),
        MetaValue::Integer(pages.len() as i64),
    );

    Ok(Document::new(content, meta))
}

pub fn convert_pdf(path: &Path, extractor: &dyn PdfExtractor) -> Result<Document, IngestError> {
    let pages = extractor.extract_pages(path)?;
    pages_to_document(path, &pages)
}
