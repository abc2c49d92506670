use crate::error::IngestError;
use crate::models::Page;
use lopdf::Document;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError>;
}

/// Reads the text layer of each page with lopdf. Pages without text are kept so page
/// numbering stays intact; the chunker drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let document = Document::load(path)
            .map_err(|error| IngestError::PdfParse(format!("{}: {error}", path.display())))?;

        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
        let total_pages = page_numbers.len();
        let source = path.to_string_lossy().to_string();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::PdfParse(format!("path has no file name: {}", path.display()))
            })?
            .to_string();

        let mut pages = Vec::with_capacity(total_pages);
        for page_no in page_numbers {
            let text = document.extract_text(&[page_no]).map_err(|error| {
                IngestError::PdfParse(format!("{} page {page_no}: {error}", path.display()))
            })?;

            let mut page = Page::new(source.clone(), page_no, text);
            page.metadata
                .insert("file_name".to_string(), Value::String(file_name.clone()));
            page.metadata
                .insert("total_pages".to_string(), Value::from(total_pages));
            pages.push(page);
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            warn!(path = %path.display(), "pdf has no extractable text layer");
        }

        Ok(pages)
    }
}
