use lopdf::Document;

use crate::ExtractError;

/// Notices put the amount on the first page or two; later pages are
/// appendices and application forms.
pub const PDF_PAGE_LIMIT: usize = 2;

/// Plain text of the first [`PDF_PAGE_LIMIT`] pages.
pub fn pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let document = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages: Vec<u32> = document
        .get_pages()
        .keys()
        .copied()
        .take(PDF_PAGE_LIMIT)
        .collect();
    if pages.is_empty() {
        return Ok(String::new());
    }
    document
        .extract_text(&pages)
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}
