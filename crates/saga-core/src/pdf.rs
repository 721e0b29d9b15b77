//! Text extraction from uploaded payloads.
//!
//! PDFs are parsed with lopdf, page by page, recording where each page ends
//! in the extracted text so windows can later be mapped back to pages.
//! Payloads without a PDF header fall back to plain UTF-8 decoding.

use anyhow::{Context, Result};

/// Text pulled out of an uploaded payload.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Full extracted text, pages concatenated in order.
    pub text: String,
    /// Number of pages (1 for plain-text payloads).
    pub page_count: usize,
    /// Character offset where each page ends (cumulative).
    pub page_boundaries: Vec<usize>,
}

/// Extract text from payload bytes.
///
/// Returns an error for payloads that are neither parseable PDFs nor valid
/// UTF-8 text; such payloads can never be processed, so callers treat this
/// as a terminal failure rather than a retryable one.
pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
    if bytes.starts_with(b"%PDF") {
        return extract_pdf(bytes);
    }

    let text = std::str::from_utf8(bytes)
        .context("Payload is neither a PDF nor UTF-8 text")?
        .to_string();
    let len = text.chars().count();

    Ok(ExtractedText {
        text,
        page_count: 1,
        page_boundaries: vec![len],
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let doc = lopdf::Document::load_mem(bytes).context("Failed to parse PDF")?;

    let mut pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    pages.sort();
    let page_count = pages.len();

    let mut text = String::new();
    let mut page_boundaries = Vec::with_capacity(page_count);
    let mut char_len = 0usize;

    for page_num in &pages {
        let page_text = doc.extract_text(&[*page_num]).unwrap_or_default();
        char_len += page_text.chars().count();
        text.push_str(&page_text);
        if !page_text.is_empty() && !page_text.ends_with('\n') {
            text.push('\n');
            char_len += 1;
        }
        page_boundaries.push(char_len);
    }

    tracing::debug!(
        chars = char_len,
        pages = page_count,
        "Extracted text from PDF"
    );

    Ok(ExtractedText {
        text,
        page_count,
        page_boundaries,
    })
}

/// Map a character offset in the extracted text to a 1-indexed page number.
pub fn char_offset_to_page(offset: usize, page_boundaries: &[usize]) -> usize {
    for (i, &boundary) in page_boundaries.iter().enumerate() {
        if offset < boundary {
            return i + 1;
        }
    }
    page_boundaries.len().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a minimal single-page PDF containing the given text.
    fn minimal_pdf(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let content = format!(
            "BT /F1 12 Tf 100 700 Td ({}) Tj ET",
            text.replace('\\', "\\\\")
                .replace('(', "\\(")
                .replace(')', "\\)")
        );
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });
        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    #[test]
    fn test_extract_pdf() {
        let bytes = minimal_pdf("Hello World");
        let extracted = extract(&bytes).unwrap();

        assert_eq!(extracted.page_count, 1);
        assert!(!extracted.text.is_empty());
        assert_eq!(extracted.page_boundaries.len(), 1);
    }

    #[test]
    fn test_extract_plain_text() {
        let extracted = extract("just some notes".as_bytes()).unwrap();

        assert_eq!(extracted.page_count, 1);
        assert_eq!(extracted.text, "just some notes");
        assert_eq!(extracted.page_boundaries, vec![15]);
    }

    #[test]
    fn test_extract_garbage_fails() {
        let result = extract(&[0xff, 0xfe, 0x00, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_pdf_fails() {
        let result = extract(b"%PDF-1.4 not actually a pdf");
        assert!(result.is_err());
    }

    #[test]
    fn test_char_offset_to_page() {
        let boundaries = vec![10, 25, 40];
        assert_eq!(char_offset_to_page(0, &boundaries), 1);
        assert_eq!(char_offset_to_page(9, &boundaries), 1);
        assert_eq!(char_offset_to_page(10, &boundaries), 2);
        assert_eq!(char_offset_to_page(39, &boundaries), 3);
        assert_eq!(char_offset_to_page(100, &boundaries), 3);
    }
}
