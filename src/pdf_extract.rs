// src/pdf_extract.rs

use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// No text layer at all; every page is an image. We do not OCR.
    ScannedImage,
    /// The bytes could not be parsed as a PDF.
    Error(String),
}

/// Separator placed between the text of consecutive pages.
const PAGE_SEPARATOR: &str = "\n";

/// Source of raw invoice text for the pipeline.
pub trait TextSource {
    /// Plain text of the document, or an empty string when there is
    /// nothing usable. Never fails.
    fn extract_text(&self, path: &Path) -> String;
}

/// Reads the text layer of PDF files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextSource;

impl TextSource for PdfTextSource {
    fn extract_text(&self, path: &Path) -> String {
        extract_text(path)
    }
}

/// Read a PDF from disk and return its text, pages joined in order.
///
/// Unreadable or unparseable files yield `""` and a log line.
pub fn extract_text(path: &Path) -> String {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read PDF");
            return String::new();
        }
    };

    match extract_text_from_pdf(&bytes) {
        PdfContent::Text(text) => text,
        PdfContent::ScannedImage => {
            info!(path = %path.display(), "PDF has no text layer (scanned?)");
            String::new()
        }
        PdfContent::Error(e) => {
            warn!(path = %path.display(), error = %e, "Failed to process PDF");
            String::new()
        }
    }
}

/// Takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        return PdfContent::ScannedImage;
    }

    // lopdf and pdf-extract both panic on some malformed PDFs
    let text = match panic::catch_unwind(AssertUnwindSafe(|| extract_pages(&doc))) {
        Ok(text) => text,
        Err(_) => return PdfContent::Error("page text extraction panicked".to_string()),
    };
    if !text.trim().is_empty() {
        return PdfContent::Text(text);
    }

    // lopdf gives up on some font encodings that pdf-extract handles.
    let fallback =
        panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(pdf_bytes)));
    match fallback {
        Ok(Ok(text)) if !text.trim().is_empty() => {
            debug!(chars = text.len(), "Recovered text with pdf-extract");
            PdfContent::Text(text)
        }
        Ok(Ok(_)) => PdfContent::ScannedImage,
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed");
            PdfContent::ScannedImage
        }
        Err(_) => PdfContent::Error("pdf-extract panicked (malformed PDF)".to_string()),
    }
}

/// Per-page text in page order. Pages without a text layer contribute
/// nothing.
fn extract_pages(doc: &Document) -> String {
    let mut parts = Vec::new();
    for page_num in doc.get_pages().keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) if !text.trim().is_empty() => parts.push(text.trim_end().to_string()),
            Ok(_) => debug!(page = page_num, "Page has no text"),
            Err(e) => debug!(page = page_num, error = %e, "Page text extraction failed"),
        }
    }
    parts.join(PAGE_SEPARATOR)
}

/// Heuristic: a page with XObject images but no Font resources is almost
/// certainly a scan. If every page looks like that, there is no text layer
/// worth asking for.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_dict) = doc.get_dictionary(*object_id) else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let non_empty = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|o| doc.dereference(o).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|d| !d.is_empty())
        };

        if non_empty(b"XObject".as_slice()) && !non_empty(b"Font".as_slice()) {
            image_only_pages += 1;
        }
    }

    debug!(
        total_pages = pages.len(),
        image_only = image_only_pages,
        "Scanned-page analysis"
    );

    image_only_pages == pages.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    fn text_page(font: &str, line: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(line)]),
            Operation::new("ET", vec![]),
        ]
    }

    /// A filled box, no text operators.
    fn drawing_page() -> Vec<Operation> {
        vec![
            Operation::new("re", vec![72.into(), 72.into(), 200.into(), 100.into()]),
            Operation::new("f", vec![]),
        ]
    }

    /// One Helvetica font registered under `font_key` on every page.
    fn build_pdf(pages: Vec<Vec<Operation>>, font_key: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut kids = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { font_key => font_id },
                },
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_pages_joined_in_order() {
        let pdf = build_pdf(
            vec![
                text_page("F1", "INVOICE 10045"),
                drawing_page(),
                text_page("F1", "TOTAL 2045.50"),
            ],
            "F1",
        );
        let PdfContent::Text(text) = extract_text_from_pdf(&pdf) else {
            panic!("expected a text layer");
        };
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        assert_eq!(lines, ["INVOICE 10045", "TOTAL 2045.50"]);
    }

    #[test]
    fn test_text_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        std::fs::write(&path, build_pdf(vec![text_page("F1", "Acme Trading")], "F1")).unwrap();
        assert_eq!(PdfTextSource.extract_text(&path).trim(), "Acme Trading");
    }

    #[test]
    fn test_undefined_font_is_error_not_panic() {
        // content selects /F1 but the page only defines /F2
        let pdf = build_pdf(vec![text_page("F1", "INVOICE 1")], "F2");
        assert!(matches!(extract_text_from_pdf(&pdf), PdfContent::Error(_)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad-font.pdf");
        std::fs::write(&path, &pdf).unwrap();
        assert_eq!(extract_text(&path), "");
    }

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_missing_file_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(extract_text(&dir.path().join("nope.pdf")), "");
    }

    #[test]
    fn test_corrupt_file_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();
        assert_eq!(PdfTextSource.extract_text(&path), "");
    }
}
