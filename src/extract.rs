//! Plain-text extraction from uploaded files.
//!
//! The format is chosen by file extension: `.pdf` through `pdf-extract`,
//! `.docx` by reading `word/document.xml` out of the ZIP container, and
//! anything else as UTF-8 text. Extraction never panics; failures come back
//! as [`ExtractError`] and the indexing request for that file fails.

use std::io::Read;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("{0} is not valid UTF-8 text and has no supported document extension")]
    NotText(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Text,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "docx" => FileKind::Docx,
            _ => FileKind::Text,
        }
    }
}

pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    match FileKind::from_filename(filename) {
        FileKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        FileKind::Docx => extract_docx(bytes),
        FileKind::Text => decode_text(filename, bytes),
    }
}

/// UTF-8 decode, tolerating a BOM. Text that mostly fails to decode is
/// treated as binary.
fn decode_text(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            let lossy = String::from_utf8_lossy(bytes);
            let replaced = lossy.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
            if replaced * 10 > lossy.chars().count() {
                Err(ExtractError::NotText(filename.to_string()))
            } else {
                Ok(lossy.into_owned())
            }
        }
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&xml)
}

/// Collect `w:t` runs, ending each `w:p` paragraph with a blank line so the
/// chunker can split on paragraph boundaries.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with("\n\n") {
                        out.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => out.push('\n'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(FileKind::from_filename("a.PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_filename("report.docx"), FileKind::Docx);
        assert_eq!(FileKind::from_filename("notes.md"), FileKind::Text);
        assert_eq!(FileKind::from_filename("README"), FileKind::Text);
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(
            extract_text("a.txt", b"The sky is blue.").unwrap(),
            "The sky is blue."
        );
        assert_eq!(extract_text("a.txt", b"\xEF\xBB\xBFhi").unwrap(), "hi");
    }

    #[test]
    fn test_binary_rejected() {
        let bytes: Vec<u8> = (0..200u8).map(|b| b | 0x80).collect();
        assert!(matches!(
            extract_text("blob.bin", &bytes),
            Err(ExtractError::NotText(_))
        ));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>The sky</w:t></w:r><w:r><w:t xml:space="preserve"> is blue.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Grass is green &amp; soft.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text("a.docx", &docx_with(xml)).unwrap();
        assert_eq!(text, "The sky is blue.\n\nGrass is green & soft.");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut out = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(
            extract_text("a.docx", &out.into_inner()),
            Err(ExtractError::Docx(_))
        ));
    }

    #[test]
    fn test_invalid_pdf_is_an_error() {
        assert!(matches!(
            extract_text("a.pdf", b"not a pdf"),
            Err(ExtractError::Pdf(_))
        ));
    }
}
