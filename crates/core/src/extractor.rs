use crate::error::PipelineError;
use crate::models::FileType;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

/// Shortest printable run worth keeping when salvaging a legacy DOC binary.
const MIN_SALVAGE_RUN: usize = 4;

/// Extract plain text from raw document bytes.
///
/// Failures are per-document and recoverable: the caller records them on the
/// document and may retry later.
pub fn extract_text(content: &[u8], file_type: FileType) -> Result<String, PipelineError> {
    match file_type {
        FileType::Txt => Ok(extract_txt(content)),
        FileType::Pdf => extract_pdf(content),
        FileType::Docx => extract_docx(content),
        FileType::Doc => extract_doc(content),
    }
}

/// TXT never fails: undecodable byte sequences are substituted.
fn extract_txt(content: &[u8]) -> String {
    String::from_utf8_lossy(content).into_owned()
}

/// Per-page text in page order, newline separated. Pages with no extractable
/// text contribute an empty string; only an unopenable container is an error.
fn extract_pdf(content: &[u8]) -> Result<String, PipelineError> {
    let document = Document::load_mem(content)
        .map_err(|error| PipelineError::Extraction(format!("unable to open pdf: {error}")))?;

    let mut pages = Vec::new();
    for (page_number, _object_id) in document.get_pages() {
        let text = document.extract_text(&[page_number]).unwrap_or_default();
        pages.push(text.trim_end().to_string());
    }

    Ok(pages.join("\n"))
}

fn extract_docx(content: &[u8]) -> Result<String, PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(content))
        .map_err(|error| PipelineError::Extraction(format!("unable to open docx archive: {error}")))?;

    let mut document_xml = archive.by_name("word/document.xml").map_err(|error| {
        PipelineError::Extraction(format!("docx has no word/document.xml: {error}"))
    })?;

    let mut xml = String::new();
    document_xml.read_to_string(&mut xml).map_err(|error| {
        PipelineError::Extraction(format!("unable to read word/document.xml: {error}"))
    })?;

    parse_docx_paragraphs(&xml)
}

/// Paragraph text in document order, one paragraph per line.
fn parse_docx_paragraphs(xml: &str) -> Result<String, PipelineError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref element)) if element.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(ref element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(element)) if in_text_run => {
                text.push_str(&element.unescape().unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(error) => {
                return Err(PipelineError::Extraction(format!(
                    "docx xml parse error: {error}"
                )));
            }
            Ok(_) => {}
        }
    }

    Ok(text.trim_end().to_string())
}

/// Best-effort legacy DOC extraction. Many ".doc" uploads are really OOXML
/// containers with the wrong extension, so a ZIP signature is routed through
/// the DOCX path; everything else gets printable-run salvage.
fn extract_doc(content: &[u8]) -> Result<String, PipelineError> {
    if content.starts_with(b"PK") {
        return extract_docx(content);
    }

    let salvaged = salvage_printable_runs(content);
    if salvaged.trim().is_empty() {
        return Err(PipelineError::Extraction(
            "legacy doc contains no recoverable text".to_string(),
        ));
    }

    Ok(salvaged)
}

fn salvage_printable_runs(content: &[u8]) -> String {
    let mut result = String::new();
    let mut run = String::new();

    for &byte in content {
        let character = byte as char;
        if character.is_ascii_graphic() || character == ' ' {
            run.push(character);
        } else {
            flush_run(&mut result, &mut run);
        }
    }
    flush_run(&mut result, &mut run);

    result.trim_end().to_string()
}

fn flush_run(result: &mut String, run: &mut String) {
    let trimmed = run.trim();
    if trimmed.len() >= MIN_SALVAGE_RUN {
        result.push_str(trimmed);
        result.push('\n');
    }
    run.clear();
}
