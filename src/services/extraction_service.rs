//! PDF text extraction for uploaded résumés.
//!
//! Extraction runs synchronously on the uploaded bytes; there is no
//! temporary file. Encrypted, corrupt, and empty-text documents all
//! surface as `ExtractionFailed`, and in that case the caller creates
//! no Document row.

use crate::error::AppError;

/// Extract plain text from an uploaded PDF.
///
/// # Process
///
/// 1. Run the PDF text extractor over the raw bytes
/// 2. Normalize the result (line breaks, whitespace)
/// 3. Reject documents that yield no usable text
pub fn extract_text(bytes: &[u8]) -> Result<String, AppError> {
    let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        tracing::warn!("PDF extraction failed: {e}");
        AppError::ExtractionFailed(e.to_string())
    })?;

    let cleaned = clean_extracted_text(&raw);
    if cleaned.is_empty() {
        return Err(AppError::ExtractionFailed(
            "document contains no extractable text".to_string(),
        ));
    }

    tracing::info!("Extracted {} characters from uploaded PDF", cleaned.len());
    Ok(cleaned)
}

/// Normalize extracted text: trim every line, drop blank lines, collapse
/// runs of spaces. PDF extractors tend to emit ragged whitespace; the
/// prompts downstream work better on compact text.
fn clean_extracted_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_drops_blank_lines_and_collapses_spaces() {
        let raw = "  Jan Kowalski  \n\n\n  Senior   Rust   Developer \n   \n5 years    experience";
        assert_eq!(
            clean_extracted_text(raw),
            "Jan Kowalski\nSenior Rust Developer\n5 years experience"
        );
    }

    #[test]
    fn cleanup_of_whitespace_only_input_is_empty() {
        assert_eq!(clean_extracted_text("   \n\t\n  "), "");
        assert_eq!(clean_extracted_text(""), "");
    }

    #[test]
    fn cleanup_preserves_non_ascii_text() {
        let raw = "Żółć  i  jaźń\n  déjà vu  ";
        assert_eq!(clean_extracted_text(raw), "Żółć i jaźń\ndéjà vu");
    }

    #[test]
    fn garbage_bytes_fail_extraction() {
        assert!(extract_text(b"definitely not a pdf").is_err());
        assert!(extract_text(b"").is_err());
    }
}
