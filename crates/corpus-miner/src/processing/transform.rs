//! Turns extraction results into document records

use sha2::{Digest, Sha256};

use super::supervisor::ExtractionResult;
use super::protocol::ExtractionOutcome;
use crate::types::DocumentRecord;

/// Replace line breaks (and hyphenated breaks) with spaces
pub fn delete_eol(text: &str) -> String {
    text.replace("-\n", " ")
        .replace("-\r", " ")
        .replace('\n', " ")
        .replace('\r', " ")
}

/// Hex SHA-256 of extracted text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Copy an extraction result onto its record
pub fn apply_extraction(record: &mut DocumentRecord, result: ExtractionResult) {
    record.page_count = result.page_count;
    record.extraction_duration = result.duration;

    match result.outcome {
        ExtractionOutcome::Extracted { content } => {
            record.content_hash = Some(content_hash(&content));
            record.cleaned_text = Some(delete_eol(&content));
            record.raw_text = Some(content);
        }
        ExtractionOutcome::Failed { error } => record.fail(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentInput;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    fn result(outcome: ExtractionOutcome) -> ExtractionResult {
        ExtractionResult {
            path: PathBuf::from("/in/report.pdf"),
            outcome,
            page_count: 2,
            duration: Duration::from_millis(300),
        }
    }

    #[test]
    fn test_delete_eol() {
        assert_eq!(delete_eol("exam-\nple line\r\nnext"), "exam ple line  next");
        assert_eq!(delete_eol("no breaks"), "no breaks");
    }

    #[test]
    fn test_apply_extracted() {
        let mut record = DocumentRecord::new(&DocumentInput::new("/in/report.pdf", Utc::now(), 9));
        apply_extraction(
            &mut record,
            result(ExtractionOutcome::Extracted {
                content: "Quarterly\nreport".to_string(),
            }),
        );

        assert!(record.is_ok());
        assert_eq!(record.raw_text.as_deref(), Some("Quarterly\nreport"));
        assert_eq!(record.cleaned_text.as_deref(), Some("Quarterly report"));
        assert_eq!(record.page_count, 2);
        assert_eq!(record.raw_content_size(), 16);
        assert_eq!(record.content_hash.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_apply_failed() {
        let mut record = DocumentRecord::new(&DocumentInput::new("/in/report.pdf", Utc::now(), 9));
        apply_extraction(&mut record, result(ExtractionOutcome::failed("Timeout after 180s")));

        assert_eq!(record.error.as_deref(), Some("Timeout after 180s"));
        assert!(record.raw_text.is_none());
        assert!(record.cleaned_text.is_none());
        assert_eq!(record.extraction_duration, Duration::from_millis(300));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
