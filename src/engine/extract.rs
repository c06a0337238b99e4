// ── Document Extraction Port ───────────────────────────────────────────────
// PDF / DOCX text extraction is an external collaborator: the engine owns
// the limits and the structured-failure contract, the parsing itself lives
// behind `DocumentParser`. Too-large or too-long documents come back as
// errors the router can show the user, never as panics.

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::atoms::constants::{MAX_DOCUMENT_PAGES, MAX_FILE_SIZE_BYTES};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ExtractedContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(DocumentKind::Pdf)
        } else if lower.ends_with(".docx") || lower.ends_with(".doc") {
            Some(DocumentKind::Docx)
        } else {
            None
        }
    }
}

/// What a concrete parser produces.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub text: String,
    pub title: Option<String>,
    pub page_count: Option<u32>,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, kind: DocumentKind, bytes: &[u8]) -> EngineResult<ParsedDocument>;
}

/// Limit enforcement + delegation to the configured parser.
#[derive(Clone, Default)]
pub struct DocumentExtractor {
    parser: Option<Arc<dyn DocumentParser>>,
}

impl DocumentExtractor {
    pub fn new(parser: Option<Arc<dyn DocumentParser>>) -> Self {
        DocumentExtractor { parser }
    }

    pub async fn extract(
        &self,
        kind: DocumentKind,
        bytes: &[u8],
        filename: &str,
    ) -> EngineResult<ExtractedContent> {
        if bytes.len() as u64 > MAX_FILE_SIZE_BYTES {
            return Err(EngineError::InputRejected(format!(
                "Файл слишком большой ({}MB). Максимум: {}MB",
                bytes.len() / 1024 / 1024,
                MAX_FILE_SIZE_BYTES / 1024 / 1024
            )));
        }

        let parser = self.parser.as_ref().ok_or_else(|| {
            EngineError::ExtractionFailed(format!("no document parser configured for {filename}"))
        })?;

        let parsed = parser.parse(kind, bytes).await?;
        if let Some(pages) = parsed.page_count {
            if pages > MAX_DOCUMENT_PAGES {
                return Err(EngineError::ExtractionFailed(format!(
                    "Документ слишком длинный ({pages} страниц). Максимум: {MAX_DOCUMENT_PAGES}"
                )));
            }
        }
        if parsed.text.trim().is_empty() {
            return Err(EngineError::ExtractionFailed(format!(
                "Не удалось извлечь текст из {filename}"
            )));
        }

        info!(
            "[extract] {} → {} chars, {:?} pages",
            filename,
            parsed.text.len(),
            parsed.page_count
        );
        Ok(ExtractedContent {
            text: parsed.text,
            title: parsed.title,
            source_type: match kind {
                DocumentKind::Pdf => "pdf".into(),
                DocumentKind::Docx => "docx".into(),
            },
            metadata: serde_json::json!({
                "filename": filename,
                "page_count": parsed.page_count,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedParser(ParsedDocument);

    #[async_trait]
    impl DocumentParser for FixedParser {
        async fn parse(&self, _kind: DocumentKind, _bytes: &[u8]) -> EngineResult<ParsedDocument> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_parsing() {
        let extractor = DocumentExtractor::new(None);
        let huge = vec![0u8; (MAX_FILE_SIZE_BYTES + 1) as usize];
        let err = extractor.extract(DocumentKind::Pdf, &huge, "big.pdf").await.unwrap_err();
        assert!(matches!(err, EngineError::InputRejected(_)));
    }

    #[tokio::test]
    async fn page_limit_is_a_structured_failure() {
        let extractor = DocumentExtractor::new(Some(Arc::new(FixedParser(ParsedDocument {
            text: "text".into(),
            title: None,
            page_count: Some(MAX_DOCUMENT_PAGES + 1),
        }))));
        let err = extractor.extract(DocumentKind::Pdf, b"x", "long.pdf").await.unwrap_err();
        assert!(matches!(err, EngineError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn happy_path_carries_metadata() {
        let extractor = DocumentExtractor::new(Some(Arc::new(FixedParser(ParsedDocument {
            text: "договор аренды".into(),
            title: Some("Договор".into()),
            page_count: Some(3),
        }))));
        let out = extractor.extract(DocumentKind::Pdf, b"x", "contract.pdf").await.unwrap();
        assert_eq!(out.source_type, "pdf");
        assert_eq!(out.metadata["page_count"], 3);
        assert_eq!(out.title.as_deref(), Some("Договор"));
    }

    #[test]
    fn kind_detection_from_filename() {
        assert_eq!(DocumentKind::from_filename("a.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("b.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_filename("c.txt"), None);
    }
}
