//! Resume text extraction ahead of profile parsing.

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Unsupported document type: {0}")]
    Unsupported(String),

    #[error("Could not extract text: {0}")]
    Extraction(String),

    #[error("Document contains no text")]
    Empty,

    #[error("Extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    /// Classifies an upload by content type, falling back to the file
    /// extension when the browser sends a generic type.
    pub fn detect(content_type: Option<&str>, file_name: Option<&str>) -> Result<Self, DocumentError> {
        let mime = content_type
            .map(|c| c.split(';').next().unwrap_or(c).trim().to_ascii_lowercase())
            .unwrap_or_default();
        match mime.as_str() {
            "application/pdf" => return Ok(Self::Pdf),
            "text/plain" | "text/markdown" => return Ok(Self::PlainText),
            "" | "application/octet-stream" => {}
            other => return Err(DocumentError::Unsupported(other.to_string())),
        }
        let extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt") | Some("md") => Ok(Self::PlainText),
            _ => Err(DocumentError::Unsupported(
                file_name.unwrap_or("unnamed upload").to_string(),
            )),
        }
    }
}

/// Extracts plain text. PDF parsing is CPU-bound and runs on the blocking pool.
pub async fn extract_text(kind: DocumentKind, bytes: Bytes) -> Result<String, DocumentError> {
    let text = match kind {
        DocumentKind::PlainText => String::from_utf8_lossy(&bytes).into_owned(),
        DocumentKind::Pdf => {
            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| DocumentError::Extraction(e.to_string()))
            })
            .await??
        }
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(DocumentError::Empty);
    }
    debug!("Extracted {} chars from {:?} upload", text.len(), kind);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_content_type() {
        assert_eq!(DocumentKind::detect(Some("application/pdf"), None).unwrap(), DocumentKind::Pdf);
        assert_eq!(
            DocumentKind::detect(Some("text/plain; charset=utf-8"), None).unwrap(),
            DocumentKind::PlainText
        );
    }

    #[test]
    fn test_detect_falls_back_to_extension() {
        assert_eq!(
            DocumentKind::detect(Some("application/octet-stream"), Some("CV.PDF")).unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(DocumentKind::detect(None, Some("resume.md")).unwrap(), DocumentKind::PlainText);
    }

    #[test]
    fn test_detect_rejects_unsupported() {
        assert!(matches!(
            DocumentKind::detect(Some("image/png"), Some("me.png")),
            Err(DocumentError::Unsupported(_))
        ));
        assert!(DocumentKind::detect(None, Some("resume.docx")).is_err());
    }

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let text = extract_text(DocumentKind::PlainText, Bytes::from_static(b"  Alex Rivera\nEngineer \n"))
            .await
            .unwrap();
        assert_eq!(text, "Alex Rivera\nEngineer");
    }

    #[tokio::test]
    async fn test_blank_document_is_rejected() {
        let result = extract_text(DocumentKind::PlainText, Bytes::from_static(b"   ")).await;
        assert!(matches!(result, Err(DocumentError::Empty)));
    }
}
