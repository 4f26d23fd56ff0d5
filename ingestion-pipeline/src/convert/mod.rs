pub mod encoding;
pub mod markdown;
pub mod provider;
pub mod vision;

use std::collections::HashMap;
use std::sync::Arc;

use common::error::AppError;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use self::provider::{
    DocumentAnalysisProvider, Paragraph, ParagraphRole, StructuredDocument, VisionProvider,
};

/// MIME types handled natively or through the analysis provider.
const SUPPORTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "text/markdown",
    "application/json",
    "image/png",
    "image/jpeg",
];

pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Unified markdown plus the structural record it was assembled from.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub markdown: String,
    pub structure: StructuredDocument,
    pub image_descriptions: HashMap<String, String>,
}

/// Converts a raw upload into markdown + structure (C5).
///
/// Text-like formats and PDFs are handled natively; Office formats need the
/// analysis provider; images need the vision provider. Vision calls run
/// under a semaphore so one image-heavy document cannot flood the provider.
pub struct DocumentConverter {
    analysis_provider: Option<Arc<dyn DocumentAnalysisProvider>>,
    vision_provider: Option<Arc<dyn VisionProvider>>,
    vision_semaphore: Arc<Semaphore>,
}

impl DocumentConverter {
    pub fn new(
        analysis_provider: Option<Arc<dyn DocumentAnalysisProvider>>,
        vision_provider: Option<Arc<dyn VisionProvider>>,
        max_concurrent_image_processing: usize,
    ) -> Self {
        Self {
            analysis_provider,
            vision_provider,
            vision_semaphore: Arc::new(Semaphore::new(max_concurrent_image_processing.max(1))),
        }
    }

    pub async fn convert(
        &self,
        data: &[u8],
        mime_type: &str,
    ) -> Result<ConvertedDocument, AppError> {
        let structure = match mime_type {
            "text/plain" | "text/markdown" => self.convert_text(data)?,
            "application/json" => convert_json(data)?,
            "application/pdf" => self.convert_pdf(data).await?,
            "image/png" | "image/jpeg" => image_structure(data),
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.ms-powerpoint"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                self.analyze_with_provider(data, mime_type).await?
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unsupported mime type: {other}"
                )))
            }
        };

        let image_descriptions = self.describe_images(&structure).await?;
        let markdown = markdown::assemble_markdown(&structure, &image_descriptions);

        if markdown.trim().is_empty() {
            return Err(AppError::DocumentProcessing {
                stage: "conversion".into(),
                message: "document produced no text".into(),
            });
        }

        info!(
            mime_type,
            paragraphs = structure.paragraphs.len(),
            tables = structure.tables.len(),
            images = structure.images.len(),
            markdown_chars = markdown.len(),
            "document converted"
        );

        Ok(ConvertedDocument {
            markdown,
            structure,
            image_descriptions,
        })
    }

    fn convert_text(&self, data: &[u8]) -> Result<StructuredDocument, AppError> {
        if encoding::is_binary(data) {
            return Err(AppError::DocumentProcessing {
                stage: "conversion".into(),
                message: "text upload looks binary".into(),
            });
        }

        let text = encoding::decode_text(data);
        Ok(text_structure(&text))
    }

    async fn convert_pdf(&self, data: &[u8]) -> Result<StructuredDocument, AppError> {
        // Prefer the analysis provider when configured: it understands
        // layout roles and tables. Local extraction is the fallback.
        if self.analysis_provider.is_some() {
            return self.analyze_with_provider(data, "application/pdf").await;
        }

        let data = data.to_vec();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
            .await?
            .map(|s| s.trim().to_string())
            .map_err(|e| AppError::DocumentProcessing {
                stage: "conversion".into(),
                message: format!("pdf text extraction failed: {e}"),
            })?;

        debug!(chars = text.len(), "extracted pdf text locally");
        Ok(text_structure(&text))
    }

    async fn analyze_with_provider(
        &self,
        data: &[u8],
        mime_type: &str,
    ) -> Result<StructuredDocument, AppError> {
        let Some(provider) = &self.analysis_provider else {
            return Err(AppError::DocumentProcessing {
                stage: "conversion".into(),
                message: format!("no document analysis provider configured for {mime_type}"),
            });
        };
        provider.analyze(data, mime_type).await
    }

    /// Describes every image region through the vision provider, bounded by
    /// the conversion semaphore. Missing provider means no descriptions, not
    /// an error.
    async fn describe_images(
        &self,
        structure: &StructuredDocument,
    ) -> Result<HashMap<String, String>, AppError> {
        let Some(provider) = &self.vision_provider else {
            if !structure.images.is_empty() {
                debug!(
                    images = structure.images.len(),
                    "no vision provider configured, skipping image description"
                );
            }
            return Ok(HashMap::new());
        };

        let mut futures = FuturesUnordered::new();
        for image in structure.images.iter().filter(|i| !i.data.is_empty()) {
            let provider = Arc::clone(provider);
            let semaphore = Arc::clone(&self.vision_semaphore);
            let id = image.id.clone();
            let data = image.data.clone();
            futures.push(async move {
                let _permit = semaphore.acquire_owned().await;
                let description = provider.describe_image(&data).await;
                (id, description)
            });
        }

        let mut descriptions = HashMap::new();
        while let Some((id, result)) = futures.next().await {
            match result {
                Ok(description) => {
                    descriptions.insert(id, description);
                }
                Err(err) => warn!(image_id = %id, error = %err, "image description failed"),
            }
        }

        Ok(descriptions)
    }
}

/// Builds a structural record from plain or markdown text: header lines keep
/// their roles, everything else is body, split on blank lines.
fn text_structure(text: &str) -> StructuredDocument {
    let mut paragraphs = Vec::new();

    for block in crate::chunking::markdown_parser::split_paragraphs(text) {
        for line_group in split_header_lines(&block) {
            paragraphs.push(line_group);
        }
    }

    StructuredDocument {
        paragraphs,
        ..StructuredDocument::default()
    }
}

/// Separates header lines from body lines inside one paragraph block so the
/// reassembled markdown keeps its structure.
fn split_header_lines(block: &str) -> Vec<Paragraph> {
    let mut out = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let trimmed = line.trim_start();
        let role = if let Some(rest) = trimmed.strip_prefix("# ") {
            Some((ParagraphRole::Title, rest))
        } else if let Some(rest) = trimmed.strip_prefix("## ") {
            Some((ParagraphRole::SectionHeading, rest))
        } else {
            None
        };

        match role {
            Some((role, content)) => {
                if !body_lines.is_empty() {
                    out.push(Paragraph::body(body_lines.join("\n")));
                    body_lines.clear();
                }
                out.push(Paragraph {
                    content: content.trim().to_string(),
                    role,
                });
            }
            None => body_lines.push(line),
        }
    }
    if !body_lines.is_empty() {
        out.push(Paragraph::body(body_lines.join("\n")));
    }

    out
}

fn convert_json(data: &[u8]) -> Result<StructuredDocument, AppError> {
    let value: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| AppError::Validation(format!("invalid json upload: {e}")))?;
    let pretty = serde_json::to_string_pretty(&value)
        .map_err(|e| AppError::InternalError(format!("json re-serialization failed: {e}")))?;

    Ok(StructuredDocument {
        paragraphs: vec![Paragraph::body(format!("```json\n{pretty}\n```"))],
        ..StructuredDocument::default()
    })
}

fn image_structure(data: &[u8]) -> StructuredDocument {
    StructuredDocument {
        images: vec![provider::ImageRegion {
            id: "image-0".to_string(),
            page_number: Some(1),
            paragraph_index: None,
            data: data.to_vec(),
        }],
        ..StructuredDocument::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedVision;

    #[async_trait]
    impl VisionProvider for FixedVision {
        async fn describe_image(&self, _data: &[u8]) -> Result<String, AppError> {
            Ok("a line chart".to_string())
        }
    }

    fn converter() -> DocumentConverter {
        DocumentConverter::new(None, None, 3)
    }

    #[tokio::test]
    async fn markdown_passes_through_with_header_roles() {
        let text = "# Title\n\nBody paragraph.\n\n## Section\n\nMore body.";
        let converted = converter()
            .convert(text.as_bytes(), "text/markdown")
            .await
            .expect("convert");

        assert!(converted.markdown.contains("# Title"));
        assert!(converted.markdown.contains("## Section"));
        assert_eq!(
            converted.structure.paragraphs[0].role,
            ParagraphRole::Title
        );
        assert!(converted
            .structure
            .paragraphs
            .iter()
            .any(|p| p.role == ParagraphRole::SectionHeading));
    }

    #[tokio::test]
    async fn json_uploads_are_pretty_printed() {
        let raw = br#"{"b":1,"a":[1,2]}"#;
        let converted = converter()
            .convert(raw, "application/json")
            .await
            .expect("convert");

        assert!(converted.markdown.starts_with("```json"));
        assert!(converted.markdown.contains("  \"a\": ["));
    }

    #[tokio::test]
    async fn office_without_provider_is_a_processing_error() {
        let result = converter()
            .convert(
                b"PK...",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            )
            .await;
        assert!(matches!(
            result,
            Err(AppError::DocumentProcessing { stage, .. }) if stage == "conversion"
        ));
    }

    #[tokio::test]
    async fn unsupported_mime_is_rejected() {
        let result = converter().convert(b"x", "application/zip").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn images_are_described_when_a_vision_provider_exists() {
        let converter = DocumentConverter::new(None, Some(Arc::new(FixedVision)), 2);
        let converted = converter
            .convert(&[0x89, 0x50, 0x4e, 0x47], "image/png")
            .await
            .expect("convert");

        assert!(converted.markdown.contains("[Image: a line chart]"));
        assert_eq!(
            converted.image_descriptions.get("image-0").map(String::as_str),
            Some("a line chart")
        );
    }

    #[tokio::test]
    async fn image_without_vision_provider_yields_no_text() {
        let result = converter().convert(&[0x89, 0x50], "image/png").await;
        // No provider means no description, which means an empty document.
        assert!(matches!(
            result,
            Err(AppError::DocumentProcessing { .. })
        ));
    }

    #[tokio::test]
    async fn binary_text_uploads_are_refused() {
        let result = converter().convert(b"\x00\x01\x02", "text/plain").await;
        assert!(matches!(result, Err(AppError::DocumentProcessing { .. })));
    }
}
