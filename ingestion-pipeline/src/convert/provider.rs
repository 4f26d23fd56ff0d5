use async_trait::async_trait;
use common::error::AppError;
use serde::{Deserialize, Serialize};

/// Role assigned to a paragraph by document analysis. Drives the
/// role-to-markdown policy during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParagraphRole {
    Title,
    SectionHeading,
    PageHeader,
    PageFooter,
    PageNumber,
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub content: String,
    pub role: ParagraphRole,
}

impl Paragraph {
    pub fn body(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: ParagraphRole::Body,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
}

/// An image-bearing region extracted from the source document. `data` holds
/// the raw image bytes until vision description replaces them with text;
/// `paragraph_index` anchors the description in the assembled markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRegion {
    pub id: String,
    pub page_number: Option<u32>,
    pub paragraph_index: Option<usize>,
    #[serde(default, skip_serializing)]
    pub data: Vec<u8>,
}

/// The structural record produced by conversion: everything downstream
/// stages need besides the unified markdown itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub pages: Vec<Page>,
    pub paragraphs: Vec<Paragraph>,
    pub tables: Vec<Table>,
    pub styles: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageRegion>,
}

/// External document-analysis service (Office formats, scanned PDFs).
/// Deliberately thin: the platform only depends on this behavioral contract,
/// never on a vendor SDK.
#[async_trait]
pub trait DocumentAnalysisProvider: Send + Sync {
    async fn analyze(&self, data: &[u8], mime_type: &str) -> Result<StructuredDocument, AppError>;
}

/// External image-description service used to inline `[Image: …]` text.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe_image(&self, data: &[u8]) -> Result<String, AppError>;
}
