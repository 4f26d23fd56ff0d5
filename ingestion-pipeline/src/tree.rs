use serde::{Deserialize, Serialize};
use tracing::info;

use crate::convert::provider::{ParagraphRole, StructuredDocument, Table};

/// A titled span of document content at level 1 (`title`) or 2
/// (`sectionHeading`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSection {
    pub title: String,
    pub level: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeImage {
    pub id: String,
    pub page_number: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeStructure {
    pub sections: Vec<TreeSection>,
    pub tables: Vec<Table>,
    pub images: Vec<TreeImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub total_pages: usize,
    pub total_sections: usize,
    pub total_tables: usize,
    pub total_images: usize,
}

/// The hierarchical view of a converted document that enrichment stages
/// (summary, Q&A) work from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub text: String,
    pub structure: TreeStructure,
    pub metadata: TreeMetadata,
}

/// Folds the paragraph stream into a section tree by role: each title or
/// section heading opens a section, everything else accumulates into the
/// current one. Content before the first heading lands in a default
/// "Main Content" section.
pub fn build_tree(
    markdown: &str,
    structure: &StructuredDocument,
    image_descriptions: &std::collections::HashMap<String, String>,
) -> DocumentTree {
    let mut sections: Vec<TreeSection> = Vec::new();
    let mut current: Option<TreeSection> = None;

    for paragraph in &structure.paragraphs {
        let content = paragraph.content.trim();
        if content.is_empty() {
            continue;
        }

        match paragraph.role {
            ParagraphRole::Title | ParagraphRole::SectionHeading => {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(TreeSection {
                    title: content.to_string(),
                    level: if paragraph.role == ParagraphRole::Title {
                        1
                    } else {
                        2
                    },
                    content: String::new(),
                });
            }
            ParagraphRole::PageNumber => {}
            _ => match current.as_mut() {
                Some(section) => {
                    if !section.content.is_empty() {
                        section.content.push('\n');
                    }
                    section.content.push_str(content);
                }
                None => {
                    current = Some(TreeSection {
                        title: "Main Content".to_string(),
                        level: 1,
                        content: content.to_string(),
                    });
                }
            },
        }
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }

    let images: Vec<TreeImage> = structure
        .images
        .iter()
        .map(|image| TreeImage {
            id: image.id.clone(),
            page_number: image.page_number,
            description: image_descriptions.get(&image.id).cloned(),
        })
        .collect();

    let metadata = TreeMetadata {
        total_pages: structure.pages.len(),
        total_sections: sections.len(),
        total_tables: structure.tables.len(),
        total_images: images.len(),
    };

    info!(
        sections = metadata.total_sections,
        tables = metadata.total_tables,
        images = metadata.total_images,
        "document tree built"
    );

    DocumentTree {
        text: markdown.to_string(),
        structure: TreeStructure {
            sections,
            tables: structure.tables.clone(),
            images,
        },
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::provider::{Page, Paragraph};
    use std::collections::HashMap;

    #[test]
    fn sections_open_on_title_and_heading_roles() {
        let structure = StructuredDocument {
            pages: vec![Page { number: 1 }],
            paragraphs: vec![
                Paragraph {
                    content: "Report".into(),
                    role: ParagraphRole::Title,
                },
                Paragraph::body("Intro text."),
                Paragraph {
                    content: "Findings".into(),
                    role: ParagraphRole::SectionHeading,
                },
                Paragraph::body("Finding one."),
                Paragraph::body("Finding two."),
            ],
            ..StructuredDocument::default()
        };

        let tree = build_tree("md", &structure, &HashMap::new());

        assert_eq!(tree.structure.sections.len(), 2);
        assert_eq!(tree.structure.sections[0].title, "Report");
        assert_eq!(tree.structure.sections[0].level, 1);
        assert_eq!(tree.structure.sections[1].title, "Findings");
        assert_eq!(tree.structure.sections[1].level, 2);
        assert!(tree.structure.sections[1]
            .content
            .contains("Finding two."));
        assert_eq!(tree.metadata.total_sections, 2);
        assert_eq!(tree.metadata.total_pages, 1);
    }

    #[test]
    fn leading_body_content_gets_a_default_section() {
        let structure = StructuredDocument {
            paragraphs: vec![Paragraph::body("orphan content")],
            ..StructuredDocument::default()
        };

        let tree = build_tree("md", &structure, &HashMap::new());
        assert_eq!(tree.structure.sections.len(), 1);
        assert_eq!(tree.structure.sections[0].title, "Main Content");
    }

    #[test]
    fn images_carry_their_descriptions() {
        let structure = StructuredDocument {
            images: vec![crate::convert::provider::ImageRegion {
                id: "img-1".into(),
                page_number: Some(2),
                paragraph_index: None,
                data: Vec::new(),
            }],
            ..StructuredDocument::default()
        };
        let mut descriptions = HashMap::new();
        descriptions.insert("img-1".to_string(), "a pie chart".to_string());

        let tree = build_tree("md", &structure, &descriptions);
        assert_eq!(tree.structure.images.len(), 1);
        assert_eq!(
            tree.structure.images[0].description.as_deref(),
            Some("a pie chart")
        );
        assert_eq!(tree.metadata.total_images, 1);
    }
}
