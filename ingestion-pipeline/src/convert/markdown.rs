use std::collections::HashMap;

use super::provider::{ImageRegion, ParagraphRole, StructuredDocument, Table};

/// Escapes pipes and newlines so cell content cannot break table rows.
pub fn escape_table_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

/// Renders one table; empty tables render to nothing.
pub fn render_table(table: &Table) -> String {
    if table.headers.is_empty() || table.rows.is_empty() {
        return String::new();
    }

    let headers: Vec<String> = table.headers.iter().map(|h| escape_table_cell(h)).collect();
    let mut lines = Vec::with_capacity(table.rows.len() + 2);
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; headers.len()].join(" | ")));
    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(|c| escape_table_cell(c)).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }

    lines.join("\n")
}

/// Assembles the unified markdown rendition from a structural record.
///
/// Role policy: `title` → `#`, `sectionHeading` → `##`, header/footer →
/// italic, `pageNumber` → dropped. Image descriptions are inlined at their
/// anchored paragraph as `[Image: …]`; unanchored ones land after the body.
/// Tables collect under a trailing "Tables" section.
pub fn assemble_markdown(
    structure: &StructuredDocument,
    image_descriptions: &HashMap<String, String>,
) -> String {
    let mut anchored: HashMap<usize, Vec<&ImageRegion>> = HashMap::new();
    let mut unanchored: Vec<&ImageRegion> = Vec::new();
    for image in &structure.images {
        match image.paragraph_index {
            Some(index) => anchored.entry(index).or_default().push(image),
            None => unanchored.push(image),
        }
    }

    let mut blocks: Vec<String> = Vec::new();

    for (index, paragraph) in structure.paragraphs.iter().enumerate() {
        let content = paragraph.content.trim();
        if !content.is_empty() {
            match paragraph.role {
                ParagraphRole::Title => blocks.push(format!("# {content}")),
                ParagraphRole::SectionHeading => blocks.push(format!("## {content}")),
                ParagraphRole::PageHeader | ParagraphRole::PageFooter => {
                    blocks.push(format!("*{content}*"));
                }
                ParagraphRole::PageNumber => {}
                ParagraphRole::Body => blocks.push(content.to_string()),
            }
        }

        if let Some(images) = anchored.get(&index) {
            for image in images {
                if let Some(description) = image_descriptions.get(&image.id) {
                    blocks.push(format!("[Image: {description}]"));
                }
            }
        }
    }

    for image in unanchored {
        if let Some(description) = image_descriptions.get(&image.id) {
            blocks.push(format!("[Image: {description}]"));
        }
    }

    let rendered_tables: Vec<String> = structure
        .tables
        .iter()
        .map(render_table)
        .filter(|t| !t.is_empty())
        .collect();
    if !rendered_tables.is_empty() {
        blocks.push("## Tables".to_string());
        blocks.extend(rendered_tables);
    }

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::provider::Paragraph;

    #[test]
    fn role_policy_is_applied() {
        let structure = StructuredDocument {
            paragraphs: vec![
                Paragraph {
                    content: "Annual Report".into(),
                    role: ParagraphRole::Title,
                },
                Paragraph {
                    content: "Confidential".into(),
                    role: ParagraphRole::PageHeader,
                },
                Paragraph {
                    content: "Revenue".into(),
                    role: ParagraphRole::SectionHeading,
                },
                Paragraph::body("Revenue grew by 12%."),
                Paragraph {
                    content: "3".into(),
                    role: ParagraphRole::PageNumber,
                },
            ],
            ..StructuredDocument::default()
        };

        let markdown = assemble_markdown(&structure, &HashMap::new());
        assert!(markdown.contains("# Annual Report"));
        assert!(markdown.contains("*Confidential*"));
        assert!(markdown.contains("## Revenue"));
        assert!(markdown.contains("Revenue grew by 12%."));
        // Page numbers are dropped entirely.
        assert!(!markdown.contains("\n3\n"));
        assert!(!markdown.ends_with('3'));
    }

    #[test]
    fn tables_collect_under_a_trailing_section_with_escaped_cells() {
        let structure = StructuredDocument {
            paragraphs: vec![Paragraph::body("Body text.")],
            tables: vec![Table {
                headers: vec!["Name".into(), "Notes".into()],
                rows: vec![vec!["a|b".into(), "line1\nline2".into()]],
                page_number: Some(1),
            }],
            ..StructuredDocument::default()
        };

        let markdown = assemble_markdown(&structure, &HashMap::new());
        let tables_at = markdown.find("## Tables").expect("tables section");
        assert!(tables_at > markdown.find("Body text.").unwrap());
        assert!(markdown.contains("a\\|b"));
        assert!(markdown.contains("line1 line2"));
        assert!(markdown.contains("| --- | --- |"));
    }

    #[test]
    fn image_descriptions_are_inlined_at_their_anchor() {
        let structure = StructuredDocument {
            paragraphs: vec![Paragraph::body("Before."), Paragraph::body("After.")],
            images: vec![ImageRegion {
                id: "img-1".into(),
                page_number: Some(1),
                paragraph_index: Some(0),
                data: Vec::new(),
            }],
            ..StructuredDocument::default()
        };

        let mut descriptions = HashMap::new();
        descriptions.insert("img-1".to_string(), "a bar chart of sales".to_string());

        let markdown = assemble_markdown(&structure, &descriptions);
        let image_at = markdown.find("[Image: a bar chart of sales]").expect("image");
        assert!(image_at > markdown.find("Before.").unwrap());
        assert!(image_at < markdown.find("After.").unwrap());
    }
}
