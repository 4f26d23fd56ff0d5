use common::{error::AppError, utils::tokenizer::Tokenizer};

use super::{markdown_parser, Chunk, ChunkStrategy, ChunkType, ChunkingOptions};

/// Parent/child chunker.
///
/// Each sufficiently large section produces one parent chunk holding a short
/// summary of the section (first meaningful paragraph under the bolded
/// title), followed by child chunks sliding a `chunk_size`/`chunk_overlap`
/// token window over the section body. Children carry a snapshot of the
/// parent summary. Sections at or below `min_chunk_size` tokens stay
/// standalone.
///
/// Sections larger than `chunk_size * parent_chunk_multiplier` tokens are
/// split into several parent segments at paragraph boundaries, each with its
/// own children.
pub fn chunk(
    tokenizer: &Tokenizer,
    text: &str,
    options: &ChunkingOptions,
) -> Result<Vec<Chunk>, AppError> {
    let sections = markdown_parser::parse(text);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut next_index = 0usize;

    for section in &sections {
        let body = section.content.trim();
        if body.is_empty() && section.title.is_empty() {
            continue;
        }

        let body_tokens = tokenizer.count(body);

        if body_tokens <= options.min_chunk_size {
            if body.is_empty() {
                continue;
            }
            let mut chunk = Chunk::new(
                body.to_string(),
                next_index,
                body_tokens,
                ChunkStrategy::Hierarchical,
            );
            chunk.section_title = non_empty(&section.title);
            chunk.hierarchy_path = non_empty(&section.hierarchy_path);
            chunks.push(chunk);
            next_index += 1;
            continue;
        }

        for segment in split_into_parent_segments(tokenizer, body, options) {
            emit_parent_and_children(
                tokenizer,
                section,
                &segment,
                options,
                &mut chunks,
                &mut next_index,
            )?;
        }
    }

    Ok(chunks)
}

fn emit_parent_and_children(
    tokenizer: &Tokenizer,
    section: &markdown_parser::Section,
    segment: &str,
    options: &ChunkingOptions,
    chunks: &mut Vec<Chunk>,
    next_index: &mut usize,
) -> Result<(), AppError> {
    let summary = parent_summary(section, segment, options.parent_summary_max_length);
    let parent_index = *next_index;

    let mut parent = Chunk::new(
        summary.clone(),
        parent_index,
        tokenizer.count(&summary),
        ChunkStrategy::Hierarchical,
    );
    parent.chunk_type = ChunkType::Parent;
    parent.section_title = non_empty(&section.title);
    parent.hierarchy_path = non_empty(&section.hierarchy_path);
    chunks.push(parent);
    *next_index += 1;

    let tokens = tokenizer.encode(segment);
    let size = options.chunk_size;
    let overlap = options.chunk_overlap.min(size.saturating_sub(1));
    let mut start = 0usize;
    let mut local_index = 0usize;

    while start < tokens.len() {
        let end = (start + size).min(tokens.len());
        let window = &tokens[start..end];
        let text = tokenizer.decode(window)?;

        let mut child = Chunk::new(text, *next_index, window.len(), ChunkStrategy::Hierarchical);
        child.chunk_type = ChunkType::Child;
        child.parent_index = Some(parent_index);
        child.parent_summary = Some(summary.clone());
        child.section_title = non_empty(&section.title);
        child.hierarchy_path = non_empty(&section.hierarchy_path);
        child.token_window = Some((start, end));
        if local_index > 0 {
            child.has_overlap = true;
            child.overlap_tokens = overlap;
        }
        chunks.push(child);
        *next_index += 1;
        local_index += 1;

        if end >= tokens.len() {
            break;
        }
        start += size - overlap;
    }

    Ok(())
}

/// `**Title**: <first meaningful paragraph>` bounded by `max_length` chars.
fn parent_summary(section: &markdown_parser::Section, segment: &str, max_length: usize) -> String {
    let paragraph = markdown_parser::extract_first_paragraph(segment, max_length);
    if section.title.is_empty() {
        paragraph
    } else {
        format!("**{}**: {}", section.title, paragraph)
    }
}

/// Splits a section body into segments of at most
/// `chunk_size * parent_chunk_multiplier` tokens, packed greedily at
/// paragraph boundaries.
fn split_into_parent_segments(
    tokenizer: &Tokenizer,
    body: &str,
    options: &ChunkingOptions,
) -> Vec<String> {
    let cap = options.parent_segment_tokens();
    if tokenizer.count(body) <= cap {
        return vec![body.to_string()];
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for paragraph in markdown_parser::split_paragraphs(body) {
        let paragraph_tokens = tokenizer.count(&paragraph);
        if current_tokens + paragraph_tokens > cap && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
        current_tokens += paragraph_tokens;
    }
    if !current.is_empty() {
        segments.push(current);
    }

    if segments.is_empty() {
        vec![body.to_string()]
    } else {
        segments
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new("cl100k_base").expect("tokenizer")
    }

    fn options(size: usize, overlap: usize, min: usize) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: min,
            ..ChunkingOptions::default()
        }
    }

    fn three_section_doc() -> String {
        let body = "A meaningful opening paragraph describing the section.\n\n".to_string()
            + &"Detailed sentence with several words in it. ".repeat(20);
        format!(
            "# First\n{body}\n# Second\n{body}\n# Third\n{body}",
            body = body
        )
    }

    #[test]
    fn three_large_sections_produce_three_parents() {
        let tokenizer = tokenizer();
        let opts = options(100, 10, 20);
        let chunks = chunk(&tokenizer, &three_section_doc(), &opts).expect("chunk");

        let parents: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Parent)
            .collect();
        assert_eq!(parents.len(), 3);

        // Every child points at an existing parent index and carries that
        // parent's text verbatim.
        for child in chunks.iter().filter(|c| c.chunk_type == ChunkType::Child) {
            let parent_index = child.parent_index.expect("child must reference a parent");
            let parent = chunks
                .iter()
                .find(|c| c.chunk_index == parent_index && c.chunk_type == ChunkType::Parent)
                .expect("referenced parent must exist");
            assert_eq!(child.parent_summary.as_deref(), Some(parent.text.as_str()));
        }

        // Conversely, every parent has at least one child.
        for parent in &parents {
            assert!(
                chunks
                    .iter()
                    .any(|c| c.parent_index == Some(parent.chunk_index)),
                "parent {} has no children",
                parent.chunk_index
            );
        }

        // Parents never reference children.
        for parent in &parents {
            assert!(parent.parent_index.is_none());
            assert!(parent.parent_summary.is_none());
        }
    }

    #[test]
    fn parent_text_is_bolded_title_plus_first_paragraph() {
        let tokenizer = tokenizer();
        let opts = options(100, 10, 20);
        let chunks = chunk(&tokenizer, &three_section_doc(), &opts).expect("chunk");

        let parent = chunks
            .iter()
            .find(|c| c.chunk_type == ChunkType::Parent)
            .expect("parent");
        assert!(parent.text.starts_with("**First**: A meaningful opening"));
    }

    #[test]
    fn chunk_indices_are_dense_and_unique() {
        let tokenizer = tokenizer();
        let opts = options(100, 10, 20);
        let chunks = chunk(&tokenizer, &three_section_doc(), &opts).expect("chunk");

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn small_sections_stay_standalone() {
        let tokenizer = tokenizer();
        let opts = options(100, 10, 50);
        let text = "# Tiny\njust a few words here\n\n# Also tiny\nanother short body";

        let chunks = chunk(&tokenizer, text, &opts).expect("chunk");
        assert_eq!(chunks.len(), 2);
        assert!(chunks
            .iter()
            .all(|c| c.chunk_type == ChunkType::Standalone));
    }

    #[test]
    fn children_carry_hierarchy_and_overlap_metadata() {
        let tokenizer = tokenizer();
        let opts = options(40, 8, 20);
        let body = "More and more descriptive text follows here. ".repeat(7);
        let text = format!("# Outer\ncontext\n## Inner\n{body}");

        let chunks = chunk(&tokenizer, &text, &opts).expect("chunk");
        let children: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Child)
            .collect();
        assert!(children.len() >= 2);
        assert_eq!(
            children[0].hierarchy_path.as_deref(),
            Some("Outer > Inner")
        );
        assert!(!children[0].has_overlap);
        assert!(children[1].has_overlap);
        assert_eq!(children[1].overlap_tokens, 8);
    }
}
