use common::{error::AppError, utils::tokenizer::Tokenizer};
use regex::Regex;
use std::sync::OnceLock;

use super::{markdown_parser, Chunk, ChunkStrategy, ChunkingOptions};

/// Marker prepended to overlap text carried into the next chunk.
const OVERLAP_MARKER: &str = "...";

struct PendingChunk {
    text: String,
    section_title: Option<String>,
    hierarchy_path: Option<String>,
}

/// Section-aware chunker: consecutive small sections are aggregated while
/// they fit in `chunk_size`; oversized sections are split at sentence
/// boundaries. Optionally the tail of each chunk is repeated at the head of
/// the next one, marked with an ellipsis.
pub fn chunk(
    tokenizer: &Tokenizer,
    text: &str,
    options: &ChunkingOptions,
) -> Result<Vec<Chunk>, AppError> {
    let sections = markdown_parser::parse(text);

    let mut pending: Vec<PendingChunk> = Vec::new();
    let mut current_parts: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut current_title: Option<String> = None;
    let mut current_path: Option<String> = None;

    let flush = |parts: &mut Vec<String>,
                 tokens: &mut usize,
                 title: &mut Option<String>,
                 path: &mut Option<String>,
                 pending: &mut Vec<PendingChunk>| {
        if parts.is_empty() {
            return;
        }
        pending.push(PendingChunk {
            text: parts.join("\n\n"),
            section_title: title.take(),
            hierarchy_path: path.take(),
        });
        parts.clear();
        *tokens = 0;
    };

    for section in &sections {
        let section_text = render_section(section);
        if section_text.trim().is_empty() {
            continue;
        }
        let section_tokens = tokenizer.count(&section_text);

        if section_tokens > options.chunk_size {
            // Oversized section: finish the running chunk, then split this
            // one at sentence boundaries.
            flush(
                &mut current_parts,
                &mut current_tokens,
                &mut current_title,
                &mut current_path,
                &mut pending,
            );

            for piece in split_large_section(tokenizer, &section_text, options.chunk_size) {
                pending.push(PendingChunk {
                    text: piece,
                    section_title: non_empty(&section.title),
                    hierarchy_path: non_empty(&section.hierarchy_path),
                });
            }
        } else if current_tokens + section_tokens > options.chunk_size {
            flush(
                &mut current_parts,
                &mut current_tokens,
                &mut current_title,
                &mut current_path,
                &mut pending,
            );
            current_title = non_empty(&section.title);
            current_path = non_empty(&section.hierarchy_path);
            current_parts.push(section_text);
            current_tokens = section_tokens;
        } else {
            if current_parts.is_empty() {
                current_title = non_empty(&section.title);
                current_path = non_empty(&section.hierarchy_path);
            }
            current_parts.push(section_text);
            current_tokens += section_tokens;
        }
    }
    flush(
        &mut current_parts,
        &mut current_tokens,
        &mut current_title,
        &mut current_path,
        &mut pending,
    );

    // Second pass: stamp indices and weave in the overlap tails.
    let mut chunks = Vec::with_capacity(pending.len());
    let mut previous_text: Option<String> = None;

    for (index, piece) in pending.into_iter().enumerate() {
        let (text, has_overlap, overlap_tokens) = match (&previous_text, options.semantic_overlap_enabled)
        {
            (Some(prev), true) if index > 0 => {
                let tail = tokenizer.last_n(prev, options.semantic_overlap_tokens)?;
                (
                    format!("{OVERLAP_MARKER} {}\n\n{}", tail.trim(), piece.text),
                    true,
                    options.semantic_overlap_tokens,
                )
            }
            _ => (piece.text, false, 0),
        };

        previous_text = Some(text.clone());

        let token_count = tokenizer.count(&text);
        let mut chunk = Chunk::new(text, index, token_count, ChunkStrategy::Semantic);
        chunk.section_title = piece.section_title;
        chunk.hierarchy_path = piece.hierarchy_path;
        chunk.has_overlap = has_overlap;
        chunk.overlap_tokens = overlap_tokens;
        chunks.push(chunk);
    }

    Ok(chunks)
}

fn render_section(section: &markdown_parser::Section) -> String {
    if section.title.is_empty() {
        section.content.clone()
    } else if section.content.is_empty() {
        format!("{} {}", "#".repeat(section.level.max(1)), section.title)
    } else {
        format!(
            "{} {}\n{}",
            "#".repeat(section.level.max(1)),
            section.title,
            section.content
        )
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn sentence_boundary() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("valid sentence regex"))
}

/// Splits text into sentences and re-packs them greedily under `max_tokens`.
/// A single sentence larger than the budget becomes its own (oversized)
/// chunk; the size warning in the engine surfaces it.
fn split_large_section(tokenizer: &Tokenizer, text: &str, max_tokens: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_end = 0usize;
    for m in sentence_boundary().find_iter(text) {
        sentences.push(&text[last_end..m.end()]);
        last_end = m.end();
    }
    if last_end < text.len() {
        sentences.push(&text[last_end..]);
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let candidate_tokens = tokenizer.count(&current) + tokenizer.count(sentence);
        if !current.is_empty() && candidate_tokens > max_tokens {
            pieces.push(current.trim().to_string());
            current = sentence.to_string();
        } else {
            current.push_str(sentence);
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }

    if pieces.is_empty() {
        vec![text.to_string()]
    } else {
        pieces
    }
}
