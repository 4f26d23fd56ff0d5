use common::{error::AppError, utils::tokenizer::Tokenizer};
use tracing::warn;

use super::{Chunk, ChunkStrategy, ChunkingOptions};

/// Token-window sliding chunker: fixed windows of `chunk_size` tokens,
/// advancing by `chunk_size - chunk_overlap`.
///
/// The first chunk carries no overlap marker; every later chunk repeats the
/// last `chunk_overlap` tokens of its predecessor.
pub fn chunk(
    tokenizer: &Tokenizer,
    text: &str,
    options: &ChunkingOptions,
) -> Result<Vec<Chunk>, AppError> {
    let tokens = tokenizer.encode(text);
    let total_tokens = tokens.len();
    let size = options.chunk_size;
    let overlap = options.chunk_overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    while start < total_tokens {
        let end = (start + size).min(total_tokens);
        let window = &tokens[start..end];
        let text = tokenizer.decode(window)?;

        let mut chunk = Chunk::new(text, chunk_index, window.len(), ChunkStrategy::Simple);
        chunk.token_window = Some((start, end));
        if chunk_index > 0 {
            chunk.has_overlap = true;
            chunk.overlap_tokens = overlap;
        }
        chunks.push(chunk);
        chunk_index += 1;

        if end >= total_tokens {
            break;
        }

        // A non-positive advance would never terminate.
        if overlap >= size {
            warn!(
                chunk_size = size,
                chunk_overlap = overlap,
                "overlap >= chunk size, stopping after first window"
            );
            break;
        }
        start += size - overlap;
    }

    Ok(chunks)
}
