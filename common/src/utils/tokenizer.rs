use tiktoken_rs::CoreBPE;

use crate::error::AppError;

/// Byte-pair tokenizer selected by encoding name.
///
/// All chunk sizing in the ingestion pipeline is measured in tokens produced
/// by this type, so the same encoding must be used consistently for a
/// document from chunking through retrieval.
pub struct Tokenizer {
    bpe: CoreBPE,
    encoding: String,
}

impl Tokenizer {
    /// Builds a tokenizer for a named encoding. Unknown names are a
    /// validation error rather than a silent fallback.
    pub fn new(encoding_name: &str) -> Result<Self, AppError> {
        let bpe = match encoding_name {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => {
                return Err(AppError::Validation(format!(
                    "unknown tokenizer encoding: {other}"
                )))
            }
        }
        .map_err(|e| AppError::InternalError(format!("failed to load tokenizer: {e}")))?;

        Ok(Self {
            bpe,
            encoding: encoding_name.to_string(),
        })
    }

    pub fn encoding_name(&self) -> &str {
        &self.encoding
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    pub fn decode(&self, tokens: &[u32]) -> Result<String, AppError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| AppError::InternalError(format!("failed to decode tokens: {e}")))
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Truncates `text` to at most `max_tokens` tokens.
    pub fn truncate_to(&self, text: &str, max_tokens: usize) -> Result<String, AppError> {
        let tokens = self.encode(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }
        self.decode(&tokens[..max_tokens])
    }

    /// Returns the last `n` tokens of `text` as text, used to build overlap
    /// prefixes between consecutive chunks.
    pub fn last_n(&self, text: &str, n: usize) -> Result<String, AppError> {
        let tokens = self.encode(text);
        if tokens.len() <= n {
            return Ok(text.to_string());
        }
        let start = tokens.len() - n;
        self.decode(&tokens[start..])
    }
}
