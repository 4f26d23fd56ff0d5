use std::sync::OnceLock;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use common::{error::AppError, storage::types::query::Citation};
use regex::Regex;
use tokio::time::timeout;
use tracing::info;

use crate::RetrievedChunk;

const GENERATOR_SYSTEM: &str = "You are a helpful assistant that answers questions based on \
    provided context. Always cite your sources using [1], [2], etc.";
const GENERATOR_MAX_TOKENS: u32 = 500;
const GENERATOR_TEMPERATURE: f32 = 0.3;

/// Canned response when retrieval produced nothing to ground an answer in.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information to answer this question.";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Composes the final cited answer from the reranked candidate set.
pub struct AnswerGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout,
        }
    }

    pub async fn generate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, AppError> {
        if chunks.is_empty() {
            return Ok(GeneratedAnswer {
                answer: INSUFFICIENT_INFORMATION.to_string(),
                citations: Vec::new(),
            });
        }

        let context = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.payload.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "Answer the question based on the provided context. Include citation numbers \
            [1], [2], etc. when referencing specific information.\n\n\
            Question: {query}\n\n\
            Context:\n{context}\n\n\
            Answer (with citations):"
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(GENERATOR_SYSTEM).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .max_tokens(GENERATOR_MAX_TOKENS)
            .temperature(GENERATOR_TEMPERATURE)
            .build()?;

        let response = timeout(self.call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout(self.call_timeout.as_secs()))??;

        let answer = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AppError::LLMParsing("empty generation response".into()))?;

        let citations = extract_citations(&answer, chunks);
        info!(
            citations = citations.len(),
            answer_chars = answer.len(),
            "answer generated"
        );

        Ok(GeneratedAnswer { answer, citations })
    }
}

fn citation_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"))
}

/// Scans the answer for `[n]` markers and emits one citation per referenced
/// candidate, in candidate order. Markers outside `1..=len` are ignored.
pub fn extract_citations(answer: &str, chunks: &[RetrievedChunk]) -> Vec<Citation> {
    let mut referenced: Vec<usize> = Vec::new();
    for capture in citation_marker().captures_iter(answer) {
        if let Ok(index) = capture[1].parse::<usize>() {
            if index >= 1 && index <= chunks.len() && !referenced.contains(&index) {
                referenced.push(index);
            }
        }
    }
    referenced.sort_unstable();

    referenced
        .into_iter()
        .filter_map(|index| {
            chunks.get(index - 1).map(|chunk| Citation {
                index,
                chunk_id: chunk.id.clone(),
                snippet: chunk.payload.text.clone(),
                section: chunk.payload.section.clone(),
                document_id: chunk.payload.document_id.clone(),
                content_type: chunk.payload.content_type.as_str().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::vector::{ContentType, Payload};

    fn chunk(id: &str, text: &str) -> RetrievedChunk {
        let mut payload = Payload::new("doc-1", ContentType::Chunk, text);
        payload.section = Some("Policies".into());
        RetrievedChunk::new(id.to_string(), 0.5, payload)
    }

    #[test]
    fn only_referenced_markers_become_citations() {
        let chunks = vec![
            chunk("c1", "first candidate"),
            chunk("c2", "second candidate"),
            chunk("c3", "third candidate"),
            chunk("c4", "fourth candidate"),
        ];

        let citations = extract_citations("Yes [1] and partly [3].", &chunks);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].index, 1);
        assert_eq!(citations[0].chunk_id, "c1");
        assert_eq!(citations[0].snippet, "first candidate");
        assert_eq!(citations[1].index, 3);
        assert_eq!(citations[1].chunk_id, "c3");
        assert!(citations.iter().all(|c| c.index != 2 && c.index != 4));
    }

    #[test]
    fn out_of_range_markers_are_ignored() {
        let chunks = vec![chunk("c1", "only candidate")];
        let citations = extract_citations("See [1], [2] and [99].", &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].index, 1);
    }

    #[test]
    fn repeated_markers_emit_one_citation() {
        let chunks = vec![chunk("c1", "a"), chunk("c2", "b")];
        let citations = extract_citations("[2] then [2] again and [1].", &chunks);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].index, 1);
        assert_eq!(citations[1].index, 2);
    }

    #[test]
    fn citations_carry_section_and_document() {
        let chunks = vec![chunk("c1", "text")];
        let citations = extract_citations("[1]", &chunks);
        assert_eq!(citations[0].section.as_deref(), Some("Policies"));
        assert_eq!(citations[0].document_id, "doc-1");
        assert_eq!(citations[0].content_type, "chunk");
    }
}
