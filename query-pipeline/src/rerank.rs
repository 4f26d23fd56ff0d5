use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use common::error::AppError;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::RetrievedChunk;

const RERANK_SYSTEM: &str = "You are a relevance ranking assistant.";
const RERANK_MAX_TOKENS: u32 = 50;
const CANDIDATE_PREVIEW_CHARS: usize = 500;

/// LLM relevance reranker: the model emits the indices of the most relevant
/// candidates, comma-separated; we parse, clamp and keep its order.
pub struct Reranker {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
}

impl Reranker {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout,
        }
    }

    /// Reorders `chunks` to the LLM's top `top_k`. Any failure (transport,
    /// parse, empty response) falls back to the input order truncated to
    /// `top_k`; reranking must never sink a query.
    pub async fn rerank(
        &self,
        query: &str,
        chunks: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        if chunks.is_empty() {
            return chunks;
        }

        let selected = match self.request_ranking(query, &chunks, top_k).await {
            Ok(content) => {
                let indices = parse_rerank_indices(&content, chunks.len());
                if indices.is_empty() {
                    warn!("reranker returned no usable indices, falling back to input order");
                    (0..chunks.len().min(top_k)).collect()
                } else {
                    indices
                }
            }
            Err(err) => {
                warn!(error = %err, "rerank call failed, falling back to input order");
                (0..chunks.len().min(top_k)).collect()
            }
        };

        let mut reranked = Vec::with_capacity(top_k.min(selected.len()));
        for index in selected.into_iter().take(top_k) {
            let Some(chunk) = chunks.get(index) else {
                continue;
            };
            let mut chunk = chunk.clone();
            chunk.rerank_position = Some(reranked.len() + 1);
            reranked.push(chunk);
        }

        info!(
            input = chunks.len(),
            output = reranked.len(),
            "reranking finished"
        );
        reranked
    }

    async fn request_ranking(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        top_k: usize,
    ) -> Result<String, AppError> {
        let listing = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let preview: String = chunk
                    .payload
                    .text
                    .chars()
                    .take(CANDIDATE_PREVIEW_CHARS)
                    .collect();
                format!("[{i}] {preview}")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "Given the query and document chunks below, rank the chunks by relevance to the query.\n\
            Output only the indices of the top {top_k} most relevant chunks, in order, separated by commas.\n\n\
            Query: {query}\n\n\
            Chunks:\n{listing}\n\n\
            Top {top_k} most relevant chunk indices (comma-separated):"
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(RERANK_SYSTEM).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .max_tokens(RERANK_MAX_TOKENS)
            .temperature(0.0)
            .build()?;

        let response = timeout(self.call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout(self.call_timeout.as_secs()))??;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("empty rerank response".into()))
    }
}

/// Parses comma-separated indices, dropping anything unparseable or out of
/// range, deduplicating while preserving the model's order.
pub fn parse_rerank_indices(content: &str, candidate_count: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    for part in content.split(',') {
        let Ok(index) = part.trim().parse::<usize>() else {
            continue;
        };
        if index < candidate_count && !indices.contains(&index) {
            indices.push(index);
        }
    }
    indices
}
