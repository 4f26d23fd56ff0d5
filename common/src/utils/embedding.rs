use std::time::Duration;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio::time::{sleep, timeout};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::debug;

use crate::error::AppError;

/// Character cap applied to each input before it is sent to the embedding
/// provider. Conservative for 8k-token embedding models.
const EMBEDDING_INPUT_CHAR_CAP: usize = 8000;

/// Pause between consecutive batches, applied only to stay under provider
/// rate limits.
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Batched embedding generation over the OpenAI-compatible embeddings API.
///
/// Inputs are embedded in sequential batches of `batch_size`; output order
/// matches input order. A batch either succeeds completely or fails the whole
/// call; partial batches are never returned.
pub struct Embedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
    batch_size: usize,
    request_timeout: Duration,
}

impl Embedder {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: impl Into<String>,
        dimensions: u32,
        batch_size: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            batch_size: batch_size.max(1),
            request_timeout,
        }
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// Embeds a single input.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[input.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("no embedding data received".into()))
    }

    /// Embeds every input, preserving order.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let total_batches = inputs.len().div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(inputs.len());

        for (batch_index, batch) in inputs.chunks(self.batch_size).enumerate() {
            debug!(
                batch = batch_index + 1,
                total_batches,
                batch_len = batch.len(),
                "dispatching embedding batch"
            );

            let truncated: Vec<String> = batch
                .iter()
                .map(|text| truncate_chars(text, EMBEDDING_INPUT_CHAR_CAP))
                .collect();

            // Retry only on provider-signalled transient failures; anything
            // else invalidates the whole batch immediately.
            let retry_strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
            let response = RetryIf::spawn(
                retry_strategy,
                || self.dispatch_batch(&truncated),
                AppError::is_retryable,
            )
            .await
            .map_err(|e| AppError::Embedding(format!("batch {batch_index} failed: {e}")))?;

            if response.data.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "batch {batch_index} returned {} embeddings for {} inputs",
                    response.data.len(),
                    batch.len()
                )));
            }

            for item in response.data {
                vectors.push(item.embedding);
            }

            if batch_index + 1 < total_batches {
                sleep(INTER_BATCH_PAUSE).await;
            }
        }

        Ok(vectors)
    }

    async fn dispatch_batch(
        &self,
        inputs: &[String],
    ) -> Result<async_openai::types::CreateEmbeddingResponse, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input(inputs.to_vec())
            .build()?;

        timeout(self.request_timeout, self.client.embeddings().create(request))
            .await
            .map_err(|_| AppError::Timeout(self.request_timeout.as_secs()))?
            .map_err(AppError::from)
    }
}

/// Truncates on a char boundary; embedding inputs above the provider cap are
/// cut rather than rejected.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
