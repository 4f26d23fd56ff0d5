use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use common::error::AppError;
use tokio::time::timeout;

/// One bounded chat completion. Every LLM call in the ingestion pipeline
/// funnels through here so the timeout and the empty-response check are
/// applied uniformly.
pub async fn chat_completion(
    client: &Client<OpenAIConfig>,
    model: &str,
    system: &str,
    user: String,
    max_tokens: u32,
    temperature: f32,
    response_format: Option<ResponseFormat>,
    call_timeout: Duration,
) -> Result<String, AppError> {
    let mut builder = CreateChatCompletionRequestArgs::default();
    builder
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(system).into(),
            ChatCompletionRequestUserMessage::from(user).into(),
        ])
        .max_tokens(max_tokens)
        .temperature(temperature);
    if let Some(format) = response_format {
        builder.response_format(format);
    }
    let request = builder.build()?;

    let response = timeout(call_timeout, client.chat().create(request))
        .await
        .map_err(|_| AppError::Timeout(call_timeout.as_secs()))??;

    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .map(|content| content.trim().to_string())
        .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
}

/// Strips a ```json fence if the model wrapped its output despite the
/// response-format instruction.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
