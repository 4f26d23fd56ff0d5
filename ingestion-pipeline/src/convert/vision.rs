use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::error::AppError;
use tokio::time::timeout;

use super::provider::VisionProvider;

const VISION_PROMPT: &str = "Describe this image concisely for a document index: what it shows, \
    any text or numbers it contains, and what it is likely illustrating.";
const VISION_MAX_TOKENS: u32 = 300;

/// Vision description through the OpenAI-compatible chat API, sending the
/// image inline as a base64 data URL.
pub struct OpenAiVisionProvider {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
}

impl OpenAiVisionProvider {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    async fn describe_image(&self, data: &[u8]) -> Result<String, AppError> {
        let base64_image = STANDARD.encode(data);
        let image_url = format!("data:image/png;base64,{base64_image}");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(VISION_MAX_TOKENS)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(VISION_PROMPT)
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;

        let response = timeout(self.call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout(self.call_timeout.as_secs()))??;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AppError::LLMParsing("empty vision response".into()))
    }
}
