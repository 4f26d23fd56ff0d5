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
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::RetrievedChunk;

const AGENT_SYSTEM: &str = "You are an evaluation agent. Always respond with valid JSON.";
const AGENT_MAX_TOKENS: u32 = 200;
const AGENT_TEMPERATURE: f32 = 0.3;
const CONTEXT_CHUNKS: usize = 5;
const CONTEXT_PREVIEW_CHARS: usize = 300;

/// Reasoning recorded when the iteration cap forces progression.
pub const MAX_ITERATIONS_REASONING: &str =
    "Maximum iterations reached, proceeding with available information";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDecision {
    Proceed,
    RefineQuery,
    ExpandSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvaluation {
    pub decision: AgentDecision,
    pub confidence: f32,
    pub reasoning: String,
    pub refined_query: Option<String>,
}

impl AgentEvaluation {
    pub fn proceed(confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            decision: AgentDecision::Proceed,
            confidence,
            reasoning: reasoning.into(),
            refined_query: None,
        }
    }
}

/// Decides whether retrieval is good enough to answer from, or whether the
/// loop should refine the query or widen the search.
pub struct AgentEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
}

impl AgentEvaluator {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout,
        }
    }

    /// Never fails: transport or parse problems degrade to `proceed` with a
    /// diagnostic reason, and the iteration cap is enforced before any LLM
    /// call is made.
    pub async fn evaluate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        iteration: usize,
        max_iterations: usize,
    ) -> AgentEvaluation {
        if iteration >= max_iterations {
            return AgentEvaluation::proceed(1.0, MAX_ITERATIONS_REASONING);
        }

        let evaluation = match self.request_evaluation(query, chunks).await {
            Ok(content) => match parse_agent_response(&content) {
                Some(evaluation) => evaluation,
                None => {
                    warn!(raw = %content, "agent response failed to parse");
                    AgentEvaluation::proceed(
                        0.5,
                        "Agent evaluation could not be parsed, proceeding with available information",
                    )
                }
            },
            Err(err) => {
                warn!(error = %err, "agent evaluation call failed");
                AgentEvaluation::proceed(0.5, format!("Agent evaluation error: {err}"))
            }
        };

        let evaluation = apply_hard_rules(evaluation, iteration, max_iterations);
        info!(
            decision = ?evaluation.decision,
            confidence = evaluation.confidence,
            iteration,
            "agent decision"
        );
        evaluation
    }

    async fn request_evaluation(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<String, AppError> {
        let context = chunks
            .iter()
            .take(CONTEXT_CHUNKS)
            .map(|chunk| {
                let preview: String = chunk
                    .payload
                    .text
                    .chars()
                    .take(CONTEXT_PREVIEW_CHARS)
                    .collect();
                format!("{preview}...")
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "You are an AI agent evaluating whether retrieved information is sufficient to answer a query.\n\n\
            Query: {query}\n\n\
            Retrieved Information:\n{context}\n\n\
            Evaluate the quality and sufficiency of the retrieved information. Choose ONE action:\n\
            1. \"proceed\" - Information is sufficient to answer the query\n\
            2. \"refine_query\" - Information is insufficient, suggest a refined query\n\
            3. \"expand_search\" - Information is partially relevant, expand search scope\n\n\
            Respond in JSON format:\n\
            {{\n\
              \"decision\": \"proceed|refine_query|expand_search\",\n\
              \"confidence\": 0.0-1.0,\n\
              \"reasoning\": \"brief explanation\",\n\
              \"refined_query\": \"new query if refine_query, else null\"\n\
            }}"
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(AGENT_SYSTEM).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .max_tokens(AGENT_MAX_TOKENS)
            .temperature(AGENT_TEMPERATURE)
            .response_format(ResponseFormat::JsonObject)
            .build()?;

        let response = timeout(self.call_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout(self.call_timeout.as_secs()))??;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("empty agent response".into()))
    }
}

/// Parses the agent's JSON, tolerating a markdown fence.
pub fn parse_agent_response(content: &str) -> Option<AgentEvaluation> {
    let trimmed = content.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|inner| inner.strip_suffix("```").unwrap_or(inner))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str::<AgentEvaluation>(cleaned).ok()
}

/// The non-negotiable loop rules: the iteration cap always wins, and a
/// refine decision without a usable query degrades to proceed.
pub fn apply_hard_rules(
    evaluation: AgentEvaluation,
    iteration: usize,
    max_iterations: usize,
) -> AgentEvaluation {
    if iteration >= max_iterations {
        return AgentEvaluation::proceed(1.0, MAX_ITERATIONS_REASONING);
    }

    if evaluation.decision == AgentDecision::RefineQuery
        && evaluation
            .refined_query
            .as_deref()
            .map_or(true, |q| q.trim().is_empty())
    {
        return AgentEvaluation::proceed(
            evaluation.confidence,
            "Refine requested without a refined query, proceeding with available information",
        );
    }

    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_json_parses() {
        let content = r#"{"decision":"refine_query","confidence":0.4,"reasoning":"too vague","refined_query":"refund window for electronics"}"#;
        let evaluation = parse_agent_response(content).expect("parse");
        assert_eq!(evaluation.decision, AgentDecision::RefineQuery);
        assert_eq!(
            evaluation.refined_query.as_deref(),
            Some("refund window for electronics")
        );
    }

    #[test]
    fn fenced_json_parses() {
        let content = "```json\n{\"decision\":\"proceed\",\"confidence\":0.9,\"reasoning\":\"good coverage\",\"refined_query\":null}\n```";
        let evaluation = parse_agent_response(content).expect("parse");
        assert_eq!(evaluation.decision, AgentDecision::Proceed);
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(parse_agent_response("certainly! here is my analysis").is_none());
    }

    #[test]
    fn iteration_cap_forces_proceed() {
        let refine = AgentEvaluation {
            decision: AgentDecision::RefineQuery,
            confidence: 0.2,
            reasoning: "needs work".into(),
            refined_query: Some("better query".into()),
        };

        let ruled = apply_hard_rules(refine, 3, 3);
        assert_eq!(ruled.decision, AgentDecision::Proceed);
        assert_eq!(ruled.reasoning, MAX_ITERATIONS_REASONING);
    }

    #[test]
    fn refine_without_query_degrades_to_proceed() {
        let refine = AgentEvaluation {
            decision: AgentDecision::RefineQuery,
            confidence: 0.4,
            reasoning: "unsure".into(),
            refined_query: Some("   ".into()),
        };

        let ruled = apply_hard_rules(refine, 1, 3);
        assert_eq!(ruled.decision, AgentDecision::Proceed);
        // Confidence from the model's evaluation is preserved.
        assert!((ruled.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn expand_passes_through_before_the_cap() {
        let expand = AgentEvaluation {
            decision: AgentDecision::ExpandSearch,
            confidence: 0.6,
            reasoning: "partially relevant".into(),
            refined_query: None,
        };

        let ruled = apply_hard_rules(expand.clone(), 1, 3);
        assert_eq!(ruled, expand);
    }
}
