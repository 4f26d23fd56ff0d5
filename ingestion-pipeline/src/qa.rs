use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{ResponseFormat, ResponseFormatJsonSchema},
    Client,
};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::language::SizeCategory;
use crate::llm::{chat_completion, strip_code_fence};
use crate::llm_instructions::{
    qa_document_prompt, qa_response_schema, qa_section_prompt, QA_GENERATION_SYSTEM,
};
use crate::tree::DocumentTree;

const QA_TEMPERATURE: f32 = 0.5;
const QA_MAX_TOKENS: u32 = 2000;
const SECTION_INPUT_CHAR_CAP: usize = 5000;
const DOCUMENT_INPUT_CHAR_CAP: usize = 15_000;

/// Two near-duplicate questions are collapsed when one contains the other
/// and their lengths differ by less than this.
const DEDUP_LENGTH_TOLERANCE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaType {
    Factual,
    Overview,
    Procedural,
    Comparison,
    Reasoning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    #[serde(rename = "type")]
    pub qa_type: QaType,
}

#[derive(Debug, Deserialize)]
struct QaResponse {
    qa_pairs: Vec<QaPair>,
}

/// Size-adaptive Q&A synthesis: one call for small/medium documents,
/// per-section generation for large ones.
pub struct QaGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    call_timeout: Duration,
}

impl QaGenerator {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            call_timeout,
        }
    }

    pub async fn generate(
        &self,
        tree: &DocumentTree,
        size: SizeCategory,
        filename: &str,
        mime_type: &str,
    ) -> Result<Vec<QaPair>, AppError> {
        let target = target_pair_count(size);

        let pairs = match size {
            SizeCategory::Small | SizeCategory::Medium => {
                self.generate_single(&tree.text, filename, mime_type, target)
                    .await?
            }
            SizeCategory::Large | SizeCategory::VeryLarge => {
                self.generate_per_section(tree, target).await?
            }
        };

        let deduplicated = deduplicate(pairs);
        let capped: Vec<QaPair> = deduplicated.into_iter().take(target).collect();

        info!(pairs = capped.len(), target, "Q&A generation finished");
        Ok(capped)
    }

    async fn generate_single(
        &self,
        text: &str,
        filename: &str,
        mime_type: &str,
        target: usize,
    ) -> Result<Vec<QaPair>, AppError> {
        let content = cap_chars(text, DOCUMENT_INPUT_CHAR_CAP);
        let response = chat_completion(
            &self.client,
            &self.model,
            QA_GENERATION_SYSTEM,
            qa_document_prompt(&content, filename, mime_type, target),
            QA_MAX_TOKENS,
            QA_TEMPERATURE,
            Some(qa_response_format()),
            self.call_timeout,
        )
        .await?;

        Ok(parse_qa_response(&response))
    }

    async fn generate_per_section(
        &self,
        tree: &DocumentTree,
        target: usize,
    ) -> Result<Vec<QaPair>, AppError> {
        let sections: Vec<_> = tree
            .structure
            .sections
            .iter()
            .filter(|s| !s.content.trim().is_empty())
            .collect();

        if sections.is_empty() {
            return self
                .generate_single(&tree.text, "document", "text/markdown", target)
                .await;
        }

        let per_section = per_section_count(target, sections.len());
        let mut pairs = Vec::new();

        for section in sections {
            let content = cap_chars(&section.content, SECTION_INPUT_CHAR_CAP);
            let response = chat_completion(
                &self.client,
                &self.model,
                QA_GENERATION_SYSTEM,
                qa_section_prompt(&section.title, &content, per_section),
                QA_MAX_TOKENS,
                QA_TEMPERATURE,
                Some(qa_response_format()),
                self.call_timeout,
            )
            .await?;

            pairs.extend(parse_qa_response(&response));
        }

        Ok(pairs)
    }
}

fn qa_response_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Question-answer pairs generated from a document".into()),
            name: "qa_pairs".into(),
            schema: Some(qa_response_schema()),
            strict: Some(true),
        },
    }
}

/// Target pair counts by document size.
pub fn target_pair_count(size: SizeCategory) -> usize {
    match size {
        SizeCategory::Small => 8,
        SizeCategory::Medium => 12,
        SizeCategory::Large | SizeCategory::VeryLarge => 15,
    }
}

/// Proportional distribution with a floor of 2 questions per section.
pub fn per_section_count(target: usize, section_count: usize) -> usize {
    (target / section_count.max(1)).max(2)
}

/// Strict-JSON parse with a best-effort pipe-separated fallback for legacy
/// producers. Unparseable content yields no pairs rather than an error.
pub fn parse_qa_response(content: &str) -> Vec<QaPair> {
    let cleaned = strip_code_fence(content);

    match serde_json::from_str::<QaResponse>(cleaned) {
        Ok(response) => response.qa_pairs,
        Err(err) => {
            warn!(error = %err, "strict Q&A JSON parse failed, trying pipe fallback");
            parse_pipe_fallback(cleaned)
        }
    }
}

fn parse_pipe_fallback(content: &str) -> Vec<QaPair> {
    let parts: Vec<&str> = content.split('|').collect();
    let mut pairs = Vec::new();

    for pair in parts.chunks(2) {
        let [question, answer] = pair else { break };
        let question = strip_qa_prefix(question);
        let answer = strip_qa_prefix(answer);
        if !question.is_empty() && !answer.is_empty() {
            pairs.push(QaPair {
                question,
                answer,
                qa_type: QaType::Factual,
            });
        }
    }

    pairs
}

fn strip_qa_prefix(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix('Q')
        .or_else(|| trimmed.strip_prefix('A'))
    else {
        return trimmed.to_string();
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    match rest.strip_prefix(':') {
        Some(stripped) => stripped.trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Deduplicates by lowercased, trimmed question: exact matches are dropped,
/// as are near-substring matches whose lengths differ by less than the
/// tolerance.
pub fn deduplicate(pairs: Vec<QaPair>) -> Vec<QaPair> {
    let mut seen: Vec<String> = Vec::new();
    let mut deduplicated = Vec::new();

    for pair in pairs {
        let question = pair.question.to_lowercase().trim().to_string();

        if seen.iter().any(|s| *s == question) {
            continue;
        }

        let is_similar = seen.iter().any(|s| {
            (question.contains(s.as_str()) || s.contains(&question))
                && question.len().abs_diff(s.len()) < DEDUP_LENGTH_TOLERANCE
        });
        if is_similar {
            continue;
        }

        seen.push(question);
        deduplicated.push(pair);
    }

    deduplicated
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}\n\n[Document truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(question: &str) -> QaPair {
        QaPair {
            question: question.to_string(),
            answer: "answer".to_string(),
            qa_type: QaType::Factual,
        }
    }

    #[test]
    fn strict_json_parses() {
        let content = r#"{"qa_pairs":[{"question":"What is X?","answer":"X is Y.","type":"factual"}]}"#;
        let pairs = parse_qa_response(content);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "What is X?");
        assert_eq!(pairs[0].qa_type, QaType::Factual);
    }

    #[test]
    fn fenced_json_parses() {
        let content = "```json\n{\"qa_pairs\":[{\"question\":\"Q?\",\"answer\":\"A.\",\"type\":\"overview\"}]}\n```";
        let pairs = parse_qa_response(content);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].qa_type, QaType::Overview);
    }

    #[test]
    fn pipe_fallback_recovers_legacy_output() {
        let content = "Q1: What is the deadline? | A1: March 31. | Q2: Who approves? | A2: The board.";
        let pairs = parse_qa_response(content);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].question, "What is the deadline?");
        assert_eq!(pairs[1].answer, "The board.");
    }

    #[test]
    fn garbage_yields_no_pairs() {
        assert!(parse_qa_response("complete nonsense").is_empty());
    }

    #[test]
    fn exact_duplicates_are_dropped_case_insensitively() {
        let pairs = deduplicate(vec![
            pair("What is the refund policy?"),
            pair("WHAT IS THE REFUND POLICY?"),
            pair("Who is the CEO?"),
        ]);
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn near_substring_duplicates_are_dropped_within_tolerance() {
        let pairs = deduplicate(vec![
            pair("What is the refund policy?"),
            // Substring with a length delta under the tolerance.
            pair("What is the refund policy"),
            // Substring but with a large length delta stays.
            pair("What is the refund policy for enterprise customers in Europe?"),
        ]);
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn target_counts_follow_size() {
        assert_eq!(target_pair_count(SizeCategory::Small), 8);
        assert_eq!(target_pair_count(SizeCategory::Medium), 12);
        assert_eq!(target_pair_count(SizeCategory::Large), 15);
    }

    #[test]
    fn per_section_distribution_has_a_floor_of_two() {
        assert_eq!(per_section_count(15, 5), 3);
        assert_eq!(per_section_count(15, 20), 2);
        assert_eq!(per_section_count(15, 0), 15);
    }
}
