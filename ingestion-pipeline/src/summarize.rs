use std::sync::Arc;
use std::time::Duration;

use async_openai::{config::OpenAIConfig, Client};
use common::{error::AppError, utils::config::AppConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::llm::chat_completion;
use crate::llm_instructions::{
    final_summary_prompt, section_summary_prompt, short_doc_summary_prompt, FINAL_SUMMARY_SYSTEM,
    SECTION_SUMMARY_SYSTEM, SHORT_DOC_SUMMARY_SYSTEM,
};
use crate::tree::DocumentTree;

/// Summaries run at a low fixed temperature; they should never get creative.
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Character cap applied to any single LLM input.
const SECTION_INPUT_CHAR_CAP: usize = 5000;
const SHORT_DOC_INPUT_CHAR_CAP: usize = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Single,
    MapReduce,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub method: SummaryMethod,
    pub sections_count: usize,
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Token count at or below which a single call summarizes the whole
    /// document.
    pub short_doc_threshold: usize,
    /// Sections smaller than this (chars) are skipped in the MAP phase.
    pub min_section_size: usize,
    /// Sections larger than this (chars) are split at paragraph boundaries.
    pub max_section_size: usize,
    pub max_concurrent_requests: usize,
    pub section_summary_max_tokens: u32,
    pub final_summary_max_tokens: u32,
    pub call_timeout: Duration,
}

impl SummarizerConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            short_doc_threshold: cfg.summarizer_short_doc_threshold,
            min_section_size: cfg.summarizer_min_section_size,
            max_section_size: cfg.summarizer_max_section_size,
            max_concurrent_requests: cfg.summarizer_max_concurrent,
            section_summary_max_tokens: cfg.summarizer_section_max_tokens,
            final_summary_max_tokens: cfg.summarizer_final_max_tokens,
            call_timeout: Duration::from_secs(cfg.llm_timeout_secs),
        }
    }
}

/// A unit of the MAP phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSection {
    pub title: String,
    pub content: String,
}

/// Size-adaptive document summarizer (single call vs map-reduce).
pub struct Summarizer {
    client: Client<OpenAIConfig>,
    model: String,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, config: SummarizerConfig) -> Self {
        Self {
            client,
            model: model.into(),
            config,
        }
    }

    pub async fn summarize(
        &self,
        tree: &DocumentTree,
        token_count: usize,
        filename: &str,
        mime_type: &str,
    ) -> Result<SummaryOutcome, AppError> {
        if token_count <= self.config.short_doc_threshold {
            let summary = self.summarize_single(&tree.text, filename, mime_type).await?;
            return Ok(SummaryOutcome {
                text: summary,
                method: SummaryMethod::Single,
                sections_count: 0,
            });
        }

        let sections = plan_sections(tree, &self.config);
        info!(
            sections = sections.len(),
            method = "map_reduce",
            "summarization plan ready"
        );

        let section_summaries = self.map_sections(&sections).await?;
        let final_summary = self
            .reduce(filename, &section_summaries.join("\n\n"))
            .await?;

        Ok(SummaryOutcome {
            text: final_summary,
            method: SummaryMethod::MapReduce,
            sections_count: sections.len(),
        })
    }

    async fn summarize_single(
        &self,
        text: &str,
        filename: &str,
        mime_type: &str,
    ) -> Result<String, AppError> {
        let content = cap_chars(text, SHORT_DOC_INPUT_CHAR_CAP);
        chat_completion(
            &self.client,
            &self.model,
            SHORT_DOC_SUMMARY_SYSTEM,
            short_doc_summary_prompt(&content, filename, mime_type),
            self.config.final_summary_max_tokens,
            SUMMARY_TEMPERATURE,
            None,
            self.config.call_timeout,
        )
        .await
    }

    /// MAP: summarize each planned section in parallel under the semaphore,
    /// preserving section order in the output.
    async fn map_sections(&self, sections: &[PlannedSection]) -> Result<Vec<String>, AppError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));

        let futures = sections.iter().map(|section| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| AppError::InternalError(format!("semaphore closed: {e}")))?;

                let content = cap_chars(&section.content, SECTION_INPUT_CHAR_CAP);
                let summary = chat_completion(
                    &self.client,
                    &self.model,
                    SECTION_SUMMARY_SYSTEM,
                    section_summary_prompt(&section.title, &content),
                    self.config.section_summary_max_tokens,
                    SUMMARY_TEMPERATURE,
                    None,
                    self.config.call_timeout,
                )
                .await?;

                debug!(section = %section.title, "section summarized");
                Ok::<String, AppError>(format!("**{}**: {summary}", section.title))
            }
        });

        futures::future::try_join_all(futures).await
    }

    /// REDUCE: compose the final summary from the labeled section summaries.
    async fn reduce(&self, filename: &str, combined: &str) -> Result<String, AppError> {
        chat_completion(
            &self.client,
            &self.model,
            FINAL_SUMMARY_SYSTEM,
            final_summary_prompt(filename, combined),
            self.config.final_summary_max_tokens,
            SUMMARY_TEMPERATURE,
            None,
            self.config.call_timeout,
        )
        .await
    }
}

/// Splits the document into MAP units: natural sections where available,
/// oversized ones split at paragraph boundaries into numbered parts, and a
/// plain size split when the document has no structure at all.
pub fn plan_sections(tree: &DocumentTree, config: &SummarizerConfig) -> Vec<PlannedSection> {
    let usable: Vec<_> = tree
        .structure
        .sections
        .iter()
        .filter(|s| s.content.len() >= config.min_section_size)
        .collect();

    if usable.is_empty() {
        return size_split(&tree.text, config.max_section_size);
    }

    let mut planned = Vec::new();
    for section in usable {
        if section.content.len() <= config.max_section_size {
            planned.push(PlannedSection {
                title: section.title.clone(),
                content: section.content.clone(),
            });
            continue;
        }

        for (part, content) in
            pack_paragraphs(&section.content, config.max_section_size).into_iter().enumerate()
        {
            planned.push(PlannedSection {
                title: format!("{} (part {})", section.title, part + 1),
                content,
            });
        }
    }

    planned
}

fn size_split(text: &str, max_size: usize) -> Vec<PlannedSection> {
    pack_paragraphs(text, max_size)
        .into_iter()
        .enumerate()
        .map(|(i, content)| PlannedSection {
            title: format!("Section {}", i + 1),
            content,
        })
        .collect()
}

/// Greedy paragraph packing under a character budget. A single paragraph
/// larger than the budget stays whole.
fn pack_paragraphs(text: &str, max_size: usize) -> Vec<String> {
    let paragraphs = crate::chunking::markdown_parser::split_paragraphs(text);
    if paragraphs.is_empty() {
        return vec![text.trim().to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if !current.is_empty() && current.len() + paragraph.len() > max_size {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}\n\n[Document truncated for summarization]")
}
