use common::{
    error::AppError,
    storage::{types::ingestion_task::IngestionTask, vector::VectorPoint},
};

use super::services::PipelineServices;
use crate::{
    chunking::{Chunk, ChunkStrategy},
    convert::ConvertedDocument,
    language::{LanguageReport, SizeCategory},
    qa::QaPair,
    summarize::SummaryOutcome,
    tree::DocumentTree,
};

/// Mutable state threaded through the ingestion stages. Each stage fills in
/// its slice; the persist stage consumes the lot.
pub struct PipelineContext<'a> {
    pub task: &'a IngestionTask,
    pub task_id: String,
    pub attempt: u32,
    pub services: &'a dyn PipelineServices,

    pub converted: Option<ConvertedDocument>,
    pub tree: Option<DocumentTree>,
    pub token_count: usize,
    pub size: Option<SizeCategory>,
    pub language: Option<LanguageReport>,
    pub summary: Option<SummaryOutcome>,
    pub qa_pairs: Vec<QaPair>,
    pub strategy: Option<ChunkStrategy>,
    pub chunks: Vec<Chunk>,
    pub points: Vec<VectorPoint>,
    pub vector_count: usize,
}

impl<'a> PipelineContext<'a> {
    pub fn new(task: &'a IngestionTask, services: &'a dyn PipelineServices) -> Self {
        Self {
            task,
            task_id: task.id.clone(),
            attempt: task.attempts,
            services,
            converted: None,
            tree: None,
            token_count: 0,
            size: None,
            language: None,
            summary: None,
            qa_pairs: Vec::new(),
            strategy: None,
            chunks: Vec::new(),
            points: Vec::new(),
            vector_count: 0,
        }
    }

    pub fn converted(&self) -> Result<&ConvertedDocument, AppError> {
        self.converted
            .as_ref()
            .ok_or_else(|| AppError::InternalError("conversion output missing".into()))
    }

    pub fn tree(&self) -> Result<&DocumentTree, AppError> {
        self.tree
            .as_ref()
            .ok_or_else(|| AppError::InternalError("document tree missing".into()))
    }

    pub fn size(&self) -> Result<SizeCategory, AppError> {
        self.size
            .ok_or_else(|| AppError::InternalError("size category missing".into()))
    }

    pub fn abort(&self, err: AppError) -> AppError {
        tracing::debug!(
            task_id = %self.task_id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline stage failed"
        );
        err
    }
}
