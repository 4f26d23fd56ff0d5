mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use services::{DefaultPipelineServices, DocumentArtifacts, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, IngestionOutcome},
            ingestion_task::{IngestionTask, TaskErrorInfo},
        },
    },
};
use tracing::{info, warn};

use self::{context::PipelineContext, state::ready};

/// Drives one document through convert → analyze → enrich → chunk → embed →
/// persist, owning the document status transitions and the job
/// acknowledgement protocol.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    job_budget: Duration,
}

impl IngestionPipeline {
    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
        job_budget: Duration,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
            job_budget,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            attempt = task.attempts,
            document_id = %task.document_id,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        Document::mark_processing(&task.document_id, &self.db).await?;

        let outcome = tokio::time::timeout(self.job_budget, self.drive_pipeline(&task))
            .await
            .unwrap_or(Err(AppError::Timeout(self.job_budget.as_secs())));

        match outcome {
            Ok(outcome) => {
                Document::mark_completed(&task.document_id, outcome, &self.db).await?;
                task.mark_succeeded(&self.db).await?;
                info!(
                    task_id = %task.id,
                    document_id = %task.document_id,
                    attempt = task.attempts,
                    "ingestion task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let error_info = TaskErrorInfo {
                    code: Some(err.error_code().to_string()),
                    message: reason.clone(),
                };

                // Retry only when the provider signalled a transient
                // failure; everything else dead-letters immediately.
                if err.is_retryable() && task.can_retry() {
                    let delay = self.retry_delay(task.attempts);
                    task.mark_failed(error_info, delay, &self.db).await?;
                    warn!(
                        task_id = %task.id,
                        attempt = task.attempts,
                        retry_in_secs = delay.as_secs(),
                        error = %reason,
                        "ingestion task failed; scheduled retry"
                    );
                } else {
                    Document::mark_failed(&task.document_id, reason.clone(), &self.db).await?;
                    task.mark_dead_letter(error_info, &self.db).await?;
                    warn!(
                        task_id = %task.id,
                        attempt = task.attempts,
                        error = %reason,
                        "ingestion task failed; moved to dead letter queue"
                    );
                }

                Err(err)
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.pipeline_config.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    async fn drive_pipeline(&self, task: &IngestionTask) -> Result<IngestionOutcome, AppError> {
        let mut ctx = PipelineContext::new(task, self.services.as_ref());

        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = stages::convert(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let convert_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = stages::analyze(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let analyze_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = stages::enrich(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let enrich_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = stages::chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let chunk_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = stages::embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let _machine = stages::persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_ms = duration_millis(stage_start.elapsed());

        info!(
            task_id = %ctx.task_id,
            attempt = ctx.attempt,
            total_ms = duration_millis(pipeline_started.elapsed()),
            convert_ms,
            analyze_ms,
            enrich_ms,
            chunk_ms,
            embed_ms,
            persist_ms,
            "ingestion pipeline finished"
        );

        Ok(IngestionOutcome {
            chunk_count: u32::try_from(ctx.chunks.len()).unwrap_or(u32::MAX),
            vector_count: u32::try_from(ctx.vector_count).unwrap_or(u32::MAX),
            qa_pairs_count: u32::try_from(ctx.qa_pairs.len()).unwrap_or(u32::MAX),
            summary: ctx.summary.take().map(|s| s.text),
            language: ctx.language.as_ref().map(|l| l.primary.clone()),
            is_multilingual: ctx.language.as_ref().is_some_and(|l| l.is_multilingual),
            chunking_strategy: ctx
                .strategy
                .map_or("auto", |s| s.as_str())
                .to_string(),
        })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
