use std::sync::Arc;
use std::time::Duration;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorStore},
    utils::config::get_config,
};
use ingestion_pipeline::{
    convert::vision::OpenAiVisionProvider,
    pipeline::{DefaultPipelineServices, IngestionPipeline},
    IngestionConfig,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dedicated ingestion worker process.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    VectorStore::new(Arc::clone(&db))
        .ensure_collection(&config.vector_collection, config.embedding_size as usize)
        .await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let storage = StorageManager::new(&config).await?;

    let ingestion_config = IngestionConfig::default();
    let vision_provider = Arc::new(OpenAiVisionProvider::new(
        openai_client.clone(),
        &config.chat_model,
        Duration::from_secs(config.llm_timeout_secs),
    ));
    let services = Arc::new(DefaultPipelineServices::new(
        Arc::clone(&db),
        openai_client,
        &config,
        &ingestion_config,
        storage,
        None,
        Some(vision_provider),
    )?);

    let pipeline = Arc::new(IngestionPipeline::with_services(
        Arc::clone(&db),
        ingestion_config,
        services,
        Duration::from_secs(config.conversion_timeout_secs),
    ));

    ingestion_pipeline::run_worker_loop(db, pipeline).await
}
