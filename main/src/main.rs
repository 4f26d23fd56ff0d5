use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorStore},
    utils::config::get_config,
};
use ingestion_pipeline::{
    convert::vision::OpenAiVisionProvider,
    pipeline::{DefaultPipelineServices, IngestionPipeline},
    IngestionConfig,
};
use query_pipeline::{DefaultQueryServices, QueryPipeline, RetrievalConfig};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// All-in-one process: HTTP server plus one ingestion worker and one query
/// worker. Production deployments split these into the dedicated binaries.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
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

    let vector_store = VectorStore::new(Arc::clone(&db));
    vector_store
        .ensure_collection(&config.vector_collection, config.embedding_size as usize)
        .await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let storage = StorageManager::new(&config).await?;

    // HTTP surface.
    let api_state = ApiState::with_resources(Arc::clone(&db), config.clone(), storage.clone());
    let app = Router::new()
        .merge(api_routes(&api_state))
        .with_state(AppState { api_state });

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {e}");
        }
    });

    // Ingestion worker.
    let ingestion_config = IngestionConfig::default();
    let vision_provider = Arc::new(OpenAiVisionProvider::new(
        openai_client.clone(),
        &config.chat_model,
        Duration::from_secs(config.llm_timeout_secs),
    ));
    let ingestion_services = Arc::new(DefaultPipelineServices::new(
        Arc::clone(&db),
        openai_client.clone(),
        &config,
        &ingestion_config,
        storage.clone(),
        None,
        Some(vision_provider),
    )?);
    let ingestion = Arc::new(IngestionPipeline::with_services(
        Arc::clone(&db),
        ingestion_config,
        ingestion_services,
        Duration::from_secs(config.conversion_timeout_secs),
    ));
    let ingestion_db = Arc::clone(&db);
    let ingestion_worker = tokio::spawn(async move {
        if let Err(e) = ingestion_pipeline::run_worker_loop(ingestion_db, ingestion).await {
            error!("Ingestion worker error: {e}");
        }
    });

    // Query worker.
    let query_services = Arc::new(DefaultQueryServices::new(
        Arc::clone(&db),
        openai_client,
        &config,
    ));
    let query = Arc::new(QueryPipeline::new(
        Arc::clone(&db),
        query_services,
        RetrievalConfig::from_config(&config),
    ));
    let query_db = Arc::clone(&db);
    let query_worker = tokio::spawn(async move {
        if let Err(e) = query_pipeline::run_worker_loop(query_db, query).await {
            error!("Query worker error: {e}");
        }
    });

    let _ = tokio::try_join!(server, ingestion_worker, query_worker)?;

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
