use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::get_config};
use query_pipeline::{DefaultQueryServices, QueryPipeline, RetrievalConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dedicated query worker process.
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

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let services = Arc::new(DefaultQueryServices::new(
        Arc::clone(&db),
        openai_client,
        &config,
    ));
    let pipeline = Arc::new(QueryPipeline::new(
        Arc::clone(&db),
        services,
        RetrievalConfig::from_config(&config),
    ));

    query_pipeline::run_worker_loop(db, pipeline).await
}
