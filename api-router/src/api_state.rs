use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorStore},
    utils::config::AppConfig,
};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub vector_store: VectorStore,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
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

        Ok(Self::with_resources(db, config.clone(), storage))
    }

    /// Builds state around existing resources; used by tests and by the
    /// combined binary that shares one connection pool.
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
    ) -> Self {
        let vector_store = VectorStore::new(Arc::clone(&db));
        Self {
            db,
            config,
            storage,
            vector_store,
        }
    }
}
