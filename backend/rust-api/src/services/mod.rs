use crate::config::Config;
use crate::repositories::{mongo::MongoStore, Repositories};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    /// Raw handles for health checks. Absent in in-memory mode.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        MongoStore::new(mongo.clone()).ensure_indexes().await?;

        Ok(Self {
            repos: Repositories::mongo(mongo.clone(), redis.clone()),
            config,
            mongo: Some(mongo),
            redis: Some(redis),
        })
    }

    /// State backed by [`crate::repositories::memory::MemoryStore`], used by
    /// tests and local runs without MongoDB/Redis.
    pub fn in_memory(config: Config) -> Self {
        Self::with_repositories(config, Repositories::in_memory())
    }

    pub fn with_repositories(config: Config, repos: Repositories) -> Self {
        Self {
            config,
            repos,
            mongo: None,
            redis: None,
        }
    }
}

pub mod gamification;
pub mod quiz_service;
pub mod reconciliation;
pub mod referral_service;
pub mod whatsapp_import;
