use crate::config::{Config, StoreBackend};
use crate::store::{MemoryRowStore, MongoRowStore, RowStore};
use redis::aio::ConnectionManager;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RowStore>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn RowStore> = match config.store_backend {
            StoreBackend::Mongo => {
                let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
                let store = MongoRowStore::new(mongo_client.database(&config.mongo_database));
                store.ensure_indexes().await?;
                tracing::info!("MongoDB connected");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory row store; data is lost on restart");
                Arc::new(MemoryRowStore::new())
            }
        };

        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::info!("Redis not configured, idempotency cache disabled");
                None
            }
        };

        Ok(Self {
            config,
            store,
            redis,
        })
    }

    /// State over an existing store, without Redis.
    pub fn with_store(config: Config, store: Arc<dyn RowStore>) -> Self {
        Self {
            config,
            store,
            redis: None,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let client = redis::Client::open(uri)?;
    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod catalog_service;
pub mod completion_service;
pub mod grading;
pub mod idempotency_cache;
pub mod progress_service;
pub mod progression;
pub mod scoring;
