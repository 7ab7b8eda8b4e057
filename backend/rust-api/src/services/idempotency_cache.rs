use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};

use crate::metrics::{record_cache_hit, record_cache_miss};
use crate::models::assessment::AssessmentKind;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const CACHE_TTL_SECONDS: u64 = 86400;

/// Replays responses for repeated submissions carrying the same key. Keys are
/// scoped to one learner and one assessment, so a client reusing a key across
/// submissions never receives another submission's response.
pub struct IdempotencyCache {
    redis: ConnectionManager,
}

impl IdempotencyCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub fn cache_key(
        user_id: &str,
        kind: AssessmentKind,
        assessment_id: &str,
        idempotency_key: &str,
    ) -> String {
        format!(
            "idempotency:attempt:{}:{}:{}:{}",
            user_id,
            kind.as_str(),
            assessment_id,
            idempotency_key
        )
    }

    pub async fn get<T: DeserializeOwned>(&self, cache_key: &str) -> Result<Option<T>> {
        let cached: Option<String> = retry_async_with_config(RetryConfig::default(), || async {
            let mut conn = self.redis.clone();
            redis::cmd("GET")
                .arg(cache_key)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await
        .context("Failed to check idempotency cache")?;

        match cached {
            Some(json) => {
                record_cache_hit();
                tracing::info!("Returning cached response for {}", cache_key);
                let value =
                    serde_json::from_str(&json).context("Failed to deserialize cached response")?;
                Ok(Some(value))
            }
            None => {
                record_cache_miss();
                Ok(None)
            }
        }
    }

    pub async fn put<T: Serialize>(&self, cache_key: &str, response: &T) -> Result<()> {
        let json = serde_json::to_string(response).context("Failed to serialize response")?;

        retry_async_with_config(RetryConfig::aggressive(), || async {
            let mut conn = self.redis.clone();
            redis::cmd("SETEX")
                .arg(cache_key)
                .arg(CACHE_TTL_SECONDS)
                .arg(&json)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
        .context("Failed to cache response")?;

        Ok(())
    }
}
