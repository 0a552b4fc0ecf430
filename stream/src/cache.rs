use crate::error::StreamError;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};

/// A progress record as it's held in the cache: the same shape as
/// `db::models::UserProgress`, minus the Diesel derives, so this module
/// doesn't need to depend on the schema for its own serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub user_id: i32,
    pub catalog_id: i32,
    pub current_chapter: i32,
    pub status: String,
    pub page: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// The fast, hash-per-record cache half of the Hybrid Progress Store.
/// Backed by a `deadpool-redis` pool so many connections share a bounded
/// set of backend sockets.
#[derive(Clone)]
pub struct CacheRepository {
    pool: Pool,
    ttl_seconds: i64,
}

impl CacheRepository {
    pub fn new(redis_url: &str, ttl_days: i64) -> Result<Self, StreamError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| StreamError::CacheInit(err.to_string()))?;
        Ok(Self {
            pool,
            ttl_seconds: ttl_days * 24 * 3600,
        })
    }

    fn key(user_id: i32, catalog_id: i32) -> String {
        format!("progress:{user_id}:{catalog_id}")
    }

    pub async fn set(&self, record: &ProgressRecord) -> Result<(), StreamError> {
        let mut conn = self.pool.get().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(Self::key(record.user_id, record.catalog_id), payload, self.ttl_seconds as u64)
            .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: i32, catalog_id: i32) -> Result<Option<ProgressRecord>, StreamError> {
        let mut conn = self.pool.get().await?;
        let payload: Option<String> = conn.get(Self::key(user_id, catalog_id)).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, user_id: i32, catalog_id: i32) -> Result<(), StreamError> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(Self::key(user_id, catalog_id)).await?;
        Ok(())
    }
}
