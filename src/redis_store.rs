use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

use crate::registry::{CacheError, EdgeCache};

/// Redis-backed [`EdgeCache`]. Keys are namespaced under a prefix so one
/// instance can serve several deployments.
#[derive(Clone, Debug)]
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
}

#[derive(Debug, Error)]
pub enum RedisCacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisCache {
    pub fn new(url: impl AsRef<str>) -> Result<Self, RedisCacheError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            prefix: "gatehouse".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> Result<(), RedisCacheError> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn.get(format!("{}:__ping__", self.prefix)).await?;
        Ok(())
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl EdgeCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self
            .connection()
            .await
            .map_err(|err| CacheError(err.to_string()))?;
        let value: Option<String> = conn
            .get(self.scoped_key(key))
            .await
            .map_err(|err| CacheError(err.to_string()))?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self
            .connection()
            .await
            .map_err(|err| CacheError(err.to_string()))?;
        if ttl_seconds > 0 {
            let _: () = conn
                .set_ex(self.scoped_key(key), value, ttl_seconds)
                .await
                .map_err(|err| CacheError(err.to_string()))?;
        } else {
            let _: () = conn
                .set(self.scoped_key(key), value)
                .await
                .map_err(|err| CacheError(err.to_string()))?;
        }
        Ok(())
    }
}
