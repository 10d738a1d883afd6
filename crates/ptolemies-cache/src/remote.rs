use async_trait::async_trait;
use ptolemies_core::{PtolemiesError, Result};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// The remote tier behind the cache layer. Implementations speak to a
/// Redis-compatible store; tests inject in-memory doubles.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn ping(&self) -> Result<()>;
}

fn map_redis_err(e: redis::RedisError) -> PtolemiesError {
    if e.is_timeout() {
        PtolemiesError::Timeout(format!("redis: {e}"))
    } else {
        PtolemiesError::UpstreamUnavailable(format!("redis: {e}"))
    }
}

/// Redis-backed remote tier over a multiplexed connection manager.
pub struct RedisTier {
    manager: redis::aio::ConnectionManager,
}

impl RedisTier {
    /// Open a client and establish the connection manager. Fails fast when
    /// the server is unreachable so the layer can fall back to local-only.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(map_redis_err)?;
        info!("redis remote tier connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(map_redis_err)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) if ttl.as_secs() > 0 => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(map_redis_err),
            _ => conn.set::<_, _, ()>(key, value).await.map_err(map_redis_err),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await.map_err(map_redis_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(map_redis_err)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.keys(pattern).await.map_err(map_redis_err)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
