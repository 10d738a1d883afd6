use crate::breaker::CircuitBreaker;
use crate::lru::LruCache;
use crate::metrics::{CacheMetrics, SharedMetrics};
use crate::remote::{RedisTier, RemoteTier};
use crate::serializer::{CacheSerializer, SerializationFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which tiers a cache layer consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    LocalOnly,
    RedisOnly,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct CacheLayerConfig {
    pub redis_url: String,
    pub redis_password: Option<String>,
    pub upstash_url: Option<String>,
    pub upstash_token: Option<String>,
    pub cache_mode: CacheMode,
    pub serialization_format: SerializationFormat,
    pub default_ttl: Duration,
    pub local_cache_size: usize,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub compression_threshold: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub key_prefix: String,
}

impl Default for CacheLayerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".into(),
            redis_password: None,
            upstash_url: None,
            upstash_token: None,
            cache_mode: CacheMode::Hybrid,
            serialization_format: SerializationFormat::CompressedJson,
            default_ttl: Duration::from_secs(3600),
            local_cache_size: 5000,
            max_key_size: 250,
            max_value_size: 16 * 1024 * 1024,
            compression_threshold: 1024,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            key_prefix: "ptolemies".into(),
        }
    }
}

impl CacheLayerConfig {
    /// Overlay connection settings from the environment, as deployments set
    /// them (`REDIS_URL`, `REDIS_PASSWORD`, `UPSTASH_REDIS_REST_URL`,
    /// `UPSTASH_REDIS_REST_TOKEN`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            config.redis_password = Some(password);
        }
        if let Ok(url) = std::env::var("UPSTASH_REDIS_REST_URL") {
            config.upstash_url = Some(url);
        }
        if let Ok(token) = std::env::var("UPSTASH_REDIS_REST_TOKEN") {
            config.upstash_token = Some(token);
        }
        config
    }
}

/// Standard cache namespaces used across the query path.
pub mod namespaces {
    pub const QUERY: &str = "query";
    pub const RESULT: &str = "result";
    pub const EMBEDDING: &str = "embedding";
    pub const CONCEPT: &str = "concept";
    pub const ANALYTICS: &str = "analytics";
    pub const QUERY_PIPELINE: &str = "query_pipeline";
}

/// Local-tier record: encoded payload plus the metadata needed to decode it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    payload: Vec<u8>,
    compressed: bool,
    size_bytes: usize,
    namespace: String,
}

/// Metadata stored next to each remote value, keyed `{key}:meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteMeta {
    compressed: bool,
    size_bytes: usize,
}

/// Namespaced two-tier cache: an in-process LRU tier in front of a
/// Redis-compatible remote tier.
///
/// Every remote call is guarded by the circuit breaker; while the breaker is
/// open (or no remote is attached) the layer degrades to local-only and no
/// error reaches the caller.
pub struct TieredCache {
    config: CacheLayerConfig,
    serializer: CacheSerializer,
    local: LruCache<StoredEntry>,
    remote: Option<Arc<dyn RemoteTier>>,
    breaker: CircuitBreaker,
    metrics: SharedMetrics,
    started_at: Instant,
}

impl TieredCache {
    pub fn new(config: CacheLayerConfig) -> Self {
        let serializer = CacheSerializer::new(config.serialization_format);
        let local = LruCache::new(config.local_cache_size, config.default_ttl);
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_timeout,
        );
        Self {
            config,
            serializer,
            local,
            remote: None,
            breaker,
            metrics: SharedMetrics::new(),
            started_at: Instant::now(),
        }
    }

    /// Attach the Redis remote tier. A failed connection leaves the layer in
    /// local-only operation and returns false; the mode is not mutated.
    pub async fn connect(&mut self) -> bool {
        if self.config.cache_mode == CacheMode::LocalOnly {
            return false;
        }
        // An Upstash endpoint without a token is treated as unconfigured.
        if self.config.upstash_url.is_some()
            && self
                .config
                .upstash_token
                .as_deref()
                .map_or(true, str::is_empty)
        {
            warn!("upstash endpoint configured without token, staying local-only");
            return false;
        }
        match RedisTier::connect(&self.config.redis_url).await {
            Ok(tier) => {
                self.remote = Some(Arc::new(tier));
                info!(url = %self.config.redis_url, "cache layer connected to remote tier");
                true
            }
            Err(e) => {
                warn!(error = %e, "remote tier unavailable, degrading to local-only");
                false
            }
        }
    }

    /// Inject a remote tier directly (tests, alternative backends).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn config(&self) -> &CacheLayerConfig {
        &self.config
    }

    fn cache_key(&self, namespace: &str, user_key: &str) -> String {
        let full = format!("{}:{}:{}", self.config.key_prefix, namespace, user_key);
        if full.len() <= self.config.max_key_size {
            full
        } else {
            let digest = md5::compute(user_key.as_bytes());
            format!("{}:{}:{:x}", self.config.key_prefix, namespace, digest)
        }
    }

    fn use_local(&self) -> bool {
        matches!(
            self.config.cache_mode,
            CacheMode::LocalOnly | CacheMode::Hybrid
        )
    }

    fn remote_tier(&self) -> Option<&Arc<dyn RemoteTier>> {
        if self.config.cache_mode == CacheMode::LocalOnly {
            return None;
        }
        let remote = self.remote.as_ref()?;
        if self.breaker.can_execute() {
            Some(remote)
        } else {
            debug!("circuit open, skipping remote tier");
            None
        }
    }

    /// Look a value up, local tier first. Returns `(value, found)` so callers
    /// can distinguish a cached `None`-shaped payload from a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> (Option<T>, bool) {
        let started = Instant::now();
        let cache_key = self.cache_key(namespace, key);

        if self.use_local() {
            if let Some(entry) = self.local.get(&cache_key) {
                match self
                    .serializer
                    .deserialize::<T>(&entry.payload, entry.compressed)
                {
                    Ok(value) => {
                        self.metrics
                            .record_hit(entry.size_bytes as u64, elapsed_ms(started));
                        return (Some(value), true);
                    }
                    Err(e) => {
                        warn!(error = %e, "local cache entry undecodable, dropping");
                        self.local.remove(&cache_key);
                        self.metrics.record_error();
                    }
                }
            }
        }

        if let Some(remote) = self.remote_tier() {
            match self.remote_get(remote, &cache_key).await {
                Ok(Some((payload, meta))) => {
                    match self.serializer.deserialize::<T>(&payload, meta.compressed) {
                        Ok(value) => {
                            self.breaker.record_success();
                            if self.use_local() {
                                self.local.put(
                                    cache_key,
                                    StoredEntry {
                                        payload,
                                        compressed: meta.compressed,
                                        size_bytes: meta.size_bytes,
                                        namespace: namespace.to_string(),
                                    },
                                );
                            }
                            self.metrics
                                .record_hit(meta.size_bytes as u64, elapsed_ms(started));
                            return (Some(value), true);
                        }
                        Err(e) => {
                            warn!(error = %e, "remote cache entry undecodable");
                            self.metrics.record_error();
                        }
                    }
                }
                Ok(None) => {
                    self.breaker.record_success();
                }
                Err(e) => {
                    debug!(error = %e, "remote get failed");
                    self.metrics.record_error();
                    self.breaker.record_failure();
                }
            }
        }

        self.metrics.record_miss(elapsed_ms(started));
        (None, false)
    }

    async fn remote_get(
        &self,
        remote: &Arc<dyn RemoteTier>,
        cache_key: &str,
    ) -> ptolemies_core::Result<Option<(Vec<u8>, RemoteMeta)>> {
        let meta_bytes = match remote.get(&format!("{cache_key}:meta")).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let meta: RemoteMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| ptolemies_core::PtolemiesError::Decode(e.to_string()))?;
        match remote.get(cache_key).await? {
            Some(payload) => Ok(Some((payload, meta))),
            None => Ok(None),
        }
    }

    /// Store a value in every enabled tier. Returns false when the encoded
    /// value exceeds `max_value_size` or encoding fails; remote errors are
    /// absorbed.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> bool {
        let started = Instant::now();
        let cache_key = self.cache_key(namespace, key);

        let (payload, compressed) = match self
            .serializer
            .serialize(value, self.config.compression_threshold)
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "cache serialization failed");
                self.metrics.record_error();
                return false;
            }
        };

        if payload.len() > self.config.max_value_size {
            warn!(
                size = payload.len(),
                limit = self.config.max_value_size,
                "cache value rejected as oversize"
            );
            self.metrics.record_oversize();
            return false;
        }

        let size_bytes = payload.len();
        let raw_estimate = if compressed {
            // Raw size is re-derived for the compression ratio metric.
            serde_json::to_vec(value).map(|v| v.len()).unwrap_or(size_bytes)
        } else {
            size_bytes
        };

        if self.use_local() {
            self.local.put(
                cache_key.clone(),
                StoredEntry {
                    payload: payload.clone(),
                    compressed,
                    size_bytes,
                    namespace: namespace.to_string(),
                },
            );
        }

        if let Some(remote) = self.remote_tier() {
            let ttl = ttl.or(Some(self.config.default_ttl));
            let meta = RemoteMeta {
                compressed,
                size_bytes,
            };
            let meta_bytes = serde_json::to_vec(&meta).unwrap_or_default();
            let result = async {
                remote
                    .set(&format!("{cache_key}:meta"), &meta_bytes, ttl)
                    .await?;
                remote.set(&cache_key, &payload, ttl).await
            }
            .await;
            match result {
                Ok(()) => self.breaker.record_success(),
                Err(e) => {
                    debug!(error = %e, "remote set failed");
                    self.metrics.record_error();
                    self.breaker.record_failure();
                }
            }
        }

        self.metrics
            .record_write(raw_estimate as u64, size_bytes as u64, elapsed_ms(started));
        true
    }

    pub async fn delete(&self, key: &str, namespace: &str) -> bool {
        let cache_key = self.cache_key(namespace, key);
        let mut deleted = false;

        if self.use_local() {
            deleted |= self.local.remove(&cache_key);
        }

        if let Some(remote) = self.remote_tier() {
            match remote.delete(&cache_key).await {
                Ok(removed) => {
                    let _ = remote.delete(&format!("{cache_key}:meta")).await;
                    self.breaker.record_success();
                    deleted |= removed;
                }
                Err(e) => {
                    debug!(error = %e, "remote delete failed");
                    self.metrics.record_error();
                    self.breaker.record_failure();
                }
            }
        }

        deleted
    }

    pub async fn exists(&self, key: &str, namespace: &str) -> bool {
        let cache_key = self.cache_key(namespace, key);

        if self.use_local() && self.local.get(&cache_key).is_some() {
            return true;
        }

        if let Some(remote) = self.remote_tier() {
            match remote.exists(&cache_key).await {
                Ok(found) => {
                    self.breaker.record_success();
                    return found;
                }
                Err(e) => {
                    debug!(error = %e, "remote exists failed");
                    self.metrics.record_error();
                    self.breaker.record_failure();
                }
            }
        }

        false
    }

    /// Drop every entry in a namespace across both tiers. Returns how many
    /// entries were removed (meta records are not counted).
    pub async fn clear_namespace(&self, namespace: &str) -> usize {
        let prefix = format!("{}:{}:", self.config.key_prefix, namespace);
        let mut removed = 0;

        if self.use_local() {
            for key in self.local.keys() {
                if key.starts_with(&prefix) && self.local.remove(&key) {
                    removed += 1;
                }
            }
        }

        if let Some(remote) = self.remote_tier() {
            match remote.scan_keys(&format!("{prefix}*")).await {
                Ok(keys) => {
                    for key in keys {
                        match remote.delete(&key).await {
                            Ok(true) if !key.ends_with(":meta") => removed += 1,
                            Ok(_) => {}
                            Err(e) => {
                                debug!(error = %e, "remote delete during namespace clear failed");
                                self.metrics.record_error();
                                self.breaker.record_failure();
                                break;
                            }
                        }
                    }
                    self.breaker.record_success();
                }
                Err(e) => {
                    debug!(error = %e, "remote scan failed during namespace clear");
                    self.metrics.record_error();
                    self.breaker.record_failure();
                }
            }
        }

        info!(namespace, removed, "cache namespace cleared");
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot(self.breaker.trips())
    }

    /// Operational snapshot for the stats surface.
    pub fn stats(&self) -> serde_json::Value {
        let metrics = self.metrics();
        let local = self.local.stats();
        serde_json::json!({
            "mode": match self.config.cache_mode {
                CacheMode::LocalOnly => "local_only",
                CacheMode::RedisOnly => "redis_only",
                CacheMode::Hybrid => "hybrid",
            },
            "remote_attached": self.remote.is_some(),
            "circuit_breaker_state": self.breaker.state().as_str(),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "local_tier": {
                "size": local.size,
                "max_size": local.max_size,
                "hits": local.hits,
                "misses": local.misses,
                "hit_rate": local.hit_rate,
            },
            "metrics": serde_json::to_value(&metrics).unwrap_or_default(),
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
