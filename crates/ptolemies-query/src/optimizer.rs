use parking_lot::Mutex;
use ptolemies_cache::{ConnectionPool, LruCache, LruStats};
use ptolemies_core::{PtolemiesError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Minimal,
    Balanced,
    Aggressive,
    Extreme,
}

impl OptimizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationLevel::Minimal => "minimal",
            OptimizationLevel::Balanced => "balanced",
            OptimizationLevel::Aggressive => "aggressive",
            OptimizationLevel::Extreme => "extreme",
        }
    }

    fn step_up(&self) -> Self {
        match self {
            OptimizationLevel::Minimal => OptimizationLevel::Balanced,
            OptimizationLevel::Balanced => OptimizationLevel::Aggressive,
            other => *other,
        }
    }
}

/// Configuration for the performance optimizer.
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub query_cache_size: usize,
    pub result_cache_size: usize,
    pub embedding_cache_size: usize,
    pub concept_cache_size: usize,
    pub cache_ttl: Duration,
    pub max_concurrent_queries: usize,
    pub connection_pool_size: usize,
    pub connection_timeout: Duration,
    pub semantic_batch_size: usize,
    pub graph_batch_size: usize,
    pub query_timeout: Duration,
    pub target_response_time_ms: f64,
    pub target_cache_hit_rate: f64,
    pub optimization_level: OptimizationLevel,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            query_cache_size: 1000,
            result_cache_size: 5000,
            embedding_cache_size: 2000,
            concept_cache_size: 500,
            cache_ttl: Duration::from_secs(3600),
            max_concurrent_queries: 100,
            connection_pool_size: 20,
            connection_timeout: Duration::from_millis(5000),
            semantic_batch_size: 50,
            graph_batch_size: 25,
            query_timeout: Duration::from_millis(90),
            target_response_time_ms: 100.0,
            target_cache_hit_rate: 0.7,
            optimization_level: OptimizationLevel::Balanced,
        }
    }
}

/// Which of the optimizer's internal caches an operation keys into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Query,
    Result,
    Embedding,
    Concept,
}

impl CacheKind {
    fn name(&self) -> &'static str {
        match self {
            CacheKind::Query => "query",
            CacheKind::Result => "result",
            CacheKind::Embedding => "embedding",
            CacheKind::Concept => "concept",
        }
    }
}

/// Search parameters after optimization, with the applied rule tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedParameters {
    pub query: String,
    pub query_type: String,
    pub limit: Option<usize>,
    pub search_type: Option<String>,
    pub max_depth: Option<usize>,
    pub applied_optimizations: Vec<String>,
}

/// Per-query parameter rules, applied before a search hits the stores.
struct QueryOptimizer {
    semantic_batch_size: usize,
}

impl QueryOptimizer {
    fn optimize_semantic(&self, query: &str, limit: usize) -> (String, usize, Vec<String>) {
        let mut applied = Vec::new();
        let mut optimized_query = query.trim().to_string();
        let mut optimized_limit = limit;

        if query.len() > 200 {
            let truncated: String = query.chars().take(200).collect();
            optimized_query = format!("{truncated}...");
            applied.push("query_truncation".to_string());
        }

        if limit > self.semantic_batch_size {
            optimized_limit = self.semantic_batch_size;
            applied.push("limit_reduction".to_string());
        }

        let words: Vec<&str> = optimized_query.split_whitespace().collect();
        if words.len() > 20 {
            let mut kept: Vec<&str> = words[..10].to_vec();
            kept.extend_from_slice(&words[words.len() - 5..]);
            optimized_query = kept.join(" ");
            applied.push("word_reduction".to_string());
        }

        (optimized_query, optimized_limit, applied)
    }

    fn optimize_graph(
        &self,
        query: &str,
        search_type: &str,
        max_depth: usize,
    ) -> (String, String, usize, Vec<String>) {
        let mut applied = Vec::new();
        let optimized_query = query.trim().to_string();
        let mut optimized_search_type = search_type.to_string();
        let mut optimized_depth = max_depth;

        let word_count = query.split_whitespace().count();
        if max_depth > 3 && word_count < 3 {
            optimized_depth = 2;
            applied.push("depth_reduction_simple".to_string());
        } else if max_depth > 3 {
            optimized_depth = 3;
            applied.push("depth_capping".to_string());
        }

        let query_lower = query.to_lowercase();
        if query_lower.contains("concept") && search_type == "document" {
            optimized_search_type = "concept".to_string();
            applied.push("search_type_concept".to_string());
        } else if query_lower.contains("document") && search_type == "concept" {
            optimized_search_type = "document".to_string();
            applied.push("search_type_document".to_string());
        }

        (optimized_query, optimized_search_type, optimized_depth, applied)
    }
}

#[derive(Default)]
struct RollingMetrics {
    query_count: u64,
    total_query_time_ms: f64,
    optimizations_applied: Vec<String>,
}

struct TuningState {
    query_timeout: Duration,
    optimization_level: OptimizationLevel,
}

/// Wraps calls to the semantic and graph subsystems with caching, bounded
/// concurrency, timeouts, and adaptive parameter tuning.
pub struct PerformanceOptimizer {
    config: PerformanceConfig,
    query_cache: LruCache<serde_json::Value>,
    result_cache: LruCache<serde_json::Value>,
    embedding_cache: LruCache<serde_json::Value>,
    concept_cache: LruCache<serde_json::Value>,
    query_optimizer: QueryOptimizer,
    pool: ConnectionPool,
    query_semaphore: Arc<Semaphore>,
    metrics: Mutex<RollingMetrics>,
    bottlenecks: Mutex<HashMap<String, u64>>,
    tuning: Mutex<TuningState>,
    started_at: Instant,
}

impl PerformanceOptimizer {
    pub fn new(config: PerformanceConfig) -> Self {
        let query_cache = LruCache::new(config.query_cache_size, config.cache_ttl);
        let result_cache = LruCache::new(config.result_cache_size, config.cache_ttl);
        // Embeddings are stable; give them twice the default lifetime.
        let embedding_cache = LruCache::new(config.embedding_cache_size, config.cache_ttl * 2);
        let concept_cache = LruCache::new(config.concept_cache_size, config.cache_ttl);
        let pool = ConnectionPool::new(config.connection_pool_size, config.connection_timeout);
        let query_semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries));
        let tuning = Mutex::new(TuningState {
            query_timeout: config.query_timeout,
            optimization_level: config.optimization_level,
        });
        Self {
            query_optimizer: QueryOptimizer {
                semantic_batch_size: config.semantic_batch_size,
            },
            query_cache,
            result_cache,
            embedding_cache,
            concept_cache,
            pool,
            query_semaphore,
            metrics: Mutex::new(RollingMetrics::default()),
            bottlenecks: Mutex::new(HashMap::new()),
            tuning,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn current_timeout(&self) -> Duration {
        self.tuning.lock().query_timeout
    }

    pub fn current_level(&self) -> OptimizationLevel {
        self.tuning.lock().optimization_level
    }

    fn cache_for(&self, kind: CacheKind) -> &LruCache<serde_json::Value> {
        match kind {
            CacheKind::Query => &self.query_cache,
            CacheKind::Result => &self.result_cache,
            CacheKind::Embedding => &self.embedding_cache,
            CacheKind::Concept => &self.concept_cache,
        }
    }

    /// Stable digest of an operation name and its parameters. serde_json
    /// object keys are ordered, so equal parameter maps digest identically.
    pub fn cache_key(operation: &str, params: &serde_json::Value) -> String {
        let digest = md5::compute(format!("{operation}:{params}").as_bytes());
        format!("{digest:x}")
    }

    /// Consult the selected cache before running `op`; store its result on a
    /// miss. Returns the value and whether it was served from cache.
    pub async fn cached_operation<F, Fut>(
        &self,
        kind: CacheKind,
        operation: &str,
        params: &serde_json::Value,
        op: F,
    ) -> Result<(serde_json::Value, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let key = Self::cache_key(operation, params);
        let cache = self.cache_for(kind);

        if let Some(value) = cache.get(&key) {
            debug!(cache = kind.name(), operation, "cache hit");
            return Ok((value, true));
        }

        let started = Instant::now();
        let result = op().await?;
        cache.put(key, result.clone());
        debug!(
            cache = kind.name(),
            operation,
            execution_time_ms = started.elapsed().as_millis() as u64,
            "cache miss, operation executed"
        );
        Ok((result, false))
    }

    /// Apply level- and query-specific parameter rules ahead of a search.
    pub fn optimize_search_parameters(
        &self,
        query: &str,
        query_type: &str,
        limit: Option<usize>,
        search_type: Option<&str>,
        max_depth: Option<usize>,
    ) -> OptimizedParameters {
        let mut params = OptimizedParameters {
            query: query.to_string(),
            query_type: query_type.to_string(),
            limit,
            search_type: search_type.map(str::to_string),
            max_depth,
            applied_optimizations: Vec::new(),
        };

        match self.current_level() {
            OptimizationLevel::Aggressive => {
                if let Some(limit) = params.limit {
                    if limit > 50 {
                        params.limit = Some(50);
                        params
                            .applied_optimizations
                            .push("aggressive_limit_reduction".to_string());
                    }
                }
                if let Some(depth) = params.max_depth {
                    if depth > 2 {
                        params.max_depth = Some(2);
                        params
                            .applied_optimizations
                            .push("aggressive_depth_reduction".to_string());
                    }
                }
            }
            OptimizationLevel::Extreme => {
                if let Some(limit) = params.limit {
                    if limit > 25 {
                        params.limit = Some(25);
                        params
                            .applied_optimizations
                            .push("extreme_limit_reduction".to_string());
                    }
                }
                if let Some(depth) = params.max_depth {
                    if depth > 1 {
                        params.max_depth = Some(1);
                        params
                            .applied_optimizations
                            .push("extreme_depth_reduction".to_string());
                    }
                }
            }
            _ => {}
        }

        if query_type.contains("semantic") {
            let (opt_query, opt_limit, applied) = self
                .query_optimizer
                .optimize_semantic(&params.query, params.limit.unwrap_or(50));
            params.query = opt_query;
            params.limit = Some(opt_limit);
            params.applied_optimizations.extend(applied);
        }

        if query_type.contains("graph") {
            if let (Some(search_type), Some(depth)) =
                (params.search_type.clone(), params.max_depth)
            {
                let (opt_query, opt_type, opt_depth, applied) = self
                    .query_optimizer
                    .optimize_graph(&params.query, &search_type, depth);
                params.query = opt_query;
                params.search_type = Some(opt_type);
                params.max_depth = Some(opt_depth);
                params.applied_optimizations.extend(applied);
            }
        }

        debug!(
            query_type,
            applied = params.applied_optimizations.len(),
            "search parameters optimized"
        );
        params
    }

    /// Run `op` under the global concurrency governor, a pool permit, and the
    /// current query timeout, recording rolling metrics and bottlenecks.
    pub async fn execute_with_monitoring<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _slot = self
            .query_semaphore
            .acquire()
            .await
            .map_err(|_| PtolemiesError::Cancelled("concurrency governor closed".into()))?;

        if !self.pool.acquire().await {
            self.record_bottleneck(&format!("error_{operation}"));
            return Err(PtolemiesError::UpstreamUnavailable(
                "could not acquire connection permit".into(),
            ));
        }

        let started = Instant::now();
        let timeout = self.current_timeout();
        let outcome = tokio::time::timeout(timeout, op()).await;
        self.pool.release();

        match outcome {
            Ok(Ok(value)) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                {
                    let mut metrics = self.metrics.lock();
                    metrics.query_count += 1;
                    metrics.total_query_time_ms += elapsed_ms;
                }
                if elapsed_ms > self.config.target_response_time_ms {
                    self.record_bottleneck(&format!("slow_{operation}"));
                    warn!(
                        operation,
                        execution_time_ms = elapsed_ms as u64,
                        target_ms = self.config.target_response_time_ms as u64,
                        "performance target missed"
                    );
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_bottleneck(&format!("error_{operation}"));
                Err(e)
            }
            Err(_) => {
                self.record_bottleneck(&format!("timeout_{operation}"));
                Err(PtolemiesError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    fn record_bottleneck(&self, key: &str) {
        *self.bottlenecks.lock().entry(key.to_string()).or_insert(0) += 1;
    }

    /// Adjust timeout, optimization level, and cache TTLs from the bottleneck
    /// histogram. A no-op until at least ten samples have accumulated.
    pub fn adaptive_optimization(&self) {
        let histogram = self.bottlenecks.lock().clone();
        let total: u64 = histogram.values().sum();
        if total < 10 {
            return;
        }

        let mut applied = Vec::new();

        let timeout_count: u64 = histogram
            .iter()
            .filter(|(k, _)| k.starts_with("timeout"))
            .map(|(_, v)| v)
            .sum();
        if timeout_count as f64 / total as f64 > 0.1 {
            let mut tuning = self.tuning.lock();
            let old_ms = tuning.query_timeout.as_millis() as u64;
            let new_ms = ((old_ms as f64) * 0.8).max(50.0) as u64;
            tuning.query_timeout = Duration::from_millis(new_ms);
            applied.push(format!("timeout_reduction:{old_ms}->{new_ms}"));
        }

        let slow_count: u64 = histogram
            .iter()
            .filter(|(k, _)| k.starts_with("slow"))
            .map(|(_, v)| v)
            .sum();
        if slow_count as f64 / total as f64 > 0.2 {
            let mut tuning = self.tuning.lock();
            let old = tuning.optimization_level;
            let new = old.step_up();
            if new != old {
                tuning.optimization_level = new;
                applied.push(format!(
                    "optimization_level:{}->{}",
                    old.as_str(),
                    new.as_str()
                ));
            }
        }

        for (name, cache) in [
            ("query", &self.query_cache),
            ("result", &self.result_cache),
            ("embedding", &self.embedding_cache),
            ("concept", &self.concept_cache),
        ] {
            let stats = cache.stats();
            if stats.hit_rate < 0.5 && (stats.size as f64) < stats.max_size as f64 * 0.8 {
                let ttl = cache.ttl();
                let raised =
                    Duration::from_secs(((ttl.as_secs() as f64) * 1.2).min(7200.0) as u64);
                cache.set_ttl(raised);
                applied.push(format!("{name}_cache_ttl_increase"));
            }
        }

        if !applied.is_empty() {
            info!(optimizations = ?applied, "adaptive optimizations applied");
            self.metrics.lock().optimizations_applied.extend(applied);
        }
    }

    pub fn cache_stats(&self) -> HashMap<&'static str, LruStats> {
        HashMap::from([
            ("query_cache", self.query_cache.stats()),
            ("result_cache", self.result_cache.stats()),
            ("embedding_cache", self.embedding_cache.stats()),
            ("concept_cache", self.concept_cache.stats()),
        ])
    }

    /// Comprehensive performance report for the stats surface.
    pub fn report(&self) -> serde_json::Value {
        let cache_stats = self.cache_stats();
        let total_hits: u64 = cache_stats.values().map(|s| s.hits).sum();
        let total_misses: u64 = cache_stats.values().map(|s| s.misses).sum();
        let overall_hit_rate = if total_hits + total_misses > 0 {
            total_hits as f64 / (total_hits + total_misses) as f64
        } else {
            0.0
        };

        let (query_count, total_time_ms, optimizations) = {
            let metrics = self.metrics.lock();
            (
                metrics.query_count,
                metrics.total_query_time_ms,
                metrics.optimizations_applied.clone(),
            )
        };
        let avg_query_time_ms = if query_count > 0 {
            total_time_ms / query_count as f64
        } else {
            0.0
        };

        let histogram = self.bottlenecks.lock().clone();
        let mut top: Vec<(String, u64)> = histogram.clone().into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(5);
        let total_issues: u64 = histogram.values().sum();

        let uptime = self.started_at.elapsed().as_secs_f64().max(1.0);
        let target_met = avg_query_time_ms <= self.config.target_response_time_ms
            && overall_hit_rate >= self.config.target_cache_hit_rate;

        let pool = self.pool.stats();
        let cache_json: serde_json::Map<String, serde_json::Value> = cache_stats
            .into_iter()
            .map(|(name, stats)| {
                (
                    name.to_string(),
                    serde_json::json!({
                        "size": stats.size,
                        "max_size": stats.max_size,
                        "hits": stats.hits,
                        "misses": stats.misses,
                        "hit_rate": stats.hit_rate,
                        "memory_usage_estimate": stats.memory_usage_estimate,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "performance_metrics": {
                "query_count": query_count,
                "total_query_time_ms": total_time_ms,
                "avg_query_time_ms": avg_query_time_ms,
                "cache_hits": total_hits,
                "cache_misses": total_misses,
                "cache_hit_rate": overall_hit_rate,
                "optimizations_applied": optimizations,
            },
            "cache_statistics": cache_json,
            "connection_pool": {
                "max_size": pool.max_size,
                "active": pool.active,
                "available": pool.available,
                "reused": pool.reused,
                "timeouts": pool.timeouts,
                "errors": pool.errors,
            },
            "configuration": {
                "optimization_level": self.current_level().as_str(),
                "query_timeout_ms": self.current_timeout().as_millis() as u64,
                "target_response_time_ms": self.config.target_response_time_ms,
                "target_cache_hit_rate": self.config.target_cache_hit_rate,
            },
            "runtime_info": {
                "uptime_seconds": uptime,
                "queries_per_second": query_count as f64 / uptime,
                "target_met": target_met,
            },
            "bottleneck_analysis": {
                "top_bottlenecks": top,
                "total_issues": total_issues,
                "issue_rate": total_issues as f64 / query_count.max(1) as f64,
            },
        })
    }

    pub fn clear_caches(&self) {
        self.query_cache.clear();
        self.result_cache.clear();
        self.embedding_cache.clear();
        self.concept_cache.clear();
        info!("all optimizer caches cleared");
    }

    /// Seed the query cache so common lookups start warm.
    pub fn warmup_caches(&self, common_queries: &[&str]) {
        for query in common_queries {
            let params = serde_json::json!({ "query": query });
            let key = Self::cache_key("warmup", &params);
            self.query_cache
                .put(key, serde_json::json!({ "warmed": true, "query": query }));
        }
        info!(warmed = common_queries.len(), "cache warmup completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> PerformanceOptimizer {
        PerformanceOptimizer::new(PerformanceConfig::default())
    }

    #[tokio::test]
    async fn cached_operation_serves_second_call_from_cache() {
        let optimizer = optimizer();
        let params = serde_json::json!({"query": "auth", "limit": 10});

        let (value, cached) = optimizer
            .cached_operation(CacheKind::Result, "semantic_search", &params, || async {
                Ok(serde_json::json!({"results": 3}))
            })
            .await
            .unwrap();
        assert!(!cached);
        assert_eq!(value["results"], 3);

        let (value, cached) = optimizer
            .cached_operation(CacheKind::Result, "semantic_search", &params, || async {
                panic!("must not re-execute")
            })
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(value["results"], 3);
    }

    #[test]
    fn cache_key_is_stable_for_equal_params() {
        let a = serde_json::json!({"limit": 5, "query": "x"});
        let b = serde_json::json!({"query": "x", "limit": 5});
        assert_eq!(
            PerformanceOptimizer::cache_key("op", &a),
            PerformanceOptimizer::cache_key("op", &b)
        );
        assert_ne!(
            PerformanceOptimizer::cache_key("op", &a),
            PerformanceOptimizer::cache_key("other", &a)
        );
    }

    #[test]
    fn long_semantic_query_is_truncated_and_tagged() {
        let optimizer = optimizer();
        let long_query = "a".repeat(250);
        let params =
            optimizer.optimize_search_parameters(&long_query, "semantic_only", Some(10), None, None);
        assert!(params
            .applied_optimizations
            .contains(&"query_truncation".to_string()));
        assert!(params.query.len() <= 203);
    }

    #[test]
    fn oversized_limit_is_capped_and_tagged() {
        let optimizer = optimizer();
        let params =
            optimizer.optimize_search_parameters("auth", "semantic_only", Some(500), None, None);
        assert_eq!(params.limit, Some(50));
        assert!(params
            .applied_optimizations
            .contains(&"limit_reduction".to_string()));
    }

    #[test]
    fn wordy_query_keeps_head_and_tail() {
        let optimizer = optimizer();
        let query = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let params = optimizer.optimize_search_parameters(&query, "semantic_only", None, None, None);
        assert!(params
            .applied_optimizations
            .contains(&"word_reduction".to_string()));
        assert_eq!(params.query.split_whitespace().count(), 15);
        assert!(params.query.starts_with("w0"));
        assert!(params.query.ends_with("w29"));
    }

    #[test]
    fn simple_graph_query_gets_shallow_depth() {
        let optimizer = optimizer();
        let params = optimizer.optimize_search_parameters(
            "auth",
            "graph_only",
            None,
            Some("concept"),
            Some(5),
        );
        assert_eq!(params.max_depth, Some(2));
        assert!(params
            .applied_optimizations
            .contains(&"depth_reduction_simple".to_string()));
    }

    #[test]
    fn graph_depth_is_capped_at_three() {
        let optimizer = optimizer();
        let params = optimizer.optimize_search_parameters(
            "relationships between many authentication concepts here",
            "graph_only",
            None,
            Some("document"),
            Some(6),
        );
        assert_eq!(params.max_depth, Some(3));
        assert!(params
            .applied_optimizations
            .contains(&"depth_capping".to_string()));
        // "concept" word routes the search type.
        assert_eq!(params.search_type.as_deref(), Some("concept"));
    }

    #[test]
    fn extreme_level_clamps_hard() {
        let optimizer = PerformanceOptimizer::new(PerformanceConfig {
            optimization_level: OptimizationLevel::Extreme,
            ..Default::default()
        });
        let params = optimizer.optimize_search_parameters(
            "big graph walk",
            "graph_only",
            Some(100),
            Some("concept"),
            Some(4),
        );
        assert_eq!(params.limit, Some(25));
        assert_eq!(params.max_depth, Some(1));
        assert!(params
            .applied_optimizations
            .contains(&"extreme_limit_reduction".to_string()));
        assert!(params
            .applied_optimizations
            .contains(&"extreme_depth_reduction".to_string()));
    }

    #[tokio::test]
    async fn monitored_execution_records_metrics() {
        let optimizer = optimizer();
        let result: i32 = optimizer
            .execute_with_monitoring("fast_op", || async { Ok(41 + 1) })
            .await
            .unwrap();
        assert_eq!(result, 42);

        let report = optimizer.report();
        assert_eq!(report["performance_metrics"]["query_count"], 1);
        // Permit returned on the success path.
        assert_eq!(optimizer.pool.stats().active, 0);
    }

    #[tokio::test]
    async fn monitored_execution_times_out() {
        let optimizer = PerformanceOptimizer::new(PerformanceConfig {
            query_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let result: Result<()> = optimizer
            .execute_with_monitoring("slow_op", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PtolemiesError::Timeout(_))));
        assert_eq!(optimizer.pool.stats().active, 0);
        assert_eq!(*optimizer.bottlenecks.lock().get("timeout_slow_op").unwrap(), 1);
    }

    #[tokio::test]
    async fn monitored_execution_propagates_errors() {
        let optimizer = optimizer();
        let result: Result<()> = optimizer
            .execute_with_monitoring("bad_op", || async {
                Err(PtolemiesError::UpstreamUnavailable("store down".into()))
            })
            .await;
        assert!(matches!(result, Err(PtolemiesError::UpstreamUnavailable(_))));
        assert_eq!(*optimizer.bottlenecks.lock().get("error_bad_op").unwrap(), 1);
        assert_eq!(optimizer.pool.stats().active, 0);
    }

    #[test]
    fn adaptive_optimization_waits_for_samples() {
        let optimizer = optimizer();
        for _ in 0..5 {
            optimizer.record_bottleneck("timeout_x");
        }
        optimizer.adaptive_optimization();
        assert_eq!(optimizer.current_timeout(), Duration::from_millis(90));
    }

    #[test]
    fn adaptive_optimization_shrinks_timeout_on_timeouts() {
        let optimizer = optimizer();
        for _ in 0..4 {
            optimizer.record_bottleneck("timeout_search");
        }
        for _ in 0..8 {
            optimizer.record_bottleneck("slow_search");
        }
        optimizer.adaptive_optimization();
        // 90ms * 0.8 = 72ms
        assert_eq!(optimizer.current_timeout(), Duration::from_millis(72));
        // 8/12 slow also escalates the level.
        assert_eq!(optimizer.current_level(), OptimizationLevel::Aggressive);
    }

    #[test]
    fn adaptive_timeout_has_a_floor() {
        let optimizer = PerformanceOptimizer::new(PerformanceConfig {
            query_timeout: Duration::from_millis(55),
            ..Default::default()
        });
        for _ in 0..12 {
            optimizer.record_bottleneck("timeout_op");
        }
        optimizer.adaptive_optimization();
        assert_eq!(optimizer.current_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn report_shape_and_target_flag() {
        let optimizer = optimizer();
        optimizer.warmup_caches(&["FastAPI authentication", "Redis caching"]);
        let report = optimizer.report();
        assert!(report["cache_statistics"]["query_cache"]["size"].as_u64().unwrap() >= 2);
        assert!(report["runtime_info"]["queries_per_second"].is_number());
        assert!(report["bottleneck_analysis"]["top_bottlenecks"].is_array());
        // No queries and no hits yet: target not met.
        assert_eq!(report["runtime_info"]["target_met"], false);
    }
}
