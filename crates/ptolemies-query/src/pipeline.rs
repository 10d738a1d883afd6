use crate::analyzer::{QueryPipelineConfig, QueryProcessor};
use crate::engine::HybridQueryEngine;
use ptolemies_cache::{namespaces, TieredCache};
use ptolemies_core::{
    ConversationTurn, EntityKind, HybridSearchResult, ProcessedQuery, QueryContext, QueryIntent,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub processing_time_ms: f64,
    pub session_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub cache_key_prefix: String,
}

/// Response envelope returned for every pipeline request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub query: String,
    pub processed_query: ProcessedQuery,
    pub results: Vec<HybridSearchResult>,
    pub metadata: ResponseMetadata,
}

/// Orchestrates a query end to end: session context, response cache, query
/// analysis, (possibly fanned-out) engine search, and intent-specific
/// post-processing.
pub struct QueryPipelineOrchestrator {
    config: QueryPipelineConfig,
    processor: QueryProcessor,
    engine: Arc<HybridQueryEngine>,
    cache: Option<Arc<TieredCache>>,
    sessions: Mutex<HashMap<String, QueryContext>>,
}

impl QueryPipelineOrchestrator {
    pub fn new(
        config: QueryPipelineConfig,
        engine: Arc<HybridQueryEngine>,
        cache: Option<Arc<TieredCache>>,
    ) -> Self {
        Self {
            processor: QueryProcessor::new(config.clone()),
            config,
            engine,
            cache,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn process_request(
        &self,
        query: &str,
        session_id: Option<&str>,
        user_id: Option<&str>,
        preferences: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<PipelineResponse> {
        let started = Instant::now();

        let context = self
            .get_or_create_context(session_id, user_id, preferences)
            .await;
        let cache_key = self.cache_key(query, &context);

        if self.config.enable_caching {
            if let Some(cache) = &self.cache {
                let (cached, found) = cache
                    .get::<PipelineResponse>(&cache_key, namespaces::QUERY_PIPELINE)
                    .await;
                if found {
                    if let Some(response) = cached {
                        info!(cache_key_prefix = &cache_key[..16.min(cache_key.len())], "pipeline cache hit");
                        return Ok(response);
                    }
                }
            }
        }

        let processed = self.processor.process(query, Some(&context));

        let results = if self.config.parallel_processing && !processed.expanded_queries.is_empty() {
            self.parallel_search(&processed).await
        } else {
            self.execute_search(&processed).await
        };

        let final_results = apply_intent_processing(&processed, results);

        self.update_context(&context.session_id, query, &processed)
            .await;

        let response = PipelineResponse {
            query: query.to_string(),
            processed_query: processed,
            results: final_results,
            metadata: ResponseMetadata {
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                session_id: context.session_id.clone(),
                timestamp: chrono::Utc::now(),
                cache_key_prefix: cache_key[..16.min(cache_key.len())].to_string(),
            },
        };

        if self.config.enable_caching {
            if let Some(cache) = &self.cache {
                let ttl = Duration::from_secs(self.config.cache_ttl_seconds);
                if !cache
                    .set(&cache_key, &response, namespaces::QUERY_PIPELINE, Some(ttl))
                    .await
                {
                    warn!("pipeline response not cached");
                }
            }
        }

        info!(
            processing_time_ms = response.metadata.processing_time_ms as u64,
            intent = response.processed_query.intent.as_str(),
            results = response.results.len(),
            "query pipeline completed"
        );

        Ok(response)
    }

    async fn get_or_create_context(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
        preferences: Option<HashMap<String, serde_json::Value>>,
    ) -> QueryContext {
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("session_{}", Uuid::new_v4().simple()));

        let mut sessions = self.sessions.lock().await;
        let context = sessions
            .entry(session_id.clone())
            .or_insert_with(|| QueryContext::new(session_id.clone()));

        if let Some(user_id) = user_id {
            context.user_id = Some(user_id.to_string());
        }
        if let Some(preferences) = preferences {
            context.preferences.extend(preferences);
        }
        let snapshot = context.clone();

        self.sweep_expired(&mut sessions);
        snapshot
    }

    fn sweep_expired(&self, sessions: &mut HashMap<String, QueryContext>) {
        let timeout = chrono::Duration::minutes(self.config.session_timeout_minutes as i64);
        let now = chrono::Utc::now();
        let before = sessions.len();
        sessions.retain(|_, ctx| now - ctx.last_activity <= timeout);
        let swept = before - sessions.len();
        if swept > 0 {
            info!(count = swept, "expired sessions cleaned");
        }
    }

    async fn update_context(&self, session_id: &str, query: &str, processed: &ProcessedQuery) {
        let mut sessions = self.sessions.lock().await;
        if let Some(context) = sessions.get_mut(session_id) {
            context.previous_queries.push(query.to_string());
            context.conversation_history.push(ConversationTurn {
                query: query.to_string(),
                intent: processed.intent,
                timestamp: chrono::Utc::now(),
            });
            context.last_activity = chrono::Utc::now();

            let window = self.config.context_window_size;
            if context.previous_queries.len() > window * 2 {
                let keep = context.previous_queries.split_off(
                    context.previous_queries.len() - window,
                );
                context.previous_queries = keep;
            }
            if context.conversation_history.len() > window * 2 {
                let keep = context.conversation_history.split_off(
                    context.conversation_history.len() - window,
                );
                context.conversation_history = keep;
            }
        }
    }

    async fn execute_search(&self, processed: &ProcessedQuery) -> Vec<HybridSearchResult> {
        let (results, _metrics) = self
            .engine
            .search(
                &processed.normalized_query,
                processed.search_strategy,
                None,
                50,
            )
            .await;
        results
    }

    /// Fan the expanded queries out as independent engine calls, bounded by
    /// the pipeline semaphore, then merge by id and re-sort.
    async fn parallel_search(&self, processed: &ProcessedQuery) -> Vec<HybridSearchResult> {
        let mut all_queries = vec![processed.normalized_query.clone()];
        all_queries.extend(processed.expanded_queries.iter().cloned());

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_operations));
        let futures = all_queries.iter().map(|query| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                let (results, _) = self
                    .engine
                    .search(query, processed.search_strategy, None, 50)
                    .await;
                Some(results)
            }
        });

        let batches = futures::future::join_all(futures).await;

        let mut merged: Vec<HybridSearchResult> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for batch in batches.into_iter().flatten() {
            for result in batch {
                if seen.insert(result.id.clone()) {
                    merged.push(result);
                }
            }
        }

        merged.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(merged = merged.len(), "parallel expansion search merged");
        merged
    }

    fn cache_key(&self, query: &str, context: &QueryContext) -> String {
        let result_limit = context
            .preferences
            .get("result_limit")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(self.config.result_limit as u64);
        let key_string = format!(
            "{}|{}|{}|{}",
            query.to_lowercase(),
            context.user_id.as_deref().unwrap_or("anonymous"),
            context.previous_queries.len(),
            result_limit,
        );
        format!("{:x}", md5::compute(key_string.as_bytes()))
    }

    pub async fn get_session_info(&self, session_id: &str) -> Option<serde_json::Value> {
        let sessions = self.sessions.lock().await;
        let context = sessions.get(session_id)?;
        Some(serde_json::json!({
            "session_id": session_id,
            "user_id": context.user_id,
            "query_count": context.previous_queries.len(),
            "last_query": context.previous_queries.last(),
            "preferences": context.preferences,
        }))
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            info!(session_id, "session cleared");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Shape the merged result list by intent.
fn apply_intent_processing(
    processed: &ProcessedQuery,
    results: Vec<HybridSearchResult>,
) -> Vec<HybridSearchResult> {
    if results.is_empty() {
        return results;
    }

    match processed.intent {
        QueryIntent::Summarize => results.into_iter().take(3).collect(),
        QueryIntent::Compare => {
            let mut grouped: Vec<HybridSearchResult> = Vec::new();
            let mut per_entity: HashMap<&str, usize> = HashMap::new();
            for entity in &processed.entities {
                per_entity.insert(entity.value.as_str(), 0);
            }
            for result in &results {
                let content = result.content.to_lowercase();
                for entity in &processed.entities {
                    if entity.kind != EntityKind::Technology && entity.kind != EntityKind::Concept {
                        continue;
                    }
                    let taken = per_entity.entry(entity.value.as_str()).or_insert(0);
                    if *taken < 2 && content.contains(&entity.value) {
                        grouped.push(result.clone());
                        *taken += 1;
                        break;
                    }
                }
            }
            grouped.truncate(10);
            grouped
        }
        QueryIntent::Tutorial => partition_by_markers(results, &["step", "guide", "tutorial", "example"], 5, 5),
        QueryIntent::Troubleshoot => {
            partition_by_markers(results, &["fix", "solution", "resolve", "solved"], 7, 3)
        }
        QueryIntent::Example => partition_by_markers(results, &["```", "code", "example", "sample"], 8, 2),
        _ => results.into_iter().take(10).collect(),
    }
}

/// Split results into marker-matching and rest, returning up to
/// `take_matching` of the former followed by `take_rest` of the latter.
fn partition_by_markers(
    results: Vec<HybridSearchResult>,
    markers: &[&str],
    take_matching: usize,
    take_rest: usize,
) -> Vec<HybridSearchResult> {
    let (matching, rest): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| {
        let content = r.content.to_lowercase();
        markers.iter().any(|m| content.contains(m))
    });
    matching
        .into_iter()
        .take(take_matching)
        .chain(rest.into_iter().take(take_rest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HybridQueryConfig;
    use async_trait::async_trait;
    use ptolemies_cache::{CacheLayerConfig, CacheMode};
    use ptolemies_core::{
        DocumentChunk, ExtractedEntity, GraphSearchResult, GraphSearchType, GraphStore,
        QueryComplexity, QueryType, SemanticHit, VectorStore,
    };

    struct ScriptedVectorStore {
        hits: Vec<SemanticHit>,
    }

    #[async_trait]
    impl VectorStore for ScriptedVectorStore {
        async fn semantic_search(
            &self,
            _query: &str,
            limit: usize,
            _source_filter: Option<&[String]>,
            _quality_threshold: Option<f32>,
        ) -> ptolemies_core::Result<Vec<SemanticHit>> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    struct EmptyGraphStore;

    #[async_trait]
    impl GraphStore for EmptyGraphStore {
        async fn graph_search(
            &self,
            _query: &str,
            _search_type: GraphSearchType,
            _limit: usize,
            _max_depth: usize,
        ) -> ptolemies_core::Result<GraphSearchResult> {
            Ok(GraphSearchResult::default())
        }
    }

    fn hit(id: &str, content: &str, score: f32) -> SemanticHit {
        SemanticHit {
            document: DocumentChunk {
                id: id.to_string(),
                source_name: "Docs".into(),
                source_url: "https://docs.example.com".into(),
                title: format!("Doc {id}"),
                content: content.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                quality_score: 0.8,
                topics: vec![],
                embedding: None,
            },
            similarity_score: score,
            rank: 0,
        }
    }

    fn orchestrator_with_hits(hits: Vec<SemanticHit>) -> QueryPipelineOrchestrator {
        let engine = Arc::new(HybridQueryEngine::new(
            Arc::new(ScriptedVectorStore { hits }),
            Arc::new(EmptyGraphStore),
            HybridQueryConfig::default(),
        ));
        let cache = Arc::new(TieredCache::new(CacheLayerConfig {
            cache_mode: CacheMode::LocalOnly,
            ..Default::default()
        }));
        QueryPipelineOrchestrator::new(QueryPipelineConfig::default(), engine, Some(cache))
    }

    fn result_with_content(id: &str, content: &str) -> HybridSearchResult {
        HybridSearchResult {
            id: id.to_string(),
            title: format!("Result {id}"),
            content: content.to_string(),
            source_name: "Docs".into(),
            source_url: "https://docs.example.com".into(),
            chunk_index: 0,
            total_chunks: 1,
            quality_score: 0.8,
            topics: vec![],
            semantic_score: 0.8,
            graph_score: 0.0,
            combined_score: 0.8,
            rank: 0,
            found_via: vec!["semantic_search".into()],
            related_concepts: vec![],
            relationship_paths: vec![],
        }
    }

    fn processed(intent: QueryIntent, entities: Vec<ExtractedEntity>) -> ProcessedQuery {
        ProcessedQuery {
            original_query: "q".into(),
            normalized_query: "q".into(),
            intent,
            complexity: QueryComplexity::Simple,
            entities,
            keywords: vec![],
            concepts: vec![],
            search_strategy: QueryType::SemanticOnly,
            confidence_score: 1.0,
            spell_corrected: false,
            expanded_queries: vec![],
        }
    }

    #[tokio::test]
    async fn process_request_returns_envelope() {
        let orchestrator = orchestrator_with_hits(vec![hit("d1", "auth guide content", 0.9)]);
        let response = orchestrator
            .process_request("find authentication docs", None, Some("user-7"), None)
            .await
            .unwrap();

        assert_eq!(response.query, "find authentication docs");
        assert!(!response.results.is_empty());
        assert!(response.metadata.session_id.starts_with("session_"));
        assert_eq!(response.metadata.cache_key_prefix.len(), 16);
        assert!(response.metadata.processing_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn repeated_request_is_served_from_cache() {
        let orchestrator = orchestrator_with_hits(vec![hit("d1", "cached content", 0.9)]);
        let first = orchestrator
            .process_request("widget docs", Some("s1"), None, None)
            .await
            .unwrap();
        // Context history grew after the first request, so pin the history
        // length by asking within the same session and query shape.
        let second = orchestrator
            .process_request("widget docs", Some("s2"), None, None)
            .await
            .unwrap();

        // Different sessions with empty history derive the same cache key.
        assert_eq!(
            first.results.iter().map(|r| &r.id).collect::<Vec<_>>(),
            second.results.iter().map(|r| &r.id).collect::<Vec<_>>()
        );
        assert_eq!(first.metadata.session_id, second.metadata.session_id);
    }

    #[tokio::test]
    async fn sessions_are_created_and_listed() {
        let orchestrator = orchestrator_with_hits(vec![hit("d1", "content", 0.9)]);
        orchestrator
            .process_request("first query", Some("session_a"), Some("u1"), None)
            .await
            .unwrap();

        let info = orchestrator.get_session_info("session_a").await.unwrap();
        assert_eq!(info["query_count"], 1);
        assert_eq!(info["last_query"], "first query");
        assert_eq!(info["user_id"], "u1");

        assert!(orchestrator.clear_session("session_a").await);
        assert!(orchestrator.get_session_info("session_a").await.is_none());
    }

    #[tokio::test]
    async fn context_buffer_is_bounded() {
        let orchestrator = orchestrator_with_hits(vec![hit("d1", "content", 0.9)]);
        for i in 0..15 {
            orchestrator
                .process_request(&format!("distinct query number {i}"), Some("s"), None, None)
                .await
                .unwrap();
        }
        let sessions = orchestrator.sessions.lock().await;
        let context = sessions.get("s").unwrap();
        // Window of 5: buffer never exceeds 2x and is trimmed back to the window.
        assert!(context.previous_queries.len() <= 10);
        assert!(context.conversation_history.len() <= 10);
    }

    #[test]
    fn summarize_takes_top_three() {
        let results: Vec<_> = (0..8)
            .map(|i| result_with_content(&format!("r{i}"), "body"))
            .collect();
        let shaped = apply_intent_processing(&processed(QueryIntent::Summarize, vec![]), results);
        assert_eq!(shaped.len(), 3);
    }

    #[test]
    fn compare_groups_by_entity() {
        let entities = vec![
            ExtractedEntity {
                kind: EntityKind::Technology,
                value: "python".into(),
                confidence: 0.9,
            },
            ExtractedEntity {
                kind: EntityKind::Technology,
                value: "javascript".into(),
                confidence: 0.9,
            },
        ];
        let results = vec![
            result_with_content("p1", "python handles this with asyncio"),
            result_with_content("p2", "python worker pools"),
            result_with_content("p3", "more python details"),
            result_with_content("j1", "javascript uses promises"),
            result_with_content("j2", "javascript event loop"),
            result_with_content("j3", "more javascript details"),
        ];
        let shaped = apply_intent_processing(&processed(QueryIntent::Compare, entities), results);

        assert!(shaped.len() <= 10);
        let python_count = shaped
            .iter()
            .filter(|r| r.content.contains("python"))
            .count();
        let js_count = shaped
            .iter()
            .filter(|r| r.content.contains("javascript"))
            .count();
        assert!(python_count <= 2);
        assert!(js_count <= 2);
        assert_eq!(python_count + js_count, shaped.len());
    }

    #[test]
    fn troubleshoot_prioritizes_solutions() {
        let mut results = Vec::new();
        for i in 0..10 {
            results.push(result_with_content(&format!("s{i}"), "the fix is to restart"));
        }
        for i in 0..5 {
            results.push(result_with_content(&format!("o{i}"), "background reading"));
        }
        let shaped =
            apply_intent_processing(&processed(QueryIntent::Troubleshoot, vec![]), results);
        assert_eq!(shaped.len(), 10);
        let solutions = shaped
            .iter()
            .filter(|r| r.content.contains("fix"))
            .count();
        assert_eq!(solutions, 7);
    }

    #[test]
    fn tutorial_splits_five_and_five() {
        let mut results = Vec::new();
        for i in 0..7 {
            results.push(result_with_content(&format!("t{i}"), "step by step guide"));
        }
        for i in 0..7 {
            results.push(result_with_content(&format!("o{i}"), "reference material"));
        }
        let shaped = apply_intent_processing(&processed(QueryIntent::Tutorial, vec![]), results);
        assert_eq!(shaped.len(), 10);
        assert_eq!(
            shaped.iter().filter(|r| r.content.contains("step")).count(),
            5
        );
    }

    #[test]
    fn example_splits_eight_and_two() {
        let mut results = Vec::new();
        for i in 0..9 {
            results.push(result_with_content(&format!("e{i}"), "code sample here"));
        }
        for i in 0..4 {
            results.push(result_with_content(&format!("o{i}"), "conceptual notes"));
        }
        let shaped = apply_intent_processing(&processed(QueryIntent::Example, vec![]), results);
        assert_eq!(shaped.len(), 10);
        assert_eq!(
            shaped.iter().filter(|r| r.content.contains("code")).count(),
            8
        );
    }

    #[test]
    fn default_intent_takes_top_ten() {
        let results: Vec<_> = (0..20)
            .map(|i| result_with_content(&format!("r{i}"), "body"))
            .collect();
        let shaped = apply_intent_processing(&processed(QueryIntent::Search, vec![]), results);
        assert_eq!(shaped.len(), 10);
    }
}
