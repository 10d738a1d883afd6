use futures::future::join_all;
use parking_lot::Mutex;
use ptolemies_core::{
    GraphSearchResult, GraphSearchType, GraphStore, HybridSearchResult, QueryType, RankingStrategy,
    Result, SemanticHit, VectorStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the hybrid query engine.
#[derive(Debug, Clone)]
pub struct HybridQueryConfig {
    pub vector_weight: f32,
    pub graph_weight: f32,
    pub concept_expansion_threshold: f32,
    pub max_results: usize,
    pub semantic_limit: usize,
    pub graph_limit: usize,
    pub similarity_threshold: f32,
    pub graph_depth: usize,
    pub enable_concept_expansion: bool,
    pub enable_result_fusion: bool,
    pub ranking_strategy: RankingStrategy,
}

impl Default for HybridQueryConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            graph_weight: 0.4,
            concept_expansion_threshold: 0.8,
            max_results: 50,
            semantic_limit: 100,
            graph_limit: 100,
            similarity_threshold: 0.5,
            graph_depth: 2,
            enable_concept_expansion: true,
            enable_result_fusion: true,
            ranking_strategy: RankingStrategy::WeightedAverage,
        }
    }
}

/// The engine's lightweight view of a query, used to weight fusion.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryAnalysis {
    pub query_type: String,
    pub detected_concepts: Vec<String>,
    pub suggested_expansions: Vec<String>,
    pub complexity_score: f32,
    pub semantic_weight: f32,
    pub graph_weight: f32,
}

/// Per-call timing and cardinality metrics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HybridQueryMetrics {
    pub total_time_ms: f64,
    pub semantic_time_ms: f64,
    pub graph_time_ms: f64,
    pub fusion_time_ms: f64,
    pub total_results: usize,
    pub semantic_results: usize,
    pub graph_results: usize,
    pub unique_results: usize,
    pub overlap_count: usize,
    pub concept_expansions: usize,
    pub query_analysis: QueryAnalysis,
}

const SEMANTIC_INDICATORS: &[&str] = &["find", "similar", "like", "search", "match", "example"];
const RELATIONAL_INDICATORS: &[&str] = &[
    "related",
    "relationship",
    "connected",
    "concepts",
    "depends",
    "graph",
    "between",
];

const KNOWN_CONCEPTS: &[&str] = &[
    "authentication",
    "authorization",
    "caching",
    "database",
    "search",
    "performance",
    "security",
    "api",
    "async",
    "error",
];

const FRAMEWORK_EXPANSIONS: &[(&str, &[&str])] = &[
    ("fastapi", &["python", "web framework", "api", "async"]),
    ("neo4j", &["graph database", "cypher", "nodes", "relationships"]),
    ("redis", &["cache", "key-value store", "in-memory"]),
    ("surrealdb", &["vector database", "embeddings", "multi-model"]),
];

const COMMON_SUGGESTIONS: &[&str] = &[
    "authentication best practices",
    "authorization patterns",
    "api design",
    "async programming",
    "caching strategies",
    "database indexing",
    "error handling",
    "graph traversal",
    "performance tuning",
    "security vulnerabilities",
    "semantic search",
    "vector embeddings",
];

/// Orchestrates semantic and graph search and fuses their results into one
/// ranked list.
pub struct HybridQueryEngine {
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    config: HybridQueryConfig,
    analysis_cache: Mutex<HashMap<String, QueryAnalysis>>,
}

impl HybridQueryEngine {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        config: HybridQueryConfig,
    ) -> Self {
        Self {
            vector_store,
            graph_store,
            config,
            analysis_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HybridQueryConfig {
        &self.config
    }

    /// Classify a query as semantic-leaning, relation-leaning, or general,
    /// and derive the fusion weights. Analyses are cached per query text.
    pub fn analyze_query(&self, query: &str) -> QueryAnalysis {
        if let Some(cached) = self.analysis_cache.lock().get(query) {
            return cached.clone();
        }

        let lower = query.to_lowercase();
        let semantic_hits = SEMANTIC_INDICATORS
            .iter()
            .filter(|w| lower.contains(*w))
            .count();
        let relational_hits = RELATIONAL_INDICATORS
            .iter()
            .filter(|w| lower.contains(*w))
            .count();

        let (query_type, semantic_weight, graph_weight) = if relational_hits > semantic_hits {
            ("relational", 0.3, 0.7)
        } else if semantic_hits > 0 {
            ("semantic", 0.8, 0.2)
        } else {
            ("general", self.config.vector_weight, self.config.graph_weight)
        };

        let detected_concepts: Vec<String> = KNOWN_CONCEPTS
            .iter()
            .filter(|c| lower.contains(*c) || related_form(&lower, c))
            .map(|c| (*c).to_string())
            .collect();

        let mut suggested_expansions = Vec::new();
        for (framework, expansions) in FRAMEWORK_EXPANSIONS {
            if lower.contains(framework) {
                suggested_expansions.extend(expansions.iter().map(|e| (*e).to_string()));
            }
        }

        let word_count = lower.split_whitespace().count();
        let complexity_score =
            ((word_count as f32 / 10.0) + detected_concepts.len() as f32 * 0.1).min(1.0);

        let analysis = QueryAnalysis {
            query_type: query_type.to_string(),
            detected_concepts,
            suggested_expansions,
            complexity_score,
            semantic_weight,
            graph_weight,
        };

        self.analysis_cache
            .lock()
            .insert(query.to_string(), analysis.clone());
        analysis
    }

    /// Execute a search under the given strategy.
    ///
    /// A failing subsystem degrades to the other side's results; when both
    /// fail the call returns an empty list and metrics flagged with
    /// `query_type = "error"`. Errors never propagate to the pipeline.
    pub async fn search(
        &self,
        query: &str,
        strategy: QueryType,
        source_filter: Option<&[String]>,
        limit: usize,
    ) -> (Vec<HybridSearchResult>, HybridQueryMetrics) {
        let started = Instant::now();
        let analysis = self.analyze_query(query);

        if query.trim().is_empty() || limit == 0 {
            return (Vec::new(), empty_metrics(analysis, started));
        }

        let mut semantic_time_ms = 0.0;
        let mut graph_time_ms = 0.0;
        let mut concept_expansions = 0;
        let mut semantic_failed = false;
        let mut graph_failed = false;

        let mut semantic_hits: Vec<SemanticHit> = Vec::new();
        let mut graph_result = GraphSearchResult::default();
        let mut analysis = analysis;

        match strategy {
            QueryType::SemanticOnly => {
                let t = Instant::now();
                match self.semantic_search(query, limit, source_filter).await {
                    Ok(hits) => semantic_hits = hits,
                    Err(e) => {
                        warn!(error = %e, "semantic search failed");
                        semantic_failed = true;
                    }
                }
                semantic_time_ms = elapsed_ms(t);
                analysis.graph_weight = 0.0;
                analysis.semantic_weight = 1.0;
            }
            QueryType::GraphOnly => {
                let t = Instant::now();
                match self
                    .graph_search(query, GraphSearchType::Concept, self.config.graph_limit)
                    .await
                {
                    Ok(result) => graph_result = result,
                    Err(e) => {
                        warn!(error = %e, "graph search failed");
                        graph_failed = true;
                    }
                }
                graph_time_ms = elapsed_ms(t);
                analysis.semantic_weight = 0.0;
                analysis.graph_weight = 1.0;
            }
            QueryType::HybridBalanced => {
                let t = Instant::now();
                let (semantic, graph) = tokio::join!(
                    self.semantic_search(query, limit, source_filter),
                    self.graph_search(query, GraphSearchType::Concept, self.config.graph_limit),
                );
                let elapsed = elapsed_ms(t);
                semantic_time_ms = elapsed;
                graph_time_ms = elapsed;
                match semantic {
                    Ok(hits) => semantic_hits = hits,
                    Err(e) => {
                        warn!(error = %e, "semantic search failed");
                        semantic_failed = true;
                    }
                }
                match graph {
                    Ok(result) => graph_result = result,
                    Err(e) => {
                        warn!(error = %e, "graph search failed");
                        graph_failed = true;
                    }
                }
            }
            QueryType::SemanticThenGraph => {
                let t = Instant::now();
                match self.semantic_search(query, limit, source_filter).await {
                    Ok(hits) => semantic_hits = hits,
                    Err(e) => {
                        warn!(error = %e, "semantic search failed");
                        semantic_failed = true;
                    }
                }
                semantic_time_ms = elapsed_ms(t);

                let seed = top_topics(&semantic_hits, 3);
                let graph_query = if seed.is_empty() {
                    query.to_string()
                } else {
                    seed.join(" ")
                };
                let t = Instant::now();
                match self
                    .graph_search(&graph_query, GraphSearchType::Concept, self.config.graph_limit)
                    .await
                {
                    Ok(result) => graph_result = result,
                    Err(e) => {
                        warn!(error = %e, "seeded graph search failed");
                        graph_failed = true;
                    }
                }
                graph_time_ms = elapsed_ms(t);
                analysis.semantic_weight = (analysis.semantic_weight + 0.1).min(1.0);
            }
            QueryType::GraphThenSemantic => {
                let t = Instant::now();
                match self
                    .graph_search(query, GraphSearchType::Concept, self.config.graph_limit)
                    .await
                {
                    Ok(result) => graph_result = result,
                    Err(e) => {
                        warn!(error = %e, "graph search failed");
                        graph_failed = true;
                    }
                }
                graph_time_ms = elapsed_ms(t);

                // Search semantically over the textual projection of the nodes.
                let projection: Vec<String> = graph_result
                    .nodes
                    .iter()
                    .take(3)
                    .map(|n| n.name.clone())
                    .collect();
                let semantic_query = if projection.is_empty() {
                    query.to_string()
                } else {
                    format!("{} {}", query, projection.join(" "))
                };
                let t = Instant::now();
                match self
                    .semantic_search(&semantic_query, limit, source_filter)
                    .await
                {
                    Ok(hits) => semantic_hits = hits,
                    Err(e) => {
                        warn!(error = %e, "projected semantic search failed");
                        semantic_failed = true;
                    }
                }
                semantic_time_ms = elapsed_ms(t);
                analysis.graph_weight = (analysis.graph_weight + 0.1).min(1.0);
            }
            QueryType::ConceptExpansion => {
                let expanded = self.expand_query_concepts(query, &analysis).await;
                concept_expansions = expanded.len().saturating_sub(1);

                let t = Instant::now();
                let semantic_futures = expanded
                    .iter()
                    .map(|q| self.semantic_search(q, limit, source_filter));
                let (semantic_batches, graph) = tokio::join!(
                    join_all(semantic_futures),
                    self.graph_search(query, GraphSearchType::Concept, self.config.graph_limit),
                );
                let elapsed = elapsed_ms(t);
                semantic_time_ms = elapsed;
                graph_time_ms = elapsed;

                let mut seen = HashSet::new();
                let mut all_failed = true;
                for batch in semantic_batches {
                    match batch {
                        Ok(hits) => {
                            all_failed = false;
                            for hit in hits {
                                if seen.insert(hit.document.id.clone()) {
                                    semantic_hits.push(hit);
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "expanded semantic search failed"),
                    }
                }
                semantic_failed = all_failed;
                match graph {
                    Ok(result) => graph_result = result,
                    Err(e) => {
                        warn!(error = %e, "graph search failed");
                        graph_failed = true;
                    }
                }
            }
        }

        if semantic_failed && graph_failed {
            let mut analysis = analysis;
            analysis.query_type = "error".to_string();
            return (Vec::new(), empty_metrics(analysis, started));
        }

        let semantic_count = semantic_hits.len();
        let graph_count = graph_result.nodes.len();

        let fusion_started = Instant::now();
        let mut results = self.fuse_results(
            &semantic_hits,
            &graph_result,
            &analysis,
            strategy,
            concept_expansions > 0,
        );
        results.truncate(limit.min(self.config.max_results));
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        let fusion_time_ms = elapsed_ms(fusion_started);

        let semantic_ids: HashSet<&str> = semantic_hits
            .iter()
            .map(|h| h.document.id.as_str())
            .collect();
        let overlap_count = graph_result
            .nodes
            .iter()
            .filter(|n| semantic_ids.contains(n.id.as_str()))
            .count();

        let metrics = HybridQueryMetrics {
            total_time_ms: elapsed_ms(started),
            semantic_time_ms,
            graph_time_ms,
            fusion_time_ms,
            total_results: results.len(),
            semantic_results: semantic_count,
            graph_results: graph_count,
            unique_results: results.len(),
            overlap_count,
            concept_expansions,
            query_analysis: analysis,
        };

        info!(
            strategy = strategy.as_str(),
            results = metrics.total_results,
            total_time_ms = metrics.total_time_ms as u64,
            "hybrid search completed"
        );

        (results, metrics)
    }

    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        source_filter: Option<&[String]>,
    ) -> Result<Vec<SemanticHit>> {
        let limit = limit.min(self.config.semantic_limit);
        self.vector_store
            .semantic_search(
                query,
                limit,
                source_filter,
                Some(self.config.similarity_threshold),
            )
            .await
    }

    async fn graph_search(
        &self,
        query: &str,
        search_type: GraphSearchType,
        limit: usize,
    ) -> Result<GraphSearchResult> {
        self.graph_store
            .graph_search(query, search_type, limit, self.config.graph_depth)
            .await
    }

    /// Build the concept-expansion query list: the original query plus
    /// variants seeded from detected concepts and graph neighborhoods.
    pub async fn expand_query_concepts(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
    ) -> Vec<String> {
        let mut expanded = vec![query.to_string()];
        if !self.config.enable_concept_expansion {
            return expanded;
        }

        for concept in analysis.detected_concepts.iter().take(2) {
            expanded.push(format!("{query} {concept}"));
            match self
                .graph_search(concept, GraphSearchType::Concept, 5)
                .await
            {
                Ok(result) => {
                    for node in result.nodes.iter().take(2) {
                        let candidate = format!("{} {}", query, node.name.to_lowercase());
                        if !expanded.contains(&candidate) {
                            expanded.push(candidate);
                        }
                    }
                }
                Err(e) => debug!(error = %e, concept, "concept neighborhood lookup failed"),
            }
        }

        for expansion in analysis.suggested_expansions.iter().take(2) {
            let candidate = format!("{query} {expansion}");
            if !expanded.contains(&candidate) {
                expanded.push(candidate);
            }
        }

        expanded.truncate(5);
        expanded
    }

    /// Project both result sets to a common id-keyed shape, score them, and
    /// rank by the configured strategy.
    fn fuse_results(
        &self,
        semantic_hits: &[SemanticHit],
        graph_result: &GraphSearchResult,
        analysis: &QueryAnalysis,
        strategy: QueryType,
        from_expansion: bool,
    ) -> Vec<HybridSearchResult> {
        let mut merged: HashMap<String, HybridSearchResult> = HashMap::new();
        let mut semantic_ranks: HashMap<String, usize> = HashMap::new();
        let mut graph_ranks: HashMap<String, usize> = HashMap::new();

        for (i, hit) in semantic_hits.iter().enumerate() {
            let mut result = HybridSearchResult::from_chunk(&hit.document);
            result.semantic_score = hit.similarity_score.clamp(0.0, 1.0);
            result.found_via.push("semantic_search".to_string());
            if from_expansion {
                result.found_via.push("concept_expansion".to_string());
            }
            semantic_ranks.insert(result.id.clone(), i + 1);
            merged.insert(result.id.clone(), result);
        }

        let neighbor_names: HashMap<&str, &str> = graph_result
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.name.as_str()))
            .collect();

        for (i, node) in graph_result.nodes.iter().enumerate() {
            let graph_score = node.quality_score.clamp(0.0, 1.0);
            graph_ranks.insert(node.id.clone(), i + 1);

            let entry = merged
                .entry(node.id.clone())
                .or_insert_with(|| HybridSearchResult::from_graph_node(node));
            entry.graph_score = graph_score;
            entry.found_via.push("graph_search".to_string());

            // Related concepts come from this node's typed edges.
            for rel in &graph_result.relationships {
                let other = if rel.from_id == node.id {
                    Some(rel.to_id.as_str())
                } else if rel.to_id == node.id {
                    Some(rel.from_id.as_str())
                } else {
                    None
                };
                if let Some(other_id) = other {
                    if let Some(name) = neighbor_names.get(other_id) {
                        let name = (*name).to_string();
                        if !entry.related_concepts.contains(&name) {
                            entry.related_concepts.push(name);
                        }
                    }
                }
            }
            for path in &graph_result.paths {
                if path.iter().any(|id| id == &node.id) {
                    entry.relationship_paths.push(path.clone());
                }
            }
        }

        let mut results: Vec<HybridSearchResult> = merged.into_values().collect();

        let (w_s, w_g) = normalized_weights(analysis, strategy);
        let n_s = semantic_hits.len();
        let n_g = graph_result.nodes.len();

        for result in &mut results {
            let s = result.semantic_score;
            let g = result.graph_score;
            result.combined_score = match self.config.ranking_strategy {
                RankingStrategy::WeightedAverage => w_s * s + w_g * g,
                RankingStrategy::MaxScore => s.max(g),
                RankingStrategy::HarmonicMean => {
                    if s > 0.0 && g > 0.0 {
                        2.0 * s * g / (s + g)
                    } else {
                        s.max(g)
                    }
                }
                RankingStrategy::BordaCount => {
                    let s_rank = semantic_ranks.get(&result.id).copied();
                    let g_rank = graph_ranks.get(&result.id).copied();
                    let s_points = s_rank.map_or(0.0, |r| (n_s - r) as f32);
                    let g_points = g_rank.map_or(0.0, |r| (n_g - r) as f32);
                    s_points + g_points
                }
                RankingStrategy::ReciprocalRank => {
                    const K: f32 = 60.0;
                    let s_part = semantic_ranks
                        .get(&result.id)
                        .map_or(0.0, |r| 1.0 / (K + *r as f32));
                    let g_part = graph_ranks
                        .get(&result.id)
                        .map_or(0.0, |r| 1.0 / (K + *r as f32));
                    s_part + g_part
                }
            };
        }

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results
    }

    /// Run several queries concurrently; failed queries map to `([], None)`.
    pub async fn batch_search(
        &self,
        queries: &[String],
        strategy: QueryType,
        limit: usize,
    ) -> HashMap<String, (Vec<HybridSearchResult>, Option<HybridQueryMetrics>)> {
        let futures = queries.iter().map(|q| async move {
            let (results, metrics) = self.search(q, strategy, None, limit).await;
            (q.clone(), results, metrics)
        });
        let outcomes = join_all(futures).await;

        let mut map = HashMap::new();
        for (query, results, metrics) in outcomes {
            if metrics.query_analysis.query_type == "error" {
                map.insert(query, (Vec::new(), None));
            } else {
                map.insert(query, (results, Some(metrics)));
            }
        }
        map
    }

    /// Autocomplete-style suggestions: graph concept names merged with a
    /// static common-term list, prefix matches first.
    pub async fn get_query_suggestions(&self, partial: &str) -> Vec<String> {
        let partial_lower = partial.to_lowercase();
        let mut suggestions: Vec<String> = Vec::new();

        if partial_lower.len() >= 2 {
            match self
                .graph_search(partial, GraphSearchType::Concept, 10)
                .await
            {
                Ok(result) => {
                    for node in result.nodes {
                        suggestions.push(node.name.to_lowercase());
                    }
                }
                Err(e) => debug!(error = %e, "suggestion graph lookup failed"),
            }
        }

        for term in COMMON_SUGGESTIONS {
            if term.starts_with(&partial_lower) || term.contains(&partial_lower) {
                suggestions.push((*term).to_string());
            }
        }

        let mut seen = HashSet::new();
        suggestions.retain(|s| seen.insert(s.clone()));
        suggestions.sort_by_key(|s| !s.starts_with(&partial_lower));
        suggestions.truncate(10);
        suggestions
    }
}

fn related_form(query: &str, concept: &str) -> bool {
    match concept {
        "authentication" => query.contains("auth") || query.contains("login"),
        "caching" => query.contains("cache"),
        "async" => query.contains("asynchronous") || query.contains("concurrent"),
        "error" => query.contains("exception") || query.contains("bug"),
        _ => false,
    }
}

fn top_topics(hits: &[SemanticHit], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for hit in hits {
        for topic in &hit.document.topics {
            *counts.entry(topic.as_str()).or_insert(0) += 1;
        }
    }
    let mut topics: Vec<(&str, usize)> = counts.into_iter().collect();
    topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    topics
        .into_iter()
        .take(limit)
        .map(|(t, _)| t.to_string())
        .collect()
}

fn normalized_weights(analysis: &QueryAnalysis, strategy: QueryType) -> (f32, f32) {
    let (mut w_s, mut w_g) = (analysis.semantic_weight, analysis.graph_weight);
    match strategy {
        QueryType::SemanticOnly => return (1.0, 0.0),
        QueryType::GraphOnly => return (0.0, 1.0),
        _ => {}
    }
    let sum = w_s + w_g;
    if sum > 0.0 {
        w_s /= sum;
        w_g /= sum;
    } else {
        w_s = 0.5;
        w_g = 0.5;
    }
    (w_s, w_g)
}

fn empty_metrics(analysis: QueryAnalysis, started: Instant) -> HybridQueryMetrics {
    HybridQueryMetrics {
        total_time_ms: elapsed_ms(started),
        semantic_time_ms: 0.0,
        graph_time_ms: 0.0,
        fusion_time_ms: 0.0,
        total_results: 0,
        semantic_results: 0,
        graph_results: 0,
        unique_results: 0,
        overlap_count: 0,
        concept_expansions: 0,
        query_analysis: analysis,
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
