use crate::content::{CallToolResult, PromptArgument, PromptSpec, ResourceSpec, TextContent, ToolSpec};
use crate::registry::{ToolCategory, ToolHandler, ToolMetadata, ToolRegistry};
use crate::schemas;
use async_trait::async_trait;
use ptolemies_cache::TieredCache;
use ptolemies_core::{DocumentChunk, DocumentIndexer, PtolemiesError, QueryType, Result};
use ptolemies_query::{HybridQueryEngine, PerformanceOptimizer};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_name: String,
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "ptolemies-knowledge".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Transport-agnostic knowledge server: the tool registry plus the built-in
/// search, stats, and suggestion tools, and the resource/prompt surface.
pub struct KnowledgeServer {
    config: ServerConfig,
    registry: Arc<ToolRegistry>,
    engine: Arc<HybridQueryEngine>,
    optimizer: Arc<PerformanceOptimizer>,
    cache: Option<Arc<TieredCache>>,
}

impl KnowledgeServer {
    pub fn new(
        config: ServerConfig,
        engine: Arc<HybridQueryEngine>,
        optimizer: Arc<PerformanceOptimizer>,
        cache: Option<Arc<TieredCache>>,
        indexer: Option<Arc<dyn DocumentIndexer>>,
    ) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let server = Self {
            config,
            registry,
            engine,
            optimizer,
            cache,
        };
        server.register_builtin_tools(indexer);
        server
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn register_builtin_tools(&self, indexer: Option<Arc<dyn DocumentIndexer>>) {
        let registry = &self.registry;

        registry.register(
            "semantic_search",
            Arc::new(SemanticSearchTool {
                engine: Arc::clone(&self.engine),
                optimizer: Arc::clone(&self.optimizer),
            }),
            ToolSpec::new(
                "semantic_search",
                "Search document chunks by embedding similarity",
                schemas::semantic_search_schema(),
            ),
            ToolMetadata::new(
                "semantic_search",
                "Search document chunks by embedding similarity",
                ToolCategory::Search,
            ),
        );

        registry.register(
            "graph_search",
            Arc::new(GraphSearchTool {
                engine: Arc::clone(&self.engine),
                optimizer: Arc::clone(&self.optimizer),
            }),
            ToolSpec::new(
                "graph_search",
                "Search the concept/document relationship graph",
                schemas::graph_search_schema(),
            ),
            ToolMetadata::new(
                "graph_search",
                "Search the concept/document relationship graph",
                ToolCategory::Search,
            ),
        );

        registry.register(
            "hybrid_search",
            Arc::new(HybridSearchTool {
                engine: Arc::clone(&self.engine),
                optimizer: Arc::clone(&self.optimizer),
            }),
            ToolSpec::new(
                "hybrid_search",
                "Combined semantic and graph search with result fusion",
                schemas::hybrid_search_schema(),
            ),
            ToolMetadata::new(
                "hybrid_search",
                "Combined semantic and graph search with result fusion",
                ToolCategory::Search,
            ),
        );

        registry.register(
            "index_document",
            Arc::new(IndexDocumentTool { indexer }),
            ToolSpec::new(
                "index_document",
                "Submit a document to the ingestion pipeline",
                schemas::index_document_schema(),
            ),
            ToolMetadata::new(
                "index_document",
                "Submit a document to the ingestion pipeline",
                ToolCategory::Knowledge,
            ),
        );

        registry.register(
            "get_knowledge_stats",
            Arc::new(KnowledgeStatsTool {
                optimizer: Arc::clone(&self.optimizer),
                cache: self.cache.clone(),
                server_name: self.config.server_name.clone(),
                server_version: self.config.server_version.clone(),
            }),
            ToolSpec::new(
                "get_knowledge_stats",
                "Aggregate cache and performance statistics",
                schemas::knowledge_stats_schema(),
            ),
            ToolMetadata::new(
                "get_knowledge_stats",
                "Aggregate cache and performance statistics",
                ToolCategory::Analytics,
            ),
        );

        registry.register(
            "get_query_suggestions",
            Arc::new(QuerySuggestionsTool {
                engine: Arc::clone(&self.engine),
            }),
            ToolSpec::new(
                "get_query_suggestions",
                "Complete a partial query from graph concepts and common terms",
                schemas::query_suggestions_schema(),
            ),
            ToolMetadata::new(
                "get_query_suggestions",
                "Complete a partial query from graph concepts and common terms",
                ToolCategory::Utilities,
            ),
        );

        info!(
            server = %self.config.server_name,
            tools = self.registry.tool_specs(None).len(),
            "built-in tools registered"
        );
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.registry.tool_specs(None)
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> CallToolResult {
        self.registry.execute(name, arguments).await
    }

    pub fn list_resources(&self) -> Vec<ResourceSpec> {
        vec![
            ResourceSpec {
                uri: "ptolemies://stats".into(),
                name: "Knowledge base statistics".into(),
                description: "Cache, performance, and registry statistics".into(),
                mime_type: "application/json".into(),
            },
            ResourceSpec {
                uri: "ptolemies://tools".into(),
                name: "Registered tools".into(),
                description: "Registry contents with usage counters".into(),
                mime_type: "application/json".into(),
            },
        ]
    }

    pub fn read_resource(&self, uri: &str) -> Result<Vec<TextContent>> {
        match uri {
            "ptolemies://stats" => {
                let mut stats = serde_json::json!({
                    "server": {
                        "name": self.config.server_name,
                        "version": self.config.server_version,
                    },
                    "performance": self.optimizer.report(),
                    "registry": self.registry.registry_stats(),
                });
                if let Some(cache) = &self.cache {
                    stats["cache"] = cache.stats();
                }
                Ok(vec![TextContent::json(&stats)])
            }
            "ptolemies://tools" => {
                let tools = self.registry.list_tools(None, None);
                Ok(vec![TextContent::json(&serde_json::json!({ "tools": tools }))])
            }
            other => Err(PtolemiesError::NotFound(format!("resource {other}"))),
        }
    }

    pub fn list_prompts(&self) -> Vec<PromptSpec> {
        vec![PromptSpec {
            name: "knowledge_query".into(),
            description: "Ask the documentation knowledge base a question".into(),
            arguments: vec![
                PromptArgument {
                    name: "topic".into(),
                    description: "Subject to ask about".into(),
                    required: true,
                },
                PromptArgument {
                    name: "detail_level".into(),
                    description: "overview or deep_dive".into(),
                    required: false,
                },
            ],
        }]
    }

    pub fn get_prompt(&self, name: &str, arguments: &serde_json::Value) -> Result<String> {
        match name {
            "knowledge_query" => {
                let topic = arguments["topic"].as_str().ok_or_else(|| {
                    PtolemiesError::InvalidArgument("prompt requires 'topic'".into())
                })?;
                let detail = arguments["detail_level"].as_str().unwrap_or("overview");
                Ok(format!(
                    "Answer the following question using the documentation knowledge base. \
                     Provide a {detail} response with sources cited.\n\nQuestion: {topic}"
                ))
            }
            other => Err(PtolemiesError::NotFound(format!("prompt {other}"))),
        }
    }
}

fn require_query(arguments: &serde_json::Value, field: &str) -> bool {
    arguments
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map_or(false, |s| !s.trim().is_empty())
}

fn source_filter(arguments: &serde_json::Value) -> Option<Vec<String>> {
    arguments.get("source_filter")?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

fn results_payload(
    query: &str,
    results: &[ptolemies_core::HybridSearchResult],
    metrics: &ptolemies_query::HybridQueryMetrics,
) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "results": results,
        "metrics": metrics,
    })
}

struct SemanticSearchTool {
    engine: Arc<HybridQueryEngine>,
    optimizer: Arc<PerformanceOptimizer>,
}

#[async_trait]
impl ToolHandler for SemanticSearchTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let query = arguments["query"].as_str().unwrap_or_default().to_string();
        let limit = arguments["limit"].as_u64().unwrap_or(50) as usize;
        let filter = source_filter(&arguments);

        let params =
            self.optimizer
                .optimize_search_parameters(&query, "semantic_only", Some(limit), None, None);
        let optimized_query = params.query.clone();
        let optimized_limit = params.limit.unwrap_or(limit);

        let engine = Arc::clone(&self.engine);
        let (results, metrics) = self
            .optimizer
            .execute_with_monitoring("semantic_search", || async move {
                Ok(engine
                    .search(
                        &optimized_query,
                        QueryType::SemanticOnly,
                        filter.as_deref(),
                        optimized_limit,
                    )
                    .await)
            })
            .await?;

        Ok(vec![TextContent::json(&results_payload(
            &query, &results, &metrics,
        ))])
    }

    fn validate_arguments(&self, arguments: &serde_json::Value) -> bool {
        require_query(arguments, "query")
    }
}

struct GraphSearchTool {
    engine: Arc<HybridQueryEngine>,
    optimizer: Arc<PerformanceOptimizer>,
}

#[async_trait]
impl ToolHandler for GraphSearchTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let query = arguments["query"].as_str().unwrap_or_default().to_string();
        let limit = arguments["limit"].as_u64().unwrap_or(50) as usize;
        let search_type = arguments["search_type"].as_str().unwrap_or("concept");
        let max_depth = arguments["max_depth"].as_u64().unwrap_or(2) as usize;

        let params = self.optimizer.optimize_search_parameters(
            &query,
            "graph_only",
            Some(limit),
            Some(search_type),
            Some(max_depth),
        );
        let optimized_query = params.query.clone();
        let optimized_limit = params.limit.unwrap_or(limit);

        let engine = Arc::clone(&self.engine);
        let (results, metrics) = self
            .optimizer
            .execute_with_monitoring("graph_search", || async move {
                Ok(engine
                    .search(&optimized_query, QueryType::GraphOnly, None, optimized_limit)
                    .await)
            })
            .await?;

        Ok(vec![TextContent::json(&results_payload(
            &query, &results, &metrics,
        ))])
    }

    fn validate_arguments(&self, arguments: &serde_json::Value) -> bool {
        require_query(arguments, "query")
    }
}

struct HybridSearchTool {
    engine: Arc<HybridQueryEngine>,
    optimizer: Arc<PerformanceOptimizer>,
}

#[async_trait]
impl ToolHandler for HybridSearchTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let query = arguments["query"].as_str().unwrap_or_default().to_string();
        let limit = arguments["limit"].as_u64().unwrap_or(50) as usize;
        let strategy_name = arguments["query_type"].as_str().unwrap_or("hybrid_balanced");
        let strategy = QueryType::from_str(strategy_name)
            .map_err(PtolemiesError::InvalidArgument)?;
        let filter = source_filter(&arguments);

        let params = self.optimizer.optimize_search_parameters(
            &query,
            strategy.as_str(),
            Some(limit),
            None,
            None,
        );
        let optimized_query = params.query.clone();
        let optimized_limit = params.limit.unwrap_or(limit);

        let engine = Arc::clone(&self.engine);
        let (results, metrics) = self
            .optimizer
            .execute_with_monitoring("hybrid_search", || async move {
                Ok(engine
                    .search(&optimized_query, strategy, filter.as_deref(), optimized_limit)
                    .await)
            })
            .await?;

        Ok(vec![TextContent::json(&results_payload(
            &query, &results, &metrics,
        ))])
    }

    fn validate_arguments(&self, arguments: &serde_json::Value) -> bool {
        require_query(arguments, "query")
    }
}

struct IndexDocumentTool {
    indexer: Option<Arc<dyn DocumentIndexer>>,
}

#[async_trait]
impl ToolHandler for IndexDocumentTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let indexer = self.indexer.as_ref().ok_or_else(|| {
            PtolemiesError::UpstreamUnavailable("ingestion pipeline is not configured".into())
        })?;

        let url = arguments["url"].as_str().unwrap_or_default();
        let content = arguments["content"].as_str().unwrap_or_default();
        if url.is_empty() && content.is_empty() {
            return Err(PtolemiesError::InvalidArgument(
                "either 'url' or 'content' is required".into(),
            ));
        }

        let chunk = DocumentChunk {
            id: uuid::Uuid::new_v4().to_string(),
            source_name: arguments["source_name"]
                .as_str()
                .unwrap_or(url)
                .to_string(),
            source_url: url.to_string(),
            title: arguments["title"].as_str().unwrap_or_default().to_string(),
            content: content.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            quality_score: 0.0,
            topics: arguments["topics"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            embedding: None,
        };

        let document_id = indexer.index_document(chunk).await?;
        Ok(vec![TextContent::json(&serde_json::json!({
            "status": "queued",
            "document_id": document_id,
        }))])
    }
}

struct KnowledgeStatsTool {
    optimizer: Arc<PerformanceOptimizer>,
    cache: Option<Arc<TieredCache>>,
    server_name: String,
    server_version: String,
}

#[async_trait]
impl ToolHandler for KnowledgeStatsTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let include_performance = arguments["include_performance"].as_bool().unwrap_or(true);
        let include_cache = arguments["include_cache"].as_bool().unwrap_or(true);

        let mut stats = serde_json::json!({
            "server": {
                "name": self.server_name,
                "version": self.server_version,
            },
        });
        if include_performance {
            stats["performance"] = self.optimizer.report();
        }
        if include_cache {
            if let Some(cache) = &self.cache {
                stats["cache"] = cache.stats();
            }
        }
        Ok(vec![TextContent::json(&stats)])
    }
}

struct QuerySuggestionsTool {
    engine: Arc<HybridQueryEngine>,
}

#[async_trait]
impl ToolHandler for QuerySuggestionsTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>> {
        let partial = arguments["partial_query"].as_str().unwrap_or_default();
        let limit = arguments["limit"].as_u64().unwrap_or(10) as usize;

        let mut suggestions = self.engine.get_query_suggestions(partial).await;
        suggestions.truncate(limit);
        Ok(vec![TextContent::json(&serde_json::json!({
            "partial_query": partial,
            "suggestions": suggestions,
        }))])
    }

    fn validate_arguments(&self, arguments: &serde_json::Value) -> bool {
        require_query(arguments, "partial_query")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptolemies_core::{
        GraphNode, GraphSearchResult, GraphSearchType, GraphStore, SemanticHit, VectorStore,
    };
    use ptolemies_query::{HybridQueryConfig, PerformanceConfig};

    struct StubVectorStore;

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn semantic_search(
            &self,
            _query: &str,
            _limit: usize,
            _source_filter: Option<&[String]>,
            _quality_threshold: Option<f32>,
        ) -> Result<Vec<SemanticHit>> {
            Ok(vec![SemanticHit {
                document: DocumentChunk {
                    id: "doc_1".into(),
                    source_name: "FastAPI".into(),
                    source_url: "https://fastapi.tiangolo.com".into(),
                    title: "Authentication Guide".into(),
                    content: "FastAPI provides authentication middleware".into(),
                    chunk_index: 0,
                    total_chunks: 1,
                    quality_score: 0.9,
                    topics: vec!["authentication".into()],
                    embedding: None,
                },
                similarity_score: 0.85,
                rank: 1,
            }])
        }
    }

    struct StubGraphStore;

    #[async_trait]
    impl GraphStore for StubGraphStore {
        async fn graph_search(
            &self,
            _query: &str,
            _search_type: GraphSearchType,
            _limit: usize,
            _max_depth: usize,
        ) -> Result<GraphSearchResult> {
            Ok(GraphSearchResult {
                nodes: vec![GraphNode {
                    id: "concept_auth".into(),
                    name: "Authentication".into(),
                    category: "Security".into(),
                    quality_score: 0.9,
                    title: None,
                    content: None,
                    source_name: None,
                    source_url: None,
                    topics: vec!["security".into()],
                }],
                relationships: vec![],
                paths: vec![],
                metadata: Default::default(),
            })
        }
    }

    fn server() -> KnowledgeServer {
        let engine = Arc::new(HybridQueryEngine::new(
            Arc::new(StubVectorStore),
            Arc::new(StubGraphStore),
            HybridQueryConfig::default(),
        ));
        let optimizer = Arc::new(PerformanceOptimizer::new(PerformanceConfig {
            query_timeout: std::time::Duration::from_millis(2000),
            ..Default::default()
        }));
        KnowledgeServer::new(ServerConfig::default(), engine, optimizer, None, None)
    }

    #[test]
    fn builtin_tools_are_listed() {
        let server = server();
        let names: Vec<String> = server.list_tools().into_iter().map(|t| t.name).collect();
        for expected in [
            "get_knowledge_stats",
            "get_query_suggestions",
            "graph_search",
            "hybrid_search",
            "index_document",
            "semantic_search",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn semantic_search_tool_returns_results() {
        let server = server();
        let result = server
            .call_tool(
                "semantic_search",
                serde_json::json!({"query": "authentication", "limit": 5}),
            )
            .await;
        assert!(!result.is_error, "{:?}", result.content);
        let payload: serde_json::Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(payload["results"][0]["id"], "doc_1");
        assert_eq!(payload["metrics"]["graph_results"], 0);
    }

    #[tokio::test]
    async fn graph_search_tool_returns_nodes() {
        let server = server();
        let result = server
            .call_tool(
                "graph_search",
                serde_json::json!({"query": "authentication concepts", "max_depth": 4}),
            )
            .await;
        assert!(!result.is_error);
        let payload: serde_json::Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(payload["results"][0]["id"], "concept_auth");
    }

    #[tokio::test]
    async fn hybrid_search_rejects_unknown_strategy() {
        let server = server();
        let result = server
            .call_tool(
                "hybrid_search",
                serde_json::json!({"query": "auth", "query_type": "nonsense"}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content[0].text.contains("unknown query type"));
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let server = server();
        let result = server
            .call_tool("semantic_search", serde_json::json!({"limit": 5}))
            .await;
        assert!(result.is_error);
        assert!(result.content[0].text.contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn index_document_without_pipeline_reports_unavailable() {
        let server = server();
        let result = server
            .call_tool(
                "index_document",
                serde_json::json!({"url": "https://example.com/doc"}),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content[0].text.contains("not configured"));
    }

    #[tokio::test]
    async fn knowledge_stats_include_performance_report() {
        let server = server();
        let result = server
            .call_tool("get_knowledge_stats", serde_json::json!({}))
            .await;
        assert!(!result.is_error);
        let payload: serde_json::Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert!(payload["performance"]["runtime_info"].is_object());
        assert_eq!(payload["server"]["name"], "ptolemies-knowledge");
    }

    #[tokio::test]
    async fn suggestions_tool_respects_limit() {
        let server = server();
        let result = server
            .call_tool(
                "get_query_suggestions",
                serde_json::json!({"partial_query": "auth", "limit": 3}),
            )
            .await;
        assert!(!result.is_error);
        let payload: serde_json::Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert!(payload["suggestions"].as_array().unwrap().len() <= 3);
    }

    #[test]
    fn resources_are_readable() {
        let server = server();
        assert_eq!(server.list_resources().len(), 2);

        let stats = server.read_resource("ptolemies://stats").unwrap();
        let payload: serde_json::Value = serde_json::from_str(&stats[0].text).unwrap();
        assert!(payload["registry"]["registry_info"].is_object());

        assert!(matches!(
            server.read_resource("ptolemies://missing"),
            Err(PtolemiesError::NotFound(_))
        ));
    }

    #[test]
    fn prompts_render_with_arguments() {
        let server = server();
        assert_eq!(server.list_prompts().len(), 1);

        let prompt = server
            .get_prompt(
                "knowledge_query",
                &serde_json::json!({"topic": "FastAPI security"}),
            )
            .unwrap();
        assert!(prompt.contains("FastAPI security"));
        assert!(prompt.contains("overview"));

        assert!(server
            .get_prompt("knowledge_query", &serde_json::json!({}))
            .is_err());
    }
}
