use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Fixed dimension of dense embeddings produced by the embedder.
pub const EMBEDDING_DIMENSION: usize = 1536;

/// A contiguous chunk of a source document plus its metadata. Produced by
/// ingestion, consumed read-only by the retrieval core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source_name: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub quality_score: f32,
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A semantic-search hit: a chunk with its similarity score and 1-based rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub document: DocumentChunk,
    pub similarity_score: f32,
    pub rank: usize,
}

/// A node returned by the graph store. Nodes anchored to a chunk carry a
/// projection of the chunk fields so fusion can surface them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub category: String,
    pub quality_score: f32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A typed edge between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from_id: String,
    pub to_id: String,
    pub relationship_type: String,
    #[serde(default)]
    pub strength: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    /// Ordered node-id sequences for discovered paths.
    pub paths: Vec<Vec<String>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A fused search result combining semantic and graph evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_name: String,
    pub source_url: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub quality_score: f32,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub semantic_score: f32,
    #[serde(default)]
    pub graph_score: f32,
    #[serde(default)]
    pub combined_score: f32,
    #[serde(default)]
    pub rank: usize,
    /// Which subsystems surfaced the result: "semantic_search",
    /// "graph_search", "concept_expansion".
    #[serde(default)]
    pub found_via: Vec<String>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
    #[serde(default)]
    pub relationship_paths: Vec<Vec<String>>,
}

impl HybridSearchResult {
    pub fn from_chunk(chunk: &DocumentChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            title: chunk.title.clone(),
            content: chunk.content.clone(),
            source_name: chunk.source_name.clone(),
            source_url: chunk.source_url.clone(),
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
            quality_score: chunk.quality_score,
            topics: chunk.topics.clone(),
            semantic_score: 0.0,
            graph_score: 0.0,
            combined_score: 0.0,
            rank: 0,
            found_via: Vec::new(),
            related_concepts: Vec::new(),
            relationship_paths: Vec::new(),
        }
    }

    pub fn from_graph_node(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            title: node.title.clone().unwrap_or_else(|| node.name.clone()),
            content: node.content.clone().unwrap_or_default(),
            source_name: node.source_name.clone().unwrap_or_default(),
            source_url: node.source_url.clone().unwrap_or_default(),
            chunk_index: 0,
            total_chunks: 0,
            quality_score: node.quality_score,
            topics: node.topics.clone(),
            semantic_score: 0.0,
            graph_score: 0.0,
            combined_score: 0.0,
            rank: 0,
            found_via: Vec::new(),
            related_concepts: Vec::new(),
            relationship_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Search,
    Explain,
    Compare,
    Analyze,
    Summarize,
    Tutorial,
    Troubleshoot,
    Definition,
    Example,
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Search => "search",
            QueryIntent::Explain => "explain",
            QueryIntent::Compare => "compare",
            QueryIntent::Analyze => "analyze",
            QueryIntent::Summarize => "summarize",
            QueryIntent::Tutorial => "tutorial",
            QueryIntent::Troubleshoot => "troubleshoot",
            QueryIntent::Definition => "definition",
            QueryIntent::Example => "example",
            QueryIntent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    Compound,
}

impl QueryComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Moderate => "moderate",
            QueryComplexity::Complex => "complex",
            QueryComplexity::Compound => "compound",
        }
    }
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Search strategy chosen for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SemanticOnly,
    GraphOnly,
    HybridBalanced,
    SemanticThenGraph,
    GraphThenSemantic,
    ConceptExpansion,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::SemanticOnly => "semantic_only",
            QueryType::GraphOnly => "graph_only",
            QueryType::HybridBalanced => "hybrid_balanced",
            QueryType::SemanticThenGraph => "semantic_then_graph",
            QueryType::GraphThenSemantic => "graph_then_semantic",
            QueryType::ConceptExpansion => "concept_expansion",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "semantic_only" => Ok(QueryType::SemanticOnly),
            "graph_only" => Ok(QueryType::GraphOnly),
            "hybrid_balanced" => Ok(QueryType::HybridBalanced),
            "semantic_then_graph" => Ok(QueryType::SemanticThenGraph),
            "graph_then_semantic" => Ok(QueryType::GraphThenSemantic),
            "concept_expansion" => Ok(QueryType::ConceptExpansion),
            other => Err(format!("unknown query type: {other}")),
        }
    }
}

/// How semantic and graph scores are combined during fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    WeightedAverage,
    MaxScore,
    HarmonicMean,
    BordaCount,
    ReciprocalRank,
}

impl Default for RankingStrategy {
    fn default() -> Self {
        RankingStrategy::WeightedAverage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Technology,
    Concept,
    Framework,
    Language,
    Tool,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Technology => "technology",
            EntityKind::Concept => "concept",
            EntityKind::Framework => "framework",
            EntityKind::Language => "language",
            EntityKind::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub value: String,
    pub confidence: f32,
}

/// The analyzer's full view of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedQuery {
    pub original_query: String,
    pub normalized_query: String,
    pub intent: QueryIntent,
    pub complexity: QueryComplexity,
    pub entities: Vec<ExtractedEntity>,
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
    pub search_strategy: QueryType,
    pub confidence_score: f32,
    #[serde(default)]
    pub spell_corrected: bool,
    #[serde(default)]
    pub expanded_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub intent: QueryIntent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Per-session context. Holds only query text and ids, never back-pointers
/// into results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub previous_queries: Vec<String>,
    pub conversation_history: Vec<ConversationTurn>,
    pub preferences: HashMap<String, serde_json::Value>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

impl QueryContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            previous_queries: Vec::new(),
            conversation_history: Vec::new(),
            preferences: HashMap::new(),
            last_activity: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_round_trips_through_str() {
        for qt in [
            QueryType::SemanticOnly,
            QueryType::GraphOnly,
            QueryType::HybridBalanced,
            QueryType::SemanticThenGraph,
            QueryType::GraphThenSemantic,
            QueryType::ConceptExpansion,
        ] {
            assert_eq!(qt.as_str().parse::<QueryType>().unwrap(), qt);
        }
    }

    #[test]
    fn hybrid_result_from_graph_node_falls_back_to_name() {
        let node = GraphNode {
            id: "concept_auth".into(),
            name: "Authentication".into(),
            category: "Security".into(),
            quality_score: 0.9,
            title: None,
            content: None,
            source_name: None,
            source_url: None,
            topics: vec!["security".into()],
        };
        let result = HybridSearchResult::from_graph_node(&node);
        assert_eq!(result.title, "Authentication");
        assert_eq!(result.quality_score, 0.9);
        assert!(result.content.is_empty());
    }

    #[test]
    fn intent_serializes_snake_case() {
        let json = serde_json::to_string(&QueryIntent::Troubleshoot).unwrap();
        assert_eq!(json, "\"troubleshoot\"");
    }
}
