use crate::{DocumentChunk, GraphSearchResult, Result, SemanticHit};
use async_trait::async_trait;

/// Typed semantic-search API of the vector store. Implementations must be
/// side-effect-free and idempotent for the same arguments.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        source_filter: Option<&[String]>,
        quality_threshold: Option<f32>,
    ) -> Result<Vec<SemanticHit>>;
}

/// Kind of graph traversal requested from the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSearchType {
    Concept,
    Document,
    Relationship,
}

impl GraphSearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphSearchType::Concept => "concept",
            GraphSearchType::Document => "document",
            GraphSearchType::Relationship => "relationship",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concept" => Some(GraphSearchType::Concept),
            "document" => Some(GraphSearchType::Document),
            "relationship" => Some(GraphSearchType::Relationship),
            _ => None,
        }
    }
}

/// Typed graph-search API of the graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn graph_search(
        &self,
        query: &str,
        search_type: GraphSearchType,
        limit: usize,
        max_depth: usize,
    ) -> Result<GraphSearchResult>;
}

/// Async text-to-vector function of fixed dimension
/// [`crate::EMBEDDING_DIMENSION`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Ingestion seam: the core only forwards index requests here.
#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    async fn index_document(&self, chunk: DocumentChunk) -> Result<String>;
}
