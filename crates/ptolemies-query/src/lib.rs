pub mod analyzer;
pub mod engine;
pub mod formatter;
pub mod optimizer;
pub mod pipeline;

pub use analyzer::*;
pub use engine::*;
pub use formatter::*;
pub use optimizer::*;
pub use pipeline::*;

// Re-export common types for convenience
pub use ptolemies_core::{
    HybridSearchResult, ProcessedQuery, PtolemiesError, QueryIntent, QueryType, RankingStrategy,
    Result,
};
