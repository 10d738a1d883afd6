pub mod breaker;
pub mod layer;
pub mod lru;
pub mod metrics;
pub mod pool;
pub mod remote;
pub mod serializer;

pub use breaker::*;
pub use layer::*;
pub use lru::*;
pub use metrics::CacheMetrics;
pub use pool::*;
pub use remote::*;
pub use serializer::*;

// Re-export common types for convenience
pub use ptolemies_core::{PtolemiesError, Result};
