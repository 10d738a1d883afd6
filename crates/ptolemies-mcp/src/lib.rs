pub mod content;
pub mod registry;
pub mod schemas;
pub mod server;

pub use content::*;
pub use registry::*;
pub use server::*;

// Re-export common types for convenience
pub use ptolemies_core::{PtolemiesError, Result};
