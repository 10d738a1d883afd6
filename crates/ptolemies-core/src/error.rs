use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtolemiesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Value too large: {0}")]
    Oversize(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PtolemiesError {
    /// True for failures the cache layer absorbs instead of surfacing.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            PtolemiesError::UpstreamUnavailable(_)
                | PtolemiesError::Timeout(_)
                | PtolemiesError::CircuitOpen(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PtolemiesError>;
