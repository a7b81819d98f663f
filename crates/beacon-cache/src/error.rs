//! # Cache Error Types
//!
//! Errors for local buffering and remote submission.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Cache Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │   Submission    │  │     Lifecycle           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Connection     │  │  Unauthorized   │  │  ShuttingDown           │ │
//! │  │  QueryFailed    │  │  Network        │  │  Channel                │ │
//! │  │  Serialization  │  │  Rejected       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Could not open the cache database.
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    /// A cache query failed.
    #[error("Cache query failed: {0}")]
    QueryFailed(String),

    /// A stored record could not be encoded or decoded.
    #[error("Record serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// The backend rejected the bearer token (HTTP 401/403).
    #[error("Backend rejected credentials")]
    Unauthorized,

    /// The backend could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("Backend rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The endpoint URL could not be combined with a topic path.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The pipeline is shutting down.
    #[error("Upload pipeline is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    Channel(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => CacheError::ShuttingDown,
            other => CacheError::QueryFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return CacheError::Unauthorized;
            }
        }
        CacheError::Network(err.to_string())
    }
}

impl From<beacon_core::CoreError> for CacheError {
    fn from(err: beacon_core::CoreError) -> Self {
        CacheError::InvalidEndpoint(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl CacheError {
    /// Whether the submitter should back off and retry.
    ///
    /// Unauthorized is not retryable here: it waits for new credentials.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Network(_) => true,
            CacheError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
