//! # Error Types
//!
//! Domain-specific error types for beacon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  beacon-core errors (this file)                                        │
//! │  ├── CoreError        - Malformed domain values                        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  beacon-cache errors                                                   │
//! │  └── CacheError       - Storage and upload failures                    │
//! │                                                                         │
//! │  beacon-agent errors                                                   │
//! │  └── AgentError       - Fatal configuration / pipeline errors          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → AgentError → daemon exit          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while constructing or decoding domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A URL could not be parsed or has the wrong shape.
    ///
    /// ## When This Occurs
    /// - Endpoint or schema-registry URL in the configuration is malformed
    /// - Portal URL is not absolute
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A server status ordinal outside 0..=4 was received.
    #[error("Unknown server status ordinal: {0}")]
    UnknownServerStatus(i32),

    /// A device status name that is not recognised.
    #[error("Unknown device status: {0}")]
    UnknownDeviceStatus(String),

    /// A serialized authentication state could not be decoded.
    #[error("Malformed authentication state: {0}")]
    MalformedAuthState(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedAuthState(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// URL scheme is not one of the supported transports.
    #[error("{field} must use http or https, got '{scheme}'")]
    UnsupportedScheme { field: String, scheme: String },
}

impl ValidationError {
    /// Creates a Required error for the given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}
