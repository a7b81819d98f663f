//! # Agent Error Types
//!
//! Errors raised by the orchestrator and the portal client.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Agent Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Pipeline     │  │     Portal              │ │
//! │  │   (fatal)       │  │   (fatal)       │  │   (recovered)           │ │
//! │  │  InvalidConfig  │  │  Pipeline-      │  │  Unauthorized           │ │
//! │  │  InvalidUrl     │  │  Construction   │  │  Conflict / UserNotFound│ │
//! │  │  ConfigLoad/Save│  │                 │  │  Http / Network         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Auth state    │  │    Internal     │                              │
//! │  │  MalformedAuth  │  │  Provider       │                              │
//! │  │                 │  │  ShuttingDown   │                              │
//! │  │                 │  │  Channel        │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only fatal errors end the event loop. Everything else is logged and the
//! loop carries on.

use thiserror::Error;

use beacon_cache::CacheError;
use beacon_core::CoreError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Agent error type.
#[derive(Debug, Error)]
pub enum AgentError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// A configured URL is malformed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// The upload pipeline could not be built.
    #[error("Failed to construct upload pipeline: {0}")]
    PipelineConstruction(String),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// Portal request failed.
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// Serialized auth state could not be decoded or stored.
    #[error("Malformed auth state: {0}")]
    MalformedAuthState(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A provider failed to bind or unbind.
    #[error("Provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Agent is shutting down.
    #[error("Agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    Channel(String),
}

/// Failures talking to the management portal.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The portal rejected the client or refresh token (HTTP 401).
    #[error("Portal rejected credentials")]
    Unauthorized,

    /// A source with these properties is already registered (HTTP 409).
    #[error("Source conflicts with an existing registration")]
    Conflict,

    /// The subject no longer exists at the portal (HTTP 404).
    #[error("User is no longer registered")]
    UserNotFound,

    /// Any other non-success status.
    #[error("Portal answered with status {status}: {body}")]
    Http { status: u16, body: String },

    /// The portal could not be reached.
    #[error("Portal unreachable: {0}")]
    Network(String),

    /// The portal answered with a body we could not use.
    #[error("Invalid portal response: {0}")]
    InvalidResponse(String),

    /// Refresh requested without a refresh token.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// A subject request was made without a user id.
    #[error("No user id in auth state")]
    MissingUser,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidUrl { .. } | CoreError::Validation(_) => {
                AgentError::InvalidUrl(err.to_string())
            }
            CoreError::MalformedAuthState(msg) => AgentError::MalformedAuthState(msg),
            other => AgentError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<CacheError> for AgentError {
    fn from(err: CacheError) -> Self {
        AgentError::PipelineConstruction(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentError {
    fn from(err: toml::ser::Error) -> Self {
        AgentError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::MalformedAuthState(err.to_string())
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return PortalError::InvalidResponse(err.to_string());
        }
        match err.status().map(|s| s.as_u16()) {
            Some(401) => PortalError::Unauthorized,
            Some(404) => PortalError::UserNotFound,
            Some(409) => PortalError::Conflict,
            _ => PortalError::Network(err.to_string()),
        }
    }
}

impl From<CoreError> for PortalError {
    fn from(err: CoreError) -> Self {
        PortalError::InvalidResponse(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl AgentError {
    /// Whether this error must stop the event loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidConfig(_)
                | AgentError::InvalidUrl(_)
                | AgentError::PipelineConstruction(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidConfig(_)
                | AgentError::InvalidUrl(_)
                | AgentError::ConfigLoadFailed(_)
                | AgentError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Portal(e) => e.is_retryable(),
            AgentError::Channel(_) => true,
            _ => false,
        }
    }
}

impl PortalError {
    /// Network failures and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            PortalError::Network(_) => true,
            PortalError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(AgentError::InvalidUrl("ftp://x".into()).is_fatal());
        assert!(AgentError::PipelineConstruction("disk full".into()).is_fatal());

        assert!(!AgentError::Portal(PortalError::Unauthorized).is_fatal());
        assert!(!AgentError::MalformedAuthState("eof".into()).is_fatal());
    }

    #[test]
    fn test_core_url_error_maps_to_invalid_url() {
        let err: AgentError = CoreError::InvalidUrl {
            url: "::".into(),
            reason: "relative URL without a base".into(),
        }
        .into();
        assert!(matches!(err, AgentError::InvalidUrl(_)));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_portal_retryable() {
        assert!(PortalError::Network("reset".into()).is_retryable());
        assert!(PortalError::Http { status: 502, body: String::new() }.is_retryable());
        assert!(!PortalError::Conflict.is_retryable());
        assert!(AgentError::from(PortalError::Network("reset".into())).is_retryable());
    }
}
