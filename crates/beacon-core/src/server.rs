//! # Server Configuration
//!
//! A validated remote endpoint: the ingestion backend, the schema registry
//! or the identity portal.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CoreError, CoreResult, ValidationError};

/// Remote endpoint with its TLS policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL, always ending in `/` so relative paths join below it.
    pub url: Url,

    /// Accept invalid TLS certificates.
    pub unsafe_connection: bool,
}

impl ServerConfig {
    /// Parses and validates `raw` as an http(s) base URL.
    ///
    /// ## Errors
    /// - [`ValidationError::Required`] for an empty string
    /// - [`CoreError::InvalidUrl`] when the URL does not parse
    /// - [`ValidationError::UnsupportedScheme`] for anything but http/https
    pub fn parse(field: &str, raw: &str, unsafe_connection: bool) -> CoreResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::required(field).into());
        }

        let mut url = Url::parse(raw).map_err(|e| CoreError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::UnsupportedScheme {
                field: field.to_string(),
                scheme: url.scheme().to_string(),
            }
            .into());
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(ServerConfig {
            url,
            unsafe_connection,
        })
    }

    /// Resolves `path` relative to the base URL.
    pub fn join(&self, path: &str) -> CoreResult<Url> {
        self.url.join(path).map_err(|e| CoreError::InvalidUrl {
            url: format!("{}{}", self.url, path),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
