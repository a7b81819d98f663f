//! # Record Sender
//!
//! Delivers batches of buffered records to the ingestion backend.
//!
//! ## Request Shape
//! ```text
//! POST {endpoint}/topics/{topic}
//! Authorization: Bearer <token>
//! Content-Type: application/json
//! Content-Encoding: deflate            (only with compression)
//!
//! { "records": [ { "key": {...}, "value": {...} }, ... ] }
//! ```
//!
//! ## Status Mapping
//! ```text
//! 2xx        → Ok
//! 401 / 403  → CacheError::Unauthorized
//! other      → CacheError::Rejected { status, body }
//! transport  → CacheError::Network
//! ```

use async_trait::async_trait;
use miniz_oxide::deflate::compress_to_vec_zlib;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use beacon_core::{AuthState, ServerConfig};

use crate::error::{CacheError, CacheResult};
use crate::store::StoredRecord;

/// Deflate level used for compressed bodies.
const COMPRESSION_LEVEL: u8 = 6;

/// One submission to the backend.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub endpoint: &'a ServerConfig,
    pub auth: &'a AuthState,
    pub topic: &'a str,
    pub records: &'a [StoredRecord],
    pub compression: bool,
    pub timeout: Duration,
}

/// Transport for record batches.
#[async_trait]
pub trait RecordSender: Send + Sync {
    /// Verifies the backend is reachable and accepts the credentials.
    async fn check(
        &self,
        endpoint: &ServerConfig,
        auth: &AuthState,
        timeout: Duration,
    ) -> CacheResult<()>;

    /// Sends one batch. Either every record is accepted or none is.
    async fn send(&self, request: SendRequest<'_>) -> CacheResult<()>;
}

// =============================================================================
// Body Encoding
// =============================================================================

#[derive(Serialize)]
struct RecordBody<'a> {
    key: &'a Value,
    value: &'a Value,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    records: Vec<RecordBody<'a>>,
}

/// Serializes `records`, deflating when `compression` is set.
///
/// Returns the body and the `Content-Encoding` to announce.
pub fn encode_body(
    records: &[StoredRecord],
    compression: bool,
) -> CacheResult<(Vec<u8>, Option<&'static str>)> {
    let body = BatchBody {
        records: records
            .iter()
            .map(|r| RecordBody {
                key: &r.key,
                value: &r.value,
            })
            .collect(),
    };
    let json = serde_json::to_vec(&body)?;

    if compression {
        Ok((compress_to_vec_zlib(&json, COMPRESSION_LEVEL), Some("deflate")))
    } else {
        Ok((json, None))
    }
}

/// Maps a send response status to a result.
pub fn classify_status(status: u16, body: String) -> CacheResult<()> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(CacheError::Unauthorized),
        _ => Err(CacheError::Rejected { status, body }),
    }
}

// =============================================================================
// REST Sender
// =============================================================================

/// [`RecordSender`] over HTTP.
#[derive(Debug, Clone)]
pub struct RestSender {
    client: Client,
    /// Client that skips certificate validation, for `unsafe_connection`.
    unsafe_client: Client,
}

impl RestSender {
    pub fn new() -> CacheResult<Self> {
        Ok(RestSender {
            client: Client::builder().build()?,
            unsafe_client: Client::builder().danger_accept_invalid_certs(true).build()?,
        })
    }

    fn client_for(&self, endpoint: &ServerConfig) -> &Client {
        if endpoint.unsafe_connection {
            &self.unsafe_client
        } else {
            &self.client
        }
    }
}

#[async_trait]
impl RecordSender for RestSender {
    async fn check(
        &self,
        endpoint: &ServerConfig,
        auth: &AuthState,
        timeout: Duration,
    ) -> CacheResult<()> {
        let mut request = self
            .client_for(endpoint)
            .get(endpoint.url.clone())
            .timeout(timeout);
        if let Some(header) = auth.authorization_header() {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        debug!(status, endpoint = %endpoint, "Connection check");

        match status {
            401 | 403 => Err(CacheError::Unauthorized),
            500..=599 => Err(CacheError::Rejected {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }

    async fn send(&self, request: SendRequest<'_>) -> CacheResult<()> {
        let url = request.endpoint.join(&format!("topics/{}", request.topic))?;
        let (body, encoding) = encode_body(request.records, request.compression)?;

        let mut builder = self
            .client_for(request.endpoint)
            .post(url)
            .timeout(request.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(encoding) = encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        if let Some(header) = request.auth.authorization_header() {
            builder = builder.header(AUTHORIZATION, header);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = if response.status().is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        debug!(
            topic = request.topic,
            count = request.records.len(),
            status,
            "Sent record batch"
        );
        classify_status(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use miniz_oxide::inflate::decompress_to_vec_zlib;
    use serde_json::json;

    fn stored(n: i64) -> StoredRecord {
        StoredRecord {
            seq: n,
            topic: "acc".into(),
            key: json!({ "userId": "u" }),
            value: json!({ "x": n }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_encode_plain_body() {
        let (body, encoding) = encode_body(&[stored(1), stored(2)], false).unwrap();
        assert!(encoding.is_none());

        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["records"][1]["value"], json!({ "x": 2 }));
    }

    #[test]
    fn test_encode_compressed_body_inflates() {
        let (body, encoding) = encode_body(&[stored(1)], true).unwrap();
        assert_eq!(encoding, Some("deflate"));

        let inflated = decompress_to_vec_zlib(&body).unwrap();
        let parsed: Value = serde_json::from_slice(&inflated).unwrap();
        assert_eq!(parsed["records"][0]["key"], json!({ "userId": "u" }));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(204, String::new()).is_ok());
        assert!(matches!(classify_status(401, String::new()), Err(CacheError::Unauthorized)));
        assert!(matches!(classify_status(403, String::new()), Err(CacheError::Unauthorized)));
        assert!(matches!(
            classify_status(422, "bad schema".into()),
            Err(CacheError::Rejected { status: 422, .. })
        ));
    }
}
