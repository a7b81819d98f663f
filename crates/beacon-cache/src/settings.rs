//! # Pipeline Settings
//!
//! All tunables of the upload pipeline, kept together so the loops can read
//! one consistent snapshot per cycle.

use std::time::Duration;

use beacon_core::ServerConfig;

/// Default cap on buffered bytes per topic.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = i32::MAX as u64;

/// Default retention horizon for buffered records (7 days).
pub const DEFAULT_DATA_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default interval between submission cycles.
pub const DEFAULT_UPLOAD_RATE: Duration = Duration::from_secs(10);

/// Default number of records sent per topic per cycle.
pub const DEFAULT_RECORDS_SEND_LIMIT: usize = 1000;

/// Default HTTP timeout for the sender.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between local commits.
pub const DEFAULT_COMMIT_RATE: Duration = Duration::from_millis(1000);

/// Default minimum battery level (fraction) for uploading while not charging.
pub const DEFAULT_MINIMUM_BATTERY_LEVEL: f32 = 0.1;

/// Snapshot of every pipeline tunable.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Ingestion backend. No endpoint means nothing is submitted.
    pub endpoint: Option<ServerConfig>,

    /// Schema registry, forwarded to the sender.
    pub schema_registry: Option<ServerConfig>,

    /// Master switch of the submitter.
    pub submitter_enabled: bool,

    /// Per-topic byte cap of the local buffer.
    pub max_cache_bytes: u64,

    /// Records older than this are dropped unsent.
    pub data_retention: Duration,

    /// Interval between submission cycles.
    pub upload_rate: Duration,

    /// Records per topic per submission cycle.
    pub records_send_limit: usize,

    /// HTTP timeout.
    pub connection_timeout: Duration,

    /// Interval between local commits.
    pub commit_rate: Duration,

    /// Minimum battery fraction required to upload while not charging.
    pub minimum_battery_level: f32,

    /// Deflate request bodies.
    pub compression: bool,

    /// Upload only over Wi-Fi.
    pub send_only_with_wifi: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            endpoint: None,
            schema_registry: None,
            submitter_enabled: true,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            data_retention: DEFAULT_DATA_RETENTION,
            upload_rate: DEFAULT_UPLOAD_RATE,
            records_send_limit: DEFAULT_RECORDS_SEND_LIMIT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            commit_rate: DEFAULT_COMMIT_RATE,
            minimum_battery_level: DEFAULT_MINIMUM_BATTERY_LEVEL,
            compression: false,
            send_only_with_wifi: true,
        }
    }
}

impl PipelineSettings {
    /// Takes over every tunable of `next`.
    ///
    /// Without an endpoint in `next` the submitter is disabled, and the
    /// previous endpoint and schema registry stay in place so re-enabling
    /// resumes where it left off.
    pub fn apply(&mut self, next: PipelineSettings) {
        match next.endpoint {
            Some(endpoint) => {
                self.endpoint = Some(endpoint);
                self.submitter_enabled = next.submitter_enabled;
            }
            None => self.submitter_enabled = false,
        }
        if next.schema_registry.is_some() {
            self.schema_registry = next.schema_registry;
        }
        self.max_cache_bytes = next.max_cache_bytes;
        self.data_retention = next.data_retention;
        self.upload_rate = next.upload_rate;
        self.records_send_limit = next.records_send_limit.max(1);
        self.connection_timeout = next.connection_timeout;
        self.commit_rate = next.commit_rate;
        self.minimum_battery_level = next.minimum_battery_level;
        self.compression = next.compression;
        self.send_only_with_wifi = next.send_only_with_wifi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> ServerConfig {
        ServerConfig::parse("endpoint", url, false).unwrap()
    }

    #[test]
    fn test_apply_replaces_every_tunable() {
        let mut current = PipelineSettings {
            endpoint: Some(endpoint("https://old.example")),
            ..Default::default()
        };
        let next = PipelineSettings {
            endpoint: Some(endpoint("https://new.example")),
            compression: true,
            max_cache_bytes: 1000,
            records_send_limit: 0,
            ..Default::default()
        };

        current.apply(next);

        assert_eq!(current.endpoint, Some(endpoint("https://new.example")));
        assert!(current.compression);
        assert!(current.submitter_enabled);
        assert_eq!(current.max_cache_bytes, 1000);
        assert_eq!(current.records_send_limit, 1);
    }

    #[test]
    fn test_apply_without_endpoint_disables_and_keeps_target() {
        let mut current = PipelineSettings {
            endpoint: Some(endpoint("https://old.example")),
            schema_registry: Some(endpoint("https://schema.example")),
            ..Default::default()
        };

        current.apply(PipelineSettings {
            submitter_enabled: false,
            ..Default::default()
        });

        assert!(!current.submitter_enabled);
        assert_eq!(current.endpoint, Some(endpoint("https://old.example")));
        assert_eq!(current.schema_registry, Some(endpoint("https://schema.example")));
    }
}
