//! # Agent Configuration
//!
//! Configuration for the orchestrator and the upload pipeline it drives.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_ENDPOINT_URL=https://radar.example/kafka                    │
//! │     BEACON_PORTAL_URL=https://radar.example/managementportal           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon/agent.toml (Linux)                                │
//! │     ~/Library/Application Support/org.beacon.beacon/agent.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     Wi-Fi only uploads, no endpoint, no portal                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # agent.toml
//! [server]
//! endpoint_url = "https://radar.example/kafka"
//! schema_registry_url = "https://radar.example/schema"
//! unsafe_connection = false
//!
//! [upload]
//! send_only_with_wifi = true
//! max_cache_size_bytes = 2147483647
//! upload_rate_secs = 10
//!
//! [portal]
//! url = "https://radar.example/managementportal"
//! client_id = "pRMT"
//!
//! [agent]
//! device_services = ["phone_sensors", "empatica_e4"]
//! run_at_boot = false
//! ```
//!
//! ## Reloading
//! The configuration is shared as [`SharedConfig`]. Whoever changes it sends
//! `AgentEvent::ConfigurationChanged` so the agent reconciles.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use beacon_cache::settings::{
    DEFAULT_COMMIT_RATE, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_DATA_RETENTION,
    DEFAULT_MAX_CACHE_BYTES, DEFAULT_MINIMUM_BATTERY_LEVEL, DEFAULT_RECORDS_SEND_LIMIT,
    DEFAULT_UPLOAD_RATE,
};
use beacon_cache::PipelineSettings;
use beacon_core::ServerConfig;

use crate::error::{AgentError, AgentResult};

/// Configuration shared between the agent and whoever edits it.
pub type SharedConfig = Arc<RwLock<AgentConfig>>;

// =============================================================================
// Server Settings
// =============================================================================

/// Ingestion backend and schema registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the ingestion backend. Without it nothing is uploaded.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Base URL of the schema registry.
    #[serde(default)]
    pub schema_registry_url: Option<String>,

    /// Accept invalid TLS certificates for both servers.
    #[serde(default)]
    pub unsafe_connection: bool,
}

// =============================================================================
// Upload Settings
// =============================================================================

/// Upload pipeline tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Upload only over Wi-Fi.
    #[serde(default = "default_true")]
    pub send_only_with_wifi: bool,

    /// Per-topic cap of the local buffer (bytes).
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size_bytes: u64,

    /// Deflate request bodies.
    #[serde(default)]
    pub compression: bool,

    /// Buffered records older than this are dropped (milliseconds).
    #[serde(default = "default_data_retention")]
    pub data_retention_ms: u64,

    /// Interval between upload cycles (seconds).
    #[serde(default = "default_upload_rate")]
    pub upload_rate_secs: u64,

    /// Records sent per topic per cycle.
    #[serde(default = "default_records_send_limit")]
    pub records_send_limit: usize,

    /// HTTP timeout (seconds).
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Interval between local commits (milliseconds).
    #[serde(default = "default_commit_rate")]
    pub commit_rate_ms: u64,

    /// Battery fraction below which uploads pause unless charging.
    #[serde(default = "default_minimum_battery_level")]
    pub minimum_battery_level: f32,
}

fn default_true() -> bool {
    true
}

fn default_max_cache_size() -> u64 {
    DEFAULT_MAX_CACHE_BYTES
}

fn default_data_retention() -> u64 {
    DEFAULT_DATA_RETENTION.as_millis() as u64
}

fn default_upload_rate() -> u64 {
    DEFAULT_UPLOAD_RATE.as_secs()
}

fn default_records_send_limit() -> usize {
    DEFAULT_RECORDS_SEND_LIMIT
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT.as_secs()
}

fn default_commit_rate() -> u64 {
    DEFAULT_COMMIT_RATE.as_millis() as u64
}

fn default_minimum_battery_level() -> f32 {
    DEFAULT_MINIMUM_BATTERY_LEVEL
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            send_only_with_wifi: true,
            max_cache_size_bytes: default_max_cache_size(),
            compression: false,
            data_retention_ms: default_data_retention(),
            upload_rate_secs: default_upload_rate(),
            records_send_limit: default_records_send_limit(),
            connection_timeout_secs: default_connection_timeout(),
            commit_rate_ms: default_commit_rate(),
            minimum_battery_level: default_minimum_battery_level(),
        }
    }
}

// =============================================================================
// Portal Settings
// =============================================================================

/// Management portal used for token refresh and source assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Base URL. When absent, every provider is activated without an
    /// assignment and expired tokens go straight to interactive login.
    #[serde(default)]
    pub url: Option<String>,

    /// OAuth client id.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,
}

fn default_client_id() -> String {
    "pRMT".to_string()
}

impl Default for PortalSettings {
    fn default() -> Self {
        PortalSettings {
            url: None,
            client_id: default_client_id(),
            client_secret: String::new(),
        }
    }
}

// =============================================================================
// Agent Settings
// =============================================================================

/// Orchestrator behaviour and identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Start the agent when the host boots.
    #[serde(default)]
    pub run_at_boot: bool,

    /// Names of the device services to load.
    #[serde(default)]
    pub device_services: Vec<String>,

    /// Project of the logged-in subject, written after login.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Logged-in subject, written after login.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Directory for the cache database and the persisted auth state.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub portal: PortalSettings,

    #[serde(default)]
    pub agent: AgentSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> AgentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> AgentResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| AgentError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| AgentError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> AgentResult<()> {
        self.endpoint()?;
        self.schema_registry()?;
        self.portal_server()?;

        if self.upload.records_send_limit == 0 {
            return Err(AgentError::InvalidConfig(
                "records_send_limit must be greater than 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.upload.minimum_battery_level) {
            return Err(AgentError::InvalidConfig(format!(
                "minimum_battery_level must be between 0 and 1, got {}",
                self.upload.minimum_battery_level
            )));
        }

        Ok(())
    }

    /// Applies `BEACON_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("BEACON_ENDPOINT_URL") {
            debug!(url = %url, "Overriding endpoint URL from environment");
            self.server.endpoint_url = Some(url);
        }

        if let Some(url) = var("BEACON_SCHEMA_REGISTRY_URL") {
            self.server.schema_registry_url = Some(url);
        }

        if let Some(flag) = var("BEACON_UNSAFE_CONNECTION") {
            match flag.parse() {
                Ok(b) => self.server.unsafe_connection = b,
                Err(_) => warn!(value = %flag, "Invalid BEACON_UNSAFE_CONNECTION"),
            }
        }

        if let Some(url) = var("BEACON_PORTAL_URL") {
            debug!(url = %url, "Overriding portal URL from environment");
            self.portal.url = Some(url);
        }

        if let Some(secret) = var("BEACON_PORTAL_CLIENT_SECRET") {
            self.portal.client_secret = secret;
        }

        if let Some(flag) = var("BEACON_SEND_ONLY_WITH_WIFI") {
            match flag.parse() {
                Ok(b) => self.upload.send_only_with_wifi = b,
                Err(_) => warn!(value = %flag, "Invalid BEACON_SEND_ONLY_WITH_WIFI"),
            }
        }

        if let Some(services) = var("BEACON_DEVICE_SERVICES") {
            self.agent.device_services = services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(dir) = var("BEACON_DATA_DIR") {
            self.agent.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "beacon", "beacon")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    /// Directory for the cache database and persisted auth state.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.agent.data_dir.clone().or_else(|| {
            directories::ProjectDirs::from("org", "beacon", "beacon")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
    }

    // =========================================================================
    // Derived Values
    // =========================================================================

    /// The ingestion backend, if configured.
    pub fn endpoint(&self) -> AgentResult<Option<ServerConfig>> {
        parse_optional("endpoint_url", &self.server.endpoint_url, self.server.unsafe_connection)
    }

    /// The schema registry, if configured.
    pub fn schema_registry(&self) -> AgentResult<Option<ServerConfig>> {
        parse_optional(
            "schema_registry_url",
            &self.server.schema_registry_url,
            self.server.unsafe_connection,
        )
    }

    /// The management portal, if configured.
    pub fn portal_server(&self) -> AgentResult<Option<ServerConfig>> {
        parse_optional("portal.url", &self.portal.url, self.server.unsafe_connection)
    }

    /// Whether a management portal URL is set.
    pub fn is_portal_configured(&self) -> bool {
        self.portal
            .url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    /// Pipeline settings derived from this configuration.
    ///
    /// The submitter is enabled exactly when an endpoint is configured.
    pub fn pipeline_settings(&self) -> AgentResult<PipelineSettings> {
        let endpoint = self.endpoint()?;
        let upload = &self.upload;

        Ok(PipelineSettings {
            submitter_enabled: endpoint.is_some(),
            endpoint,
            schema_registry: self.schema_registry()?,
            max_cache_bytes: upload.max_cache_size_bytes,
            data_retention: Duration::from_millis(upload.data_retention_ms),
            upload_rate: Duration::from_secs(upload.upload_rate_secs),
            records_send_limit: upload.records_send_limit,
            connection_timeout: Duration::from_secs(upload.connection_timeout_secs),
            commit_rate: Duration::from_millis(upload.commit_rate_ms),
            minimum_battery_level: upload.minimum_battery_level,
            compression: upload.compression,
            send_only_with_wifi: upload.send_only_with_wifi,
        })
    }

    /// Wraps this configuration for sharing.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

fn parse_optional(
    field: &str,
    raw: &Option<String>,
    unsafe_connection: bool,
) -> AgentResult<Option<ServerConfig>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(url) => Ok(Some(ServerConfig::parse(field, url, unsafe_connection)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.upload.send_only_with_wifi);
        assert_eq!(config.upload.max_cache_size_bytes, i32::MAX as u64);
        assert!(!config.upload.compression);
        assert!(!config.is_portal_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_settings_follow_endpoint() {
        let mut config = AgentConfig::default();
        assert!(!config.pipeline_settings().unwrap().submitter_enabled);

        config.server.endpoint_url = Some("https://radar.example/kafka".into());
        config.upload.max_cache_size_bytes = 1000;
        let settings = config.pipeline_settings().unwrap();
        assert!(settings.submitter_enabled);
        assert_eq!(settings.max_cache_bytes, 1000);
        assert_eq!(
            settings.endpoint.unwrap().url.as_str(),
            "https://radar.example/kafka/"
        );
    }

    #[test]
    fn test_malformed_url_is_fatal() {
        let mut config = AgentConfig::default();
        config.server.endpoint_url = Some("not a url".into());

        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());

        config.server.endpoint_url = Some("ftp://radar.example".into());
        assert!(config.pipeline_settings().unwrap_err().is_fatal());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();
        config.upload.records_send_limit = 0;
        assert!(config.validate().is_err());

        config.upload.records_send_limit = 10;
        config.upload.minimum_battery_level = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BEACON_ENDPOINT_URL", "https://radar.example/kafka"),
            ("BEACON_PORTAL_URL", "https://radar.example/managementportal"),
            ("BEACON_SEND_ONLY_WITH_WIFI", "false"),
            ("BEACON_DEVICE_SERVICES", "phone, empatica_e4,"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert!(config.is_portal_configured());
        assert!(!config.upload.send_only_with_wifi);
        assert_eq!(config.agent.device_services, vec!["phone", "empatica_e4"]);
        assert!(config.endpoint().unwrap().is_some());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.agent.device_services = vec!["phone".into()];
        config.portal.url = Some("https://radar.example/managementportal".into());
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[server]"));
        assert!(contents.contains("[agent]"));

        let loaded: AgentConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AgentConfig = toml::from_str("[upload]\ncompression = true\n").unwrap();
        assert!(config.upload.compression);
        assert!(config.upload.send_only_with_wifi);
        assert_eq!(config.portal.client_id, "pRMT");
    }
}
