//! # Device Providers
//!
//! The contract between the agent and concrete device drivers.
//!
//! ## Provider Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Provider Model                                   │
//! │                                                                         │
//! │  ProviderLoader ──load_providers(config)──► [DeviceProvider, ...]       │
//! │                                                  │                      │
//! │                         bind() / unbind()        │  (BindQueue)         │
//! │                                                  ▼                      │
//! │                                          DeviceConnection               │
//! │                                          • has_service                  │
//! │                                          • start/stop_recording(filter) │
//! │                                          • device_status / name         │
//! │                                                                         │
//! │  Bind/unbind may block; they run off the event loop. Everything else   │
//! │  must return immediately.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use beacon_core::{AppSource, DeviceFilter, DeviceStatus, Permission, ServerStatus, SourceType};

use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::sink::MeasurementSink;

// =============================================================================
// Provider Identity
// =============================================================================

/// Stable identity of a provider, used as the key of every per-provider table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        ProviderId::new(id)
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A bound provider's live link to its device.
pub trait DeviceConnection: Send + Sync {
    /// Whether the provider's service is up and can record.
    fn has_service(&self) -> bool;

    fn is_recording(&self) -> bool;

    /// Starts scanning for a device accepted by `filter`.
    fn start_recording(&self, filter: &DeviceFilter);

    fn stop_recording(&self);

    fn device_status(&self) -> DeviceStatus;

    /// Identifier of the chosen device, once there is one.
    fn device_name(&self) -> Option<String>;

    /// Upload path status, forwarded on every change.
    fn update_server_status(&self, _status: ServerStatus) {}

    /// Whether the current device passes `filter`.
    fn is_allowed_device(&self, filter: &DeviceFilter) -> bool {
        let name = self.device_name();
        filter.accepts(name.as_deref())
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Factory and lifecycle owner of one kind of device connection.
pub trait DeviceProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn display_name(&self) -> String;

    /// The kind of device this provider records from.
    fn source_type(&self) -> SourceType;

    /// Permissions that must be granted before recording.
    fn needs_permissions(&self) -> Vec<Permission>;

    /// Whether `source` describes this provider's device type.
    fn matches(&self, source: &AppSource, strict: bool) -> bool {
        self.source_type().matches(&source.source_type, strict)
    }

    /// Starts the provider's service. May block.
    fn bind(&self) -> AgentResult<()>;

    /// Stops the provider's service. May block.
    fn unbind(&self) -> AgentResult<()>;

    fn is_bound(&self) -> bool;

    /// The live connection, available while bound.
    fn connection(&self) -> Option<Arc<dyn DeviceConnection>>;

    /// Receives the latest configuration.
    fn update_configuration(&self, _config: &AgentConfig) {}
}

/// Source of the desired provider set.
pub trait ProviderLoader: Send + Sync {
    /// Providers the configuration asks for. Calling this repeatedly must
    /// return the same identities for the same configuration.
    fn load_providers(&self, config: &AgentConfig) -> Vec<Arc<dyn DeviceProvider>>;
}

// =============================================================================
// Catalog
// =============================================================================

/// What a provider factory receives.
#[derive(Clone)]
pub struct ProviderContext {
    pub sink: MeasurementSink,
}

type ProviderFactory = Box<dyn Fn(&ProviderContext) -> Arc<dyn DeviceProvider> + Send + Sync>;

/// [`ProviderLoader`] that maps the configured service names to factories.
///
/// Each provider is created once and reused by later loads.
pub struct ProviderCatalog {
    context: ProviderContext,
    factories: BTreeMap<String, ProviderFactory>,
    instances: Mutex<BTreeMap<String, Arc<dyn DeviceProvider>>>,
}

impl ProviderCatalog {
    pub fn new(sink: MeasurementSink) -> Self {
        ProviderCatalog {
            context: ProviderContext { sink },
            factories: BTreeMap::new(),
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a factory under a service name.
    pub fn register<F>(mut self, service: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProviderContext) -> Arc<dyn DeviceProvider> + Send + Sync + 'static,
    {
        self.factories.insert(service.into(), Box::new(factory));
        self
    }

    /// Registered service names.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl ProviderLoader for ProviderCatalog {
    fn load_providers(&self, config: &AgentConfig) -> Vec<Arc<dyn DeviceProvider>> {
        let mut instances = self.instances.lock();
        let mut providers = Vec::with_capacity(config.agent.device_services.len());

        for service in &config.agent.device_services {
            if let Some(existing) = instances.get(service) {
                providers.push(Arc::clone(existing));
                continue;
            }
            match self.factories.get(service) {
                Some(factory) => {
                    let provider = factory(&self.context);
                    debug!(service = %service, provider = %provider.id(), "Provider created");
                    instances.insert(service.clone(), Arc::clone(&provider));
                    providers.push(provider);
                }
                None => warn!(service = %service, "Unknown device service in configuration"),
            }
        }

        providers
    }
}
