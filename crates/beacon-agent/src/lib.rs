//! # beacon-agent: Orchestrator for the Beacon Telemetry Agent
//!
//! Keeps the device providers, the credentials and the upload pipeline of a
//! telemetry agent consistent with its configuration.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           AgentService                                  │
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────────────────┐  │
//! │  │ AuthMachine  │   │ ProviderRegistry │   │ PermissionGate         │  │
//! │  │              │   │                  │   │                        │  │
//! │  │ UNAUTHORIZED │   │ reconcile with   │   │ outstanding perms,     │  │
//! │  │ → refresh or │   │ assigned sources │   │ Bluetooth enable       │  │
//! │  │   login      │   │ filters per id   │   │ request                │  │
//! │  └──────┬───────┘   └────────┬─────────┘   └───────────┬────────────┘  │
//! │         │                    │                         │               │
//! │         ▼                    ▼                         ▼               │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────────────────┐  │
//! │  │ PortalClient │   │ BindQueue        │   │ Platform               │  │
//! │  │ (reqwest)    │   │ (spawn_blocking) │   │ (host services)        │  │
//! │  └──────────────┘   └──────────────────┘   └────────────────────────┘  │
//! │                                                                         │
//! │  DataHandler (beacon-cache) ◄── MeasurementSink ◄── device connections  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`service`] - `AgentService` event loop and `AgentHandle`
//! - [`refresh`] - Authentication refresh state machine
//! - [`registry`] - Managed providers and reconciliation
//! - [`permissions`] - Permission gate
//! - [`provider`] - Provider and connection traits, `ProviderCatalog`
//! - [`binder`] - Background bind/unbind queue
//! - [`portal`] - Management portal client
//! - [`platform`] - Host platform services
//! - [`events`] - Inbound events and outbound notifications
//! - [`sink`] - Measurement hand-off into the pipeline
//! - [`auth_store`] - Auth state persistence
//! - [`config`] - Agent configuration
//! - [`error`] - Agent error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (service, handle) = AgentService::builder(config, platform, catalog, factory)
//!     .auth_store(AuthStore::in_dir(&data_dir))
//!     .build();
//! let agent = tokio::spawn(service.run());
//!
//! handle.send(AgentEvent::ConfigurationChanged).await?;
//! handle.shutdown().await?;
//! agent.await??;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth_store;
pub mod binder;
pub mod config;
pub mod error;
pub mod events;
pub mod permissions;
pub mod platform;
pub mod portal;
pub mod provider;
pub mod refresh;
pub mod registry;
pub mod service;
pub mod sink;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth_store::AuthStore;
pub use binder::{BindQueue, BindQueueHandle};
pub use config::{AgentConfig, SharedConfig};
pub use error::{AgentError, AgentResult, PortalError};
pub use events::{AgentEvent, AgentNotification, BluetoothState, TimedCount};
pub use permissions::{PermissionGate, PermissionOutcome};
pub use platform::{HeadlessPlatform, Notice, Platform};
pub use portal::{ManagementPortalClient, PortalClient};
pub use provider::{
    DeviceConnection, DeviceProvider, ProviderCatalog, ProviderContext, ProviderId, ProviderLoader,
};
pub use refresh::{AuthMachine, AuthPhase, UnauthorizedAction};
pub use registry::{ManagedProvider, ProviderRegistry};
pub use service::{AgentHandle, AgentService, AgentServiceBuilder};
pub use sink::MeasurementSink;
