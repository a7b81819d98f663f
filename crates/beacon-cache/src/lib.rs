//! # beacon-cache: Upload Pipeline for Beacon
//!
//! Buffers measurements in SQLite and submits them to the ingestion backend.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Upload Pipeline                                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │              CachedDataHandler (implements DataHandler)          │  │
//! │  │                                                                  │  │
//! │  │  Created once by the agent through a PipelineFactory             │  │
//! │  │  Reconfigured live through the setters afterwards                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  CacheStore    │  │  RecordSender  │  │  UploadConditions      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ SQLite buffer  │  │ REST batches,  │  │ network / battery      │    │
//! │  │ per topic,     │  │ optional       │  │ gates checked before   │    │
//! │  │ size/retention │  │ deflate        │  │ every cycle            │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (to the agent over an mpsc channel):                           │
//! │  • PipelineEvent::ServerStatus - status transitions                    │
//! │  • PipelineEvent::RecordsSent  - per delivered batch                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`handler`] - The `DataHandler` contract and `PipelineFactory`
//! - [`pipeline`] - `CachedDataHandler` and its commit/submit loops
//! - [`store`] - SQLite measurement buffer
//! - [`sender`] - REST record sender
//! - [`conditions`] - Network and battery gates
//! - [`settings`] - Pipeline tunables and defaults
//! - [`error`] - Cache error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_cache::{AlwaysOnline, PipelineFactory, RestSender, SqlitePipelineFactory, StoreConfig};
//!
//! let factory = SqlitePipelineFactory::new(
//!     StoreConfig::new("/var/lib/beacon/cache.db"),
//!     Arc::new(RestSender::new()?),
//!     Arc::new(AlwaysOnline),
//! );
//! let handler = factory.create(settings, auth, events_tx).await?;
//! handler.start();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conditions;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod sender;
pub mod settings;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use conditions::{AlwaysOnline, BatteryState, NetworkKind, UploadConditions};
pub use error::{CacheError, CacheResult};
pub use handler::{DataHandler, PipelineEvent, PipelineEventSender, PipelineFactory};
pub use pipeline::{CachedDataHandler, SqlitePipelineFactory};
pub use sender::{RecordSender, RestSender, SendRequest};
pub use settings::PipelineSettings;
pub use store::{CacheStore, StoreConfig, StoredRecord};
