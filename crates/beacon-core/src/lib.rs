//! # beacon-core: Pure Domain Types for the Beacon Agent
//!
//! Everything the orchestrator and the upload pipeline agree on, with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/beacond (daemon)                        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        beacon-agent (event loop, auth refresh, providers)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        beacon-cache (SQLite buffer, submitter)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌──────────┐  │   │
//! │  │   │   auth    │  │  status   │  │ permission │  │  filter  │  │   │
//! │  │   │ AuthState │  │ Server/   │  │ Permission │  │ Device   │  │   │
//! │  │   │ AppSource │  │ Device    │  │            │  │ Filter   │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`auth`] - Immutable authentication snapshot and its builder
//! - [`source`] - Assigned sources and source-type matching
//! - [`status`] - Server and device status enums
//! - [`permission`] - Platform permissions and their categories
//! - [`filter`] - Device identifier allow-lists
//! - [`record`] - Topics and measurement records
//! - [`server`] - Validated remote endpoint configuration
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::{AuthState, ServerStatus};
//! use chrono::{Duration, Utc};
//!
//! let auth = AuthState::builder()
//!     .user_id("sub-1")
//!     .token("abc")
//!     .expiration(Utc::now() + Duration::hours(1))
//!     .build();
//!
//! assert!(auth.is_valid());
//! assert_eq!(ServerStatus::from_ordinal(3).unwrap(), ServerStatus::Unauthorized);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod error;
pub mod filter;
pub mod permission;
pub mod record;
pub mod server;
pub mod source;
pub mod status;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use auth::{AuthState, AuthStateBuilder};
pub use error::{CoreError, CoreResult, ValidationError};
pub use filter::DeviceFilter;
pub use permission::Permission;
pub use record::{ObservationKey, Record, Topic};
pub use server::ServerConfig;
pub use source::{AppSource, SourceType};
pub use status::{DeviceStatus, ServerStatus};
