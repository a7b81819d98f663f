//! # Status Types
//!
//! Connectivity status of the upload path and of individual devices.
//!
//! ## Server Status Ordinals
//! ```text
//! ┌──────────────┬─────────┐
//! │ Status       │ Ordinal │
//! ├──────────────┼─────────┤
//! │ CONNECTED    │    0    │
//! │ DISCONNECTED │    1    │
//! │ CONNECTING   │    2    │
//! │ UNAUTHORIZED │    3    │
//! │ READY        │    4    │
//! └──────────────┴─────────┘
//! ```
//! Ordinals travel in server-status-changed events and must stay stable.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Server Status
// =============================================================================

/// Status of the connection between the upload pipeline and the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Connected,
    #[default]
    Disconnected,
    Connecting,
    /// The backend rejected the bearer token.
    Unauthorized,
    Ready,
}

impl ServerStatus {
    /// Stable numeric representation.
    pub fn ordinal(self) -> i32 {
        match self {
            ServerStatus::Connected => 0,
            ServerStatus::Disconnected => 1,
            ServerStatus::Connecting => 2,
            ServerStatus::Unauthorized => 3,
            ServerStatus::Ready => 4,
        }
    }

    /// Inverse of [`ServerStatus::ordinal`].
    pub fn from_ordinal(ordinal: i32) -> CoreResult<Self> {
        match ordinal {
            0 => Ok(ServerStatus::Connected),
            1 => Ok(ServerStatus::Disconnected),
            2 => Ok(ServerStatus::Connecting),
            3 => Ok(ServerStatus::Unauthorized),
            4 => Ok(ServerStatus::Ready),
            other => Err(CoreError::UnknownServerStatus(other)),
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Connected => write!(f, "connected"),
            ServerStatus::Disconnected => write!(f, "disconnected"),
            ServerStatus::Connecting => write!(f, "connecting"),
            ServerStatus::Unauthorized => write!(f, "unauthorized"),
            ServerStatus::Ready => write!(f, "ready"),
        }
    }
}

// =============================================================================
// Device Status
// =============================================================================

/// Status of a single device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Scanning, no device chosen yet.
    Ready,
    /// A device was chosen and the link is being set up.
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "READY"),
            DeviceStatus::Connecting => write!(f, "CONNECTING"),
            DeviceStatus::Connected => write!(f, "CONNECTED"),
            DeviceStatus::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READY" => Ok(DeviceStatus::Ready),
            "CONNECTING" => Ok(DeviceStatus::Connecting),
            "CONNECTED" => Ok(DeviceStatus::Connected),
            "DISCONNECTED" => Ok(DeviceStatus::Disconnected),
            _ => Err(CoreError::UnknownDeviceStatus(s.to_string())),
        }
    }
}
