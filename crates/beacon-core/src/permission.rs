//! # Permissions
//!
//! Platform permissions the agent and its providers may require, grouped
//! into the categories the permission gate treats specially.

use serde::{Deserialize, Serialize};

/// Grant result code reported by the platform for a granted permission.
pub const PERMISSION_GRANTED: i32 = 0;

/// A platform permission or capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Permission {
    NetworkState,
    Internet,
    Bluetooth,
    BluetoothAdmin,
    FineLocation,
    CoarseLocation,
    /// At least one platform location source must be switched on.
    LocationService,
    /// Access to application usage statistics.
    UsageStats,
    Other(String),
}

impl Permission {
    pub fn as_str(&self) -> &str {
        match self {
            Permission::NetworkState => "network_state",
            Permission::Internet => "internet",
            Permission::Bluetooth => "bluetooth",
            Permission::BluetoothAdmin => "bluetooth_admin",
            Permission::FineLocation => "fine_location",
            Permission::CoarseLocation => "coarse_location",
            Permission::LocationService => "location_service",
            Permission::UsageStats => "usage_stats",
            Permission::Other(name) => name,
        }
    }

    pub fn is_location(&self) -> bool {
        matches!(self, Permission::FineLocation | Permission::CoarseLocation)
    }

    pub fn is_bluetooth(&self) -> bool {
        matches!(self, Permission::Bluetooth)
    }

    pub fn is_usage_stats(&self) -> bool {
        matches!(self, Permission::UsageStats)
    }
}

impl From<String> for Permission {
    fn from(name: String) -> Self {
        match name.as_str() {
            "network_state" => Permission::NetworkState,
            "internet" => Permission::Internet,
            "bluetooth" => Permission::Bluetooth,
            "bluetooth_admin" => Permission::BluetoothAdmin,
            "fine_location" => Permission::FineLocation,
            "coarse_location" => Permission::CoarseLocation,
            "location_service" => Permission::LocationService,
            "usage_stats" => Permission::UsageStats,
            _ => Permission::Other(name),
        }
    }
}

impl From<&str> for Permission {
    fn from(name: &str) -> Self {
        Permission::from(name.to_string())
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.as_str().to_string()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
