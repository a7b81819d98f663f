//! Host platform services the agent depends on.
//!
//! Everything here must return immediately; requests that involve the user
//! (permission dialogs, login, enabling Bluetooth) answer later through
//! [`AgentEvent`](crate::events::AgentEvent)s.

use std::collections::BTreeSet;
use tracing::{info, warn};

use beacon_core::Permission;

/// Transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    DeviceConnectFailed { device_name: String },
    PermissionDenied(Permission),
}

pub trait Platform: Send + Sync {
    fn is_granted(&self, permission: &Permission) -> bool;

    /// Whether any location provider is enabled.
    fn location_enabled(&self) -> bool;

    /// Whether the usage-statistics capability was allowed.
    fn usage_stats_allowed(&self) -> bool;

    fn bluetooth_enabled(&self) -> bool;

    /// Asks the user for `permissions`. The answer arrives as a
    /// `PermissionsResult` event.
    fn request_permissions(&self, permissions: &BTreeSet<Permission>);

    /// Asks the user to turn Bluetooth on.
    fn request_enable_bluetooth(&self);

    /// Launches the interactive login.
    fn start_login(&self);

    fn notify(&self, notice: Notice);

    fn run_at_boot(&self) -> bool;

    fn set_run_at_boot(&self, enabled: bool);
}

/// [`Platform`] for hosts without a user: everything is granted and
/// interactive requests are only logged.
#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    run_at_boot: parking_lot::Mutex<bool>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Platform for HeadlessPlatform {
    fn is_granted(&self, _permission: &Permission) -> bool {
        true
    }

    fn location_enabled(&self) -> bool {
        true
    }

    fn usage_stats_allowed(&self) -> bool {
        true
    }

    fn bluetooth_enabled(&self) -> bool {
        true
    }

    fn request_permissions(&self, permissions: &BTreeSet<Permission>) {
        warn!(?permissions, "Permissions requested on a headless host");
    }

    fn request_enable_bluetooth(&self) {
        warn!("Bluetooth enable requested on a headless host");
    }

    fn start_login(&self) {
        warn!("Interactive login required; deliver credentials with a LoginSuccess event");
    }

    fn notify(&self, notice: Notice) {
        info!(?notice, "Notice");
    }

    fn run_at_boot(&self) -> bool {
        *self.run_at_boot.lock()
    }

    fn set_run_at_boot(&self, enabled: bool) {
        *self.run_at_boot.lock() = enabled;
    }
}
