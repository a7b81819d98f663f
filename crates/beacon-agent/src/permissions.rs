//! # Permission Gate
//!
//! Tracks which permissions are still outstanding and decides whether a
//! provider may start recording.
//!
//! ```text
//! required = agent permissions ∪ provider permissions
//!
//!   location      ──► location service off? → LocationService + permission
//!                     not granted?          → permission
//!   usage stats   ──► capability not allowed? → permission
//!   other         ──► not granted?          → permission
//!
//! provider gate:  any own permission pending          → blocked
//!                 needs Bluetooth and Bluetooth is off → blocked
//!                                                       (one enable request
//!                                                        per state change)
//! ```

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use beacon_core::permission::PERMISSION_GRANTED;
use beacon_core::Permission;

use crate::platform::Platform;
use crate::provider::DeviceProvider;

/// Permissions the agent itself needs to upload.
pub fn agent_permissions() -> BTreeSet<Permission> {
    [Permission::NetworkState, Permission::Internet]
        .into_iter()
        .collect()
}

/// How a permission request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// Every answered permission was granted.
    AllGranted,
    /// This permission was denied; later answers were not looked at.
    Denied(Permission),
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    pending: BTreeSet<Permission>,
    bluetooth_requested: bool,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding permissions after the last evaluation.
    pub fn pending(&self) -> &BTreeSet<Permission> {
        &self.pending
    }

    /// Recomputes the outstanding set from scratch.
    ///
    /// Returns `true` when something is outstanding.
    pub fn evaluate(&mut self, required: &BTreeSet<Permission>, platform: &dyn Platform) -> bool {
        self.pending.clear();

        for permission in required {
            if permission.is_location() && !platform.location_enabled() {
                self.pending.insert(Permission::LocationService);
                self.pending.insert(permission.clone());
            }

            let granted = if permission.is_usage_stats() {
                platform.usage_stats_allowed()
            } else {
                platform.is_granted(permission)
            };
            if !granted {
                self.pending.insert(permission.clone());
            }
        }

        if !self.pending.is_empty() {
            debug!(pending = ?self.pending, "Permissions outstanding");
        }
        !self.pending.is_empty()
    }

    /// Applies the platform's answer to a permission request.
    pub fn apply_results(&mut self, names: &[String], codes: &[i32]) -> PermissionOutcome {
        if names.len() != codes.len() {
            warn!(
                names = names.len(),
                codes = codes.len(),
                "Permission result length mismatch"
            );
        }

        for (name, code) in names.iter().zip(codes) {
            let permission = Permission::from(name.as_str());
            if *code == PERMISSION_GRANTED {
                self.pending.remove(&permission);
            } else {
                info!(permission = %permission, "Permission denied");
                return PermissionOutcome::Denied(permission);
            }
        }
        PermissionOutcome::AllGranted
    }

    /// Whether `provider` may start recording now.
    ///
    /// Asks for Bluetooth to be enabled at most once until
    /// [`PermissionGate::bluetooth_state_changed`] is called.
    pub fn provider_allowed(&mut self, provider: &dyn DeviceProvider, platform: &dyn Platform) -> bool {
        let needs = provider.needs_permissions();

        let blocked = needs.iter().find(|p| {
            self.pending.contains(*p)
                || (p.is_location() && self.pending.contains(&Permission::LocationService))
        });
        if let Some(permission) = blocked {
            debug!(provider = %provider.id(), permission = %permission, "Provider waits for permission");
            return false;
        }

        if needs.iter().any(Permission::is_bluetooth) && !platform.bluetooth_enabled() {
            if !self.bluetooth_requested {
                info!(provider = %provider.id(), "Bluetooth is off, requesting enable");
                platform.request_enable_bluetooth();
                self.bluetooth_requested = true;
            }
            return false;
        }

        true
    }

    /// Bluetooth was switched on or off; allows a new enable request.
    pub fn bluetooth_state_changed(&mut self) {
        self.bluetooth_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, MockProvider};

    #[test]
    fn test_location_service_off_marks_both() {
        let platform = MockPlatform::new();
        platform.set_location_enabled(false);
        let mut gate = PermissionGate::new();

        let required = [Permission::FineLocation].into_iter().collect();
        assert!(gate.evaluate(&required, &platform));
        assert!(gate.pending().contains(&Permission::LocationService));
        assert!(gate.pending().contains(&Permission::FineLocation));
    }

    #[test]
    fn test_usage_stats_uses_capability_check() {
        let platform = MockPlatform::new();
        platform.deny(Permission::UsageStats);
        let mut gate = PermissionGate::new();
        let required = [Permission::UsageStats].into_iter().collect();

        // granted through the capability, not the grant check
        assert!(!gate.evaluate(&required, &platform));

        platform.set_usage_stats_allowed(false);
        assert!(gate.evaluate(&required, &platform));
    }

    #[test]
    fn test_evaluate_clears_previous_pending() {
        let platform = MockPlatform::new();
        platform.deny(Permission::Bluetooth);
        let mut gate = PermissionGate::new();
        let required = [Permission::Bluetooth].into_iter().collect();
        assert!(gate.evaluate(&required, &platform));

        platform.grant(Permission::Bluetooth);
        assert!(!gate.evaluate(&required, &platform));
        assert!(gate.pending().is_empty());
    }

    #[test]
    fn test_first_denial_stops_processing() {
        let platform = MockPlatform::new();
        platform.deny(Permission::Bluetooth);
        platform.deny(Permission::FineLocation);
        let mut gate = PermissionGate::new();
        let required = [Permission::Bluetooth, Permission::FineLocation]
            .into_iter()
            .collect();
        gate.evaluate(&required, &platform);

        let outcome = gate.apply_results(
            &["fine_location".into(), "bluetooth".into()],
            &[-1, PERMISSION_GRANTED],
        );
        assert_eq!(outcome, PermissionOutcome::Denied(Permission::FineLocation));
        assert!(gate.pending().contains(&Permission::Bluetooth));

        let outcome = gate.apply_results(
            &["bluetooth".into(), "fine_location".into()],
            &[PERMISSION_GRANTED, PERMISSION_GRANTED],
        );
        assert_eq!(outcome, PermissionOutcome::AllGranted);
        assert!(gate.pending().is_empty());
    }

    #[test]
    fn test_pending_permission_blocks_provider() {
        let platform = MockPlatform::new();
        platform.deny(Permission::FineLocation);
        let mut gate = PermissionGate::new();
        gate.evaluate(&[Permission::FineLocation].into_iter().collect(), &platform);

        let gps = MockProvider::new("gps").with_permissions(vec![Permission::FineLocation]);
        let phone = MockProvider::new("phone");
        assert!(!gate.provider_allowed(&gps, &platform));
        assert!(gate.provider_allowed(&phone, &platform));
    }

    #[test]
    fn test_bluetooth_enable_requested_once_per_state_change() {
        let platform = MockPlatform::new();
        platform.set_bluetooth_enabled(false);
        let mut gate = PermissionGate::new();
        let watch = MockProvider::new("watch").with_permissions(vec![Permission::Bluetooth]);

        assert!(!gate.provider_allowed(&watch, &platform));
        assert!(!gate.provider_allowed(&watch, &platform));
        assert_eq!(platform.bluetooth_requests(), 1);

        gate.bluetooth_state_changed();
        assert!(!gate.provider_allowed(&watch, &platform));
        assert_eq!(platform.bluetooth_requests(), 2);

        platform.set_bluetooth_enabled(true);
        assert!(gate.provider_allowed(&watch, &platform));
    }
}
