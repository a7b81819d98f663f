//! Messages into and out of the agent.
//!
//! Inbound [`AgentEvent`]s come from the host (permission dialogs, login,
//! radio state) and from provider connections. Outbound
//! [`AgentNotification`]s are broadcast to whoever subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use beacon_core::{DeviceFilter, DeviceStatus};

use crate::provider::ProviderId;

/// Bluetooth adapter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BluetoothState {
    On,
    Off,
    TurningOn,
    TurningOff,
}

/// Something that happened outside the agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Answer to a permission request. A code of `0` means granted.
    PermissionsResult {
        permissions: Vec<String>,
        grant_results: Vec<i32>,
    },

    /// Interactive login finished; carries the serialized auth state.
    LoginSuccess(String),

    BluetoothStateChanged(BluetoothState),

    DeviceConnectFailed { device_name: String },

    /// Upload path status by ordinal.
    ServerStatusChanged(i32),

    /// The shared configuration was replaced.
    ConfigurationChanged,

    /// A provider finished binding.
    ServiceConnected(ProviderId),

    /// A provider's service went away unexpectedly.
    ServiceDisconnected(ProviderId),

    DeviceStatusUpdated(ProviderId, DeviceStatus),

    /// New allow-list for a provider's connection.
    SetAllowedDeviceIds(ProviderId, DeviceFilter),

    /// Stop recording on one provider, or on all of them.
    Disconnect(Option<ProviderId>),
}

/// Something the agent reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentNotification {
    /// Upload path status by ordinal. Sent only when it changes.
    ServerStatusChanged(i32),

    /// A batch of `count` records was delivered for `topic`.
    RecordsSent { topic: String, count: u64 },

    DeviceStatusChanged {
        provider: String,
        status: DeviceStatus,
    },
}

/// A count with the time it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCount {
    pub count: u64,
    pub at: DateTime<Utc>,
}

impl TimedCount {
    pub fn now(count: u64) -> Self {
        TimedCount {
            count,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_shape() {
        let json = serde_json::to_value(AgentNotification::RecordsSent {
            topic: "android_phone_acceleration".into(),
            count: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "records_sent");
        assert_eq!(json["count"], 12);
    }
}
