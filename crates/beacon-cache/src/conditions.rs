//! # Upload Conditions
//!
//! Network and battery state consulted before each submission cycle.
//!
//! ```text
//!   submitter disabled? ─── yes ──► skip
//!          │ no
//!   endpoint missing?  ──── yes ──► skip
//!          │ no
//!   offline? ───────────── yes ──► skip, status DISCONNECTED
//!          │ no
//!   wifi-only on cellular? yes ──► skip
//!          │ no
//!   battery low, unplugged? yes ─► skip
//!          │ no
//!          ▼
//!        upload
//! ```

use crate::settings::PipelineSettings;

/// Kind of network currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Wifi,
    Cellular,
    Offline,
}

/// Battery snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryState {
    /// Charge fraction in `0.0..=1.0`.
    pub level: f32,
    pub charging: bool,
}

/// Source of network and battery state.
pub trait UploadConditions: Send + Sync {
    fn network(&self) -> NetworkKind;
    fn battery(&self) -> BatteryState;
}

/// Conditions for hosts without radio or battery constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl UploadConditions for AlwaysOnline {
    fn network(&self) -> NetworkKind {
        NetworkKind::Wifi
    }

    fn battery(&self) -> BatteryState {
        BatteryState {
            level: 1.0,
            charging: true,
        }
    }
}

/// Why a submission cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SubmitterDisabled,
    NoEndpoint,
    Offline,
    WifiRequired,
    BatteryLow,
}

/// Decides whether a submission cycle may run under `settings`.
pub fn check_upload_allowed(
    settings: &PipelineSettings,
    conditions: &dyn UploadConditions,
) -> Result<(), SkipReason> {
    if !settings.submitter_enabled {
        return Err(SkipReason::SubmitterDisabled);
    }
    if settings.endpoint.is_none() {
        return Err(SkipReason::NoEndpoint);
    }
    match conditions.network() {
        NetworkKind::Offline => return Err(SkipReason::Offline),
        NetworkKind::Cellular if settings.send_only_with_wifi => {
            return Err(SkipReason::WifiRequired)
        }
        _ => {}
    }
    let battery = conditions.battery();
    if !battery.charging && battery.level < settings.minimum_battery_level {
        return Err(SkipReason::BatteryLow);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ServerConfig;

    struct Fixed(NetworkKind, BatteryState);

    impl UploadConditions for Fixed {
        fn network(&self) -> NetworkKind {
            self.0
        }
        fn battery(&self) -> BatteryState {
            self.1
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            endpoint: Some(ServerConfig::parse("endpoint", "https://radar.example", false).unwrap()),
            ..Default::default()
        }
    }

    const FULL: BatteryState = BatteryState { level: 0.9, charging: false };

    #[test]
    fn test_allowed_on_wifi() {
        assert_eq!(check_upload_allowed(&settings(), &AlwaysOnline), Ok(()));
    }

    #[test]
    fn test_wifi_only_blocks_cellular() {
        let cellular = Fixed(NetworkKind::Cellular, FULL);
        assert_eq!(
            check_upload_allowed(&settings(), &cellular),
            Err(SkipReason::WifiRequired)
        );

        let mut relaxed = settings();
        relaxed.send_only_with_wifi = false;
        assert_eq!(check_upload_allowed(&relaxed, &cellular), Ok(()));
    }

    #[test]
    fn test_low_battery_blocks_unless_charging() {
        let low = Fixed(NetworkKind::Wifi, BatteryState { level: 0.05, charging: false });
        assert_eq!(check_upload_allowed(&settings(), &low), Err(SkipReason::BatteryLow));

        let plugged = Fixed(NetworkKind::Wifi, BatteryState { level: 0.05, charging: true });
        assert_eq!(check_upload_allowed(&settings(), &plugged), Ok(()));
    }

    #[test]
    fn test_disabled_and_missing_endpoint() {
        let mut disabled = settings();
        disabled.submitter_enabled = false;
        assert_eq!(
            check_upload_allowed(&disabled, &AlwaysOnline),
            Err(SkipReason::SubmitterDisabled)
        );

        assert_eq!(
            check_upload_allowed(&PipelineSettings::default(), &AlwaysOnline),
            Err(SkipReason::NoEndpoint)
        );
    }

    #[test]
    fn test_offline() {
        let offline = Fixed(NetworkKind::Offline, FULL);
        assert_eq!(check_upload_allowed(&settings(), &offline), Err(SkipReason::Offline));
    }
}
