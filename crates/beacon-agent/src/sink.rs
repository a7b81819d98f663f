//! Hand-off point from device connections to the upload pipeline.
//!
//! Providers get a [`MeasurementSink`] at construction, before the agent has
//! built its pipeline or knows who is logged in. Measurements offered before
//! both are known are dropped.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use beacon_cache::DataHandler;
use beacon_core::{AuthState, ObservationKey, Topic};

#[derive(Default)]
struct SinkInner {
    handler: RwLock<Option<Arc<dyn DataHandler>>>,
    identity: RwLock<Option<Identity>>,
}

#[derive(Debug, Clone)]
struct Identity {
    project_id: Option<String>,
    user_id: String,
}

/// Cloneable route for measurements into the current pipeline.
#[derive(Clone, Default)]
pub struct MeasurementSink {
    inner: Arc<SinkInner>,
}

impl MeasurementSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes later measurements into `handler`.
    pub fn attach(&self, handler: Arc<dyn DataHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Takes project and user from `auth` for the observation keys.
    pub fn set_identity(&self, auth: &AuthState) {
        let identity = auth.user_id().map(|user_id| Identity {
            project_id: auth.project_id().map(String::from),
            user_id: user_id.to_string(),
        });
        *self.inner.identity.write() = identity;
    }

    /// Whether measurements are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.inner.handler.read().is_some() && self.inner.identity.read().is_some()
    }

    /// Offers one measurement. Returns `false` when it was dropped.
    pub fn add(&self, topic: &Topic, source_id: &str, value: Value) -> bool {
        let Some(identity) = self.inner.identity.read().clone() else {
            trace!(topic = %topic.name, "No identity yet, dropping measurement");
            return false;
        };
        let handler = self.inner.handler.read().clone();
        let Some(handler) = handler else {
            trace!(topic = %topic.name, "No pipeline yet, dropping measurement");
            return false;
        };

        let key = ObservationKey {
            project_id: identity.project_id,
            user_id: identity.user_id,
            source_id: source_id.to_string(),
        };
        handler.add_measurement(topic, key, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHandler;
    use serde_json::json;

    #[test]
    fn test_drops_until_ready() {
        let sink = MeasurementSink::new();
        let topic = Topic::new("android_phone_battery_level", "PhoneBatteryLevel");
        assert!(!sink.add(&topic, "src-1", json!({"level": 0.5})));

        let handler = Arc::new(MockHandler::default());
        sink.attach(handler.clone());
        assert!(!sink.add(&topic, "src-1", json!({"level": 0.5})));

        sink.set_identity(&AuthState::builder().project_id("radar").user_id("sub-1").build());
        assert!(sink.is_ready());
        assert!(sink.add(&topic, "src-1", json!({"level": 0.5})));

        let added = handler.measurements();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].0, "android_phone_battery_level");
        assert_eq!(added[0].1.user_id, "sub-1");
        assert_eq!(added[0].1.project_id.as_deref(), Some("radar"));
        assert_eq!(added[0].1.source_id, "src-1");
    }

    #[test]
    fn test_identity_cleared_by_anonymous_state() {
        let sink = MeasurementSink::new();
        sink.attach(Arc::new(MockHandler::default()));
        sink.set_identity(&AuthState::builder().user_id("sub-1").build());
        assert!(sink.is_ready());

        sink.set_identity(&AuthState::unauthenticated());
        assert!(!sink.is_ready());
    }
}
