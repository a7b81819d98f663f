//! Heartbeat provider.
//!
//! A device-less provider that records one liveness measurement per interval
//! while recording. Useful on hosts without sensors and to check that the
//! upload path works end to end.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beacon_agent::{
    AgentConfig, AgentResult, DeviceConnection, DeviceProvider, MeasurementSink, ProviderId,
};
use beacon_core::{DeviceFilter, DeviceStatus, Permission, ServerStatus, SourceType, Topic};

/// Service name to list in `agent.device_services`.
pub const SERVICE_NAME: &str = "heartbeat";

/// Topic heartbeats are recorded to.
pub const HEARTBEAT_TOPIC: &str = "beacon_agent_heartbeat";

const HEARTBEAT_SCHEMA: &str = "org.beacon.agent.Heartbeat";
const DEVICE_NAME: &str = "beacond";

struct HeartbeatConnection {
    sink: MeasurementSink,
    interval: Duration,
    started: Instant,
    task: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<DeviceStatus>,
    server_status: Mutex<ServerStatus>,
}

impl HeartbeatConnection {
    fn beat(sink: &MeasurementSink, started: Instant) -> bool {
        let topic = Topic::new(HEARTBEAT_TOPIC, HEARTBEAT_SCHEMA);
        sink.add(
            &topic,
            DEVICE_NAME,
            json!({
                "time": Utc::now().timestamp_millis() as f64 / 1000.0,
                "uptimeSeconds": started.elapsed().as_secs(),
            }),
        )
    }
}

impl DeviceConnection for HeartbeatConnection {
    fn has_service(&self) -> bool {
        true
    }

    fn is_recording(&self) -> bool {
        self.task.lock().is_some()
    }

    fn start_recording(&self, filter: &DeviceFilter) {
        if !self.is_allowed_device(filter) {
            debug!("Heartbeat not in allowed devices");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to run heartbeats on");
            return;
        };

        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let sink = self.sink.clone();
        let started = self.started;
        let interval = self.interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !Self::beat(&sink, started) {
                    debug!("Heartbeat dropped, agent not ready");
                }
            }
        }));
        *self.status.lock() = DeviceStatus::Connected;
        info!(interval_secs = interval.as_secs(), "Heartbeat recording");
    }

    fn stop_recording(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Heartbeat stopped");
        }
        *self.status.lock() = DeviceStatus::Disconnected;
    }

    fn device_status(&self) -> DeviceStatus {
        *self.status.lock()
    }

    fn device_name(&self) -> Option<String> {
        Some(DEVICE_NAME.to_string())
    }

    fn update_server_status(&self, status: ServerStatus) {
        *self.server_status.lock() = status;
    }
}

/// Provider of [`HeartbeatConnection`]s.
pub struct HeartbeatProvider {
    sink: MeasurementSink,
    interval: Duration,
    bound: AtomicBool,
    connection: Mutex<Option<Arc<HeartbeatConnection>>>,
}

impl HeartbeatProvider {
    pub fn new(sink: MeasurementSink, interval: Duration) -> Self {
        HeartbeatProvider {
            sink,
            interval,
            bound: AtomicBool::new(false),
            connection: Mutex::new(None),
        }
    }
}

impl DeviceProvider for HeartbeatProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(SERVICE_NAME)
    }

    fn display_name(&self) -> String {
        "Agent heartbeat".to_string()
    }

    fn source_type(&self) -> SourceType {
        SourceType::new("Beacon", "Heartbeat", "1.0.0")
    }

    fn needs_permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    fn bind(&self) -> AgentResult<()> {
        let mut connection = self.connection.lock();
        if connection.is_none() {
            *connection = Some(Arc::new(HeartbeatConnection {
                sink: self.sink.clone(),
                interval: self.interval,
                started: Instant::now(),
                task: Mutex::new(None),
                status: Mutex::new(DeviceStatus::Disconnected),
                server_status: Mutex::new(ServerStatus::default()),
            }));
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&self) -> AgentResult<()> {
        if let Some(connection) = self.connection.lock().take() {
            connection.stop_recording();
        }
        self.bound.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    fn connection(&self) -> Option<Arc<dyn DeviceConnection>> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn DeviceConnection>)
    }

    fn update_configuration(&self, config: &AgentConfig) {
        debug!(
            upload_rate_secs = config.upload.upload_rate_secs,
            "Heartbeat configuration updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_record_unbind() {
        let provider = HeartbeatProvider::new(MeasurementSink::new(), Duration::from_secs(60));
        assert!(provider.connection().is_none());

        provider.bind().unwrap();
        let connection = provider.connection().unwrap();
        connection.start_recording(&DeviceFilter::any());
        assert!(connection.is_recording());
        assert_eq!(connection.device_status(), DeviceStatus::Connected);

        provider.unbind().unwrap();
        assert!(!connection.is_recording());
        assert!(provider.connection().is_none());
    }

    #[tokio::test]
    async fn test_filter_excludes_heartbeat() {
        let provider = HeartbeatProvider::new(MeasurementSink::new(), Duration::from_secs(60));
        provider.bind().unwrap();
        let connection = provider.connection().unwrap();

        connection.start_recording(&DeviceFilter::new(["E4"]));
        assert!(!connection.is_recording());
    }
}
