//! # DataHandler Contract
//!
//! The surface the orchestrator uses to drive an upload pipeline.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DataHandler Contract                             │
//! │                                                                         │
//! │  orchestrator ──► add_measurement()  never blocks, pipeline buffers     │
//! │  orchestrator ──► reconfigure()      swaps every tunable at once        │
//! │  orchestrator ──► set_*()            single-field adjustments           │
//! │  orchestrator ──► disable_submitter  buffered data is kept              │
//! │  orchestrator ──► enable_submitter   resumes from the buffer            │
//! │                                                                         │
//! │  pipeline ──► PipelineEvent::ServerStatus   on every status change      │
//! │  pipeline ──► PipelineEvent::RecordsSent    per delivered batch         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use beacon_core::{AuthState, ObservationKey, ServerConfig, ServerStatus, Topic};

use crate::error::CacheResult;
use crate::settings::PipelineSettings;

/// Notification from the pipeline to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Server status changed.
    ServerStatus(ServerStatus),

    /// A batch of `count` records was delivered for `topic`.
    RecordsSent { topic: String, count: u64 },
}

/// Sender half used by pipelines to report [`PipelineEvent`]s.
pub type PipelineEventSender = mpsc::UnboundedSender<PipelineEvent>;

/// An upload pipeline.
///
/// All methods return immediately. Work that needs I/O is performed by the
/// pipeline's own tasks.
pub trait DataHandler: Send + Sync {
    /// Queues a measurement.
    fn add_measurement(&self, topic: &Topic, key: ObservationKey, value: Value);

    /// Replaces the credentials used for submission.
    fn set_auth_state(&self, auth: AuthState);

    fn set_endpoint(&self, endpoint: ServerConfig);
    fn set_schema_registry(&self, registry: ServerConfig);

    fn enable_submitter(&self);
    fn disable_submitter(&self);

    fn set_maximum_cache_size(&self, bytes: u64);
    fn set_data_retention(&self, retention: Duration);
    fn set_upload_rate(&self, rate: Duration);
    fn set_records_send_limit(&self, limit: usize);
    fn set_sender_connection_timeout(&self, timeout: Duration);
    fn set_commit_rate(&self, rate: Duration);
    fn set_minimum_battery_level(&self, level: f32);
    fn set_compression(&self, enabled: bool);
    fn set_send_only_with_wifi(&self, wifi_only: bool);

    /// Applies every tunable of `settings` in one step, so no cycle sees a
    /// mix of old and new values. See [`PipelineSettings::apply`].
    fn reconfigure(&self, settings: PipelineSettings);

    /// Starts the commit and submit loops.
    fn start(&self);

    /// Requests an immediate connection check / submission cycle.
    fn check_connection(&self);

    fn server_status(&self) -> ServerStatus;

    /// Records delivered so far, per topic.
    fn records_sent(&self) -> BTreeMap<String, u64>;

    /// Current settings snapshot.
    fn settings(&self) -> PipelineSettings;

    /// Drops records beyond the retention horizon.
    fn clean(&self);

    /// Stops the loops after a final commit.
    fn shutdown(&self);
}

/// Builds pipelines.
///
/// The orchestrator calls this only when it has no pipeline yet. Every
/// later change goes through the [`DataHandler`] setters.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(
        &self,
        settings: PipelineSettings,
        auth: AuthState,
        events: PipelineEventSender,
    ) -> CacheResult<Arc<dyn DataHandler>>;
}
