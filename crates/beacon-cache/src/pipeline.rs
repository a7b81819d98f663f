//! # Cached Data Handler
//!
//! The concrete upload pipeline: a non-blocking intake queue, a commit loop
//! that moves queued measurements into SQLite, and a submit loop that ships
//! them to the backend.
//!
//! ## Pipeline Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CachedDataHandler                                │
//! │                                                                         │
//! │  add_measurement() ──► intake queue (unbounded, never blocks)           │
//! │                              │                                          │
//! │                              ▼  every commit_rate                       │
//! │                     ┌─────────────────┐                                 │
//! │                     │  commit loop    │  insert batch (1 transaction)   │
//! │                     │                 │  trim topic to max_cache_bytes  │
//! │                     │                 │  drop beyond data_retention     │
//! │                     └────────┬────────┘                                 │
//! │                              ▼                                          │
//! │                     ┌─────────────────┐                                 │
//! │                     │   CacheStore    │  (SQLite)                       │
//! │                     └────────┬────────┘                                 │
//! │                              ▼  every upload_rate / check_connection()  │
//! │                     ┌─────────────────┐                                 │
//! │                     │  submit loop    │  gates: enabled, endpoint,      │
//! │                     │                 │  network, wifi, battery         │
//! │                     │                 │  send ≤ records_send_limit/topic│
//! │                     └────────┬────────┘                                 │
//! │                              ▼                                          │
//! │               PipelineEvent::{ServerStatus, RecordsSent}                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Settings live behind one lock and `reconfigure` replaces them in a single
//! write. Each cycle works from a snapshot, so a reconfiguration never takes
//! effect halfway through a cycle.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use beacon_core::{AuthState, ObservationKey, Record, ServerConfig, ServerStatus, Topic};

use crate::conditions::{check_upload_allowed, SkipReason, UploadConditions};
use crate::error::{CacheError, CacheResult};
use crate::handler::{DataHandler, PipelineEvent, PipelineEventSender, PipelineFactory};
use crate::sender::{RecordSender, SendRequest};
use crate::settings::PipelineSettings;
use crate::store::{CacheStore, StoreConfig};

/// First delay after a network failure.
const INITIAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Ceiling for the network-failure backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    store: CacheStore,
    sender: Arc<dyn RecordSender>,
    conditions: Arc<dyn UploadConditions>,
    settings: RwLock<PipelineSettings>,
    auth: RwLock<AuthState>,
    status: Mutex<ServerStatus>,
    records_sent: Mutex<BTreeMap<String, u64>>,
    events: PipelineEventSender,
    queue_tx: mpsc::UnboundedSender<Record>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Record>>,
    check_now: Notify,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

// =============================================================================
// Cached Data Handler
// =============================================================================

/// SQLite-buffered [`DataHandler`].
#[derive(Clone)]
pub struct CachedDataHandler {
    shared: Arc<Shared>,
}

impl CachedDataHandler {
    pub fn new(
        store: CacheStore,
        sender: Arc<dyn RecordSender>,
        conditions: Arc<dyn UploadConditions>,
        settings: PipelineSettings,
        auth: AuthState,
        events: PipelineEventSender,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        CachedDataHandler {
            shared: Arc::new(Shared {
                store,
                sender,
                conditions,
                settings: RwLock::new(settings),
                auth: RwLock::new(auth),
                status: Mutex::new(ServerStatus::Disconnected),
                records_sent: Mutex::new(BTreeMap::new()),
                events,
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                check_now: Notify::new(),
                shutdown_tx,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &CacheStore {
        &self.shared.store
    }

    /// Moves queued measurements into the store.
    pub async fn commit(&self) -> CacheResult<usize> {
        self.shared.commit().await
    }

    /// Runs one submission cycle immediately.
    pub async fn submit(&self) -> CacheResult<u64> {
        self.shared.submit_cycle().await
    }

    fn spawn<F>(&self, what: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => error!(task = what, "No async runtime available, task not started"),
        }
    }
}

impl Shared {
    // ===== Status =====

    fn set_status(&self, status: ServerStatus) {
        let changed = {
            let mut current = self.status.lock();
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        };
        if changed {
            info!(%status, "Server status changed");
            let _ = self.events.send(PipelineEvent::ServerStatus(status));
        }
    }

    fn record_failure(&self, err: &CacheError) {
        match err {
            CacheError::Unauthorized => self.set_status(ServerStatus::Unauthorized),
            e if e.is_retryable() => self.set_status(ServerStatus::Disconnected),
            _ => {}
        }
    }

    // ===== Commit =====

    async fn commit(&self) -> CacheResult<usize> {
        let batch: Vec<Record> = {
            let mut rx = self.queue_rx.lock().await;
            let mut batch = Vec::new();
            while let Ok(record) = rx.try_recv() {
                batch.push(record);
            }
            batch
        };
        if batch.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.store.insert_batch(&batch).await {
            // Put the batch back so the next commit retries it.
            for record in batch {
                let _ = self.queue_tx.send(record);
            }
            return Err(e);
        }

        let max_bytes = self.settings.read().max_cache_bytes;
        let topics: BTreeSet<&str> = batch.iter().map(|r| r.topic.name.as_str()).collect();
        for topic in topics {
            self.store.trim_topic(topic, max_bytes).await?;
        }

        Ok(batch.len())
    }

    async fn remove_expired(&self) -> CacheResult<u64> {
        let retention = self.settings.read().data_retention;
        let horizon = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(horizon)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.store.remove_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, "Dropped records beyond retention horizon");
        }
        Ok(removed)
    }

    async fn run_committer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Commit loop starting");

        loop {
            let rate = self.settings.read().commit_rate;
            tokio::select! {
                _ = tokio::time::sleep(rate) => {
                    if let Err(e) = self.commit().await {
                        error!(error = %e, "Failed to commit measurements");
                    }
                    if let Err(e) = self.remove_expired().await {
                        warn!(error = %e, "Failed to apply retention");
                    }
                }
                _ = shutdown.changed() => {
                    if let Err(e) = self.commit().await {
                        error!(error = %e, "Final commit failed");
                    }
                    break;
                }
            }
        }

        info!("Commit loop stopped");
    }

    // ===== Submit =====

    async fn submit_cycle(&self) -> CacheResult<u64> {
        let settings = self.settings.read().clone();

        match check_upload_allowed(&settings, self.conditions.as_ref()) {
            Ok(()) => {}
            Err(SkipReason::Offline) => {
                self.set_status(ServerStatus::Disconnected);
                return Ok(0);
            }
            Err(reason) => {
                debug!(?reason, "Skipping upload cycle");
                return Ok(0);
            }
        }
        let Some(endpoint) = settings.endpoint.as_ref() else {
            return Ok(0);
        };

        let auth = self.auth.read().clone();
        if !auth.is_valid() {
            self.set_status(ServerStatus::Unauthorized);
            return Err(CacheError::Unauthorized);
        }

        if *self.status.lock() != ServerStatus::Connected {
            self.set_status(ServerStatus::Connecting);
            if let Err(e) = self
                .sender
                .check(endpoint, &auth, settings.connection_timeout)
                .await
            {
                self.record_failure(&e);
                return Err(e);
            }
            self.set_status(ServerStatus::Connected);
        }

        let mut sent = 0;
        for topic in self.store.topics().await? {
            let batch = self
                .store
                .pending(&topic, settings.records_send_limit)
                .await?;
            let Some(last_seq) = batch.last().map(|r| r.seq) else {
                continue;
            };

            let request = SendRequest {
                endpoint,
                auth: &auth,
                topic: &topic,
                records: &batch,
                compression: settings.compression,
                timeout: settings.connection_timeout,
            };
            if let Err(e) = self.sender.send(request).await {
                self.record_failure(&e);
                return Err(e);
            }

            self.store.remove_through(&topic, last_seq).await?;

            let count = batch.len() as u64;
            *self.records_sent.lock().entry(topic.clone()).or_default() += count;
            let _ = self.events.send(PipelineEvent::RecordsSent { topic, count });
            sent += count;
        }

        Ok(sent)
    }

    async fn run_submitter(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Submit loop starting");

        let mut backoff = ExponentialBackoff {
            initial_interval: INITIAL_RETRY_BACKOFF,
            max_interval: MAX_RETRY_BACKOFF,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        let mut retry_after: Option<Duration> = None;

        loop {
            let wait = retry_after.unwrap_or_else(|| self.settings.read().upload_rate);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.check_now.notified() => {
                    debug!("Connection check requested");
                }
                _ = shutdown.changed() => break,
            }

            match self.submit_cycle().await {
                Ok(sent) => {
                    if sent > 0 {
                        debug!(sent, "Upload cycle complete");
                    }
                    backoff.reset();
                    retry_after = None;
                }
                Err(e) if e.is_retryable() => {
                    retry_after = backoff.next_backoff();
                    warn!(error = %e, ?retry_after, "Upload failed, backing off");
                }
                Err(e) => {
                    retry_after = None;
                    debug!(error = %e, "Upload cycle aborted");
                }
            }
        }

        info!("Submit loop stopped");
    }
}

// =============================================================================
// DataHandler Implementation
// =============================================================================

impl DataHandler for CachedDataHandler {
    fn add_measurement(&self, topic: &Topic, key: ObservationKey, value: Value) {
        let record = Record::new(topic.clone(), key, value);
        if self.shared.queue_tx.send(record).is_err() {
            warn!(topic = %topic.name, "Intake queue closed, measurement dropped");
        }
    }

    fn set_auth_state(&self, auth: AuthState) {
        debug!(user_id = ?auth.user_id(), "Pipeline credentials replaced");
        *self.shared.auth.write() = auth;
    }

    fn set_endpoint(&self, endpoint: ServerConfig) {
        info!(%endpoint, "Upload endpoint set");
        self.shared.settings.write().endpoint = Some(endpoint);
    }

    fn set_schema_registry(&self, registry: ServerConfig) {
        self.shared.settings.write().schema_registry = Some(registry);
    }

    fn enable_submitter(&self) {
        info!("Submitter enabled");
        self.shared.settings.write().submitter_enabled = true;
        self.shared.check_now.notify_one();
    }

    fn disable_submitter(&self) {
        info!("Submitter disabled, keeping buffered data");
        self.shared.settings.write().submitter_enabled = false;
    }

    fn set_maximum_cache_size(&self, bytes: u64) {
        self.shared.settings.write().max_cache_bytes = bytes;
    }

    fn set_data_retention(&self, retention: Duration) {
        self.shared.settings.write().data_retention = retention;
    }

    fn set_upload_rate(&self, rate: Duration) {
        self.shared.settings.write().upload_rate = rate;
    }

    fn set_records_send_limit(&self, limit: usize) {
        self.shared.settings.write().records_send_limit = limit.max(1);
    }

    fn set_sender_connection_timeout(&self, timeout: Duration) {
        self.shared.settings.write().connection_timeout = timeout;
    }

    fn set_commit_rate(&self, rate: Duration) {
        self.shared.settings.write().commit_rate = rate;
    }

    fn set_minimum_battery_level(&self, level: f32) {
        self.shared.settings.write().minimum_battery_level = level;
    }

    fn set_compression(&self, enabled: bool) {
        self.shared.settings.write().compression = enabled;
    }

    fn set_send_only_with_wifi(&self, wifi_only: bool) {
        self.shared.settings.write().send_only_with_wifi = wifi_only;
    }

    fn reconfigure(&self, settings: PipelineSettings) {
        let enabled = {
            let mut current = self.shared.settings.write();
            current.apply(settings);
            current.submitter_enabled
        };
        info!(submitter_enabled = enabled, "Pipeline reconfigured");
        if enabled {
            self.shared.check_now.notify_one();
        }
    }

    fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            debug!("Pipeline already started");
            return;
        }
        info!("Starting upload pipeline");

        let committer = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown_tx.subscribe();
        self.spawn("committer", committer.run_committer(shutdown));

        let submitter = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown_tx.subscribe();
        self.spawn("submitter", submitter.run_submitter(shutdown));
    }

    fn check_connection(&self) {
        self.shared.check_now.notify_one();
    }

    fn server_status(&self) -> ServerStatus {
        *self.shared.status.lock()
    }

    fn records_sent(&self) -> BTreeMap<String, u64> {
        self.shared.records_sent.lock().clone()
    }

    fn settings(&self) -> PipelineSettings {
        self.shared.settings.read().clone()
    }

    fn clean(&self) {
        let shared = Arc::clone(&self.shared);
        self.spawn("clean", async move {
            if let Err(e) = shared.remove_expired().await {
                warn!(error = %e, "Cache cleanup failed");
            }
        });
    }

    fn shutdown(&self) {
        info!("Shutting down upload pipeline");
        self.shared.shutdown_tx.send_replace(true);
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds [`CachedDataHandler`]s on a SQLite store.
pub struct SqlitePipelineFactory {
    store_config: StoreConfig,
    sender: Arc<dyn RecordSender>,
    conditions: Arc<dyn UploadConditions>,
}

impl SqlitePipelineFactory {
    pub fn new(
        store_config: StoreConfig,
        sender: Arc<dyn RecordSender>,
        conditions: Arc<dyn UploadConditions>,
    ) -> Self {
        SqlitePipelineFactory {
            store_config,
            sender,
            conditions,
        }
    }
}

#[async_trait]
impl PipelineFactory for SqlitePipelineFactory {
    async fn create(
        &self,
        settings: PipelineSettings,
        auth: AuthState,
        events: PipelineEventSender,
    ) -> CacheResult<Arc<dyn DataHandler>> {
        let store = CacheStore::open(self.store_config.clone()).await?;
        info!(
            endpoint = ?settings.endpoint.as_ref().map(|e| e.url.as_str()),
            max_cache_bytes = settings.max_cache_bytes,
            "Upload pipeline created"
        );
        Ok(Arc::new(CachedDataHandler::new(
            store,
            Arc::clone(&self.sender),
            Arc::clone(&self.conditions),
            settings,
            auth,
            events,
        )))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
