//! # Agent Service
//!
//! The orchestrator. Owns the auth state, the upload pipeline and the
//! managed providers, and reacts to everything that happens to them on one
//! task.
//!
//! ## Event Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          AgentService::run                              │
//! │                                                                         │
//! │   AgentHandle ──AgentEvent──────┐                                       │
//! │   BindQueue ──ServiceConnected──┤                                       │
//! │                                 ▼                                       │
//! │   pipeline ──PipelineEvent──► select! ◄──Internal── refresh / subject   │
//! │                                 │                   tasks, retry timer  │
//! │                                 ▼                                       │
//! │          ┌──────────────┬───────┴───────┬──────────────────┐           │
//! │          ▼              ▼               ▼                  ▼           │
//! │     configure()   check_permissions  AuthMachine    server status      │
//! │     (reconcile)   start_scanning()   (refresh/login) broadcast         │
//! │                                                                         │
//! │   AgentHandle::shutdown ──► teardown: unbind bound providers,           │
//! │                             stop bind queue, shut pipeline down         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fatal errors (malformed URLs, pipeline construction) end the loop.
//! Everything else is logged and processing continues.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use beacon_cache::{DataHandler, PipelineEvent, PipelineFactory, PipelineSettings};
use beacon_core::{AuthState, DeviceFilter, DeviceStatus, ServerStatus};

use crate::auth_store::AuthStore;
use crate::binder::{BindQueue, BindQueueHandle};
use crate::config::SharedConfig;
use crate::error::{AgentError, AgentResult, PortalError};
use crate::events::{AgentEvent, AgentNotification, BluetoothState, TimedCount};
use crate::permissions::{agent_permissions, PermissionGate, PermissionOutcome};
use crate::platform::{Notice, Platform};
use crate::portal::{ManagementPortalClient, PortalClient};
use crate::provider::{DeviceProvider, ProviderId, ProviderLoader};
use crate::refresh::{AuthMachine, AuthPhase, UnauthorizedAction};
use crate::registry::ProviderRegistry;
use crate::sink::MeasurementSink;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the notification broadcast.
const NOTIFICATION_CAPACITY: usize = 64;

/// Completions of work the service spawned.
#[derive(Debug)]
enum Internal {
    RefreshCompleted(Result<AuthState, PortalError>),
    RetryRefresh,
    SubjectFetched(Result<AuthState, PortalError>),
}

struct Inbox {
    events_rx: mpsc::Receiver<AgentEvent>,
    pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    shutdown_rx: mpsc::Receiver<()>,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for talking to a running [`AgentService`].
///
/// Dropping every handle stops the service.
#[derive(Clone)]
pub struct AgentHandle {
    events_tx: mpsc::Sender<AgentEvent>,
    notifications: broadcast::Sender<AgentNotification>,
    shutdown_tx: mpsc::Sender<()>,
}

impl AgentHandle {
    /// Delivers an event to the service.
    pub async fn send(&self, event: AgentEvent) -> AgentResult<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| AgentError::Channel("Agent event channel closed".into()))
    }

    /// Subscribes to outbound notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotification> {
        self.notifications.subscribe()
    }

    /// Asks the service to tear down and stop.
    pub async fn shutdown(&self) -> AgentResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| AgentError::ShuttingDown)
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct AgentServiceBuilder {
    config: SharedConfig,
    platform: Arc<dyn Platform>,
    loader: Arc<dyn ProviderLoader>,
    factory: Arc<dyn PipelineFactory>,
    portal: Option<Arc<dyn PortalClient>>,
    auth_store: Option<AuthStore>,
    sink: Option<MeasurementSink>,
    auth: Option<AuthState>,
}

impl AgentServiceBuilder {
    /// Uses `portal` instead of a client built from the configuration.
    pub fn portal(mut self, portal: Arc<dyn PortalClient>) -> Self {
        self.portal = Some(portal);
        self
    }

    /// Persists the auth state in `store`.
    pub fn auth_store(mut self, store: AuthStore) -> Self {
        self.auth_store = Some(store);
        self
    }

    /// Shares `sink` with the providers.
    pub fn sink(mut self, sink: MeasurementSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Starts from `auth` instead of the persisted state.
    pub fn auth_state(mut self, auth: AuthState) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Builds the service and its handle. Must run inside a tokio runtime.
    pub fn build(self) -> (AgentService, AgentHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let binder = BindQueue::spawn(Some(events_tx.clone()));
        let auth_loaded = self.auth.is_some();

        let service = AgentService {
            config: self.config,
            platform: self.platform,
            loader: self.loader,
            factory: self.factory,
            portal_injected: self.portal.is_some(),
            portal: self.portal,
            auth_store: self.auth_store,
            sink: self.sink.unwrap_or_default(),
            auth: self.auth.unwrap_or_else(AuthState::unauthenticated),
            auth_loaded,
            machine: AuthMachine::new(),
            registry: ProviderRegistry::new(),
            gate: PermissionGate::new(),
            binder,
            pipeline: None,
            server_status: ServerStatus::default(),
            records_sent: BTreeMap::new(),
            notifications: notifications.clone(),
            pipeline_tx,
            internal_tx,
            inbox: Some(Inbox {
                events_rx,
                pipeline_rx,
                internal_rx,
                shutdown_rx,
            }),
        };

        let handle = AgentHandle {
            events_tx,
            notifications,
            shutdown_tx,
        };

        (service, handle)
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct AgentService {
    config: SharedConfig,
    platform: Arc<dyn Platform>,
    loader: Arc<dyn ProviderLoader>,
    factory: Arc<dyn PipelineFactory>,
    portal: Option<Arc<dyn PortalClient>>,
    portal_injected: bool,
    auth_store: Option<AuthStore>,
    sink: MeasurementSink,
    auth: AuthState,
    auth_loaded: bool,
    machine: AuthMachine,
    registry: ProviderRegistry,
    gate: PermissionGate,
    binder: BindQueueHandle,
    pipeline: Option<Arc<dyn DataHandler>>,
    server_status: ServerStatus,
    records_sent: BTreeMap<String, TimedCount>,
    notifications: broadcast::Sender<AgentNotification>,
    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    inbox: Option<Inbox>,
}

impl AgentService {
    pub fn builder(
        config: SharedConfig,
        platform: Arc<dyn Platform>,
        loader: Arc<dyn ProviderLoader>,
        factory: Arc<dyn PipelineFactory>,
    ) -> AgentServiceBuilder {
        AgentServiceBuilder {
            config,
            platform,
            loader,
            factory,
            portal: None,
            auth_store: None,
            sink: None,
            auth: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn auth_phase(&self) -> AuthPhase {
        self.machine.phase()
    }

    pub fn server_status(&self) -> ServerStatus {
        self.server_status
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> Option<&Arc<dyn DataHandler>> {
        self.pipeline.as_ref()
    }

    /// Latest records-sent count per topic.
    pub fn records_sent(&self) -> &BTreeMap<String, TimedCount> {
        &self.records_sent
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotification> {
        self.notifications.subscribe()
    }

    fn portal_configured(&self) -> bool {
        self.portal.is_some()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs the service until shutdown or a fatal error.
    pub async fn run(mut self) -> AgentResult<()> {
        info!("Agent service starting");

        if let Err(e) = self.start().await {
            if e.is_fatal() {
                error!(error = %e, "Agent failed to start");
                self.inbox = None;
                self.teardown().await;
                return Err(e);
            }
            warn!(error = %e, "Agent started with errors");
        }

        let Some(mut inbox) = self.inbox.take() else {
            return Err(AgentError::Channel("Agent service already running".into()));
        };

        let result = loop {
            tokio::select! {
                _ = inbox.shutdown_rx.recv() => {
                    info!("Agent shutdown requested");
                    break Ok(());
                }
                Some(event) = inbox.events_rx.recv() => {
                    let outcome = self.handle_event(event).await;
                    if let Err(e) = Self::triage(outcome) {
                        break Err(e);
                    }
                }
                Some(event) = inbox.pipeline_rx.recv() => {
                    self.handle_pipeline_event(event);
                }
                Some(message) = inbox.internal_rx.recv() => {
                    let outcome = self.handle_internal(message).await;
                    if let Err(e) = Self::triage(outcome) {
                        break Err(e);
                    }
                }
                else => break Ok(()),
            }
        };

        drop(inbox);
        self.teardown().await;
        info!("Agent service stopped");
        result
    }

    /// Passes fatal errors through; logs and swallows the rest.
    fn triage(outcome: AgentResult<()>) -> AgentResult<()> {
        match outcome {
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Fatal agent error");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Agent event failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Loads the persisted auth state and runs the first reconciliation.
    pub async fn start(&mut self) -> AgentResult<()> {
        if !self.auth_loaded {
            if let Some(store) = &self.auth_store {
                match store.load() {
                    Ok(Some(state)) => self.auth = state,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Could not read persisted auth state"),
                }
            }
            self.auth_loaded = true;
        }
        self.sink.set_identity(&self.auth);

        self.reconcile().await?;
        self.check_permissions();
        self.fetch_subject_if_unassigned();
        Ok(())
    }

    /// Unbinds every bound provider and stops the pipeline.
    pub async fn teardown(&mut self) {
        info!(providers = self.registry.len(), "Tearing down agent");

        if let Err(e) = self.binder.flush().await {
            warn!(error = %e, "Bind queue did not drain");
        }

        let mut bound: Vec<Arc<dyn DeviceProvider>> = Vec::new();
        for entry in self.registry.providers() {
            if entry.provider.is_bound() {
                bound.push(Arc::clone(&entry.provider));
            } else {
                info!(provider = %entry.provider.id(), "Provider already unbound");
            }
        }
        self.binder.unbind(bound);

        if let Err(e) = self.binder.flush().await {
            warn!(error = %e, "Bind queue did not drain");
        }
        if let Err(e) = self.binder.shutdown().await {
            debug!(error = %e, "Bind queue already stopped");
        }

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Brings pipeline, providers and boot flag in line with the current
    /// configuration and auth state. Safe to call any number of times.
    pub async fn configure(&mut self) -> AgentResult<()> {
        if self.reconcile().await? {
            self.check_permissions();
        }
        Ok(())
    }

    /// The work of [`configure`](Self::configure), without the permission
    /// check. Returns whether any provider was added.
    async fn reconcile(&mut self) -> AgentResult<bool> {
        let config = self.config.read().clone();
        let settings = config.pipeline_settings()?;

        if !self.portal_injected {
            self.portal = match config.portal_server()? {
                Some(base) => Some(Arc::new(ManagementPortalClient::new(
                    base,
                    config.portal.client_id.clone(),
                    config.portal.client_secret.clone(),
                )?) as Arc<dyn PortalClient>),
                None => None,
            };
        }

        self.apply_pipeline_settings(settings).await?;

        let desired = self.loader.load_providers(&config);
        let assigned = self.auth.assigned_sources();
        let portal_configured = self.portal_configured();
        let result = self
            .registry
            .reconcile(desired, assigned.as_deref(), portal_configured);

        self.binder.unbind(result.removed);

        for entry in self.registry.providers() {
            entry.provider.update_configuration(&config);
        }

        if !result.added.is_empty() {
            let added: Vec<Arc<dyn DeviceProvider>> = result
                .added
                .iter()
                .filter_map(|id| self.registry.get(id))
                .map(|entry| Arc::clone(&entry.provider))
                .collect();
            self.binder.bind(added, false);
        }

        let run_at_boot = config.agent.run_at_boot;
        if self.platform.run_at_boot() != run_at_boot {
            info!(enabled = run_at_boot, "Updating run at boot");
            self.platform.set_run_at_boot(run_at_boot);
        }

        debug!(providers = self.registry.len(), "Configuration applied");
        Ok(!result.added.is_empty())
    }

    async fn apply_pipeline_settings(&mut self, settings: PipelineSettings) -> AgentResult<()> {
        if let Some(pipeline) = &self.pipeline {
            pipeline.reconfigure(settings);
            return Ok(());
        }

        let pipeline = self
            .factory
            .create(settings, self.auth.clone(), self.pipeline_tx.clone())
            .await?;
        pipeline.start();
        self.sink.attach(Arc::clone(&pipeline));
        self.pipeline = Some(pipeline);
        info!("Upload pipeline created");
        Ok(())
    }

    // =========================================================================
    // Permissions & Scanning
    // =========================================================================

    /// Re-evaluates every required permission; requests the outstanding ones
    /// or starts scanning when nothing is outstanding.
    pub fn check_permissions(&mut self) {
        let mut required = agent_permissions();
        required.extend(self.registry.required_permissions());

        if self.gate.evaluate(&required, self.platform.as_ref()) {
            self.platform.request_permissions(self.gate.pending());
        } else {
            self.start_scanning();
        }
    }

    fn on_permissions_result(&mut self, permissions: &[String], grant_results: &[i32]) {
        match self.gate.apply_results(permissions, grant_results) {
            PermissionOutcome::AllGranted => self.start_scanning(),
            PermissionOutcome::Denied(permission) => {
                self.platform.notify(Notice::PermissionDenied(permission));
            }
        }
    }

    /// Starts recording on every idle provider that may record.
    pub fn start_scanning(&mut self) {
        let platform = self.platform.as_ref();

        for entry in self.registry.providers() {
            let Some(connection) = entry.provider.connection() else {
                continue;
            };
            if !connection.has_service() || connection.is_recording() {
                continue;
            }
            if !self.gate.provider_allowed(entry.provider.as_ref(), platform) {
                continue;
            }

            let filter = entry.effective_filter();
            info!(
                provider = %entry.provider.id(),
                filter = ?filter.ids().collect::<Vec<_>>(),
                "Starting recording"
            );
            connection.start_recording(&filter);
        }
    }

    // =========================================================================
    // Server Status & Authentication
    // =========================================================================

    fn set_server_status(&mut self, status: ServerStatus) {
        if status == self.server_status {
            return;
        }
        info!(from = %self.server_status, to = %status, "Server status changed");
        self.server_status = status;

        let _ = self
            .notifications
            .send(AgentNotification::ServerStatusChanged(status.ordinal()));
        for entry in self.registry.providers() {
            if let Some(connection) = entry.provider.connection() {
                connection.update_server_status(status);
            }
        }

        if status == ServerStatus::Unauthorized {
            self.on_unauthorized();
        }
    }

    fn on_unauthorized(&mut self) {
        let portal_configured = self.portal_configured();
        match self
            .machine
            .on_unauthorized(&mut self.auth, portal_configured, Utc::now())
        {
            UnauthorizedAction::Dropped => {}
            UnauthorizedAction::RequestPortalRefresh => self.spawn_refresh(),
            UnauthorizedAction::StartLogin => {
                info!("Starting interactive login");
                self.platform.start_login();
            }
        }
    }

    fn spawn_refresh(&self) {
        let Some(portal) = self.portal.clone() else {
            return;
        };
        let auth = self.auth.clone();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = portal.refresh(&auth).await;
            let _ = tx.send(Internal::RefreshCompleted(outcome));
        });
    }

    fn fetch_subject_if_unassigned(&self) {
        if self.auth.assigned_sources().is_some() || self.auth.user_id().is_none() {
            return;
        }
        let Some(portal) = self.portal.clone() else {
            return;
        };
        let auth = self.auth.clone();
        let tx = self.internal_tx.clone();

        debug!("Fetching source assignment from portal");
        tokio::spawn(async move {
            let outcome = portal.fetch_subject(&auth).await;
            let _ = tx.send(Internal::SubjectFetched(outcome));
        });
    }

    /// Installs a new auth state everywhere it is used.
    fn replace_auth(&mut self, auth: AuthState) {
        self.auth = auth;
        if let Some(store) = &self.auth_store {
            if let Err(e) = store.save(&self.auth) {
                warn!(error = %e, "Could not persist auth state");
            }
        }
        self.sink.set_identity(&self.auth);
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_auth_state(self.auth.clone());
        }
    }

    async fn on_login_success(&mut self, json: &str) -> AgentResult<()> {
        let auth = AuthState::from_json(json)?;
        info!(user_id = ?auth.user_id(), project_id = ?auth.project_id(), "Login succeeded");

        self.machine.on_login_succeeded();
        self.replace_auth(auth);
        {
            let mut config = self.config.write();
            config.agent.project_id = self.auth.project_id().map(String::from);
            config.agent.user_id = self.auth.user_id().map(String::from);
        }

        self.configure().await?;
        if let Some(pipeline) = &self.pipeline {
            pipeline.check_connection();
        }
        self.fetch_subject_if_unassigned();
        Ok(())
    }

    async fn handle_internal(&mut self, message: Internal) -> AgentResult<()> {
        match message {
            Internal::RefreshCompleted(Ok(auth)) => {
                if !self.machine.is_refreshing() {
                    debug!("Ignoring stale refresh result");
                    return Ok(());
                }
                self.machine.on_refresh_succeeded();
                self.replace_auth(auth);
                if let Some(pipeline) = &self.pipeline {
                    pipeline.check_connection();
                }
            }
            Internal::RefreshCompleted(Err(e)) => {
                if !self.machine.is_refreshing() {
                    return Ok(());
                }
                warn!(error = %e, "Portal refresh failed");
                let delay = self.machine.on_refresh_failed(&mut rand::thread_rng());
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RetryRefresh);
                });
            }
            Internal::RetryRefresh => {
                if self.machine.on_retry() {
                    debug!("Retrying portal refresh");
                    self.spawn_refresh();
                }
            }
            Internal::SubjectFetched(Ok(auth)) => {
                self.replace_auth(auth);
                self.configure().await?;
            }
            Internal::SubjectFetched(Err(PortalError::Unauthorized)) => {
                warn!("Portal rejected subject request");
                self.on_unauthorized();
            }
            Internal::SubjectFetched(Err(e)) => {
                warn!(error = %e, "Could not fetch source assignment");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Handles one inbound event.
    pub async fn handle_event(&mut self, event: AgentEvent) -> AgentResult<()> {
        match event {
            AgentEvent::PermissionsResult {
                permissions,
                grant_results,
            } => self.on_permissions_result(&permissions, &grant_results),
            AgentEvent::LoginSuccess(json) => self.on_login_success(&json).await?,
            AgentEvent::BluetoothStateChanged(state) => {
                debug!(?state, "Bluetooth state changed");
                self.gate.bluetooth_state_changed();
                if state == BluetoothState::On {
                    self.start_scanning();
                }
            }
            AgentEvent::DeviceConnectFailed { device_name } => {
                warn!(device = %device_name, "Device connection failed");
                self.platform
                    .notify(Notice::DeviceConnectFailed { device_name });
            }
            AgentEvent::ServerStatusChanged(ordinal) => match ServerStatus::from_ordinal(ordinal) {
                Ok(status) => self.set_server_status(status),
                Err(e) => warn!(error = %e, "Ignoring server status"),
            },
            AgentEvent::ConfigurationChanged => {
                info!("Configuration changed");
                self.configure().await?;
            }
            AgentEvent::ServiceConnected(id) => {
                if self.registry.get(&id).is_none() {
                    warn!(provider = %id, "Connected provider is not managed");
                    return Ok(());
                }
                self.start_scanning();
            }
            AgentEvent::ServiceDisconnected(id) => match self.registry.get(&id) {
                Some(entry) => {
                    info!(provider = %id, "Provider service lost, rebinding");
                    self.binder.bind(vec![Arc::clone(&entry.provider)], true);
                }
                None => warn!(provider = %id, "Disconnected provider is not managed"),
            },
            AgentEvent::DeviceStatusUpdated(id, status) => self.on_device_status(id, status),
            AgentEvent::SetAllowedDeviceIds(id, filter) => self.set_allowed_devices(&id, filter),
            AgentEvent::Disconnect(target) => self.disconnect(target.as_ref()),
        }
        Ok(())
    }

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::ServerStatus(status) => self.set_server_status(status),
            PipelineEvent::RecordsSent { topic, count } => {
                debug!(topic = %topic, count, "Records sent");
                self.records_sent.insert(topic.clone(), TimedCount::now(count));
                let _ = self
                    .notifications
                    .send(AgentNotification::RecordsSent { topic, count });
            }
        }
    }

    fn on_device_status(&mut self, id: ProviderId, status: DeviceStatus) {
        if self.registry.get(&id).is_none() {
            warn!(provider = %id, "Status for unknown provider");
            return;
        }
        debug!(provider = %id, %status, "Device status updated");
        let _ = self.notifications.send(AgentNotification::DeviceStatusChanged {
            provider: id.to_string(),
            status,
        });

        if status == DeviceStatus::Disconnected {
            self.start_scanning();
        }
    }

    fn set_allowed_devices(&mut self, id: &ProviderId, filter: DeviceFilter) {
        if !self.registry.set_filter(id, filter) {
            warn!(provider = %id, "Filter for unknown provider");
            return;
        }
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        let Some(connection) = entry.provider.connection() else {
            return;
        };
        let effective = entry.effective_filter();

        // A stopped connection reports DISCONNECTED and is restarted with
        // the new filter by the next scan.
        match connection.device_status() {
            DeviceStatus::Ready | DeviceStatus::Connecting => {
                info!(provider = %id, "Restarting scan with new device filter");
                connection.stop_recording();
            }
            DeviceStatus::Connected => {
                if !connection.is_allowed_device(&effective) {
                    info!(provider = %id, "Device no longer allowed, stopping");
                    connection.stop_recording();
                }
            }
            DeviceStatus::Disconnected => self.start_scanning(),
        }
    }

    fn disconnect(&mut self, target: Option<&ProviderId>) {
        for entry in self.registry.providers() {
            if target.is_some_and(|id| *id != entry.provider.id()) {
                continue;
            }
            if let Some(connection) = entry.provider.connection() {
                if connection.is_recording() {
                    info!(provider = %entry.provider.id(), "Disconnecting");
                    connection.stop_recording();
                }
            }
        }
    }
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
impl AgentService {
    /// Waits for one internal completion and handles it.
    async fn next_internal(&mut self) -> AgentResult<()> {
        let message = match self.inbox.as_mut() {
            Some(inbox) => inbox.internal_rx.recv().await,
            None => None,
        };
        match message {
            Some(message) => self.handle_internal(message).await,
            None => Err(AgentError::Channel("internal channel closed".into())),
        }
    }

    /// Handles every queued inbound event.
    async fn process_events(&mut self) -> AgentResult<()> {
        loop {
            let event = match self.inbox.as_mut() {
                Some(inbox) => inbox.events_rx.try_recv().ok(),
                None => None,
            };
            match event {
                Some(event) => self.handle_event(event).await?,
                None => return Ok(()),
            }
        }
    }

    async fn flush_binds(&mut self) -> AgentResult<()> {
        self.binder.flush().await?;
        self.process_events().await
    }
}
