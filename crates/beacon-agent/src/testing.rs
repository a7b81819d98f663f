//! Hand-written doubles for the agent's seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_cache::{
    CacheError, CacheResult, DataHandler, PipelineEventSender, PipelineFactory, PipelineSettings,
};
use beacon_core::{
    AppSource, AuthState, DeviceFilter, DeviceStatus, ObservationKey, Permission, ServerConfig,
    ServerStatus, SourceType, Topic,
};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult, PortalError};
use crate::platform::{Notice, Platform};
use crate::portal::PortalClient;
use crate::provider::{DeviceConnection, DeviceProvider, ProviderId, ProviderLoader};

// =============================================================================
// Platform
// =============================================================================

pub struct MockPlatform {
    denied: Mutex<BTreeSet<Permission>>,
    location_enabled: AtomicBool,
    usage_stats_allowed: AtomicBool,
    bluetooth_enabled: AtomicBool,
    run_at_boot: AtomicBool,
    permission_requests: Mutex<Vec<BTreeSet<Permission>>>,
    bluetooth_requests: AtomicUsize,
    logins: AtomicUsize,
    boot_changes: AtomicUsize,
    notices: Mutex<Vec<Notice>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        MockPlatform {
            denied: Mutex::new(BTreeSet::new()),
            location_enabled: AtomicBool::new(true),
            usage_stats_allowed: AtomicBool::new(true),
            bluetooth_enabled: AtomicBool::new(true),
            run_at_boot: AtomicBool::new(false),
            permission_requests: Mutex::new(Vec::new()),
            bluetooth_requests: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            boot_changes: AtomicUsize::new(0),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn deny(&self, permission: Permission) {
        self.denied.lock().insert(permission);
    }

    pub fn grant(&self, permission: Permission) {
        self.denied.lock().remove(&permission);
    }

    pub fn set_location_enabled(&self, enabled: bool) {
        self.location_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_usage_stats_allowed(&self, allowed: bool) {
        self.usage_stats_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn set_bluetooth_enabled(&self, enabled: bool) {
        self.bluetooth_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn permission_requests(&self) -> Vec<BTreeSet<Permission>> {
        self.permission_requests.lock().clone()
    }

    pub fn bluetooth_requests(&self) -> usize {
        self.bluetooth_requests.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn boot_changes(&self) -> usize {
        self.boot_changes.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Platform for MockPlatform {
    fn is_granted(&self, permission: &Permission) -> bool {
        !self.denied.lock().contains(permission)
    }

    fn location_enabled(&self) -> bool {
        self.location_enabled.load(Ordering::SeqCst)
    }

    fn usage_stats_allowed(&self) -> bool {
        self.usage_stats_allowed.load(Ordering::SeqCst)
    }

    fn bluetooth_enabled(&self) -> bool {
        self.bluetooth_enabled.load(Ordering::SeqCst)
    }

    fn request_permissions(&self, permissions: &BTreeSet<Permission>) {
        self.permission_requests.lock().push(permissions.clone());
    }

    fn request_enable_bluetooth(&self) {
        self.bluetooth_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn start_login(&self) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }

    fn run_at_boot(&self) -> bool {
        self.run_at_boot.load(Ordering::SeqCst)
    }

    fn set_run_at_boot(&self, enabled: bool) {
        self.boot_changes.fetch_add(1, Ordering::SeqCst);
        self.run_at_boot.store(enabled, Ordering::SeqCst);
    }
}

// =============================================================================
// Providers
// =============================================================================

pub struct MockConnection {
    has_service: AtomicBool,
    recording: AtomicBool,
    status: Mutex<DeviceStatus>,
    device_name: Mutex<Option<String>>,
    started_with: Mutex<Vec<DeviceFilter>>,
    stops: AtomicUsize,
    server_statuses: Mutex<Vec<ServerStatus>>,
}

impl Default for MockConnection {
    fn default() -> Self {
        MockConnection {
            has_service: AtomicBool::new(true),
            recording: AtomicBool::new(false),
            status: Mutex::new(DeviceStatus::Disconnected),
            device_name: Mutex::new(None),
            started_with: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            server_statuses: Mutex::new(Vec::new()),
        }
    }
}

impl MockConnection {
    pub fn set_device_name(&self, name: Option<&str>) {
        *self.device_name.lock() = name.map(String::from);
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }

    pub fn set_has_service(&self, has_service: bool) {
        self.has_service.store(has_service, Ordering::SeqCst);
    }

    /// Filters passed to every `start_recording` call.
    pub fn started_with(&self) -> Vec<DeviceFilter> {
        self.started_with.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn server_statuses(&self) -> Vec<ServerStatus> {
        self.server_statuses.lock().clone()
    }
}

impl DeviceConnection for MockConnection {
    fn has_service(&self) -> bool {
        self.has_service.load(Ordering::SeqCst)
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn start_recording(&self, filter: &DeviceFilter) {
        self.recording.store(true, Ordering::SeqCst);
        *self.status.lock() = DeviceStatus::Ready;
        self.started_with.lock().push(filter.clone());
    }

    fn stop_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        *self.status.lock() = DeviceStatus::Disconnected;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn device_status(&self) -> DeviceStatus {
        *self.status.lock()
    }

    fn device_name(&self) -> Option<String> {
        self.device_name.lock().clone()
    }

    fn update_server_status(&self, status: ServerStatus) {
        self.server_statuses.lock().push(status);
    }
}

pub struct MockProvider {
    id: String,
    source_type: SourceType,
    permissions: Vec<Permission>,
    fail_bind: bool,
    bound: AtomicBool,
    binds: AtomicUsize,
    unbinds: AtomicUsize,
    configurations: AtomicUsize,
    connection: Arc<MockConnection>,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        MockProvider {
            id: id.to_string(),
            source_type: SourceType::new("Mock", id, "1"),
            permissions: Vec::new(),
            fail_bind: false,
            bound: AtomicBool::new(false),
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            configurations: AtomicUsize::new(0),
            connection: Arc::new(MockConnection::default()),
        }
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    pub fn mock_connection(&self) -> Arc<MockConnection> {
        Arc::clone(&self.connection)
    }

    pub fn bind_calls(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn unbind_calls(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    pub fn configurations(&self) -> usize {
        self.configurations.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for MockProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(self.id.as_str())
    }

    fn display_name(&self) -> String {
        format!("Mock {}", self.id)
    }

    fn source_type(&self) -> SourceType {
        self.source_type.clone()
    }

    fn needs_permissions(&self) -> Vec<Permission> {
        self.permissions.clone()
    }

    fn bind(&self) -> AgentResult<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        if self.fail_bind {
            return Err(AgentError::Provider {
                provider: self.id.clone(),
                reason: "service unavailable".into(),
            });
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&self) -> AgentResult<()> {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        self.connection.stop_recording();
        self.bound.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    fn connection(&self) -> Option<Arc<dyn DeviceConnection>> {
        if self.is_bound() {
            Some(Arc::clone(&self.connection) as Arc<dyn DeviceConnection>)
        } else {
            None
        }
    }

    fn update_configuration(&self, _config: &AgentConfig) {
        self.configurations.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockLoader {
    providers: Mutex<Vec<Arc<dyn DeviceProvider>>>,
}

impl MockLoader {
    pub fn new(providers: Vec<Arc<dyn DeviceProvider>>) -> Self {
        MockLoader {
            providers: Mutex::new(providers),
        }
    }

    pub fn set(&self, providers: Vec<Arc<dyn DeviceProvider>>) {
        *self.providers.lock() = providers;
    }
}

impl ProviderLoader for MockLoader {
    fn load_providers(&self, _config: &AgentConfig) -> Vec<Arc<dyn DeviceProvider>> {
        self.providers.lock().clone()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Default)]
pub struct MockHandler {
    measurements: Mutex<Vec<(String, ObservationKey, Value)>>,
    settings: Mutex<PipelineSettings>,
    auth: Mutex<Option<AuthState>>,
    status: Mutex<ServerStatus>,
    started: AtomicBool,
    shut_down: AtomicBool,
    checks: AtomicUsize,
    reconfigurations: AtomicUsize,
}

impl MockHandler {
    pub fn with_settings(settings: PipelineSettings, auth: AuthState) -> Self {
        MockHandler {
            settings: Mutex::new(settings),
            auth: Mutex::new(Some(auth)),
            ..Default::default()
        }
    }

    /// `(topic, key, value)` of every measurement added.
    pub fn measurements(&self) -> Vec<(String, ObservationKey, Value)> {
        self.measurements.lock().clone()
    }

    pub fn auth(&self) -> Option<AuthState> {
        self.auth.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn reconfigurations(&self) -> usize {
        self.reconfigurations.load(Ordering::SeqCst)
    }
}

impl DataHandler for MockHandler {
    fn add_measurement(&self, topic: &Topic, key: ObservationKey, value: Value) {
        self.measurements.lock().push((topic.name.clone(), key, value));
    }

    fn set_auth_state(&self, auth: AuthState) {
        *self.auth.lock() = Some(auth);
    }

    fn set_endpoint(&self, endpoint: ServerConfig) {
        self.settings.lock().endpoint = Some(endpoint);
    }

    fn set_schema_registry(&self, registry: ServerConfig) {
        self.settings.lock().schema_registry = Some(registry);
    }

    fn enable_submitter(&self) {
        self.settings.lock().submitter_enabled = true;
    }

    fn disable_submitter(&self) {
        self.settings.lock().submitter_enabled = false;
    }

    fn set_maximum_cache_size(&self, bytes: u64) {
        self.settings.lock().max_cache_bytes = bytes;
    }

    fn set_data_retention(&self, retention: Duration) {
        self.settings.lock().data_retention = retention;
    }

    fn set_upload_rate(&self, rate: Duration) {
        self.settings.lock().upload_rate = rate;
    }

    fn set_records_send_limit(&self, limit: usize) {
        self.settings.lock().records_send_limit = limit;
    }

    fn set_sender_connection_timeout(&self, timeout: Duration) {
        self.settings.lock().connection_timeout = timeout;
    }

    fn set_commit_rate(&self, rate: Duration) {
        self.settings.lock().commit_rate = rate;
    }

    fn set_minimum_battery_level(&self, level: f32) {
        self.settings.lock().minimum_battery_level = level;
    }

    fn set_compression(&self, enabled: bool) {
        self.settings.lock().compression = enabled;
    }

    fn set_send_only_with_wifi(&self, wifi_only: bool) {
        self.settings.lock().send_only_with_wifi = wifi_only;
    }

    fn reconfigure(&self, settings: PipelineSettings) {
        self.settings.lock().apply(settings);
        self.reconfigurations.fetch_add(1, Ordering::SeqCst);
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn check_connection(&self) {
        self.checks.fetch_add(1, Ordering::SeqCst);
    }

    fn server_status(&self) -> ServerStatus {
        *self.status.lock()
    }

    fn records_sent(&self) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }

    fn settings(&self) -> PipelineSettings {
        self.settings.lock().clone()
    }

    fn clean(&self) {}

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockPipelineFactory {
    created: Mutex<Vec<(PipelineSettings, Arc<MockHandler>)>>,
    fail: AtomicBool,
}

impl MockPipelineFactory {
    pub fn failing() -> Self {
        MockPipelineFactory {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Settings passed to the most recent `create`.
    pub fn created_with(&self) -> Option<PipelineSettings> {
        self.created.lock().last().map(|(settings, _)| settings.clone())
    }

    pub fn handler(&self) -> Option<Arc<MockHandler>> {
        self.created.lock().last().map(|(_, handler)| Arc::clone(handler))
    }
}

#[async_trait]
impl PipelineFactory for MockPipelineFactory {
    async fn create(
        &self,
        settings: PipelineSettings,
        auth: AuthState,
        _events: PipelineEventSender,
    ) -> CacheResult<Arc<dyn DataHandler>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionFailed("disk full".into()));
        }
        let handler = Arc::new(MockHandler::with_settings(settings.clone(), auth));
        self.created.lock().push((settings, Arc::clone(&handler)));
        Ok(handler)
    }
}

// =============================================================================
// Portal
// =============================================================================

#[derive(Default)]
pub struct MockPortal {
    refreshes: Mutex<VecDeque<Result<AuthState, PortalError>>>,
    subjects: Mutex<VecDeque<Result<AuthState, PortalError>>>,
    refresh_calls: AtomicUsize,
    subject_calls: AtomicUsize,
}

impl MockPortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_refresh(&self, outcome: Result<AuthState, PortalError>) {
        self.refreshes.lock().push_back(outcome);
    }

    pub fn push_subject(&self, outcome: Result<AuthState, PortalError>) {
        self.subjects.lock().push_back(outcome);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn subject_calls(&self) -> usize {
        self.subject_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalClient for MockPortal {
    async fn refresh(&self, _auth: &AuthState) -> Result<AuthState, PortalError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refreshes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(PortalError::Network("no scripted response".into())))
    }

    async fn fetch_subject(&self, _auth: &AuthState) -> Result<AuthState, PortalError> {
        self.subject_calls.fetch_add(1, Ordering::SeqCst);
        self.subjects
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(PortalError::Network("no scripted response".into())))
    }

    async fn register_source(
        &self,
        _auth: &AuthState,
        source: &AppSource,
    ) -> Result<AppSource, PortalError> {
        Ok(source.clone().with_source_id("registered-1"))
    }
}
