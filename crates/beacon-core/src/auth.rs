//! # Authentication State
//!
//! Immutable snapshot of the identity, token and source assignment of the
//! current session.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       AuthState Lifecycle                               │
//! │                                                                         │
//! │   persisted JSON ──┐                                                    │
//! │                    ├──► AuthState::from_json ──┐                        │
//! │   login event ─────┘                           │                        │
//! │                                                ▼                        │
//! │                                     ┌─────────────────────┐             │
//! │                                     │     AuthState       │             │
//! │                                     │  (never mutated     │             │
//! │                                     │   except invalidate)│             │
//! │                                     └──────────┬──────────┘             │
//! │                                                │                        │
//! │        UNAUTHORIZED ──► invalidate() (flag flip, at most once)          │
//! │                                                │                        │
//! │        refresh / login ──► to_builder()...build() ──► new AuthState     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validity is never stored: [`AuthState::is_valid_at`] derives it from token
//! presence and expiry each time it is asked.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::source::AppSource;

// =============================================================================
// Property Keys
// =============================================================================

/// Property holding the list of sources assigned by the portal.
pub const SOURCES_PROPERTY: &str = "sources";

/// Property holding the portal refresh token.
pub const REFRESH_TOKEN_PROPERTY: &str = "refresh_token";

/// Property holding the subject's human-readable identifier.
pub const HUMAN_READABLE_USER_ID_PROPERTY: &str = "human_readable_user_id";

// =============================================================================
// AuthState
// =============================================================================

/// Authentication snapshot for the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// Project the subject belongs to.
    #[serde(default)]
    project_id: Option<String>,

    /// Subject identifier at the portal.
    #[serde(default)]
    user_id: Option<String>,

    /// Bearer token for the ingestion backend.
    #[serde(default)]
    token: Option<String>,

    /// When `token` stops being accepted.
    #[serde(default)]
    expiration: Option<DateTime<Utc>>,

    /// Named properties (sources, refresh token, ...).
    #[serde(default)]
    properties: BTreeMap<String, Value>,

    /// When this snapshot was built.
    last_update: DateTime<Utc>,

    /// Set once the backend has rejected `token`.
    #[serde(default)]
    invalidated: bool,
}

impl AuthState {
    /// Starts a fresh builder.
    pub fn builder() -> AuthStateBuilder {
        AuthStateBuilder::default()
    }

    /// Starts a builder pre-filled with this state's fields.
    ///
    /// The resulting state is not invalidated and gets a new `last_update`.
    pub fn to_builder(&self) -> AuthStateBuilder {
        AuthStateBuilder {
            project_id: self.project_id.clone(),
            user_id: self.user_id.clone(),
            token: self.token.clone(),
            expiration: self.expiration,
            properties: self.properties.clone(),
            last_update: None,
        }
    }

    /// An empty, invalid state for a device that never logged in.
    ///
    /// Its `last_update` is the Unix epoch, so it never counts as recent.
    pub fn unauthenticated() -> Self {
        AuthStateBuilder::default()
            .last_update(DateTime::<Utc>::default())
            .build()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Returns a named property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Whether the token is present and has not expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiration) {
            (Some(token), Some(expiration)) => !token.is_empty() && expiration > now,
            _ => false,
        }
    }

    /// Whether the token is present and has not expired.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Marks the token as rejected.
    ///
    /// Returns `true` if this call flipped the flag, `false` if the state was
    /// already invalidated.
    pub fn invalidate(&mut self) -> bool {
        !std::mem::replace(&mut self.invalidated, true)
    }

    /// Time elapsed between `last_update` and `now`.
    pub fn time_since_last_update(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_update)
    }

    /// The portal refresh token, if one was issued.
    pub fn refresh_token(&self) -> Option<&str> {
        self.properties
            .get(REFRESH_TOKEN_PROPERTY)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// The subject's human-readable identifier, falling back to `user_id`.
    pub fn human_readable_user_id(&self) -> Option<&str> {
        self.properties
            .get(HUMAN_READABLE_USER_ID_PROPERTY)
            .and_then(Value::as_str)
            .or(self.user_id.as_deref())
    }

    /// Sources assigned by the portal.
    ///
    /// Returns `None` when the state carries no source assignment at all,
    /// which is different from an empty assignment. Entries that do not
    /// decode as a source are skipped.
    pub fn assigned_sources(&self) -> Option<Vec<AppSource>> {
        let value = self.properties.get(SOURCES_PROPERTY)?;
        let entries = value.as_array().map(Vec::as_slice).unwrap_or_default();
        Some(
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect(),
        )
    }

    /// `Authorization` header value for the bearer token.
    pub fn authorization_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    /// Serializes the state for persistence or event payloads.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a state produced by [`AuthState::to_json`].
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::MalformedAuthState(e.to_string()))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AuthState`].
#[derive(Debug, Clone, Default)]
pub struct AuthStateBuilder {
    project_id: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
    properties: BTreeMap<String, Value>,
    last_update: Option<DateTime<Utc>>,
}

impl AuthStateBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Sets an arbitrary property.
    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Removes a property.
    pub fn remove_property(mut self, key: &str) -> Self {
        self.properties.remove(key);
        self
    }

    pub fn refresh_token(self, token: impl Into<String>) -> Self {
        self.property(REFRESH_TOKEN_PROPERTY, Value::String(token.into()))
    }

    pub fn human_readable_user_id(self, id: impl Into<String>) -> Self {
        self.property(HUMAN_READABLE_USER_ID_PROPERTY, Value::String(id.into()))
    }

    /// Stores the assigned source list.
    pub fn sources(self, sources: &[AppSource]) -> Self {
        let value = serde_json::to_value(sources).unwrap_or(Value::Array(Vec::new()));
        self.property(SOURCES_PROPERTY, value)
    }

    /// Overrides the `last_update` timestamp (defaults to now).
    pub fn last_update(mut self, at: DateTime<Utc>) -> Self {
        self.last_update = Some(at);
        self
    }

    pub fn build(self) -> AuthState {
        AuthState {
            project_id: self.project_id,
            user_id: self.user_id,
            token: self.token,
            expiration: self.expiration,
            properties: self.properties,
            last_update: self.last_update.unwrap_or_else(Utc::now),
            invalidated: false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceType;

    fn valid_state() -> AuthState {
        AuthState::builder()
            .project_id("radar")
            .user_id("sub-1")
            .token("t0k3n")
            .expiration(Utc::now() + Duration::hours(1))
            .refresh_token("r3fr3sh")
            .build()
    }

    #[test]
    fn test_validity_depends_on_token_and_expiry() {
        let now = Utc::now();
        let state = valid_state();
        assert!(state.is_valid_at(now));
        assert!(!state.is_valid_at(now + Duration::hours(2)));

        let no_token = AuthState::builder()
            .expiration(now + Duration::hours(1))
            .build();
        assert!(!no_token.is_valid_at(now));
    }

    #[test]
    fn test_invalidate_flips_once() {
        let mut state = valid_state();
        assert!(state.invalidate());
        assert!(!state.invalidate());
        assert!(state.is_invalidated());
    }

    #[test]
    fn test_rebuild_clears_invalidation() {
        let mut state = valid_state();
        state.invalidate();

        let rebuilt = state.to_builder().token("new").build();
        assert!(!rebuilt.is_invalidated());
        assert_eq!(rebuilt.token(), Some("new"));
        assert_eq!(rebuilt.refresh_token(), Some("r3fr3sh"));
    }

    #[test]
    fn test_assigned_sources_absent_vs_empty() {
        assert!(valid_state().assigned_sources().is_none());

        let empty = valid_state().to_builder().sources(&[]).build();
        assert_eq!(empty.assigned_sources(), Some(Vec::new()));
    }

    #[test]
    fn test_assigned_sources_round_trip() {
        let source = AppSource::new(SourceType::new("Empatica", "E4", "v1"))
            .with_expected_source_name("AA:BB");
        let state = valid_state().to_builder().sources(&[source.clone()]).build();

        assert_eq!(state.assigned_sources(), Some(vec![source]));
    }

    #[test]
    fn test_json_round_trip_preserves_fields() {
        let state = valid_state();
        let decoded = AuthState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            AuthState::from_json("{not json"),
            Err(CoreError::MalformedAuthState(_))
        ));
    }

    #[test]
    fn test_time_since_last_update() {
        let at = Utc::now() - Duration::seconds(10);
        let state = AuthState::builder().last_update(at).build();
        assert!(state.time_since_last_update(Utc::now()) >= Duration::seconds(10));
    }

    #[test]
    fn test_human_readable_falls_back_to_user_id() {
        let state = valid_state();
        assert_eq!(state.human_readable_user_id(), Some("sub-1"));

        let named = state.to_builder().human_readable_user_id("P-0042").build();
        assert_eq!(named.human_readable_user_id(), Some("P-0042"));
    }
}
