//! # Authentication Refresh State Machine
//!
//! Decides what to do when the backend rejects the current token.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Auth Refresh State Machine                           │
//! │                                                                         │
//! │                 UNAUTHORIZED                                            │
//! │   ┌───────┐  (nothing in flight)  ┌─────────────────────────────┐      │
//! │   │ Valid │──────────────────────►│ InvalidatedPendingRefresh   │      │
//! │   └───────┘                       └──────┬───────────────┬──────┘      │
//! │      ▲  ▲          refresh token + portal│               │ otherwise,  │
//! │      │  │                                ▼               │ > 3s since  │
//! │      │  │  success        ┌─────────────────────┐        │ last update │
//! │      │  └─────────────────│ RefreshingViaPortal │        ▼             │
//! │      │                    └──┬──────────────────┘ ┌──────────────────┐ │
//! │      │              failure  │        ▲           │RefreshingViaLogin│ │
//! │      │                       ▼        │ delay     └────────┬─────────┘ │
//! │      │           ┌──────────────────────┐                  │           │
//! │      │           │ RefreshFailedBackoff │                  │           │
//! │      │           └──────────────────────┘                  │           │
//! │      └──────────────────── login success ──────────────────┘           │
//! │                                                                         │
//! │  No terminal state. Retries are unbounded.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A portal refresh holds a compare-and-set guard from the request until it
//! succeeds; every UNAUTHORIZED arriving meanwhile is dropped. Interactive
//! login has its own guards: the login phase itself and the minimum age of
//! the current auth state.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use beacon_core::AuthState;

/// An auth state updated less than this many milliseconds ago does not
/// trigger login.
pub const LOGIN_GUARD_MS: i64 = 3_000;

/// Lower bound (inclusive) of the refresh retry delay.
pub const MIN_RETRY_DELAY_MS: u64 = 1_000;

/// Upper bound (exclusive) of the refresh retry delay.
pub const MAX_RETRY_DELAY_MS: u64 = 120_000;

/// Where the machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Valid,
    InvalidatedPendingRefresh,
    RefreshingViaPortal,
    RefreshingViaLogin,
    RefreshFailedBackoff,
}

/// What the caller must do after an UNAUTHORIZED status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedAction {
    /// Nothing; another recovery is already under way or too soon.
    Dropped,
    /// Send a refresh request to the portal.
    RequestPortalRefresh,
    /// Launch the interactive login.
    StartLogin,
}

/// Samples a refresh retry delay uniformly from `[1 s, 120 s)`.
pub fn refresh_retry_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.gen_range(MIN_RETRY_DELAY_MS..MAX_RETRY_DELAY_MS))
}

/// The refresh state machine.
#[derive(Debug, Default)]
pub struct AuthMachine {
    phase: AuthPhase,
    in_flight: AtomicBool,
}

impl AuthMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    /// Whether a portal refresh (or its retry) is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Handles an UNAUTHORIZED status.
    ///
    /// Invalidates `auth` in place unless the status is dropped because a
    /// portal refresh is already outstanding.
    pub fn on_unauthorized(
        &mut self,
        auth: &mut AuthState,
        portal_configured: bool,
        now: DateTime<Utc>,
    ) -> UnauthorizedAction {
        if self.is_refreshing() {
            debug!("Refresh already in flight, dropping UNAUTHORIZED");
            return UnauthorizedAction::Dropped;
        }

        let login_pending = self.phase == AuthPhase::RefreshingViaLogin;
        if auth.invalidate() {
            info!(user_id = ?auth.user_id(), "Auth state invalidated");
        }
        self.phase = AuthPhase::InvalidatedPendingRefresh;

        if auth.refresh_token().is_some() && portal_configured {
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return UnauthorizedAction::Dropped;
            }
            self.phase = AuthPhase::RefreshingViaPortal;
            return UnauthorizedAction::RequestPortalRefresh;
        }

        if login_pending {
            self.phase = AuthPhase::RefreshingViaLogin;
            debug!("Login already pending, dropping UNAUTHORIZED");
            return UnauthorizedAction::Dropped;
        }

        let age = auth.time_since_last_update(now);
        if age < chrono::Duration::milliseconds(LOGIN_GUARD_MS) {
            debug!(age_ms = age.num_milliseconds(), "Auth state too recent for login");
            return UnauthorizedAction::Dropped;
        }

        self.phase = AuthPhase::RefreshingViaLogin;
        UnauthorizedAction::StartLogin
    }

    /// The portal returned a new auth state.
    pub fn on_refresh_succeeded(&mut self) {
        self.phase = AuthPhase::Valid;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// The portal request failed; returns how long to wait before retrying.
    ///
    /// The guard stays held so no second request starts during the wait.
    pub fn on_refresh_failed<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.phase = AuthPhase::RefreshFailedBackoff;
        let delay = refresh_retry_delay(rng);
        warn!(delay_ms = delay.as_millis() as u64, "Token refresh failed, retrying later");
        delay
    }

    /// The retry delay elapsed. Returns whether a retry should be sent.
    pub fn on_retry(&mut self) -> bool {
        if self.phase != AuthPhase::RefreshFailedBackoff {
            return false;
        }
        self.phase = AuthPhase::RefreshingViaPortal;
        true
    }

    /// An interactive login completed.
    pub fn on_login_succeeded(&mut self) {
        self.phase = AuthPhase::Valid;
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn stale(refresh_token: Option<&str>) -> AuthState {
        let mut builder = AuthState::builder()
            .user_id("sub-1")
            .token("t")
            .last_update(Utc::now() - ChronoDuration::seconds(60));
        if let Some(token) = refresh_token {
            builder = builder.refresh_token(token);
        }
        builder.build()
    }

    #[test]
    fn test_portal_refresh_when_token_and_portal() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(Some("r"));

        let action = machine.on_unauthorized(&mut auth, true, Utc::now());
        assert_eq!(action, UnauthorizedAction::RequestPortalRefresh);
        assert_eq!(machine.phase(), AuthPhase::RefreshingViaPortal);
        assert!(auth.is_invalidated());
    }

    #[test]
    fn test_concurrent_unauthorized_dropped_while_in_flight() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(Some("r"));

        assert_eq!(
            machine.on_unauthorized(&mut auth, true, Utc::now()),
            UnauthorizedAction::RequestPortalRefresh
        );
        for _ in 0..5 {
            assert_eq!(
                machine.on_unauthorized(&mut auth, true, Utc::now()),
                UnauthorizedAction::Dropped
            );
        }

        machine.on_refresh_succeeded();
        assert!(!machine.is_refreshing());
        assert_eq!(machine.phase(), AuthPhase::Valid);
    }

    #[test]
    fn test_guard_held_through_backoff() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(Some("r"));
        let mut rng = StdRng::seed_from_u64(7);

        machine.on_unauthorized(&mut auth, true, Utc::now());
        machine.on_refresh_failed(&mut rng);
        assert_eq!(machine.phase(), AuthPhase::RefreshFailedBackoff);
        assert_eq!(
            machine.on_unauthorized(&mut auth, true, Utc::now()),
            UnauthorizedAction::Dropped
        );

        assert!(machine.on_retry());
        assert_eq!(machine.phase(), AuthPhase::RefreshingViaPortal);
        assert!(!machine.on_retry());
    }

    #[test]
    fn test_login_without_portal() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(Some("r"));

        assert_eq!(
            machine.on_unauthorized(&mut auth, false, Utc::now()),
            UnauthorizedAction::StartLogin
        );
        assert_eq!(machine.phase(), AuthPhase::RefreshingViaLogin);
    }

    #[test]
    fn test_login_not_relaunched_while_pending() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(None);
        let now = Utc::now();

        assert_eq!(
            machine.on_unauthorized(&mut auth, false, now),
            UnauthorizedAction::StartLogin
        );
        assert_eq!(
            machine.on_unauthorized(&mut auth, false, now + ChronoDuration::seconds(2)),
            UnauthorizedAction::Dropped
        );
        assert_eq!(machine.phase(), AuthPhase::RefreshingViaLogin);
    }

    #[test]
    fn test_no_login_within_guard_of_last_update() {
        let mut machine = AuthMachine::new();
        let now = Utc::now();
        let mut fresh = AuthState::builder()
            .user_id("sub-1")
            .last_update(now - ChronoDuration::milliseconds(2_999))
            .build();

        assert_eq!(
            machine.on_unauthorized(&mut fresh, false, now),
            UnauthorizedAction::Dropped
        );

        let mut old_enough = fresh
            .to_builder()
            .last_update(now - ChronoDuration::milliseconds(3_000))
            .build();
        assert_eq!(
            machine.on_unauthorized(&mut old_enough, false, now),
            UnauthorizedAction::StartLogin
        );
    }

    #[test]
    fn test_login_success_returns_to_valid() {
        let mut machine = AuthMachine::new();
        let mut auth = stale(None);
        machine.on_unauthorized(&mut auth, false, Utc::now());

        machine.on_login_succeeded();
        assert_eq!(machine.phase(), AuthPhase::Valid);
    }

    #[test]
    fn test_retry_delay_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let delay = refresh_retry_delay(&mut rng);
            assert!(delay >= Duration::from_millis(MIN_RETRY_DELAY_MS));
            assert!(delay < Duration::from_millis(MAX_RETRY_DELAY_MS));
        }
    }
}
