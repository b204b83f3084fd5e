//! Circuit breaker: suspend/resume state per resilience identity.
//!
//! A simple two-state breaker, not half-open probing: the first call after
//! the suspend window elapses is a full real call, and only its success
//! resumes the identity. The registry is an explicit injected object so
//! tests can create isolated instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::BanPolicy;
use crate::SearchError;

/// Suspension state for one resilience identity.
#[derive(Debug)]
pub struct SuspendState {
    consecutive_failures: u32,
    suspended_until: Option<Instant>,
    last_reason: String,
}

impl SuspendState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            suspended_until: None,
            last_reason: String::new(),
        }
    }

    /// Whether the suspend window is still open.
    pub fn is_suspended(&self) -> bool {
        self.suspended_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// Opens (or extends) the suspend window.
    pub fn suspend(&mut self, reason: impl Into<String>, duration: Duration) {
        self.consecutive_failures += 1;
        self.suspended_until = Some(Instant::now() + duration);
        self.last_reason = reason.into();
    }

    /// Clears the suspension and resets the failure counter.
    pub fn resume(&mut self) {
        self.consecutive_failures = 0;
        self.suspended_until = None;
        self.last_reason.clear();
    }

    /// Consecutive qualifying failures observed.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Reason recorded with the last suspension.
    pub fn last_reason(&self) -> &str {
        &self.last_reason
    }
}

/// Read-only view of one identity's breaker state, for diagnostics and
/// external health checkers.
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub identity: String,
    pub suspended: bool,
    pub consecutive_failures: u32,
    pub last_reason: String,
}

/// Process-wide map from resilience identity to suspend state.
///
/// Read paths take the outer lock briefly to clone the per-identity handle;
/// mutation locks only that identity's state.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    states: RwLock<HashMap<String, Arc<Mutex<SuspendState>>>>,
    ban: BanPolicy,
}

impl BreakerRegistry {
    /// Creates a registry with default ban timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the given ban timing.
    pub fn with_policy(ban: BanPolicy) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            ban,
        }
    }

    fn state_for(&self, identity: &str) -> Arc<Mutex<SuspendState>> {
        if let Some(state) = self.states.read().expect("breaker lock").get(identity) {
            return Arc::clone(state);
        }
        let mut states = self.states.write().expect("breaker lock");
        Arc::clone(
            states
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SuspendState::new()))),
        )
    }

    /// Whether the identity is currently inside a suspend window.
    pub fn is_suspended(&self, identity: &str) -> bool {
        self.state_for(identity)
            .lock()
            .expect("suspend state lock")
            .is_suspended()
    }

    /// Records a qualifying failure and opens/extends the suspend window.
    ///
    /// The duration is the error kind's fixed duration when it carries one,
    /// otherwise `min(max_ban_time, ban_time * consecutive_failures)`, so
    /// repeated failures extend the window.
    pub fn report_failure(&self, identity: &str, error: &SearchError) -> Duration {
        let state = self.state_for(identity);
        let mut state = state.lock().expect("suspend state lock");

        let duration = match error.fixed_suspend_secs() {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let next_failures = state.consecutive_failures() + 1;
                let secs = (self.ban.ban_time_on_fail * f64::from(next_failures))
                    .min(self.ban.max_ban_time_on_fail);
                Duration::from_secs_f64(secs)
            }
        };

        state.suspend(error.kind(), duration);
        info!(
            identity = %identity,
            reason = error.kind(),
            suspend_secs = duration.as_secs_f64(),
            failures = state.consecutive_failures(),
            "Engine suspended"
        );
        duration
    }

    /// Records a successful call, resuming the identity.
    pub fn report_success(&self, identity: &str) {
        let state = self.state_for(identity);
        let mut state = state.lock().expect("suspend state lock");
        if state.consecutive_failures() > 0 {
            debug!(identity = %identity, "Engine resumed after successful call");
        }
        state.resume();
    }

    /// Reason recorded with the identity's last suspension, if any.
    pub fn last_reason(&self, identity: &str) -> Option<String> {
        let state = self.state_for(identity);
        let state = state.lock().expect("suspend state lock");
        if state.last_reason().is_empty() {
            None
        } else {
            Some(state.last_reason().to_string())
        }
    }

    /// Read-only status of every known identity.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let states = self.states.read().expect("breaker lock");
        let mut out: Vec<BreakerStatus> = states
            .iter()
            .map(|(identity, state)| {
                let state = state.lock().expect("suspend state lock");
                BreakerStatus {
                    identity: identity.clone(),
                    suspended: state.is_suspended(),
                    consecutive_failures: state.consecutive_failures(),
                    last_reason: state.last_reason().to_string(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }
}
