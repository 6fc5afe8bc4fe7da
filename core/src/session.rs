//! Session Coordinator (spec §4.9): owns the broker access token's
//! lifecycle. Re-authentication is single-flight — concurrent callers
//! observing `SessionExpired` all wait on the same in-flight attempt rather
//! than each kicking off their own login — and startup retries back off
//! exponentially, doubling from 60s up to a 300s cap over 10 attempts.
//! Tokens are also proactively rotated at the broker's fixed 06:00 local
//! session-expiry boundary rather than waiting for a call to fail first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::clock::Calendar;
use crate::errors::{CoreError, CoreResult};
use crate::gateway::live::LiveBroker;

pub const STARTUP_INITIAL_DELAY: Duration = Duration::from_secs(60);
pub const STARTUP_MAX_DELAY: Duration = Duration::from_secs(300);
pub const STARTUP_MAX_ATTEMPTS: usize = 10;

/// Performs the actual broker login exchange (e.g. request-token ->
/// access-token). Kept as a trait so the coordinator itself never sees
/// broker-specific login vocabulary, and so tests can substitute a fake.
pub trait SessionAuthenticator: Send + Sync {
    fn authenticate(&self) -> CoreResult<String>;
}

/// Backs off 60s, 120s, 240s, capping at 300s, for up to `max_attempts`
/// tries. Mirrors the shape of a standard doubling backoff but with this
/// session's specific start/cap values (spec §4.9).
pub struct StartupBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
    attempt: usize,
    current_delay: Duration,
}

impl StartupBackoff {
    pub fn new() -> Self {
        Self::with_bounds(STARTUP_INITIAL_DELAY, STARTUP_MAX_DELAY, STARTUP_MAX_ATTEMPTS)
    }

    pub fn with_bounds(initial_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            attempt: 0,
            current_delay: initial_delay,
        }
    }

    pub fn attempt_number(&self) -> usize {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = std::cmp::min(self.current_delay * 2, self.max_delay);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay;
    }
}

impl Default for StartupBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns re-authentication against a [`LiveBroker`]. Not used in simulated
/// mode, since the simulated broker never expires a session.
pub struct SessionCoordinator {
    broker: Arc<LiveBroker>,
    authenticator: Arc<dyn SessionAuthenticator>,
    calendar: Calendar,
    // Guards the single-flight property: only one thread may be mid-login
    // at a time, everyone else blocks on this mutex rather than racing the
    // broker's login endpoint.
    reauth_lock: Mutex<()>,
    // Bumped after every completed login attempt (success or failure) so a
    // waiter can tell whether the attempt it was blocked on already ran.
    generation: AtomicU64,
    last_result: Mutex<Option<CoreResult<()>>>,
}

impl SessionCoordinator {
    pub fn new(broker: Arc<LiveBroker>, authenticator: Arc<dyn SessionAuthenticator>, calendar: Calendar) -> Self {
        Self {
            broker,
            authenticator,
            calendar,
            reauth_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_result: Mutex::new(None),
        }
    }

    /// Runs the login exchange and installs the resulting token. Safe to
    /// call from multiple threads concurrently: only the first caller to
    /// reach the lock actually hits the authenticator. A caller that was
    /// still waiting on the lock while another login completed reuses that
    /// just-finished result instead of performing a second login exchange.
    pub fn reauthenticate(&self) -> CoreResult<()> {
        let observed_generation = self.generation.load(Ordering::Acquire);
        let _guard = self.reauth_lock.lock();

        if self.generation.load(Ordering::Acquire) != observed_generation {
            info!("session coordinator reusing a concurrently completed re-authentication");
            return self
                .last_result
                .lock()
                .clone()
                .expect("generation advanced implies a stored result");
        }

        info!("session coordinator starting re-authentication");
        let result = self.authenticator.authenticate().map(|token| {
            self.broker.set_access_token(token);
            info!("session coordinator installed a new access token");
        });
        *self.last_result.lock() = Some(result.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Retries `reauthenticate` with the startup backoff schedule until it
    /// succeeds or the attempt budget is exhausted.
    pub fn authenticate_with_retry(&self) -> CoreResult<()> {
        let mut backoff = StartupBackoff::new();
        loop {
            match self.reauthenticate() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, attempt = backoff.attempt_number(), "session authentication attempt failed");
                    match backoff.next_delay() {
                        Some(delay) => std::thread::sleep(delay),
                        None => {
                            error!("session authentication exhausted its retry budget");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// True once `now` has crossed the broker's daily session-expiry
    /// boundary since `token_issued_at`.
    pub fn token_needs_rotation(&self, token_issued_at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.calendar.next_session_expiry(token_issued_at) <= now
    }

    /// Runs until `shutdown` resolves, proactively rotating the token
    /// whenever the 06:00 boundary is crossed.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut token_issued_at = chrono::Utc::now();
        loop {
            let next_expiry = self.calendar.next_session_expiry(token_issued_at);
            let sleep_for = (next_expiry - chrono::Utc::now()).to_std().unwrap_or(Duration::from_secs(1));
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    info!("session boundary crossed, rotating access token");
                    if let Err(e) = self.reauthenticate() {
                        error!(error = %e, "scheduled session rotation failed");
                    }
                    token_issued_at = chrono::Utc::now();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session coordinator shutting down");
                        return;
                    }
                }
            }
        }
    }
}
