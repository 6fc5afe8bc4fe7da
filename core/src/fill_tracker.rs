//! Fill Tracker (spec §4.2 note / multi-leg correlation): lets a caller
//! register a correlation id covering N legs of a combined order (e.g. a
//! two-leg option spread) and await all of them filling together, or
//! surface a timeout/rejection if they don't.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::errors::{CoreError, CoreResult};

pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(120);

struct Await {
    remaining: AtomicI64,
    rejected: Mutex<Option<String>>,
    notify: Notify,
}

pub struct FillTracker {
    awaits: Mutex<HashMap<String, Arc<Await>>>,
}

impl FillTracker {
    pub fn new() -> Self {
        Self {
            awaits: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new await for `correlation_id` covering `expected_legs`
    /// fills, with the default auto-expire timeout. Replaces any prior
    /// await under the same id.
    pub fn register(self: &Arc<Self>, correlation_id: impl Into<String>, expected_legs: u32) {
        self.register_with_timeout(correlation_id, expected_legs, DEFAULT_AWAIT_TIMEOUT)
    }

    /// Registers a new await and spawns its own expiry task: if the await
    /// is still unresolved `timeout` after registration, it is failed and
    /// removed from the map whether or not anyone ever calls
    /// [`Self::await_completion`] on it.
    pub fn register_with_timeout(self: &Arc<Self>, correlation_id: impl Into<String>, expected_legs: u32, timeout: Duration) {
        let correlation_id = correlation_id.into();
        let entry = Arc::new(Await {
            remaining: AtomicI64::new(expected_legs as i64),
            rejected: Mutex::new(None),
            notify: Notify::new(),
        });
        self.awaits.lock().insert(correlation_id.clone(), Arc::clone(&entry));

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let still_registered = tracker
                .awaits
                .lock()
                .get(&correlation_id)
                .map(|current| Arc::ptr_eq(current, &entry))
                .unwrap_or(false);
            if !still_registered {
                return;
            }
            let unresolved = entry.rejected.lock().is_none() && entry.remaining.load(Ordering::Acquire) > 0;
            if unresolved {
                *entry.rejected.lock() = Some("fill await expired".into());
                entry.notify.notify_waiters();
                debug!(correlation_id, "fill tracker await expired with no completion");
            }
            tracker.awaits.lock().remove(&correlation_id);
        });
    }

    /// Records one leg's fill. Wakes any waiter once the last leg lands.
    pub fn on_fill(&self, correlation_id: &str) {
        if let Some(entry) = self.awaits.lock().get(correlation_id).cloned() {
            let remaining = entry.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(correlation_id, remaining, "fill tracker recorded a leg fill");
            if remaining <= 0 {
                entry.notify.notify_waiters();
            }
        }
    }

    /// Records a rejection for any leg, failing the whole correlated await.
    pub fn on_reject(&self, correlation_id: &str, reason: impl Into<String>) {
        if let Some(entry) = self.awaits.lock().get(correlation_id).cloned() {
            *entry.rejected.lock() = Some(reason.into());
            entry.notify.notify_waiters();
        }
    }

    /// Waits until every registered leg has filled, a leg is rejected, or
    /// `timeout` elapses. Removes the await entry before returning.
    pub async fn await_completion(&self, correlation_id: &str, timeout: Duration) -> CoreResult<()> {
        let entry = self
            .awaits
            .lock()
            .get(correlation_id)
            .cloned()
            .ok_or_else(|| CoreError::FillTimeout(correlation_id.to_string()))?;

        let result = tokio::time::timeout(timeout, async {
            loop {
                if let Some(reason) = entry.rejected.lock().clone() {
                    return Err(CoreError::FillRejected(correlation_id.to_string(), reason));
                }
                if entry.remaining.load(Ordering::Acquire) <= 0 {
                    return Ok(());
                }
                entry.notify.notified().await;
            }
        })
        .await;

        self.awaits.lock().remove(correlation_id);

        match result {
            Ok(inner) => inner,
            Err(_) => Err(CoreError::FillTimeout(correlation_id.to_string())),
        }
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.awaits.lock().contains_key(correlation_id)
    }
}

impl Default for FillTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_once_every_leg_fills() {
        let tracker = Arc::new(FillTracker::new());
        tracker.register("corr-1", 2);
        tracker.on_fill("corr-1");
        tracker.on_fill("corr-1");
        let result = tracker.await_completion("corr-1", Duration::from_millis(100)).await;
        assert!(result.is_ok());
        assert!(!tracker.is_pending("corr-1"));
    }

    #[tokio::test]
    async fn rejection_fails_the_await_immediately() {
        let tracker = Arc::new(FillTracker::new());
        tracker.register("corr-1", 2);
        tracker.on_fill("corr-1");
        tracker.on_reject("corr-1", "margin shortfall");
        let result = tracker.await_completion("corr-1", Duration::from_millis(100)).await;
        match result {
            Err(CoreError::FillRejected(id, reason)) => {
                assert_eq!(id, "corr-1");
                assert_eq!(reason, "margin shortfall");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn times_out_when_legs_never_complete() {
        let tracker = Arc::new(FillTracker::new());
        tracker.register("corr-1", 2);
        tracker.on_fill("corr-1");
        let result = tracker.await_completion("corr-1", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::FillTimeout(_))));
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_a_timeout() {
        let tracker = Arc::new(FillTracker::new());
        let result = tracker.await_completion("missing", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CoreError::FillTimeout(_))));
    }

    #[tokio::test]
    async fn unresolved_await_self_expires_without_a_waiter() {
        let tracker = Arc::new(FillTracker::new());
        tracker.register_with_timeout("corr-1", 2, Duration::from_millis(20));
        tracker.on_fill("corr-1");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!tracker.is_pending("corr-1"));
    }
}
