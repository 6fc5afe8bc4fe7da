//! Kill switch: the highest-priority override in the system. Once active,
//! the Router refuses every new order below [`Priority::KillSwitch`] (spec
//! §4.1/§4.3), and the Gateway's `kill_switch` call cancels every open
//! order and flattens every position at the broker.
//!
//! Wired to SIGTERM/SIGUSR1/SIGUSR2 the same way the rest of this codebase
//! handles operator signals: a registered flag plus a parked watcher
//! thread, so activation never races a signal handler against application
//! code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::gateway::BrokerageGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchState {
    Inactive,
    Active,
}

pub struct KillSwitch {
    active: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
    triggered_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    gateway: Arc<BrokerageGateway>,
}

impl KillSwitch {
    pub fn new(gateway: Arc<BrokerageGateway>) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
            triggered_at: Arc::new(Mutex::new(None)),
            gateway,
        }
    }

    pub fn state(&self) -> KillSwitchState {
        if self.active.load(Ordering::Acquire) {
            KillSwitchState::Active
        } else {
            KillSwitchState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Trips the kill switch: flags the Router gate immediately, then asks
    /// the broker to cancel every open order and flatten every position.
    /// The flag flips before the broker call so new admissions are refused
    /// even if the broker call itself is slow or fails.
    pub fn activate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "kill switch activated");
        self.active.store(true, Ordering::Release);
        *self.reason.lock() = Some(reason);
        *self.triggered_at.lock() = Some(Utc::now());

        if let Err(e) = self.gateway.kill_switch() {
            error!(error = %e, "broker kill switch call failed; local admission gate remains closed");
        }
    }

    /// Clears the kill switch, resuming normal admission. Requires an
    /// explicit operator action; never cleared automatically.
    pub fn deactivate(&self) {
        info!("kill switch deactivated");
        self.active.store(false, Ordering::Release);
        *self.reason.lock() = None;
        *self.triggered_at.lock() = None;
    }

    /// Installs OS signal handlers: SIGTERM and SIGUSR1 trip the switch,
    /// SIGUSR2 clears it. Returns immediately; the watcher runs on its own
    /// thread for the life of the process.
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<(), signal_hook::Error> {
        let term = Arc::new(AtomicBool::new(false));
        let usr1 = Arc::new(AtomicBool::new(false));
        let usr2 = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
        signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&usr1))?;
        signal_hook::flag::register(signal_hook::consts::SIGUSR2, Arc::clone(&usr2))?;

        let this = Arc::clone(self);
        std::thread::spawn(move || loop {
            if term.swap(false, Ordering::AcqRel) {
                this.activate("SIGTERM received");
            }
            if usr1.swap(false, Ordering::AcqRel) {
                this.activate("SIGUSR1 received");
            }
            if usr2.swap(false, Ordering::AcqRel) {
                this.deactivate();
            }
            std::thread::park_timeout(Duration::from_millis(200));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{simulated::SimulatedBroker, simulated::SimulatedBrokerConfig, ExecutionMode};

    fn gateway() -> Arc<BrokerageGateway> {
        Arc::new(BrokerageGateway::new(
            ExecutionMode::Simulated,
            Arc::new(SimulatedBroker::new(SimulatedBrokerConfig::default())),
        ))
    }

    #[test]
    fn starts_inactive() {
        let ks = KillSwitch::new(gateway());
        assert_eq!(ks.state(), KillSwitchState::Inactive);
    }

    #[test]
    fn activation_records_reason_and_time() {
        let ks = KillSwitch::new(gateway());
        ks.activate("manual stop");
        assert!(ks.is_active());
        assert_eq!(ks.reason().as_deref(), Some("manual stop"));
    }

    #[test]
    fn deactivation_clears_state() {
        let ks = KillSwitch::new(gateway());
        ks.activate("test");
        ks.deactivate();
        assert!(!ks.is_active());
        assert!(ks.reason().is_none());
    }
}
