//! Supervisor: wires every component into one running process and owns
//! graceful shutdown (spec §5, §9). Binaries call [`Supervisor::bootstrap`]
//! with a loaded [`Config`] and then [`Supervisor::run`] with a shutdown
//! signal; everything else (gateway mode selection, background workers,
//! recorder autostart) follows from the config alone.

use std::sync::Arc;

use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use tracing::{info, warn};

use crate::clock::Calendar;
use crate::condition::ConditionEngine;
use crate::config::Config;
use crate::errors::{CoreError, CoreResult};
use crate::fill_tracker::FillTracker;
use crate::gateway::live::{LiveBroker, LiveBrokerConfig};
use crate::gateway::simulated::{SimulatedBroker, SimulatedBrokerConfig};
use crate::gateway::{BrokerageGateway, ExecutionMode};
use crate::idempotency::IdempotencyStore;
use crate::kill_switch::KillSwitch;
use crate::margin::{MarginEstimator, MarginService};
use crate::order_store::OrderStore;
use crate::queue::OrderQueue;
use crate::recorder::{Recorder, RecorderConfig as TickRecorderConfig};
use crate::router::{AllowAll, OrderRouter, RiskGate};
use crate::session::{SessionAuthenticator, SessionCoordinator};
use crate::subscription::SubscriptionManager;
use crate::timeout_monitor::TimeoutMonitor;
use crate::update_handler::UpdateHandler;

/// Calls a login sidecar's HTTP endpoint and expects back a JSON body of
/// the form `{"access_token": "..."}`. The actual broker login handshake
/// (2FA, TOTP, redirect-based OAuth) is the sidecar's concern; this core
/// only ever sees the resulting token (spec §4.9: "invoke the sidecar
/// login").
pub struct SidecarLoginAuthenticator {
    client: HttpClient,
    login_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SidecarLoginResponse {
    access_token: String,
}

impl SidecarLoginAuthenticator {
    pub fn new(login_url: String, api_key: String) -> Self {
        Self { client: HttpClient::new(), login_url, api_key }
    }
}

impl SessionAuthenticator for SidecarLoginAuthenticator {
    fn authenticate(&self) -> CoreResult<String> {
        let response = self
            .client
            .post(&self.login_url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .map_err(|e| CoreError::BrokerUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::BrokerRejected(format!("sidecar login returned {}", response.status())));
        }

        let body: SidecarLoginResponse = response
            .json()
            .map_err(|e| CoreError::BrokerUnavailable(format!("malformed sidecar login response: {e}")))?;
        Ok(body.access_token)
    }
}

/// Every long-lived component the core needs, wired together from a
/// loaded [`Config`]. Cheap to clone (everything inside is an `Arc`).
pub struct Supervisor {
    pub config: Config,
    pub calendar: Calendar,
    pub gateway: Arc<BrokerageGateway>,
    pub idempotency: Arc<IdempotencyStore>,
    pub kill_switch: Arc<KillSwitch>,
    pub queue: Arc<OrderQueue>,
    pub router: Arc<OrderRouter>,
    pub update_handler: Arc<UpdateHandler>,
    pub timeout_monitor: Arc<TimeoutMonitor>,
    pub fill_tracker: Arc<FillTracker>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub condition_engine: Arc<ConditionEngine>,
    pub margin_service: Arc<MarginService>,
    pub margin_estimator: Arc<MarginEstimator>,
    pub session: Option<Arc<SessionCoordinator>>,
    pub recorder: Option<Arc<Recorder>>,
    pub order_store: Arc<OrderStore>,
    /// Set only in live mode. Kept alongside `gateway` (which only exposes
    /// the adapter-erased `BrokerAdapter` surface) so `run()` can subscribe
    /// to the broker's postback stream directly.
    live_broker: Option<Arc<LiveBroker>>,
}

impl Supervisor {
    /// Builds every component from `config`. Uses [`AllowAll`] as the risk
    /// gate; callers that need real pre-trade risk checks should construct
    /// an [`OrderRouter`] themselves with their own [`RiskGate`] instead of
    /// going through this convenience path.
    pub fn bootstrap(config: Config) -> CoreResult<Self> {
        Self::bootstrap_with_risk_gate(config, Arc::new(AllowAll))
    }

    pub fn bootstrap_with_risk_gate(config: Config, risk_gate: Arc<dyn RiskGate>) -> CoreResult<Self> {
        let calendar = calendar_from_config(&config)?;

        let (gateway, session, live_broker) = match config.trading.mode.as_str() {
            "live" => {
                let base_url = config.trading.broker_base_url.clone().ok_or_else(|| CoreError::ValidationFailure {
                    field: "trading.brokerBaseUrl".into(),
                    reason: "required in live mode".into(),
                })?;
                let api_key = config.trading.broker_api_key.clone().unwrap_or_default();
                let broker = Arc::new(LiveBroker::new(LiveBrokerConfig { base_url: base_url.clone(), api_key: api_key.clone() }));
                let gateway = Arc::new(BrokerageGateway::new(ExecutionMode::Live, Arc::clone(&broker)));

                let authenticator: Arc<dyn SessionAuthenticator> =
                    Arc::new(SidecarLoginAuthenticator::new(format!("{base_url}/session/login"), api_key));
                let coordinator = Arc::new(SessionCoordinator::new(Arc::clone(&broker), authenticator, calendar.clone()));
                (gateway, Some(coordinator), Some(broker))
            }
            "simulated" => {
                let broker = Arc::new(SimulatedBroker::new(SimulatedBrokerConfig {
                    available_capital: config.simulator.available_capital,
                    slippage_bps: rust_decimal::Decimal::from(config.simulator.slippage_bps),
                }));
                let gateway = Arc::new(BrokerageGateway::new(ExecutionMode::Simulated, broker));
                (gateway, None, None)
            }
            other => {
                return Err(CoreError::ValidationFailure {
                    field: "trading.mode".into(),
                    reason: format!("unknown trading mode '{other}'"),
                })
            }
        };

        let idempotency = Arc::new(IdempotencyStore::new(config.idempotency.window()));
        let kill_switch = Arc::new(KillSwitch::new(Arc::clone(&gateway)));
        let queue = Arc::new(OrderQueue::new());
        let router = Arc::new(OrderRouter::new(
            Arc::clone(&queue),
            Arc::clone(&idempotency),
            Arc::clone(&kill_switch),
            risk_gate,
        ));
        let update_handler = Arc::new(UpdateHandler::new());
        let timeout_monitor = Arc::new(TimeoutMonitor::new(calendar.clone()));
        let fill_tracker = Arc::new(FillTracker::new());
        let subscriptions = Arc::new(SubscriptionManager::new(config.subscription.max_instruments));
        let condition_engine = Arc::new(ConditionEngine::new());
        let margin_service = Arc::new(MarginService::new(Arc::clone(&gateway)));
        let margin_estimator = Arc::new(MarginEstimator::new(Arc::clone(&gateway)));
        let order_store = Arc::new(OrderStore::new());

        let recorder = if config.recorder.auto_start {
            let recorder_config = TickRecorderConfig {
                directory: config.recorder.directory.clone(),
                flush_threshold: config.recorder.flush_threshold,
                flush_interval: std::time::Duration::from_millis(config.recorder.flush_interval_ms),
                compress_on_close: config.recorder.compress_after_close,
            };
            let session_name = format!("session-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
            Some(Arc::new(Recorder::start(recorder_config, &session_name)?))
        } else {
            None
        };

        Ok(Self {
            config,
            calendar,
            gateway,
            idempotency,
            kill_switch,
            queue,
            router,
            update_handler,
            timeout_monitor,
            fill_tracker,
            subscriptions,
            condition_engine,
            margin_service,
            margin_estimator,
            session,
            recorder,
            order_store,
            live_broker,
        })
    }

    /// Installs OS signal handlers for the kill switch. Call once, after
    /// `bootstrap`, before `run`.
    pub fn install_signal_handlers(&self) -> Result<(), signal_hook::Error> {
        self.kill_switch.install_signal_handlers()
    }

    /// Drives every background worker (timeout monitor, session rotation,
    /// and — in live mode — the broker postback consumer) until `shutdown`
    /// fires. The order queue's consumer is started separately via
    /// [`crate::queue::spawn_consumer`] since its per-order handler is
    /// caller-specific (it needs access to the Gateway/Order Store in
    /// whatever way the binary wires them together).
    pub async fn run(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(mode = self.config.trading.mode.as_str(), "supervisor starting background workers");

        let timeout_monitor = Arc::clone(&self.timeout_monitor);
        let gateway = Arc::clone(&self.gateway);
        let order_store_source = Arc::clone(&self.order_store);
        let timeout_shutdown = shutdown.clone();
        let timeout_task = tokio::spawn(async move {
            timeout_monitor
                .run(gateway, move || order_store_source.active_orders(), timeout_shutdown)
                .await;
        });

        let session_task = self.session.clone().map(|session| {
            let session_shutdown = shutdown.clone();
            tokio::spawn(async move { session.run(session_shutdown).await })
        });

        let postback_task = self.live_broker.clone().map(|broker| {
            let order_store = Arc::clone(&self.order_store);
            let update_handler = Arc::clone(&self.update_handler);
            let fill_tracker = Arc::clone(&self.fill_tracker);
            let mut postback_shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut updates = broker.subscribe_updates();
                loop {
                    tokio::select! {
                        received = updates.recv() => {
                            match received {
                                Ok(update) => apply_broker_update(&order_store, &update_handler, &fill_tracker, update),
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                    warn!(skipped, "postback consumer lagged, some broker updates were dropped");
                                }
                                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                            }
                        }
                        _ = postback_shutdown.changed() => {
                            if *postback_shutdown.borrow() {
                                info!("postback consumer shutting down");
                                return;
                            }
                        }
                    }
                }
            })
        });

        if let Err(e) = timeout_task.await {
            warn!(error = %e, "timeout monitor task panicked");
        }
        if let Some(task) = session_task {
            if let Err(e) = task.await {
                warn!(error = %e, "session coordinator task panicked");
            }
        }
        if let Some(task) = postback_task {
            if let Err(e) = task.await {
                warn!(error = %e, "postback consumer task panicked");
            }
        }

        info!("supervisor background workers stopped");
    }
}

/// Applies one broker push update to the Order Store and, when the
/// resulting order carries a multi-leg `correlation_id`, reports the
/// outcome to the Fill Tracker (spec §4.2 note: legs of a combined order
/// are correlated by this id).
fn apply_broker_update(
    order_store: &OrderStore,
    update_handler: &UpdateHandler,
    fill_tracker: &FillTracker,
    update: crate::domain::BrokerOrderUpdate,
) {
    use crate::domain::OrderEventKind;

    let Some(event) = order_store.apply_update(update_handler, update) else {
        return;
    };

    info!(order_id = %event.order.id, kind = ?event.kind, "order event from broker postback");

    let Some(correlation_id) = event.order.request.correlation_id.as_deref() else {
        return;
    };
    match event.kind {
        OrderEventKind::Filled => fill_tracker.on_fill(correlation_id),
        OrderEventKind::Rejected => {
            let reason = event.order.rejection_reason.clone().unwrap_or_else(|| "rejected".into());
            fill_tracker.on_reject(correlation_id, reason);
        }
        _ => {}
    }
}

fn calendar_from_config(config: &Config) -> CoreResult<Calendar> {
    let boundary = chrono::NaiveTime::parse_from_str(&config.session.six_am_boundary, "%H:%M:%S").map_err(|e| {
        CoreError::ValidationFailure { field: "session.sixAmBoundary".into(), reason: e.to_string() }
    })?;
    let mut calendar = Calendar::default();
    calendar.session_expiry = boundary;
    Ok(calendar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdempotencyConfig, OrderConfig, RecorderConfig, SessionConfig, SimulatorConfig, SubscriptionConfig, TradingConfig};

    fn simulated_config() -> Config {
        Config {
            trading: TradingConfig { mode: "simulated".into(), broker_base_url: None, broker_api_key: None },
            simulator: SimulatorConfig::default(),
            subscription: SubscriptionConfig::default(),
            idempotency: IdempotencyConfig::default(),
            order: OrderConfig::default(),
            session: SessionConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }

    #[test]
    fn bootstraps_in_simulated_mode_without_a_broker_url() {
        let supervisor = Supervisor::bootstrap(simulated_config()).unwrap();
        assert_eq!(supervisor.gateway.mode(), ExecutionMode::Simulated);
        assert!(supervisor.session.is_none());
    }

    #[test]
    fn live_mode_requires_a_broker_base_url() {
        let mut config = simulated_config();
        config.trading.mode = "live".into();
        let err = Supervisor::bootstrap(config).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure { .. }));
    }

    #[test]
    fn live_mode_wires_a_session_coordinator() {
        let mut config = simulated_config();
        config.trading.mode = "live".into();
        config.trading.broker_base_url = Some("https://broker.example".into());
        config.trading.broker_api_key = Some("key".into());
        let supervisor = Supervisor::bootstrap(config).unwrap();
        assert_eq!(supervisor.gateway.mode(), ExecutionMode::Live);
        assert!(supervisor.session.is_some());
    }

    #[test]
    fn rejects_unknown_trading_mode() {
        let mut config = simulated_config();
        config.trading.mode = "paper".into();
        assert!(Supervisor::bootstrap(config).is_err());
    }

    #[test]
    fn recorder_auto_starts_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = simulated_config();
        config.recorder.auto_start = true;
        config.recorder.directory = dir.path().to_path_buf();
        let supervisor = Supervisor::bootstrap(config).unwrap();
        assert!(supervisor.recorder.is_some());
    }
}
