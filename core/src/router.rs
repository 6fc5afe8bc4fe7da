//! Order Router (spec §4.2): the single admission point for every order
//! request in the system, strategy- or operator-originated alike. Applies,
//! in order: the kill-switch gate, the idempotency gate, an externally
//! supplied risk gate, then enqueues onto the priority queue and emits a
//! decision record.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{OrderRequest, Priority, PrioritizedOrder};
use crate::errors::{CoreError, CoreResult, DecisionOutcome, DecisionRecord};
use crate::idempotency::IdempotencyStore;
use crate::kill_switch::KillSwitch;
use crate::queue::OrderQueue;

/// A pluggable pre-trade risk check (position limits, margin headroom,
/// max-loss-per-day, etc.) supplied by whatever strategy/runtime layer sits
/// above this core. The Router treats it as an opaque gate: any `Err`
/// becomes a rejection, with the message surfaced verbatim.
pub trait RiskGate: Send + Sync {
    fn check(&self, request: &OrderRequest) -> Result<(), String>;
}

/// A risk gate that accepts everything; used where no external risk layer
/// is wired in (tests, the replay binary).
pub struct AllowAll;
impl RiskGate for AllowAll {
    fn check(&self, _request: &OrderRequest) -> Result<(), String> {
        Ok(())
    }
}

pub struct OrderRouter {
    queue: Arc<OrderQueue>,
    idempotency: Arc<IdempotencyStore>,
    kill_switch: Arc<KillSwitch>,
    risk_gate: Arc<dyn RiskGate>,
}

impl OrderRouter {
    pub fn new(
        queue: Arc<OrderQueue>,
        idempotency: Arc<IdempotencyStore>,
        kill_switch: Arc<KillSwitch>,
        risk_gate: Arc<dyn RiskGate>,
    ) -> Self {
        Self {
            queue,
            idempotency,
            kill_switch,
            risk_gate,
        }
    }

    /// Admits `request` at `priority`, or rejects it with a reason. Always
    /// returns a [`DecisionRecord`], even on rejection, so callers have a
    /// uniform audit trail (spec §7 propagation rule).
    pub fn admit(&self, request: OrderRequest, priority: Priority) -> DecisionRecord {
        let correlation_id = request.correlation_id.clone();

        match self.admit_inner(request, priority) {
            Ok(sequence) => {
                let record = DecisionRecord {
                    correlation_id,
                    outcome: DecisionOutcome::Accepted {
                        order_id: sequence.to_string(),
                    },
                };
                info!(%record, "router admitted order");
                record
            }
            Err(e) => {
                let record = DecisionRecord {
                    correlation_id,
                    outcome: DecisionOutcome::Rejected { reason: e.to_string() },
                };
                warn!(%record, "router rejected order");
                record
            }
        }
    }

    fn admit_inner(&self, request: OrderRequest, priority: Priority) -> CoreResult<u64> {
        if self.kill_switch.is_active() && priority != Priority::KillSwitch {
            return Err(CoreError::KillSwitchActive);
        }

        request.validate()?;

        let now_ms = Utc::now().timestamp_millis();
        let dedup_key = self.idempotency.key_for(&request, now_ms);
        if self.idempotency.is_duplicate(dedup_key) {
            return Err(CoreError::IdempotencyDuplicate);
        }

        if let Err(reason) = self.risk_gate.check(&request) {
            return Err(CoreError::ValidationFailure {
                field: "risk".into(),
                reason,
            });
        }

        let sequence = self.queue.next_sequence();
        self.queue.push(PrioritizedOrder {
            request,
            priority,
            sequence,
            enqueued_at: Utc::now(),
        });
        self.idempotency.mark(dedup_key);

        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Product, Side};
    use crate::gateway::{simulated::SimulatedBroker, simulated::SimulatedBrokerConfig, BrokerageGateway, ExecutionMode};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn router() -> OrderRouter {
        let gateway = Arc::new(BrokerageGateway::new(
            ExecutionMode::Simulated,
            Arc::new(SimulatedBroker::new(SimulatedBrokerConfig::default())),
        ));
        OrderRouter::new(
            Arc::new(OrderQueue::new()),
            Arc::new(IdempotencyStore::new(Duration::from_secs(300))),
            Arc::new(KillSwitch::new(gateway)),
            Arc::new(AllowAll),
        )
    }

    fn request(strategy: &str) -> OrderRequest {
        OrderRequest {
            instrument_token: 1,
            trading_symbol: "NIFTY24JUL24000CE".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            product: Product("MIS".into()),
            quantity: dec!(75),
            limit_price: None,
            trigger_price: None,
            strategy_id: Some(strategy.into()),
            correlation_id: Some("corr-1".into()),
        }
    }

    #[test]
    fn admits_a_valid_order() {
        let router = router();
        let record = router.admit(request("s1"), Priority::StrategyEntry);
        assert!(matches!(record.outcome, DecisionOutcome::Accepted { .. }));
    }

    #[test]
    fn rejects_structurally_invalid_orders() {
        let router = router();
        let mut req = request("s1");
        req.quantity = dec!(0);
        let record = router.admit(req, Priority::StrategyEntry);
        assert!(matches!(record.outcome, DecisionOutcome::Rejected { .. }));
    }

    #[test]
    fn rejects_duplicate_within_window() {
        let router = router();
        let first = router.admit(request("s1"), Priority::StrategyEntry);
        assert!(matches!(first.outcome, DecisionOutcome::Accepted { .. }));
        let second = router.admit(request("s1"), Priority::StrategyEntry);
        match second.outcome {
            DecisionOutcome::Rejected { reason } => assert!(reason.contains("duplicate")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn kill_switch_blocks_everything_below_kill_switch_priority() {
        let gateway = Arc::new(BrokerageGateway::new(
            ExecutionMode::Simulated,
            Arc::new(SimulatedBroker::new(SimulatedBrokerConfig::default())),
        ));
        let ks = Arc::new(KillSwitch::new(gateway));
        ks.activate("test");
        let router = OrderRouter::new(
            Arc::new(OrderQueue::new()),
            Arc::new(IdempotencyStore::new(Duration::from_secs(300))),
            ks,
            Arc::new(AllowAll),
        );
        let record = router.admit(request("s1"), Priority::StrategyEntry);
        assert!(matches!(record.outcome, DecisionOutcome::Rejected { .. }));
    }
}
