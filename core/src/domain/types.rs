use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal order identifier. Distinct from the broker order id, which is
/// only assigned once the order has actually been placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ord-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Sl,
    SlM,
}

impl OrderType {
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Sl)
    }

    pub fn requires_trigger_price(&self) -> bool {
        matches!(self, OrderType::Sl | OrderType::SlM)
    }
}

/// Product code, e.g. intraday vs carry-forward margining. Broker-specific
/// strings are passed through verbatim rather than re-encoded into an enum
/// this core would have to keep in lockstep with every broker's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product(pub String);

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    TriggerPending,
    Partial,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmendmentStatus {
    None,
    ModifyRequested,
    ModifySent,
    ModifyConfirmed,
    ModifyRejected,
}

/// Input to the Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument_token: u64,
    pub trading_symbol: String,
    pub exchange: String,
    pub side: Side,
    pub order_type: OrderType,
    pub product: Product,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub strategy_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl OrderRequest {
    /// Structural validation independent of the Router's dedup/risk gates:
    /// quantity positive, limit price present for LIMIT/SL, trigger price
    /// present for SL/SL_M.
    pub fn validate(&self) -> Result<(), crate::errors::CoreError> {
        if self.quantity <= Decimal::ZERO {
            return Err(crate::errors::CoreError::ValidationFailure {
                field: "quantity".into(),
                reason: "must be positive".into(),
            });
        }
        if self.order_type.requires_limit_price() && self.limit_price.is_none() {
            return Err(crate::errors::CoreError::ValidationFailure {
                field: "limit_price".into(),
                reason: format!("required for {:?}", self.order_type),
            });
        }
        if self.order_type.requires_trigger_price() && self.trigger_price.is_none() {
            return Err(crate::errors::CoreError::ValidationFailure {
                field: "trigger_price".into(),
                reason: format!("required for {:?}", self.order_type),
            });
        }
        Ok(())
    }
}

/// Domain order entity. Exclusively owned by the order subsystem; every
/// other component receives clones (read-only views).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub request: OrderRequest,
    /// The id computed for the Router's idempotency check. Distinct from
    /// the caller-supplied `correlation_id` (which may be absent or shared
    /// across legs); this one is always set.
    pub client_request_id: String,
    /// Set once `Gateway::place_order` returns successfully.
    pub broker_order_id: Option<String>,
    /// Exchange-assigned id, distinct from `broker_order_id` (which is the
    /// OMS id usable for modify/cancel). Populated from broker push
    /// updates when present.
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub rejection_reason: Option<String>,
    pub amendment_status: AmendmentStatus,
    pub placed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(request: OrderRequest, client_request_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::generate(),
            request,
            client_request_id,
            broker_order_id: None,
            exchange_order_id: None,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            rejection_reason: None,
            amendment_status: AmendmentStatus::None,
            placed_at: None,
            updated_at: now,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.request.quantity - self.filled_quantity
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// A position as maintained by the position subsystem. `label` disambiguates
/// the broker's "day" vs "net" views of the same instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionLabel {
    Day,
    Net,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument_token: u64,
    pub symbol: String,
    pub label: PositionLabel,
    /// Signed quantity: positive long, negative short.
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_price: Option<Decimal>,
}

impl Position {
    pub fn flat(instrument_token: u64, symbol: String, label: PositionLabel) -> Self {
        Self {
            instrument_token,
            symbol,
            label,
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_price: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }
}

/// Admission priority: lower numeric value drains first (spec §3/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    KillSwitch = 0,
    RiskExit = 1,
    StrategyExit = 2,
    StrategyAdjustment = 3,
    StrategyEntry = 4,
    Manual = 5,
}

/// An admitted order request waiting in the priority queue.
#[derive(Debug, Clone)]
pub struct PrioritizedOrder {
    pub request: OrderRequest,
    pub priority: Priority,
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
}

/// Ordered by (priority asc, sequence asc) so a `BinaryHeap` (a max-heap)
/// can be used as a min-heap by reversing the comparison.
impl PartialEq for PrioritizedOrder {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for PrioritizedOrder {}

impl PartialOrd for PrioritizedOrder {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedOrder {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.sequence).cmp(&(other.priority, other.sequence))
    }
}

/// Subscriber priority used by the Subscription Manager's eviction policy.
/// `Strategy` subscriptions are never evicted (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriberPriority {
    Condition,
    Manual,
    Strategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionEntry {
    pub subscriber_key: String,
    pub instrument_token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Gt,
    Lt,
    Gte,
    Lte,
    CrossesAbove,
    CrossesBelow,
    Between,
    Outside,
}

impl ConditionOperator {
    pub fn needs_secondary_threshold(&self) -> bool {
        matches!(self, ConditionOperator::Between | ConditionOperator::Outside)
    }

    pub fn needs_previous_value(&self) -> bool {
        matches!(
            self,
            ConditionOperator::CrossesAbove | ConditionOperator::CrossesBelow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    Tick,
    Interval1m,
    Interval5m,
    Interval15m,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    Active,
    Triggered,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionAction {
    Deploy,
    Arm,
    Alert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub id: String,
    pub instrument_token: u64,
    pub indicator_id: String,
    pub operator: ConditionOperator,
    pub primary_threshold: Decimal,
    pub secondary_threshold: Option<Decimal>,
    pub evaluation_mode: EvaluationMode,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub cooldown_minutes: i64,
    pub max_trigger_count: u32,
    pub current_trigger_count: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub status: ConditionStatus,
    pub action: ConditionAction,
    /// Retained across evaluations so CROSSES_ABOVE/CROSSES_BELOW fire
    /// exactly once (spec §4.10).
    pub previous_value: Option<Decimal>,
}

/// Fields a caller wants to change on an in-flight order. `None` means
/// leave that field untouched (spec §4.4: amendments are partial).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAmendment {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
}

impl OrderAmendment {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.limit_price.is_none() && self.trigger_price.is_none()
    }
}

/// Broker's acknowledgement of a successful placement, before any fill or
/// rejection update has arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrderAck {
    pub broker_order_id: String,
}

/// Margin figures as reported by (or estimated against) the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarginSnapshot {
    pub required: Decimal,
    pub available: Decimal,
    pub span: Decimal,
    pub exposure: Decimal,
}

/// A single broker push notification about an order's lifecycle (spec §6
/// "fill/order push contract"). Translated into an [`OrderEvent`] by the
/// update handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderUpdate {
    pub broker_order_id: String,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A single 88-byte tick frame (spec §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedTick {
    pub timestamp_epoch_ms: u64,
    pub instrument_token: u64,
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub oi: f64,
    pub oi_change: f64,
    pub received_at_nanos: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_request_requires_limit_price_for_limit_orders() {
        let req = OrderRequest {
            instrument_token: 1,
            trading_symbol: "NIFTY24JUL".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            product: Product("NRML".into()),
            quantity: dec!(50),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn order_request_rejects_non_positive_quantity() {
        let req = OrderRequest {
            instrument_token: 1,
            trading_symbol: "NIFTY24JUL".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            product: Product("NRML".into()),
            quantity: dec!(0),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn priority_orders_kill_switch_first() {
        let mut ps = vec![Priority::Manual, Priority::KillSwitch, Priority::StrategyEntry];
        ps.sort();
        assert_eq!(ps[0], Priority::KillSwitch);
        assert_eq!(ps[2], Priority::Manual);
    }

    #[test]
    fn prioritized_order_ordering_is_priority_then_sequence() {
        let now = Utc::now();
        let req = |qty: i64| OrderRequest {
            instrument_token: 1,
            trading_symbol: "X".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            product: Product("NRML".into()),
            quantity: Decimal::from(qty),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        };
        let a = PrioritizedOrder {
            request: req(10),
            priority: Priority::Manual,
            sequence: 1,
            enqueued_at: now,
        };
        let b = PrioritizedOrder {
            request: req(1),
            priority: Priority::KillSwitch,
            sequence: 2,
            enqueued_at: now,
        };
        assert!(b < a, "kill switch outranks manual regardless of sequence");
    }

    #[test]
    fn order_terminal_status_detection() {
        assert!(OrderStatus::Complete.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }
}
