use super::{ConditionRule, Order, OrderStatus};
use chrono::{DateTime, Utc};

/// Identifies whether a tick came from the live feed or a specific replay
/// session, so downstream components can distinguish the two (spec §4.11
/// Player: "a source identifier equals the Player instance").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickSource {
    Live,
    Replay(String),
}

#[derive(Debug, Clone)]
pub struct TickEvent {
    pub instrument_token: u64,
    pub last_price: f64,
    pub timestamp_epoch_ms: u64,
    pub source: TickSource,
}

#[derive(Debug, Clone)]
pub enum OrderEventKind {
    Placed,
    Filled,
    Partial,
    Rejected,
    Cancelled,
    Modified,
}

/// Emitted whenever an order's visible state changes. Carries the domain
/// snapshot and, where defined, the previous status.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub kind: OrderEventKind,
    pub order: Order,
    pub previous_status: Option<OrderStatus>,
    pub emitted_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(kind: OrderEventKind, order: Order, previous_status: Option<OrderStatus>) -> Self {
        Self {
            kind,
            order,
            previous_status,
            emitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConditionTriggered {
    pub rule: ConditionRule,
    pub observed_value: rust_decimal::Decimal,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReplayProgress {
    pub source: String,
    pub ticks_played: u64,
    pub ticks_total: u64,
    pub speed: f64,
}

#[derive(Debug, Clone)]
pub struct ReplayComplete {
    pub source: String,
    pub ticks_played: u64,
}

/// A single channel every worker publishes onto. Kept as a plain enum
/// (rather than N separate channels) so the supervisor can fan events out
/// to whichever collaborators (UI, journaling, metrics) it wires up —
/// those collaborators are out of scope for this core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Order(OrderEvent),
    Tick(TickEvent),
    ConditionTriggered(ConditionTriggered),
    ReplayProgress(ReplayProgress),
    ReplayComplete(ReplayComplete),
}
