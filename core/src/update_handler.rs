//! Order Update Handler (spec §4.5): translates broker push notifications
//! into domain [`OrderEvent`]s and applies them to the order record. This
//! is the only place broker wire statuses are mapped onto
//! [`OrderStatus`] transitions outside the adapters themselves.

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::{BrokerOrderUpdate, Order, OrderEvent, OrderEventKind, OrderStatus};

pub struct UpdateHandler;

impl UpdateHandler {
    pub fn new() -> Self {
        Self
    }

    /// Applies `update` to `order` in place and returns the event to emit,
    /// or `None` if the update carries no new information. Idempotency
    /// guard: a REJECTED (or CANCELLED) transition is always acted on;
    /// every other update is only acted on if filled quantity strictly
    /// increased, rejecting stale or duplicate pushes that repeat an
    /// already-applied fill.
    pub fn apply(&self, order: &mut Order, update: BrokerOrderUpdate) -> Option<OrderEvent> {
        if order.status.is_terminal() {
            warn!(order_id = %order.id, status = ?order.status, "update received for terminal order, ignoring");
            return None;
        }

        let advances_fill = update.filled_quantity > order.filled_quantity;
        let is_terminal_push = matches!(update.status, OrderStatus::Rejected | OrderStatus::Cancelled);
        if !advances_fill && !is_terminal_push {
            debug!(order_id = %order.id, "discarding update with non-increasing filled quantity");
            return None;
        }

        let previous_status = order.status;
        order.exchange_order_id = update.exchange_order_id.or(order.exchange_order_id.take());
        order.filled_quantity = update.filled_quantity;
        order.avg_fill_price = update.avg_fill_price.or(order.avg_fill_price);
        order.rejection_reason = update.rejection_reason.clone();
        order.status = update.status;
        order.updated_at = update.updated_at;

        let kind = match update.status {
            OrderStatus::Complete => OrderEventKind::Filled,
            OrderStatus::Partial => OrderEventKind::Partial,
            OrderStatus::Rejected => OrderEventKind::Rejected,
            OrderStatus::Cancelled => OrderEventKind::Cancelled,
            OrderStatus::Open | OrderStatus::TriggerPending if previous_status == OrderStatus::Pending => {
                OrderEventKind::Placed
            }
            _ => return None,
        };

        Some(OrderEvent::new(kind, order.clone(), Some(previous_status)))
    }
}

impl Default for UpdateHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderRequest, OrderType, Product, Side};
    use rust_decimal_macros::dec;

    fn base_order() -> Order {
        let request = OrderRequest {
            instrument_token: 1,
            trading_symbol: "NIFTY24JUL24000CE".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            product: Product("MIS".into()),
            quantity: dec!(75),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        };
        let mut order = Order::new(request, "c1".into(), Utc::now());
        order.status = OrderStatus::Open;
        order.broker_order_id = Some("B1".into());
        order
    }

    fn update(status: OrderStatus, filled: rust_decimal::Decimal, at: chrono::DateTime<Utc>) -> BrokerOrderUpdate {
        BrokerOrderUpdate {
            broker_order_id: "B1".into(),
            exchange_order_id: None,
            status,
            filled_quantity: filled,
            avg_fill_price: None,
            rejection_reason: None,
            updated_at: at,
        }
    }

    #[test]
    fn complete_status_emits_filled_event() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        let now = order.updated_at + chrono::Duration::seconds(1);
        let event = handler.apply(&mut order, update(OrderStatus::Complete, dec!(75), now)).unwrap();
        assert!(matches!(event.kind, OrderEventKind::Filled));
        assert_eq!(order.status, OrderStatus::Complete);
    }

    #[test]
    fn partial_status_emits_partial_event() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        let now = order.updated_at + chrono::Duration::seconds(1);
        let event = handler.apply(&mut order, update(OrderStatus::Partial, dec!(25), now)).unwrap();
        assert!(matches!(event.kind, OrderEventKind::Partial));
        assert_eq!(order.filled_quantity, dec!(25));
    }

    #[test]
    fn duplicate_update_with_non_increasing_fill_is_discarded() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        let first = order.updated_at + chrono::Duration::seconds(1);
        handler.apply(&mut order, update(OrderStatus::Partial, dec!(25), first)).unwrap();

        let replay = order.updated_at + chrono::Duration::seconds(2);
        assert!(handler.apply(&mut order, update(OrderStatus::Partial, dec!(25), replay)).is_none());
        assert_eq!(order.filled_quantity, dec!(25));
        assert_eq!(order.status, OrderStatus::Partial);
    }

    #[test]
    fn rejection_is_acted_on_even_with_non_increasing_fill() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        let now = order.updated_at + chrono::Duration::seconds(1);
        let event = handler.apply(&mut order, update(OrderStatus::Rejected, dec!(0), now)).unwrap();
        assert!(matches!(event.kind, OrderEventKind::Rejected));
        assert_eq!(order.status, OrderStatus::Rejected);
    }

    #[test]
    fn update_on_terminal_order_is_ignored() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        order.status = OrderStatus::Complete;
        let now = order.updated_at + chrono::Duration::seconds(1);
        assert!(handler.apply(&mut order, update(OrderStatus::Cancelled, dec!(75), now)).is_none());
        assert_eq!(order.status, OrderStatus::Complete);
    }

    #[test]
    fn rejection_carries_reason_through() {
        let handler = UpdateHandler::new();
        let mut order = base_order();
        let now = order.updated_at + chrono::Duration::seconds(1);
        let mut upd = update(OrderStatus::Rejected, dec!(0), now);
        upd.rejection_reason = Some("margin shortfall".into());
        let event = handler.apply(&mut order, upd).unwrap();
        assert!(matches!(event.kind, OrderEventKind::Rejected));
        assert_eq!(order.rejection_reason.as_deref(), Some("margin shortfall"));
    }
}
